//! One analysis request: fit → efficiency → allocate → simulate → impact.

use budgetmix_core::config::check_fraction;
use budgetmix_core::{
    AppConfig, Channel, ChannelMap, EfficiencyMode, EngineError, EngineResult, ObservationSet,
    ScenarioBase, WeightingScheme,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocation::{AllocationPlan, BudgetReallocator};
use crate::contribution::{channel_contributions, ChannelContribution};
use crate::efficiency::EfficiencyCalculator;
use crate::marginal::MarginalImpactEstimator;
use crate::model::{AttributionModel, HoldoutReport};
use crate::switching::{least_efficient, ReallocationScenario, SwitchingCostSimulator};

/// User-chosen parameters for a single analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub efficiency_mode: EfficiencyMode,
    pub weighting: WeightingScheme,
    pub scenario_base: ScenarioBase,
    pub total_budget: f64,
    pub reduction_fraction: f64,
    pub switching_cost_fraction: f64,
    pub channel_to_reduce: Option<String>,
    pub holdout_fraction: f64,
    pub holdout_seed: u64,
}

impl AnalysisParams {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            efficiency_mode: config.analysis.efficiency_mode,
            weighting: config.analysis.weighting,
            scenario_base: config.analysis.scenario_base,
            total_budget: config.simulation.total_budget,
            reduction_fraction: config.simulation.reduction_fraction,
            switching_cost_fraction: config.simulation.switching_cost_fraction,
            channel_to_reduce: config.simulation.channel_to_reduce.clone(),
            holdout_fraction: config.analysis.holdout_fraction,
            holdout_seed: config.analysis.holdout_seed,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if !self.total_budget.is_finite() || self.total_budget < 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "total budget must be a non-negative number, got {}",
                self.total_budget
            )));
        }
        check_fraction("reduction_fraction", self.reduction_fraction)?;
        check_fraction("switching_cost_fraction", self.switching_cost_fraction)?;
        if !(0.0..1.0).contains(&self.holdout_fraction) {
            return Err(EngineError::InvalidParameter(format!(
                "holdout_fraction must be in [0, 1), got {}",
                self.holdout_fraction
            )));
        }
        Ok(())
    }
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything one analysis run produces, as plain numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub channels: Vec<String>,
    pub params: AnalysisParams,
    pub model: AttributionModel,
    pub holdout: Option<HoldoutReport>,
    pub channel_summaries: Vec<Channel>,
    pub efficiencies: ChannelMap,
    pub allocation: AllocationPlan,
    pub scenario: ReallocationScenario,
    pub marginal_impact: ChannelMap,
    pub contributions: Vec<ChannelContribution>,
}

/// Run the full pipeline over `channels` of `observations`.
///
/// Any failure aborts the run; no partial report is returned.
pub fn run_analysis(
    observations: &ObservationSet,
    channels: &[String],
    params: &AnalysisParams,
) -> EngineResult<AnalysisReport> {
    params.validate()?;
    observations.validate_channels(channels)?;
    let observations = observations.select_channels(channels);

    let model = AttributionModel::fit(&observations, channels)?;

    let calculator = EfficiencyCalculator::new(params.efficiency_mode);
    let channel_summaries = calculator.summarize(&observations, channels, Some(&model))?;
    let efficiencies: ChannelMap = channel_summaries
        .iter()
        .map(|c| (c.name.clone(), c.efficiency))
        .collect();

    let reallocator = match params.weighting {
        WeightingScheme::Efficiency => BudgetReallocator::efficiency_weighted(),
        WeightingScheme::Blended => BudgetReallocator::blended(
            channel_summaries
                .iter()
                .map(|c| (c.name.clone(), c.attributed_sales))
                .collect(),
        ),
    };
    let allocation = reallocator.allocate(&efficiencies, params.total_budget)?;

    let base = match params.scenario_base {
        ScenarioBase::Proposed => allocation.clone(),
        ScenarioBase::Historical => {
            AllocationPlan::historical(observations.spend_totals(channels))
        }
    };
    let target = match &params.channel_to_reduce {
        Some(channel) => channel.clone(),
        None => least_efficient(&efficiencies).ok_or_else(|| {
            EngineError::InvalidParameter("no channel available to reduce".to_string())
        })?,
    };
    let simulator =
        SwitchingCostSimulator::new(params.reduction_fraction, params.switching_cost_fraction)?;
    let scenario = simulator.simulate(&efficiencies, &base, &target)?;

    let marginal_impact = MarginalImpactEstimator::estimate(&model, &observations)?;
    let contributions = channel_contributions(&model, &observations)?;
    let holdout = run_holdout(&observations, channels, params)?;

    let report = AnalysisReport {
        id: Uuid::new_v4(),
        computed_at: Utc::now(),
        channels: channels.to_vec(),
        params: params.clone(),
        model,
        holdout,
        channel_summaries,
        efficiencies,
        allocation,
        scenario,
        marginal_impact,
        contributions,
    };

    info!(
        report_id = %report.id,
        channels = channels.len(),
        r_squared = report.model.r_squared(),
        total_budget = params.total_budget,
        sales_delta = report.scenario.delta,
        "Analysis complete"
    );
    Ok(report)
}

/// Holdout diagnostics, skipped when disabled or when the training
/// partition would be too small or degenerate to fit.
fn run_holdout(
    observations: &ObservationSet,
    channels: &[String],
    params: &AnalysisParams,
) -> EngineResult<Option<HoldoutReport>> {
    if params.holdout_fraction == 0.0 {
        return Ok(None);
    }

    let rows = observations.complete_rows(channels).len();
    let test_rows = (rows as f64 * params.holdout_fraction).ceil() as usize;
    let train_rows = rows.saturating_sub(test_rows);
    if train_rows < channels.len() + 2 {
        warn!(
            rows,
            train_rows,
            required = channels.len() + 2,
            "Too few rows for a holdout split, skipping holdout evaluation"
        );
        return Ok(None);
    }

    match AttributionModel::evaluate_holdout(
        observations,
        channels,
        params.holdout_fraction,
        params.holdout_seed,
    ) {
        Ok(report) => Ok(Some(report)),
        Err(e @ (EngineError::SingularMatrix { .. } | EngineError::InsufficientData { .. })) => {
            warn!(
                error = %e,
                seed = params.holdout_seed,
                "Training partition cannot be fitted, skipping holdout evaluation"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationMethod;
    use budgetmix_core::Observation;
    use chrono::NaiveDate;

    fn names(cs: &[&str]) -> Vec<String> {
        cs.iter().map(|c| c.to_string()).collect()
    }

    /// Twelve months; sales = 1000 + 4·search + 2·social + 0.5·print ± 0.5.
    fn observations() -> ObservationSet {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        ObservationSet::new(
            (0..12u32)
                .map(|i| {
                    let f = i as f64;
                    let search = 100.0 + 10.0 * f;
                    let social = 50.0 + ((i * 7) % 5) as f64 * 8.0;
                    let print = 20.0 + ((i * 3) % 4) as f64 * 5.0;
                    let noise = if i % 2 == 0 { 0.5 } else { -0.5 };
                    let spend: ChannelMap = [
                        ("search".to_string(), search),
                        ("social".to_string(), social),
                        ("print".to_string(), print),
                    ]
                    .into_iter()
                    .collect();
                    Observation::new(
                        start + chrono::Months::new(i),
                        1_000.0 + 4.0 * search + 2.0 * social + 0.5 * print + noise,
                        spend,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_default_run() {
        let channels = names(&["search", "social", "print"]);
        let report = run_analysis(&observations(), &channels, &AnalysisParams::default()).unwrap();

        assert!(report.model.r_squared() > 0.9);
        assert_eq!(report.efficiencies.len(), 3);
        assert!(report.allocation.is_balanced());
        assert!((report.allocation.total_budget - 30_000_000.0).abs() < f64::EPSILON);
        assert_eq!(report.scenario.reduced_channel, "print");
        assert_eq!(report.scenario.before, report.allocation);
        assert_eq!(report.marginal_impact.len(), 3);
        assert_eq!(report.contributions.len(), 3);

        let holdout = report.holdout.expect("holdout should run on 12 rows");
        assert_eq!(holdout.test_rows, 3);
        assert_eq!(holdout.train_rows, 9);
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let channels = names(&["search", "social"]);
        let report = run_analysis(&observations(), &channels, &AnalysisParams::default()).unwrap();
        assert_eq!(report.marginal_impact.len(), 2);
        assert!(!report.efficiencies.contains_key("print"));
    }

    #[test]
    fn test_historical_base_and_named_target() {
        let params = AnalysisParams {
            scenario_base: ScenarioBase::Historical,
            channel_to_reduce: Some("social".to_string()),
            weighting: WeightingScheme::Blended,
            efficiency_mode: EfficiencyMode::Share,
            holdout_fraction: 0.0,
            ..AnalysisParams::default()
        };
        let channels = names(&["search", "social", "print"]);
        let obs = observations();
        let report = run_analysis(&obs, &channels, &params).unwrap();

        assert_eq!(report.scenario.reduced_channel, "social");
        assert_eq!(report.scenario.before.method, AllocationMethod::Historical);
        assert_eq!(report.scenario.before.allocations, obs.spend_totals(&channels));
        assert_eq!(report.allocation.method, AllocationMethod::Blended);
        assert!(report.holdout.is_none());
    }

    #[test]
    fn test_invalid_params_abort() {
        let channels = names(&["search", "social", "print"]);
        let params = AnalysisParams {
            switching_cost_fraction: 2.0,
            ..AnalysisParams::default()
        };
        assert!(matches!(
            run_analysis(&observations(), &channels, &params),
            Err(EngineError::InvalidParameter(_))
        ));

        let params = AnalysisParams {
            channel_to_reduce: Some("tv".to_string()),
            ..AnalysisParams::default()
        };
        assert!(matches!(
            run_analysis(&observations(), &channels, &params),
            Err(EngineError::ChannelMismatch(_))
        ));
    }

    #[test]
    fn test_rare_channel_does_not_abort_on_holdout_split() {
        // Promo spends in a single month, so most training splits see it constant.
        let rows: Vec<Observation> = observations()
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let promo = if i == 4 { 30.0 } else { 0.0 };
                let mut spend = row.spend.clone();
                spend.insert("promo".to_string(), promo);
                Observation::new(row.month, row.sales + 3.0 * promo, spend)
            })
            .collect();
        let obs = ObservationSet::new(rows);
        let channels = names(&["search", "social", "print", "promo"]);

        let mut skipped = 0;
        for seed in 0..32 {
            let params = AnalysisParams {
                holdout_fraction: 0.5,
                holdout_seed: seed,
                ..AnalysisParams::default()
            };
            let report = run_analysis(&obs, &channels, &params).unwrap();
            assert_eq!(report.efficiencies.len(), 4);
            assert!(report.allocation.is_balanced());
            if report.holdout.is_none() {
                skipped += 1;
            }
        }
        // The promo month lands in the test half for some seeds.
        assert!(skipped > 0);
    }

    #[test]
    fn test_too_few_rows_for_holdout_is_skipped() {
        let obs = ObservationSet::new(observations().rows()[..6].to_vec());
        let channels = names(&["search", "social", "print"]);
        let report = run_analysis(&obs, &channels, &AnalysisParams::default()).unwrap();
        assert!(report.holdout.is_none());
    }
}
