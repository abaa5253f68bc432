//! Per-channel efficiency: sales generated per unit of spend.

use budgetmix_core::{
    Channel, ChannelMap, EfficiencyMode, EngineError, EngineResult, Observation, ObservationSet,
};
use tracing::debug;

use crate::model::AttributionModel;

/// Efficiency from summed attributed sales and summed spend. A channel with
/// no spend has efficiency 0.
pub fn efficiency_from_totals(attributed_sales: f64, total_spend: f64) -> f64 {
    if total_spend == 0.0 {
        0.0
    } else {
        attributed_sales / total_spend
    }
}

/// Computes channel efficiencies under one explicitly chosen definition.
#[derive(Debug, Clone, Copy)]
pub struct EfficiencyCalculator {
    mode: EfficiencyMode,
}

impl EfficiencyCalculator {
    pub fn new(mode: EfficiencyMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> EfficiencyMode {
        self.mode
    }

    /// Channel → efficiency. `model` is required in `Ratio` mode and
    /// ignored otherwise.
    pub fn compute(
        &self,
        observations: &ObservationSet,
        channels: &[String],
        model: Option<&AttributionModel>,
    ) -> EngineResult<ChannelMap> {
        Ok(self
            .summarize(observations, channels, model)?
            .into_iter()
            .map(|c| (c.name, c.efficiency))
            .collect())
    }

    /// Full channel records: spend, attributed sales and efficiency.
    ///
    /// Negative efficiencies are kept as they are.
    pub fn summarize(
        &self,
        observations: &ObservationSet,
        channels: &[String],
        model: Option<&AttributionModel>,
    ) -> EngineResult<Vec<Channel>> {
        observations.validate_channels(channels)?;
        let rows = observations.complete_rows(channels);

        let attributed = match self.mode {
            EfficiencyMode::Ratio => {
                let model = model.ok_or_else(|| {
                    EngineError::InvalidParameter(
                        "ratio efficiency requires a fitted attribution model".to_string(),
                    )
                })?;
                model.ensure_channels(channels)?;
                regression_attribution(model, &rows, channels)
            }
            EfficiencyMode::Share => share_attribution(&rows, channels),
            EfficiencyMode::Gross => {
                let total_sales: f64 = rows.iter().map(|r| r.sales).sum();
                channels.iter().map(|c| (c.clone(), total_sales)).collect()
            }
        };

        let spend = observations.spend_totals(channels);
        let summaries: Vec<Channel> = channels
            .iter()
            .map(|c| {
                let total_spend = spend.get(c).copied().unwrap_or(0.0);
                let attributed_sales = attributed.get(c).copied().unwrap_or(0.0);
                Channel {
                    name: c.clone(),
                    total_spend,
                    attributed_sales,
                    efficiency: efficiency_from_totals(attributed_sales, total_spend),
                }
            })
            .collect();

        for c in &summaries {
            debug!(
                mode = ?self.mode,
                channel = %c.name,
                spend = c.total_spend,
                attributed = c.attributed_sales,
                efficiency = c.efficiency,
                "Channel efficiency"
            );
        }
        Ok(summaries)
    }
}

/// `Σ coefficient[c] · spend[c]` per channel.
fn regression_attribution(
    model: &AttributionModel,
    rows: &[&Observation],
    channels: &[String],
) -> ChannelMap {
    channels
        .iter()
        .map(|c| {
            let coef = model.coefficient(c).unwrap_or(0.0);
            let total: f64 = rows
                .iter()
                .filter_map(|r| r.spend_on(c))
                .map(|s| coef * s)
                .sum();
            (c.clone(), total)
        })
        .collect()
}

/// Each row's sales split across channels by their share of that row's
/// spend. Rows with no spend at all attribute nothing.
fn share_attribution(rows: &[&Observation], channels: &[String]) -> ChannelMap {
    let mut attributed: ChannelMap = channels.iter().map(|c| (c.clone(), 0.0)).collect();
    for row in rows {
        let row_spend = row.total_spend(channels);
        if row_spend == 0.0 {
            continue;
        }
        for c in channels {
            let spend = row.spend_on(c).unwrap_or(0.0);
            if let Some(total) = attributed.get_mut(c) {
                *total += row.sales * spend / row_spend;
            }
        }
    }
    attributed
}
