use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::types::{EfficiencyMode, ScenarioBase, WeightingScheme};

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `BUDGETMIX__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub efficiency_mode: EfficiencyMode,
    #[serde(default)]
    pub weighting: WeightingScheme,
    #[serde(default)]
    pub scenario_base: ScenarioBase,
    /// Fraction of rows held out for test-set diagnostics. Zero disables.
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,
    #[serde(default = "default_holdout_seed")]
    pub holdout_seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_total_budget")]
    pub total_budget: f64,
    #[serde(default = "default_reduction_fraction")]
    pub reduction_fraction: f64,
    #[serde(default = "default_switching_cost_fraction")]
    pub switching_cost_fraction: f64,
    /// Channel to move budget away from. The least efficient one when unset.
    #[serde(default)]
    pub channel_to_reduce: Option<String>,
}

// Default functions
fn default_holdout_fraction() -> f64 {
    0.2
}
fn default_holdout_seed() -> u64 {
    42
}
fn default_total_budget() -> f64 {
    30_000_000.0
}
fn default_reduction_fraction() -> f64 {
    0.5
}
fn default_switching_cost_fraction() -> f64 {
    0.10
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            efficiency_mode: EfficiencyMode::default(),
            weighting: WeightingScheme::default(),
            scenario_base: ScenarioBase::default(),
            holdout_fraction: default_holdout_fraction(),
            holdout_seed: default_holdout_seed(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_budget: default_total_budget(),
            reduction_fraction: default_reduction_fraction(),
            switching_cost_fraction: default_switching_cost_fraction(),
            channel_to_reduce: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file and environment variables.
    pub fn load(path: Option<&str>) -> EngineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BUDGETMIX")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> EngineResult<Self> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let sim = &self.simulation;
        if !sim.total_budget.is_finite() || sim.total_budget < 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "total_budget must be a non-negative number, got {}",
                sim.total_budget
            )));
        }
        check_fraction("reduction_fraction", sim.reduction_fraction)?;
        check_fraction("switching_cost_fraction", sim.switching_cost_fraction)?;

        let holdout = self.analysis.holdout_fraction;
        if !(0.0..1.0).contains(&holdout) {
            return Err(EngineError::InvalidParameter(format!(
                "holdout_fraction must be in [0, 1), got {holdout}"
            )));
        }
        Ok(())
    }
}

/// Reject a fraction outside `[0, 1]` (NaN included).
pub fn check_fraction(name: &str, value: f64) -> EngineResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}
