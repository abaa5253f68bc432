//! Marketing-mix attribution and budget reallocation engine.
//!
//! Fits a linear model of sales on channel spend, derives per-channel
//! efficiency, splits a future budget, simulates moving budget between
//! channels under a switching cost, and estimates marginal impact at mean
//! spend. Every stage is a pure function of its inputs.

pub mod allocation;
pub mod contribution;
pub mod efficiency;
pub mod marginal;
pub mod model;
pub mod pipeline;
pub mod switching;

pub use allocation::{AllocationMethod, AllocationPlan, BudgetReallocator};
pub use contribution::ChannelContribution;
pub use efficiency::EfficiencyCalculator;
pub use marginal::MarginalImpactEstimator;
pub use model::{AttributionModel, HoldoutReport, ModelDiagnostics};
pub use pipeline::{run_analysis, AnalysisParams, AnalysisReport};
pub use switching::{ReallocationScenario, SwitchingCostSimulator};
