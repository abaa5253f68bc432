//! Shared types, errors and configuration for the marketing-mix engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{EngineError, EngineResult};
pub use types::{
    Channel, ChannelMap, EfficiencyMode, Observation, ObservationSet, ScenarioBase,
    WeightingScheme,
};
