//! Average marginal impact: coefficient times mean historical spend.

use budgetmix_core::{ChannelMap, EngineError, EngineResult, ObservationSet};
use tracing::debug;

use crate::model::AttributionModel;

/// Estimates each channel's expected sales contribution at its average
/// historical spend level.
pub struct MarginalImpactEstimator;

impl MarginalImpactEstimator {
    /// `ami[c] = coefficient[c] · mean(spend[c])`.
    ///
    /// `observations` must carry exactly the channels `model` was fitted on.
    pub fn estimate(
        model: &AttributionModel,
        observations: &ObservationSet,
    ) -> EngineResult<ChannelMap> {
        model.ensure_channels(&observations.channels())?;

        let channels = model.channels();
        let rows = observations.complete_rows(channels).len();
        if rows == 0 {
            return Err(EngineError::InsufficientData { rows, required: 1 });
        }

        let means = observations.mean_spend(channels);
        let impact: ChannelMap = model
            .coefficients()
            .into_iter()
            .map(|(c, coef)| {
                let mean = means.get(&c).copied().unwrap_or(0.0);
                debug!(channel = %c, coefficient = coef, mean_spend = mean, "Marginal impact");
                (c, coef * mean)
            })
            .collect();
        Ok(impact)
    }
}
