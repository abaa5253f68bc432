//! Dollar value of sales attributed to each channel, gross and net of spend.

use budgetmix_core::{EngineResult, ObservationSet};
use serde::{Deserialize, Serialize};

use crate::model::AttributionModel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelContribution {
    pub channel: String,
    pub total_spend: f64,
    /// `Σ coefficient · spend` over the observations.
    pub attributed_sales: f64,
    /// `attributed_sales - total_spend`
    pub net_sales: f64,
}

/// Attributed and net sales per channel, in the model's channel order.
pub fn channel_contributions(
    model: &AttributionModel,
    observations: &ObservationSet,
) -> EngineResult<Vec<ChannelContribution>> {
    model.ensure_channels(&observations.channels())?;

    let spend = observations.spend_totals(model.channels());
    Ok(model
        .channels()
        .iter()
        .map(|c| {
            let total_spend = spend.get(c).copied().unwrap_or(0.0);
            let attributed_sales = model.coefficient(c).unwrap_or(0.0) * total_spend;
            ChannelContribution {
                channel: c.clone(),
                total_spend,
                attributed_sales,
                net_sales: attributed_sales - total_spend,
            }
        })
        .collect())
}
