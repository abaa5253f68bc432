//! Future budget allocation across channels.

use budgetmix_core::{ChannelMap, EngineError, EngineResult, WeightingScheme};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Relative tolerance for the budget conservation check.
pub const BUDGET_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How an allocation plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Every channel receives `budget / n`.
    EqualSplit,
    /// Proportional to efficiency.
    Efficiency,
    /// Proportional to the efficiency / historical-sales blend.
    Blended,
    /// Historical spend totals, taken as-is.
    Historical,
    /// Result of moving budget between channels.
    Reallocated,
}

/// Proposed spend per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub total_budget: f64,
    pub method: AllocationMethod,
    pub allocations: ChannelMap,
}

impl AllocationPlan {
    pub fn new(total_budget: f64, method: AllocationMethod, allocations: ChannelMap) -> Self {
        Self {
            total_budget,
            method,
            allocations,
        }
    }

    /// A plan whose budget is the sum of the given amounts.
    pub fn historical(spend: ChannelMap) -> Self {
        let total = spend.values().sum();
        Self::new(total, AllocationMethod::Historical, spend)
    }

    pub fn get(&self, channel: &str) -> Option<f64> {
        self.allocations.get(channel).copied()
    }

    /// Sum of the allocated amounts.
    pub fn allocated(&self) -> f64 {
        self.allocations.values().sum()
    }

    /// Whether the allocated amounts add up to the total budget.
    pub fn is_balanced(&self) -> bool {
        let scale = self.total_budget.abs().max(1.0);
        (self.allocated() - self.total_budget).abs() <= BUDGET_TOLERANCE * scale
    }

    /// Each channel's percentage of the allocated amount.
    pub fn proportions(&self) -> ChannelMap {
        let allocated = self.allocated();
        self.allocations
            .iter()
            .map(|(c, a)| {
                let pct = if allocated == 0.0 {
                    0.0
                } else {
                    a / allocated * 100.0
                };
                (c.clone(), pct)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BudgetReallocator
// ---------------------------------------------------------------------------

/// Splits a total budget across channels in proportion to a weight.
///
/// Negative weights are passed through, so a channel with negative
/// efficiency can receive a negative allocation. Callers wanting a
/// non-negative policy should run [`clamp_negative`] on the efficiencies
/// first.
#[derive(Debug, Clone)]
pub struct BudgetReallocator {
    scheme: WeightingScheme,
    historical_sales: Option<ChannelMap>,
}

impl BudgetReallocator {
    pub fn new(scheme: WeightingScheme) -> Self {
        Self {
            scheme,
            historical_sales: None,
        }
    }

    /// Pure efficiency weighting.
    pub fn efficiency_weighted() -> Self {
        Self::new(WeightingScheme::Efficiency)
    }

    /// Blended weighting over efficiency and historical sales.
    pub fn blended(historical_sales: ChannelMap) -> Self {
        Self::new(WeightingScheme::Blended).with_historical_sales(historical_sales)
    }

    pub fn with_historical_sales(mut self, historical_sales: ChannelMap) -> Self {
        self.historical_sales = Some(historical_sales);
        self
    }

    pub fn scheme(&self) -> WeightingScheme {
        self.scheme
    }

    /// Weight per channel under the configured scheme.
    pub fn weights(&self, efficiencies: &ChannelMap) -> EngineResult<ChannelMap> {
        match self.scheme {
            WeightingScheme::Efficiency => Ok(efficiencies.clone()),
            WeightingScheme::Blended => {
                let history = self.historical_sales.as_ref().ok_or_else(|| {
                    EngineError::InvalidParameter(
                        "blended weighting requires historical sales per channel".to_string(),
                    )
                })?;
                efficiencies
                    .iter()
                    .map(|(c, e)| {
                        let sales = history.get(c).copied().ok_or_else(|| {
                            EngineError::ChannelMismatch(format!(
                                "no historical sales for channel {c}"
                            ))
                        })?;
                        Ok((c.clone(), blended_weight(*e, sales)))
                    })
                    .collect()
            }
        }
    }

    /// Split `total_budget` across the channels of `efficiencies`.
    ///
    /// All-zero efficiencies, and weights that sum to zero, fall back to an
    /// equal split. The allocations always sum to `total_budget`.
    pub fn allocate(
        &self,
        efficiencies: &ChannelMap,
        total_budget: f64,
    ) -> EngineResult<AllocationPlan> {
        if efficiencies.is_empty() {
            return Err(EngineError::InvalidParameter(
                "cannot allocate a budget across zero channels".to_string(),
            ));
        }
        if !total_budget.is_finite() || total_budget < 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "total budget must be a non-negative number, got {total_budget}"
            )));
        }
        if let Some((c, e)) = efficiencies.iter().find(|(_, e)| !e.is_finite()) {
            return Err(EngineError::InvalidParameter(format!(
                "efficiency for channel {c} is not finite ({e})"
            )));
        }

        if efficiencies.values().all(|e| *e == 0.0) {
            info!(
                channels = efficiencies.len(),
                total_budget, "All efficiencies are zero, splitting budget equally"
            );
            return Ok(AllocationPlan::new(
                total_budget,
                AllocationMethod::EqualSplit,
                equal_split(efficiencies.keys(), total_budget),
            ));
        }

        let weights = self.weights(efficiencies)?;
        let weight_sum: f64 = weights.values().sum();
        if weight_sum == 0.0 || !weight_sum.is_finite() {
            warn!(
                weight_sum,
                scheme = ?self.scheme,
                "Allocation weights do not normalise, splitting budget equally"
            );
            return Ok(AllocationPlan::new(
                total_budget,
                AllocationMethod::EqualSplit,
                equal_split(efficiencies.keys(), total_budget),
            ));
        }

        let allocations: ChannelMap = weights
            .iter()
            .map(|(c, w)| (c.clone(), w / weight_sum * total_budget))
            .collect();

        let method = match self.scheme {
            WeightingScheme::Efficiency => AllocationMethod::Efficiency,
            WeightingScheme::Blended => AllocationMethod::Blended,
        };
        let plan = AllocationPlan::new(total_budget, method, allocations);
        debug!(
            total_budget,
            allocated = plan.allocated(),
            method = ?plan.method,
            "Budget allocated"
        );
        Ok(plan)
    }
}

/// `e · s / (e + s)`, or 0 when `e + s == 0`.
pub fn blended_weight(efficiency: f64, historical_sales: f64) -> f64 {
    let denominator = efficiency + historical_sales;
    if denominator == 0.0 {
        0.0
    } else {
        efficiency * historical_sales / denominator
    }
}

/// Replace negative efficiencies with zero.
pub fn clamp_negative(efficiencies: &ChannelMap) -> ChannelMap {
    efficiencies
        .iter()
        .map(|(c, e)| (c.clone(), e.max(0.0)))
        .collect()
}

fn equal_split<'a>(channels: impl ExactSizeIterator<Item = &'a String>, total: f64) -> ChannelMap {
    let share = total / channels.len() as f64;
    channels.map(|c| (c.clone(), share)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
