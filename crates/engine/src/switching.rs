//! What-if simulation of moving budget away from one channel, with a
//! switching-cost penalty on the moved spend.

use budgetmix_core::config::check_fraction;
use budgetmix_core::{ChannelMap, EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::allocation::{AllocationMethod, AllocationPlan};

/// Before/after view of one reallocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReallocationScenario {
    pub reduced_channel: String,
    pub reduction_fraction: f64,
    pub switching_cost_fraction: f64,
    pub moved_amount: f64,
    /// Portion of the moved amount each recipient receives.
    pub moved_shares: ChannelMap,
    pub before: AllocationPlan,
    pub after: AllocationPlan,
    pub sales_before: ChannelMap,
    pub sales_after: ChannelMap,
    pub total_sales_before: f64,
    pub total_sales_after: f64,
    /// Total after the same move with no switching cost.
    pub total_sales_without_switching_cost: f64,
    /// `total_sales_after - total_sales_before`
    pub delta: f64,
}

impl ReallocationScenario {
    /// Expected sales lost to switching costs.
    pub fn switching_cost_loss(&self) -> f64 {
        self.total_sales_without_switching_cost - self.total_sales_after
    }
}

/// Moves a fraction of one channel's budget evenly onto every other channel.
///
/// Only the moved spend is discounted by the switching cost; the spend a
/// recipient already had keeps its full efficiency.
#[derive(Debug, Clone, Copy)]
pub struct SwitchingCostSimulator {
    reduction_fraction: f64,
    switching_cost_fraction: f64,
}

impl SwitchingCostSimulator {
    pub fn new(reduction_fraction: f64, switching_cost_fraction: f64) -> EngineResult<Self> {
        check_fraction("reduction_fraction", reduction_fraction)?;
        check_fraction("switching_cost_fraction", switching_cost_fraction)?;
        Ok(Self {
            reduction_fraction,
            switching_cost_fraction,
        })
    }

    pub fn simulate(
        &self,
        efficiencies: &ChannelMap,
        current: &AllocationPlan,
        channel_to_reduce: &str,
    ) -> EngineResult<ReallocationScenario> {
        let eff_channels: BTreeSet<&String> = efficiencies.keys().collect();
        let plan_channels: BTreeSet<&String> = current.allocations.keys().collect();
        if eff_channels != plan_channels {
            return Err(EngineError::ChannelMismatch(
                "efficiencies and allocation cover different channels".to_string(),
            ));
        }

        let reduced_allocation = current.get(channel_to_reduce).ok_or_else(|| {
            EngineError::ChannelMismatch(format!(
                "channel to reduce {channel_to_reduce} is not in the allocation"
            ))
        })?;

        let recipients = current.allocations.len() - 1;
        if recipients == 0 && self.reduction_fraction > 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "no other channel can receive budget moved from {channel_to_reduce}"
            )));
        }

        let moved_amount = reduced_allocation * self.reduction_fraction;
        let share = if recipients == 0 {
            0.0
        } else {
            moved_amount / recipients as f64
        };
        let retained = 1.0 - self.switching_cost_fraction;

        let mut moved_shares = ChannelMap::new();
        let mut after = ChannelMap::new();
        let mut sales_before = ChannelMap::new();
        let mut sales_after = ChannelMap::new();
        let mut total_without_cost = 0.0;

        for (channel, allocation) in &current.allocations {
            let efficiency = efficiencies[channel];
            let before_sales = efficiency * allocation;

            let (new_allocation, new_sales, undiscounted) = if channel == channel_to_reduce {
                let remaining = allocation - moved_amount;
                let sales = efficiency * remaining;
                (remaining, sales, sales)
            } else {
                moved_shares.insert(channel.clone(), share);
                (
                    allocation + share,
                    efficiency * retained * share + efficiency * allocation,
                    efficiency * share + efficiency * allocation,
                )
            };

            after.insert(channel.clone(), new_allocation);
            sales_before.insert(channel.clone(), before_sales);
            sales_after.insert(channel.clone(), new_sales);
            total_without_cost += undiscounted;
        }

        let total_sales_before: f64 = sales_before.values().sum();
        let total_sales_after: f64 = sales_after.values().sum();

        let scenario = ReallocationScenario {
            reduced_channel: channel_to_reduce.to_string(),
            reduction_fraction: self.reduction_fraction,
            switching_cost_fraction: self.switching_cost_fraction,
            moved_amount,
            moved_shares,
            before: current.clone(),
            after: AllocationPlan::new(current.total_budget, AllocationMethod::Reallocated, after),
            sales_before,
            sales_after,
            total_sales_before,
            total_sales_after,
            total_sales_without_switching_cost: total_without_cost,
            delta: total_sales_after - total_sales_before,
        };

        debug!(
            moved = moved_amount,
            recipients,
            loss = scenario.switching_cost_loss(),
            "Switching cost applied"
        );
        info!(
            reduced = channel_to_reduce,
            before = total_sales_before,
            after = total_sales_after,
            delta = scenario.delta,
            "Reallocation simulated"
        );
        Ok(scenario)
    }
}

/// The channel with the lowest efficiency; ties go to the first name.
pub fn least_efficient(efficiencies: &ChannelMap) -> Option<String> {
    efficiencies
        .iter()
        .fold(None, |best: Option<(&String, f64)>, (c, e)| match best {
            Some((_, b)) if b <= *e => best,
            _ => Some((c, *e)),
        })
        .map(|(c, _)| c.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> ChannelMap {
        pairs.iter().map(|(c, v)| (c.to_string(), *v)).collect()
    }

    fn three_channels() -> (ChannelMap, AllocationPlan) {
        let effs = map(&[("s1", 75.6), ("s2", 64.58), ("s3", 31.77)]);
        let plan = AllocationPlan::historical(map(&[
            ("s1", 9_916_652.0),
            ("s2", 56_924_812.0),
            ("s3", 1_648_700.0),
        ]));
        (effs, plan)
    }

    #[test]
    fn test_half_of_weakest_channel_split_evenly() {
        let (effs, plan) = three_channels();
        let scenario = SwitchingCostSimulator::new(0.5, 0.1)
            .unwrap()
            .simulate(&effs, &plan, "s3")
            .unwrap();

        assert!((scenario.moved_amount - 824_350.0).abs() < 1e-6);
        assert!((scenario.moved_shares["s1"] - 412_175.0).abs() < 1e-6);
        assert!((scenario.moved_shares["s2"] - 412_175.0).abs() < 1e-6);
        assert!(!scenario.moved_shares.contains_key("s3"));

        // Recipient: discounted moved share plus its undiscounted allocation.
        let expected_s1 = 75.6 * 0.9 * 412_175.0 + 75.6 * 9_916_652.0;
        assert!((scenario.sales_after["s1"] - expected_s1).abs() < 1e-3);
        let expected_s3 = 31.77 * 824_350.0;
        assert!((scenario.sales_after["s3"] - expected_s3).abs() < 1e-3);

        // Budget is only moved, never created.
        assert!((scenario.after.allocated() - plan.allocated()).abs() < 1e-6);
        assert_eq!(scenario.after.method, AllocationMethod::Reallocated);
        assert!(
            (scenario.delta - (scenario.total_sales_after - scenario.total_sales_before)).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_switching_cost_strictly_reduces_sales() {
        let (effs, plan) = three_channels();
        let free = SwitchingCostSimulator::new(0.5, 0.0)
            .unwrap()
            .simulate(&effs, &plan, "s3")
            .unwrap();

        for cost in [0.01, 0.1, 0.5, 1.0] {
            let costly = SwitchingCostSimulator::new(0.5, cost)
                .unwrap()
                .simulate(&effs, &plan, "s3")
                .unwrap();
            assert!(costly.total_sales_after < free.total_sales_after);
            assert!(costly.switching_cost_loss() > 0.0);
            assert!(
                (costly.total_sales_without_switching_cost - free.total_sales_after).abs() < 1e-3
            );
        }
        assert!(free.switching_cost_loss().abs() < 1e-6);
    }

    #[test]
    fn test_zero_reduction_is_identity() {
        let (effs, plan) = three_channels();
        for target in ["s1", "s2", "s3"] {
            let scenario = SwitchingCostSimulator::new(0.0, 0.3)
                .unwrap()
                .simulate(&effs, &plan, target)
                .unwrap();
            assert_eq!(scenario.sales_after, scenario.sales_before);
            assert_eq!(scenario.after.allocations, plan.allocations);
            assert_eq!(scenario.moved_amount, 0.0);
        }
    }

    #[test]
    fn test_moves_spread_across_all_other_channels() {
        let effs = map(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        let plan = AllocationPlan::historical(map(&[("a", 300.0), ("b", 0.0), ("c", 0.0), ("d", 0.0)]));
        let scenario = SwitchingCostSimulator::new(1.0, 0.0)
            .unwrap()
            .simulate(&effs, &plan, "a")
            .unwrap();

        for c in ["b", "c", "d"] {
            assert!((scenario.after.get(c).unwrap() - 100.0).abs() < 1e-9);
        }
        assert_eq!(scenario.after.get("a"), Some(0.0));
    }

    #[test]
    fn test_invalid_inputs() {
        let (effs, plan) = three_channels();

        assert!(matches!(
            SwitchingCostSimulator::new(1.2, 0.1),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            SwitchingCostSimulator::new(0.5, -0.1),
            Err(EngineError::InvalidParameter(_))
        ));

        let sim = SwitchingCostSimulator::new(0.5, 0.1).unwrap();
        assert!(matches!(
            sim.simulate(&effs, &plan, "s9"),
            Err(EngineError::ChannelMismatch(_))
        ));
        assert!(matches!(
            sim.simulate(&map(&[("s1", 1.0)]), &plan, "s1"),
            Err(EngineError::ChannelMismatch(_))
        ));

        let single = AllocationPlan::historical(map(&[("only", 10.0)]));
        assert!(matches!(
            sim.simulate(&map(&[("only", 1.0)]), &single, "only"),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_least_efficient() {
        assert_eq!(
            least_efficient(&map(&[("a", 3.0), ("b", -1.0), ("c", 2.0)])),
            Some("b".to_string())
        );
        assert_eq!(
            least_efficient(&map(&[("x", 1.0), ("y", 1.0)])),
            Some("x".to_string())
        );
        assert_eq!(least_efficient(&ChannelMap::new()), None);
    }
}
