use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};

/// Per-channel numbers keyed by channel name.
pub type ChannelMap = BTreeMap<String, f64>;

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// One month of outcome and per-channel spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub month: NaiveDate,
    pub sales: f64,
    pub spend: ChannelMap,
}

impl Observation {
    pub fn new(month: NaiveDate, sales: f64, spend: ChannelMap) -> Self {
        Self {
            month,
            sales,
            spend,
        }
    }

    pub fn spend_on(&self, channel: &str) -> Option<f64> {
        self.spend.get(channel).copied()
    }

    /// True when sales and every requested channel spend are present and finite.
    pub fn is_complete(&self, channels: &[String]) -> bool {
        self.sales.is_finite()
            && channels
                .iter()
                .all(|c| self.spend_on(c).is_some_and(f64::is_finite))
    }

    /// Total spend across `channels` for this row. Missing channels count as zero.
    pub fn total_spend(&self, channels: &[String]) -> f64 {
        channels.iter().filter_map(|c| self.spend_on(c)).sum()
    }
}

/// Ordered sequence of observations the engine analyses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    rows: Vec<Observation>,
}

impl ObservationSet {
    /// Build a set from rows, ordering them by month.
    pub fn new(mut rows: Vec<Observation>) -> Self {
        rows.sort_by_key(|r| r.month);
        Self { rows }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every channel that appears in at least one row.
    pub fn channels(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|r| r.spend.keys().cloned())
            .collect()
    }

    /// Copy of this set whose rows carry spend for `channels` only.
    pub fn select_channels(&self, channels: &[String]) -> Self {
        let rows = self
            .rows
            .iter()
            .map(|r| Observation {
                month: r.month,
                sales: r.sales,
                spend: r
                    .spend
                    .iter()
                    .filter(|(c, _)| channels.contains(*c))
                    .map(|(c, v)| (c.clone(), *v))
                    .collect(),
            })
            .collect();
        Self { rows }
    }

    /// Rows usable for an analysis over `channels`.
    pub fn complete_rows(&self, channels: &[String]) -> Vec<&Observation> {
        self.rows
            .iter()
            .filter(|r| r.is_complete(channels))
            .collect()
    }

    /// Reject an empty or duplicated channel list, or one naming a channel
    /// absent from every row.
    pub fn validate_channels(&self, channels: &[String]) -> EngineResult<()> {
        if channels.is_empty() {
            return Err(EngineError::InvalidParameter(
                "channel list must not be empty".to_string(),
            ));
        }

        let unique: BTreeSet<&String> = channels.iter().collect();
        if unique.len() != channels.len() {
            return Err(EngineError::InvalidParameter(
                "channel list contains duplicates".to_string(),
            ));
        }

        let known = self.channels();
        let missing: Vec<&str> = channels
            .iter()
            .filter(|c| !known.contains(*c))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::ChannelMismatch(format!(
                "channels not present in observations: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Summed spend per channel over the complete rows.
    pub fn spend_totals(&self, channels: &[String]) -> ChannelMap {
        let rows = self.complete_rows(channels);
        channels
            .iter()
            .map(|c| {
                let total: f64 = rows.iter().filter_map(|r| r.spend_on(c)).sum();
                (c.clone(), total)
            })
            .collect()
    }

    /// Mean spend per channel over the complete rows (zero when there are none).
    pub fn mean_spend(&self, channels: &[String]) -> ChannelMap {
        let n = self.complete_rows(channels).len();
        self.spend_totals(channels)
            .into_iter()
            .map(|(c, total)| {
                let mean = if n > 0 { total / n as f64 } else { 0.0 };
                (c, mean)
            })
            .collect()
    }

    /// Summed sales over the complete rows.
    pub fn total_sales(&self, channels: &[String]) -> f64 {
        self.complete_rows(channels).iter().map(|r| r.sales).sum()
    }
}

// ---------------------------------------------------------------------------
// Channel summary
// ---------------------------------------------------------------------------

/// Per-channel value record recomputed on every analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub total_spend: f64,
    /// May be negative when the fitted coefficient is negative.
    pub attributed_sales: f64,
    pub efficiency: f64,
}

// ---------------------------------------------------------------------------
// Strategy selectors
// ---------------------------------------------------------------------------

/// How sales per unit of spend is computed for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyMode {
    /// Regression-attributed sales over spend.
    Ratio,
    /// Each row's sales split by the channel's share of that row's spend.
    Share,
    /// All sales over the channel's spend.
    Gross,
}

#[allow(clippy::derivable_impls)]
impl Default for EfficiencyMode {
    fn default() -> Self {
        Self::Ratio
    }
}

/// Per-channel weight used to split a future budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingScheme {
    /// `weight = efficiency`
    Efficiency,
    /// `weight = e * s / (e + s)` over efficiency and historical sales.
    Blended,
}

#[allow(clippy::derivable_impls)]
impl Default for WeightingScheme {
    fn default() -> Self {
        Self::Efficiency
    }
}

/// Which allocation the switching-cost simulation starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioBase {
    /// The plan produced by the budget reallocator.
    Proposed,
    /// Historical total spend per channel.
    Historical,
}

#[allow(clippy::derivable_impls)]
impl Default for ScenarioBase {
    fn default() -> Self {
        Self::Proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, m, 1).unwrap()
    }

    fn row(m: u32, sales: f64, spend: &[(&str, f64)]) -> Observation {
        Observation::new(
            month(m),
            sales,
            spend.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
        )
    }

    fn names(cs: &[&str]) -> Vec<String> {
        cs.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_rows_sorted_by_month() {
        let set = ObservationSet::new(vec![
            row(3, 30.0, &[("tv", 1.0)]),
            row(1, 10.0, &[("tv", 1.0)]),
            row(2, 20.0, &[("tv", 1.0)]),
        ]);
        let months: Vec<u32> = set
            .rows()
            .iter()
            .map(|r| chrono::Datelike::month(&r.month))
            .collect();
        assert_eq!(months, vec![1, 2, 3]);
    }

    #[test]
    fn test_complete_rows_skip_missing_and_nan() {
        let set = ObservationSet::new(vec![
            row(1, 10.0, &[("tv", 1.0), ("radio", 2.0)]),
            row(2, 20.0, &[("tv", 1.0)]),
            row(3, f64::NAN, &[("tv", 1.0), ("radio", 2.0)]),
            row(4, 40.0, &[("tv", f64::NAN), ("radio", 2.0)]),
        ]);
        let channels = names(&["tv", "radio"]);
        assert_eq!(set.complete_rows(&channels).len(), 1);
        assert_eq!(set.complete_rows(&names(&["tv"])).len(), 2);
    }

    #[test]
    fn test_validate_channels() {
        let set = ObservationSet::new(vec![row(1, 10.0, &[("tv", 1.0)])]);

        assert!(set.validate_channels(&names(&["tv"])).is_ok());
        assert!(matches!(
            set.validate_channels(&[]),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            set.validate_channels(&names(&["tv", "tv"])),
            Err(EngineError::InvalidParameter(_))
        ));
        assert!(matches!(
            set.validate_channels(&names(&["tv", "print"])),
            Err(EngineError::ChannelMismatch(_))
        ));
    }

    #[test]
    fn test_select_channels_drops_other_spend() {
        let set = ObservationSet::new(vec![row(1, 10.0, &[("tv", 1.0), ("print", 4.0)])]);
        let selected = set.select_channels(&names(&["tv"]));
        assert_eq!(selected.channels().len(), 1);
        assert!(selected.channels().contains("tv"));
        assert!((selected.rows()[0].sales - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_spend_totals_and_means() {
        let set = ObservationSet::new(vec![
            row(1, 10.0, &[("tv", 100.0), ("radio", 0.0)]),
            row(2, 20.0, &[("tv", 300.0), ("radio", 0.0)]),
        ]);
        let channels = names(&["tv", "radio"]);

        let totals = set.spend_totals(&channels);
        assert!((totals["tv"] - 400.0).abs() < f64::EPSILON);
        assert!(totals["radio"].abs() < f64::EPSILON);

        let means = set.mean_spend(&channels);
        assert!((means["tv"] - 200.0).abs() < f64::EPSILON);
        assert!((set.total_sales(&channels) - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strategy_enums_use_snake_case() {
        let json = serde_json::to_string(&EfficiencyMode::Share).unwrap();
        assert_eq!(json, "\"share\"");
        let scheme: WeightingScheme = serde_json::from_str("\"blended\"").unwrap();
        assert_eq!(scheme, WeightingScheme::Blended);
        assert_eq!(ScenarioBase::default(), ScenarioBase::Proposed);
    }
}
