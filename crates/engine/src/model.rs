//! Linear attribution of sales to channel spend.
//!
//! Fits `sales = intercept + Σ coefficient[c] * spend[c]` by ordinary least
//! squares. The design is centred before solving so the intercept drops out
//! of the normal equations, which are then solved with a Cholesky
//! factorisation. A pivot that collapses during factorisation marks a
//! channel whose spend is a linear combination of the channels before it.

use budgetmix_core::{ChannelMap, EngineError, EngineResult, Observation, ObservationSet};
use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Relative size below which a Cholesky pivot is treated as zero.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Relative weight above which an earlier channel counts towards a
/// collapsed pivot.
const PARTNER_TOLERANCE: f64 = 1e-6;

/// Goodness-of-fit numbers for a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub r_squared: f64,
    pub mse: f64,
    pub observations: usize,
}

/// Test-set diagnostics from a seeded train/test split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutReport {
    pub train_rows: usize,
    pub test_rows: usize,
    pub seed: u64,
    /// Model fitted on the training partition only.
    pub model: AttributionModel,
    pub test: ModelDiagnostics,
}

/// A fitted linear attribution model. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionModel {
    channels: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    diagnostics: ModelDiagnostics,
}

impl AttributionModel {
    /// Fit the model on the complete rows of `observations`.
    ///
    /// Needs at least `channels.len() + 2` complete rows. Fails with
    /// `SingularMatrix` when a channel's spend is constant or collinear
    /// with the others.
    pub fn fit(observations: &ObservationSet, channels: &[String]) -> EngineResult<Self> {
        observations.validate_channels(channels)?;

        let rows = observations.complete_rows(channels);
        let skipped = observations.len() - rows.len();
        if skipped > 0 {
            warn!(skipped, "Ignoring observation rows with missing or non-finite values");
        }

        let model = fit_rows(&rows, channels)?;
        info!(
            channels = channels.len(),
            observations = model.diagnostics.observations,
            r_squared = model.diagnostics.r_squared,
            mse = model.diagnostics.mse,
            "Attribution model fitted"
        );
        Ok(model)
    }

    /// Fit on a seeded random train/test split and score the held-out rows.
    ///
    /// `test_fraction` of the complete rows (rounded up) is held out.
    pub fn evaluate_holdout(
        observations: &ObservationSet,
        channels: &[String],
        test_fraction: f64,
        seed: u64,
    ) -> EngineResult<HoldoutReport> {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "test_fraction must be in (0, 1), got {test_fraction}"
            )));
        }
        observations.validate_channels(channels)?;

        let mut rows = observations.complete_rows(channels);
        let mut rng = StdRng::seed_from_u64(seed);
        rows.shuffle(&mut rng);

        let test_rows = (rows.len() as f64 * test_fraction).ceil() as usize;
        let (test, train) = rows.split_at(test_rows.min(rows.len()));

        let model = fit_rows(train, channels)?;
        let test_diagnostics = model.score(test);
        debug!(
            train_rows = train.len(),
            test_rows = test.len(),
            test_r_squared = test_diagnostics.r_squared,
            "Holdout evaluation complete"
        );

        Ok(HoldoutReport {
            train_rows: train.len(),
            test_rows: test.len(),
            seed,
            model,
            test: test_diagnostics,
        })
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn diagnostics(&self) -> ModelDiagnostics {
        self.diagnostics
    }

    pub fn r_squared(&self) -> f64 {
        self.diagnostics.r_squared
    }

    pub fn mse(&self) -> f64 {
        self.diagnostics.mse
    }

    /// Expected marginal sales per unit of spend on `channel`.
    pub fn coefficient(&self, channel: &str) -> Option<f64> {
        self.channels
            .iter()
            .position(|c| c == channel)
            .map(|i| self.coefficients[i])
    }

    pub fn coefficients(&self) -> ChannelMap {
        self.channels
            .iter()
            .cloned()
            .zip(self.coefficients.iter().copied())
            .collect()
    }

    /// Predicted sales for one spend vector.
    pub fn predict(&self, spend: &ChannelMap) -> EngineResult<f64> {
        self.channels
            .iter()
            .zip(&self.coefficients)
            .try_fold(self.intercept, |acc, (c, coef)| {
                spend.get(c).map(|s| acc + coef * s).ok_or_else(|| {
                    EngineError::ChannelMismatch(format!("no spend given for channel {c}"))
                })
            })
    }

    /// Fail unless `channels` is exactly the set this model was fitted on.
    pub fn ensure_channels<'a, I>(&self, channels: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let expected: BTreeSet<&String> = self.channels.iter().collect();
        let given: BTreeSet<&String> = channels.into_iter().collect();
        if expected == given {
            return Ok(());
        }

        let missing: Vec<&str> = expected.difference(&given).map(|c| c.as_str()).collect();
        let extra: Vec<&str> = given.difference(&expected).map(|c| c.as_str()).collect();
        Err(EngineError::ChannelMismatch(format!(
            "model fitted on [{}]; missing [{}], unexpected [{}]",
            self.channels.join(", "),
            missing.join(", "),
            extra.join(", ")
        )))
    }

    fn score(&self, rows: &[&Observation]) -> ModelDiagnostics {
        let (x, y) = design(rows, &self.channels);
        let beta = Array1::from(self.coefficients.clone());
        let predictions = x.dot(&beta) + self.intercept;
        diagnostics(&y, &predictions)
    }
}

fn fit_rows(rows: &[&Observation], channels: &[String]) -> EngineResult<AttributionModel> {
    let required = channels.len() + 2;
    if rows.len() < required {
        return Err(EngineError::InsufficientData {
            rows: rows.len(),
            required,
        });
    }

    let (x, y) = design(rows, channels);

    let constant: Vec<String> = channels
        .iter()
        .enumerate()
        .filter(|(j, _)| {
            let column = x.column(*j);
            column.iter().all(|v| *v == column[0])
        })
        .map(|(_, c)| c.clone())
        .collect();
    if !constant.is_empty() {
        return Err(EngineError::SingularMatrix { channels: constant });
    }

    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or(EngineError::InsufficientData { rows: 0, required })?;
    let y_mean = y.sum() / y.len() as f64;
    let xc = &x - &x_mean;
    let yc = &y - y_mean;

    let gram = xc.t().dot(&xc);
    let moment = xc.t().dot(&yc);
    let beta = cholesky_solve(&gram, &moment).map_err(|pivot| {
        let mut offending = collinear_partners(&gram, pivot);
        offending.push(pivot);
        EngineError::SingularMatrix {
            channels: offending.into_iter().map(|j| channels[j].clone()).collect(),
        }
    })?;

    let intercept = y_mean - x_mean.dot(&beta);
    let predictions = x.dot(&beta) + intercept;

    Ok(AttributionModel {
        channels: channels.to_vec(),
        intercept,
        coefficients: beta.to_vec(),
        diagnostics: diagnostics(&y, &predictions),
    })
}

fn design(rows: &[&Observation], channels: &[String]) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((rows.len(), channels.len()), |(i, j)| {
        rows[i].spend_on(&channels[j]).unwrap_or(0.0)
    });
    let y = Array1::from_iter(rows.iter().map(|r| r.sales));
    (x, y)
}

/// R² and mean squared error. A constant target scores 1.0 when predicted
/// exactly and 0.0 otherwise.
fn diagnostics(y: &Array1<f64>, predictions: &Array1<f64>) -> ModelDiagnostics {
    let n = y.len();
    if n == 0 {
        return ModelDiagnostics {
            r_squared: 0.0,
            mse: 0.0,
            observations: 0,
        };
    }

    let y_mean = y.sum() / n as f64;
    let ss_res: f64 = y
        .iter()
        .zip(predictions.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let ss_tot: f64 = y.iter().map(|a| (a - y_mean).powi(2)).sum();

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    ModelDiagnostics {
        r_squared,
        mse: ss_res / n as f64,
        observations: n,
    }
}

/// Earlier channels whose centred spend combines into the channel at
/// `pivot`, found by regressing the pivot column on the columns before it.
fn collinear_partners(gram: &Array2<f64>, pivot: usize) -> Vec<usize> {
    if pivot == 0 {
        return Vec::new();
    }
    let lead = gram.slice(s![..pivot, ..pivot]).to_owned();
    let target = gram.slice(s![..pivot, pivot]).to_owned();
    let weights = match cholesky_solve(&lead, &target) {
        Ok(weights) => weights,
        Err(_) => return Vec::new(),
    };

    let scale = gram[[pivot, pivot]].sqrt();
    (0..pivot)
        .filter(|&k| (weights[k] * gram[[k, k]].sqrt()).abs() > PARTNER_TOLERANCE * scale)
        .collect()
}

/// Solve `a · x = b` for symmetric positive-definite `a`.
///
/// Returns the index of the first collapsed pivot on failure.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, usize> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if !(diag > PIVOT_TOLERANCE * a[[i, i]]) {
                    return Err(i);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L · z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * z[j];
        }
        z[i] = (b[i] - sum) / l[[i, i]];
    }

    // Lᵀ · x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
