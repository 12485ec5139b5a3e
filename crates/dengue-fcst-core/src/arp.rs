//! Autoregressive-excitation forecaster (§4.8): a high-order AR model
//! calibrated on a log2-transformed case series by a covariance-method
//! (Yule-Walker/Levinson-Durbin) estimator, simulated forward with Gaussian
//! excitations, back-transformed, and smoothed with a trajectory-matrix SSA
//! filter.
//!
//! The Yule-Walker fit is grounded in the teacher's own
//! `stats::compute_autocorrelation` numerical style (sample autocovariance
//! by direct summation); the SSA smoother is hand-rolled (power-iteration
//! eigendecomposition, no linalg crate), following the same "no solver
//! crate in this dependency stack" precedent as `ode.rs`'s RK45.

use chrono::{Duration, NaiveDate};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::epiweek::Epiweek;
use crate::error::{ForecastError, Result};
use crate::quantiles::{self, Ensemble, LEVELS};
use crate::rng::realization_rng;
use crate::types::{ForecastRecord, ModelConfig, PredStatistic};

const COMPONENT: &str = "arp";
/// Fixed simulation length from the forecast origin, §4.8.
const SIM_LEN: usize = 79;
/// Offset (weeks past the origin) where the reporting season begins, and
/// its length — the crop window `[16, 67]` shared with the SARIMAX
/// forecaster's reporting slice (§4.7).
const REPORT_START: usize = 16;
const REPORT_LEN: usize = 52;
/// SSA trajectory-matrix window length and reconstruction rank.
const SSA_WINDOW: usize = 13;
const SSA_RANK: usize = 3;

/// Runs the ARp forecaster end to end: fit, simulate, assemble quantiles,
/// smooth, crop. `training_cases` is the chronological weekly case series
/// ending exactly at `origin` (the EW25 forecast origin, §4.1); must carry
/// at least `ar_order + 52` samples (§7, `InsufficientData`).
pub fn forecast(
    region: &str,
    config: &ModelConfig,
    training_cases: &[f64],
    origin: Epiweek,
) -> Result<Vec<ForecastRecord>> {
    let p = config.ar_order;
    let needed = p + 52;
    if training_cases.len() < needed {
        return Err(ForecastError::insufficient_data(region, COMPONENT, needed, training_cases.len()));
    }

    let z: Vec<f64> = training_cases.iter().map(|&c| c.max(0.5).log2()).collect();
    let mu = z.iter().sum::<f64>() / z.len() as f64;
    let centered: Vec<f64> = z.iter().map(|v| v - mu).collect();

    let gamma = autocovariance(&centered, p);
    check_stationary(region, COMPONENT, &gamma, p)?;
    let (phi, _innovation_var) = levinson_durbin(&gamma, p);

    let errors = inverse_filter_errors(&centered, &phi);
    let sigma_hat = pooled_std(&errors);

    tracing::debug!(region, p, sigma_hat, runs = config.n_real_arp, "arp: starting monte-carlo simulation");

    let state0: Vec<f64> = centered[centered.len() - p..].to_vec();

    let mut ensemble = Ensemble::new(SIM_LEN, config.n_real_arp);
    for j in 0..config.n_real_arp {
        let mut rng = realization_rng(config.seed, j as u64);
        let normal = Normal::new(0.0, sigma_hat.max(1e-9))
            .map_err(|e| ForecastError::numerical_failure(region, COMPONENT, format!("invalid excitation variance: {e}")))?;
        let mut state = state0.clone();
        for s in 0..SIM_LEN {
            let ar_part: f64 = phi.iter().enumerate().map(|(i, &coef)| coef * state[p - 1 - i]).sum();
            let e: f64 = normal.sample(&mut rng);
            let z_next = ar_part + e;
            state.remove(0);
            state.push(z_next);
            let cases = 2f64.powf(z_next + mu);
            if !cases.is_finite() {
                return Err(ForecastError::numerical_failure(region, COMPONENT, "non-finite simulated case count"));
            }
            ensemble.set(s, j, cases);
        }
    }

    let raw = quantiles::compute_raw(&ensemble, PredStatistic::Median);
    let smoothed_pred = ssa_smooth(&raw.pred);
    let mut smoothed_lower: [Vec<f64>; 4] = Default::default();
    let mut smoothed_upper: [Vec<f64>; 4] = Default::default();
    for i in 0..LEVELS.len() {
        smoothed_lower[i] = ssa_smooth(&raw.lower[i]);
        smoothed_upper[i] = ssa_smooth(&raw.upper[i]);
    }

    // Simulated index `s` holds the case count `h = s + 1` weeks past the
    // origin, so the EW41..EW40 season crop (h in [16, 67]) starts at array
    // index `REPORT_START - 1`.
    let crop_start = REPORT_START - 1;
    let cropped = quantiles::RawQuantiles {
        pred: smoothed_pred[crop_start..crop_start + REPORT_LEN].to_vec(),
        lower: std::array::from_fn(|i| smoothed_lower[i][crop_start..crop_start + REPORT_LEN].to_vec()),
        upper: std::array::from_fn(|i| smoothed_upper[i][crop_start..crop_start + REPORT_LEN].to_vec()),
    };

    let origin_date = origin.to_date()?;
    let dates: Vec<NaiveDate> = (0..REPORT_LEN)
        .map(|i| origin_date + Duration::weeks((REPORT_START + i) as i64))
        .collect();

    quantiles::finalize(region, &cropped, &dates)
}

fn autocovariance(centered: &[f64], max_lag: usize) -> Vec<f64> {
    let n = centered.len();
    (0..=max_lag)
        .map(|h| {
            let mut sum = 0.0;
            for t in 0..(n - h) {
                sum += centered[t + h] * centered[t];
            }
            sum / n as f64
        })
        .collect()
}

/// Levinson-Durbin recursion: given autocovariances `gamma[0..=order]`,
/// returns the order-`order` AR coefficients and the final innovation
/// variance.
pub(crate) fn levinson_durbin(gamma: &[f64], order: usize) -> (Vec<f64>, f64) {
    let (phi, err, _reflections) = levinson_durbin_with_reflections(gamma, order);
    (phi, err)
}

/// Same recursion as [`levinson_durbin`], additionally returning the
/// sequence of reflection (partial autocorrelation) coefficients produced
/// at each order. A causal AR(p) process is stationary iff every
/// reflection coefficient has magnitude strictly less than 1 — the
/// standard Levinson-Durbin stationarity test, used by [`check_stationary`]
/// to surface `ModelFit` (§7) instead of silently fitting a non-stationary
/// model.
fn levinson_durbin_with_reflections(gamma: &[f64], order: usize) -> (Vec<f64>, f64, Vec<f64>) {
    let mut phi = vec![0.0_f64; order];
    let mut prev = vec![0.0_f64; order];
    let mut err = gamma[0].max(1e-12);
    let mut reflections = Vec::with_capacity(order);

    for k in 1..=order {
        let mut acc = gamma[k];
        for i in 1..k {
            acc -= prev[i - 1] * gamma[k - i];
        }
        let reflection = acc / err;
        reflections.push(reflection);

        for i in 0..(k - 1) {
            phi[i] = prev[i] - reflection * prev[k - 2 - i];
        }
        phi[k - 1] = reflection;

        err *= 1.0 - reflection * reflection;
        err = err.max(1e-12);
        prev[..k].copy_from_slice(&phi[..k]);
    }

    (phi, err, reflections)
}

/// Checks the Levinson-Durbin stationarity condition (every reflection
/// coefficient strictly inside the unit circle) for the AR fit on
/// `gamma[0..=order]`, surfacing `ForecastError::ModelFit` — the
/// "non-stationary/invertible fit" member of the §7 taxonomy — rather than
/// forecasting forward with an explosive filter.
pub(crate) fn check_stationary(region: &str, component: &'static str, gamma: &[f64], order: usize) -> Result<()> {
    let (_phi, _err, reflections) = levinson_durbin_with_reflections(gamma, order);
    if reflections.iter().any(|r| r.abs() >= 1.0 - 1e-9) {
        return Err(ForecastError::model_fit(
            region,
            component,
            "AR fit is non-stationary: a reflection coefficient reached the unit circle",
        ));
    }
    Ok(())
}

/// Recovers the modeling-error sequence by inverse filtering: `e(t) =
/// centered(t) - sum_i phi_i * centered(t-i)` for every `t >= order`.
fn inverse_filter_errors(centered: &[f64], phi: &[f64]) -> Vec<f64> {
    let p = phi.len();
    (p..centered.len())
        .map(|t| {
            let ar_part: f64 = phi.iter().enumerate().map(|(i, &c)| c * centered[t - 1 - i]).sum();
            centered[t] - ar_part
        })
        .collect()
}

fn pooled_std(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / errors.len() as f64;
    var.sqrt()
}

/// Singular Spectrum Analysis smoother: embeds `series` into its
/// `SSA_WINDOW x k` trajectory (Hankel) matrix, reconstructs a
/// rank-`SSA_RANK` approximation via power-iteration eigendecomposition of
/// the `SSA_WINDOW x SSA_WINDOW` lagged-covariance matrix, and
/// diagonal-averages back to a length-preserving series.
fn ssa_smooth(series: &[f64]) -> Vec<f64> {
    let n = series.len();
    let window = SSA_WINDOW.min(n / 2).max(2);
    if n < 2 * window {
        return series.to_vec();
    }
    let k = n - window + 1;

    // Trajectory matrix X: window x k, X[i][j] = series[i + j].
    let mut x = vec![vec![0.0_f64; k]; window];
    for (i, row) in x.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = series[i + j];
        }
    }

    // C = X X^T, window x window.
    let mut c = vec![vec![0.0_f64; window]; window];
    for i in 0..window {
        for j in 0..window {
            c[i][j] = x[i].iter().zip(x[j].iter()).map(|(a, b)| a * b).sum();
        }
    }

    let rank = SSA_RANK.min(window);
    let eigenpairs = top_eigenpairs(&c, rank);

    let mut recon = vec![vec![0.0_f64; k]; window];
    for (eigenvalue, u) in &eigenpairs {
        if *eigenvalue <= 1e-12 {
            continue;
        }
        let sigma = eigenvalue.sqrt();
        // Right singular vector v = X^T u / sigma.
        let mut v = vec![0.0_f64; k];
        for j in 0..k {
            v[j] = (0..window).map(|i| x[i][j] * u[i]).sum::<f64>() / sigma;
        }
        for i in 0..window {
            for j in 0..k {
                recon[i][j] += sigma * u[i] * v[j];
            }
        }
    }

    // Diagonal averaging (Hankelization) back to a length-n series.
    let mut out = vec![0.0_f64; n];
    let mut counts = vec![0.0_f64; n];
    for i in 0..window {
        for j in 0..k {
            out[i + j] += recon[i][j];
            counts[i + j] += 1.0;
        }
    }
    for t in 0..n {
        out[t] /= counts[t].max(1.0);
    }
    out
}

/// Top `rank` eigenpairs of a symmetric matrix by power iteration with
/// deflation. `c` must be symmetric positive semi-definite (a
/// lagged-covariance / Gram matrix).
fn top_eigenpairs(c: &[Vec<f64>], rank: usize) -> Vec<(f64, Vec<f64>)> {
    let n = c.len();
    let mut working = c.to_vec();
    let mut result = Vec::with_capacity(rank);

    for _ in 0..rank {
        let mut v = vec![1.0_f64 / (n as f64).sqrt(); n];
        let mut eigenvalue = 0.0_f64;
        for _ in 0..200 {
            let mut w = vec![0.0_f64; n];
            for i in 0..n {
                w[i] = working[i].iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            }
            let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm < 1e-14 {
                break;
            }
            for wi in w.iter_mut() {
                *wi /= norm;
            }
            eigenvalue = norm;
            v = w;
        }
        result.push((eigenvalue.max(0.0), v.clone()));
        for i in 0..n {
            for j in 0..n {
                working[i][j] -= eigenvalue * v[i] * v[j];
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levinson_durbin_recovers_ar1_coefficient() {
        let phi_true = 0.7_f64;
        let gamma0 = 1.0 / (1.0 - phi_true * phi_true);
        let gamma: Vec<f64> = (0..=5).map(|h| gamma0 * phi_true.powi(h as i32)).collect();
        let (phi, _var) = levinson_durbin(&gamma, 1);
        assert!((phi[0] - phi_true).abs() < 1e-6);
    }

    #[test]
    fn ssa_smooth_preserves_length_and_reduces_noise() {
        let n = 60;
        let trend: Vec<f64> = (0..n)
            .map(|i| 100.0 + 5.0 * (2.0 * std::f64::consts::PI * i as f64 / 52.0).sin())
            .collect();
        let mut noisy = trend.clone();
        for (i, v) in noisy.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 3.0 } else { -3.0 };
        }
        let smoothed = ssa_smooth(&noisy);
        assert_eq!(smoothed.len(), n);

        let noisy_err: f64 = noisy.iter().zip(trend.iter()).map(|(a, b)| (a - b).powi(2)).sum();
        let smooth_err: f64 = smoothed.iter().zip(trend.iter()).map(|(a, b)| (a - b).powi(2)).sum();
        assert!(smooth_err < noisy_err);
    }

    #[test]
    fn rejects_training_span_shorter_than_order_plus_season() {
        let config = ModelConfig::default();
        let short = vec![50.0; config.ar_order + 10];
        let origin = Epiweek::new(2022, 25).unwrap();
        assert!(forecast("SP", &config, &short, origin).is_err());
    }

    #[test]
    fn forecast_produces_monotone_weeks_on_a_flat_series() {
        let mut config = ModelConfig::default();
        config.n_real_arp = 200;
        let needed = config.ar_order + 52;
        let training: Vec<f64> = vec![80.0; needed + 20];
        let origin = Epiweek::new(2022, 25).unwrap();
        let records = forecast("SP", &config, &training, origin).unwrap();
        assert_eq!(records.len(), 52);
        let mut prev_date = records[0].date;
        for r in &records[1..] {
            assert_eq!(r.date.signed_duration_since(prev_date).num_days(), 7);
            prev_date = r.date;
        }
        for r in &records {
            assert!(r.lower_95 <= r.lower_90);
            assert!(r.lower_50 <= r.pred);
            assert!(r.pred <= r.upper_50);
            assert!(r.upper_90 <= r.upper_95);
        }
    }
}
