//! SARIMAX forecaster (§4.7): a log-offset case series regressed on two
//! climate exogenous covariates, with the seasonal ARIMA residual structure
//! fit by Hannan-Rissanen two-stage regression — a pilot AR whitening
//! filter recovers a modeling-error sequence, then the differenced series
//! is regressed on its own nonseasonal/seasonal AR lags and the pilot
//! residual's nonseasonal/seasonal MA lags, combined additively — and
//! closed-form Gaussian prediction intervals whose width grows by the
//! fitted model's psi-weight (impulse-response) sequence.
//!
//! Grounded on the teacher's `forecast_arima_with_exog`/`forecast_theta_with_exog`
//! shape — regress the exogenous effect out, forecast the residual with a
//! simpler base model, add the two back together — generalized from the
//! teacher's single in-repo `OlsRegressor` (not part of this crate's
//! dependency stack) to a hand-rolled normal-equations OLS solved via the
//! same `faer` Cholesky pattern `climate.rs` uses for its covariance solve.
//! The pilot-filter/stationarity-check pattern reuses `arp::levinson_durbin`
//! and `arp::check_stationary` directly.

use chrono::{Duration, NaiveDate};
use faer::{Mat, Side};

use crate::arp::levinson_durbin;
use crate::epiweek::Epiweek;
use crate::error::{ForecastError, Result};
use crate::quantiles::{self, LEVELS};
use crate::types::{ForecastRecord, ModelConfig};

const COMPONENT: &str = "sarimax";
/// Weekly offset added to raw case counts before the log transform, so a
/// zero-case week stays finite on the log scale (§4.7).
const LOG_OFFSET: f64 = 100.0;
/// Season start offset (h, weeks past the origin) and length of the
/// reporting slice, shared with the ARp forecaster's crop window (§4.8).
const REPORT_START: usize = 16;
const REPORT_LEN: usize = 52;
const SEASON_LEN: usize = 52;

/// Exact standard-normal quantiles for the four central interval levels,
/// §4.7's worked example (`z_0.95 = 1.9600`, ...).
fn z_for_level(level: f64) -> f64 {
    match level.round() as i64 {
        95 => 1.9600,
        90 => 1.6449,
        80 => 1.2816,
        50 => 0.6745,
        _ => unreachable!("LEVELS is a fixed four-element table"),
    }
}

/// Runs the SARIMAX forecaster end to end. `cases`, `temp_med`, and
/// `precip_med` are chronological weekly training series ending exactly at
/// `origin` (the EW25 forecast origin, §4.1); all three must be the same
/// length, at least three full seasons (`InsufficientData`, §7).
pub fn forecast(
    region: &str,
    config: &ModelConfig,
    cases: &[f64],
    temp_med: &[f64],
    precip_med: &[f64],
    origin: Epiweek,
) -> Result<Vec<ForecastRecord>> {
    let n = cases.len();
    if temp_med.len() != n || precip_med.len() != n {
        return Err(ForecastError::invalid_input(
            region,
            COMPONENT,
            "cases, temp_med, and precip_med must be the same length",
        ));
    }
    let needed = 3 * SEASON_LEN;
    if n < needed {
        return Err(ForecastError::insufficient_data(region, COMPONENT, needed, n));
    }

    tracing::debug!(region, n, orders = ?config.sarimax_orders, "sarimax: fitting exogenous regression");
    let y: Vec<f64> = cases.iter().map(|&c| (c + LOG_OFFSET).ln()).collect();
    let x2: Vec<f64> = rolling_mean(precip_med, SEASON_LEN);

    let (intercept, b1, b2) = fit_ols(region, &y, temp_med, &x2)?;
    let fitted: Vec<f64> = (0..n).map(|t| intercept + b1 * temp_med[t] + b2 * x2[t]).collect();
    let residuals: Vec<f64> = y.iter().zip(fitted.iter()).map(|(a, b)| a - b).collect();

    let orders = config.sarimax_orders;
    let stages = forward_diff_stages(&residuals, orders.d, orders.seasonal_d);
    let stage_lags: Vec<usize> = std::iter::repeat(SEASON_LEN)
        .take(orders.seasonal_d)
        .chain(std::iter::repeat(1).take(orders.d))
        .collect();

    let differenced = stages.last().unwrap();
    let p = orders.p;
    let q = orders.q;
    let seasonal_p = orders.seasonal_p;
    let seasonal_q = orders.seasonal_q;
    let max_ar_lag = p.max(seasonal_p * SEASON_LEN);
    let max_ma_lag = q.max(seasonal_q * SEASON_LEN);

    // Pilot AR order for the Hannan-Rissanen whitening filter: large enough
    // to approximate the combined AR/MA dynamics, small relative to the
    // data so the regression below still has rows to spare.
    let pilot_order = (p + q + seasonal_p + seasonal_q + 8).max(1);
    let regression_start = (pilot_order + max_ma_lag).max(max_ar_lag);
    if differenced.len() <= regression_start + 10 {
        return Err(ForecastError::insufficient_data(
            region,
            COMPONENT,
            regression_start + 11,
            differenced.len(),
        ));
    }
    let m = differenced.len();

    let pilot_gamma = autocovariance(differenced, pilot_order);
    crate::arp::check_stationary(region, COMPONENT, &pilot_gamma, pilot_order)?;
    let (pilot_phi, _) = levinson_durbin(&pilot_gamma, pilot_order);
    let mut e_hat = vec![0.0_f64; m];
    for t in pilot_order..m {
        let ar_part: f64 = pilot_phi.iter().enumerate().map(|(i, &c)| c * differenced[t - 1 - i]).sum();
        e_hat[t] = differenced[t] - ar_part;
    }

    // Stage 2: regress the differenced series on its own nonseasonal and
    // seasonal AR lags plus the pilot residual's nonseasonal and seasonal
    // MA lags (additive combination rather than full multiplicative
    // polynomial expansion).
    let ncols = p + seasonal_p + q + seasonal_q;
    let mut rows = Vec::with_capacity(m - regression_start);
    let mut targets = Vec::with_capacity(m - regression_start);
    for t in regression_start..m {
        let mut row = Vec::with_capacity(ncols);
        for i in 1..=p {
            row.push(differenced[t - i]);
        }
        for j in 1..=seasonal_p {
            row.push(differenced[t - j * SEASON_LEN]);
        }
        for i in 1..=q {
            row.push(e_hat[t - i]);
        }
        for j in 1..=seasonal_q {
            row.push(e_hat[t - j * SEASON_LEN]);
        }
        rows.push(row);
        targets.push(differenced[t]);
    }

    let coefs: Vec<f64> = if ncols == 0 { Vec::new() } else { fit_ols_general(region, &rows, &targets)? };
    let ar_coefs = coefs[0..p].to_vec();
    let seasonal_ar_coefs = coefs[p..p + seasonal_p].to_vec();
    let ma_coefs = coefs[p + seasonal_p..p + seasonal_p + q].to_vec();
    let seasonal_ma_coefs = coefs[p + seasonal_p + q..].to_vec();

    let fitted2: Vec<f64> = rows.iter().map(|row| row.iter().zip(coefs.iter()).map(|(x, c)| x * c).sum()).collect();
    let resid2: Vec<f64> = targets.iter().zip(fitted2.iter()).map(|(a, b)| a - b).collect();
    let sigma = {
        let count = resid2.len().max(1) as f64;
        let mean = resid2.iter().sum::<f64>() / count;
        let var = resid2.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / count;
        var.max(0.0).sqrt()
    };

    let horizon = config.forecast_horizon;
    let mut z_buf = differenced.clone();
    let mut e_buf = e_hat.clone();
    let mut ar_forecast = Vec::with_capacity(horizon);
    for h in 0..horizon {
        let t = m + h;
        let mut val = 0.0;
        for i in 1..=p {
            val += ar_coefs[i - 1] * z_buf[t - i];
        }
        for j in 1..=seasonal_p {
            val += seasonal_ar_coefs[j - 1] * z_buf[t - j * SEASON_LEN];
        }
        for i in 1..=q {
            val += ma_coefs[i - 1] * e_buf[t - i];
        }
        for j in 1..=seasonal_q {
            val += seasonal_ma_coefs[j - 1] * e_buf[t - j * SEASON_LEN];
        }
        z_buf.push(val);
        e_buf.push(0.0); // E[future innovation] = 0
        ar_forecast.push(val);
    }

    let residual_forecast = undo_differencing(&ar_forecast, &stages, &stage_lags);

    // Forecast-error psi (impulse-response) weights: psi_0 = 1, psi_k =
    // the AR/seasonal-AR-weighted sum of earlier psi values plus the
    // MA/seasonal-MA coefficient at lag k (0 if k isn't an MA lag).
    let mut psi = vec![0.0_f64; horizon.max(1)];
    psi[0] = 1.0;
    for k in 1..psi.len() {
        let mut val = 0.0;
        for i in 1..=p {
            if k >= i {
                val += ar_coefs[i - 1] * psi[k - i];
            }
        }
        for j in 1..=seasonal_p {
            let lag = j * SEASON_LEN;
            if k >= lag {
                val += seasonal_ar_coefs[j - 1] * psi[k - lag];
            }
        }
        if k <= q {
            val += ma_coefs[k - 1];
        }
        for j in 1..=seasonal_q {
            if k == j * SEASON_LEN {
                val += seasonal_ma_coefs[j - 1];
            }
        }
        psi[k] = val;
    }

    let mut temp_ext = temp_med.to_vec();
    let mut precip_ext = x2.clone();
    for _ in 0..horizon {
        extend_by_seasonal_replay(&mut temp_ext);
        extend_by_seasonal_replay(&mut precip_ext);
    }

    let mut y_mean = vec![0.0_f64; horizon];
    let mut se = vec![0.0_f64; horizon];
    let mut cum_psi_sq = 0.0;
    for h in 0..horizon {
        cum_psi_sq += psi[h] * psi[h];
        let t1 = temp_ext[n + h];
        let t2 = precip_ext[n + h];
        y_mean[h] = intercept + b1 * t1 + b2 * t2 + residual_forecast[h];
        se[h] = sigma * cum_psi_sq.sqrt();
        if !y_mean[h].is_finite() {
            return Err(ForecastError::numerical_failure(region, COMPONENT, format!("non-finite forecast at step {h}")));
        }
    }

    if horizon < REPORT_START - 1 + REPORT_LEN {
        return Err(ForecastError::insufficient_data(
            region,
            COMPONENT,
            REPORT_START - 1 + REPORT_LEN,
            horizon,
        ));
    }

    let mut pred = vec![0.0_f64; REPORT_LEN];
    let mut lower: [Vec<f64>; 4] = Default::default();
    let mut upper: [Vec<f64>; 4] = Default::default();
    for band in lower.iter_mut().chain(upper.iter_mut()) {
        *band = vec![0.0_f64; REPORT_LEN];
    }

    let crop_start = REPORT_START - 1;
    for i in 0..REPORT_LEN {
        let h = crop_start + i;
        pred[i] = (y_mean[h].exp() - LOG_OFFSET).max(0.0);
        for (level_idx, &level) in LEVELS.iter().enumerate() {
            let z = z_for_level(level);
            lower[level_idx][i] = ((y_mean[h] - z * se[h]).exp() - LOG_OFFSET).max(0.0);
            upper[level_idx][i] = ((y_mean[h] + z * se[h]).exp() - LOG_OFFSET).max(0.0);
        }
    }

    let origin_date = origin.to_date()?;
    let dates: Vec<NaiveDate> = (0..REPORT_LEN).map(|i| origin_date + Duration::weeks((REPORT_START + i) as i64)).collect();

    let raw = quantiles::RawQuantiles { pred, lower, upper };
    quantiles::finalize(region, &raw, &dates)
}

/// Backward 52-week rolling mean ending at each `t`; the window shrinks
/// near the start of the series rather than requiring a 52-week warmup.
fn rolling_mean(series: &[f64], window: usize) -> Vec<f64> {
    (0..series.len())
        .map(|t| {
            let start = t.saturating_sub(window - 1);
            let slice = &series[start..=t];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Ordinary least squares for `y ~ 1 + x1 + x2` via the normal equations,
/// solved with the same Cholesky-factorization pattern `climate.rs` uses
/// for its covariance solve — no `.solve()`/`.transpose()` call, since
/// neither is exercised anywhere else in this dependency stack.
fn fit_ols(region: &str, y: &[f64], x1: &[f64], x2: &[f64]) -> Result<(f64, f64, f64)> {
    let n = y.len();
    let mut xtx = Mat::<f64>::zeros(3, 3);
    let mut xty = [0.0_f64; 3];
    for t in 0..n {
        let row = [1.0, x1[t], x2[t]];
        for a in 0..3 {
            xty[a] += row[a] * y[t];
            for b in 0..3 {
                xtx[(a, b)] += row[a] * row[b];
            }
        }
    }

    let beta = cholesky_solve(region, xtx, &xty)?;
    Ok((beta[0], beta[1], beta[2]))
}

/// Solves `xtx * beta = xty` via Cholesky, regularizing the diagonal before
/// the first attempt and retrying once with heavier loading on failure —
/// the same two-attempt shape as `climate::regularized_cholesky`.
fn cholesky_solve(region: &str, mut xtx: Mat<f64>, xty: &[f64; 3]) -> Result<[f64; 3]> {
    const EPS: f64 = 1e-9;
    let n = xtx.nrows();
    let mut loading = EPS;
    for i in 0..n {
        xtx[(i, i)] += loading;
    }

    for attempt in 0..2 {
        match xtx.cholesky(Side::Lower) {
            Ok(llt) => {
                let l = llt.L().to_owned();
                return Ok(forward_back_substitute(&l, xty));
            }
            Err(_) if attempt == 0 => {
                loading *= 1e4;
                for i in 0..n {
                    xtx[(i, i)] += loading;
                }
            }
            Err(_) => {
                return Err(ForecastError::numerical_failure(
                    region,
                    COMPONENT,
                    "Cholesky factorization of the regression normal equations failed",
                ));
            }
        }
    }
    unreachable!("loop always returns within two attempts")
}

/// Solves `L L^T beta = rhs` given the lower Cholesky factor `l`, by
/// forward substitution (`L z = rhs`) then back substitution (`L^T beta = z`).
fn forward_back_substitute(l: &Mat<f64>, rhs: &[f64; 3]) -> [f64; 3] {
    let n = l.nrows();
    let mut z = [0.0_f64; 3];
    for i in 0..n {
        let mut acc = rhs[i];
        for j in 0..i {
            acc -= l[(i, j)] * z[j];
        }
        z[i] = acc / l[(i, i)];
    }

    let mut beta = [0.0_f64; 3];
    for i in (0..n).rev() {
        let mut acc = z[i];
        for j in (i + 1)..n {
            acc -= l[(j, i)] * beta[j];
        }
        beta[i] = acc / l[(i, i)];
    }
    beta
}

/// Ordinary least squares for an arbitrary-width design matrix, via the
/// same normal-equations/Cholesky pattern as [`fit_ols`] generalized past a
/// fixed three-column width — used to fit the combined AR/seasonal-AR and
/// MA/seasonal-MA regression of the Hannan-Rissanen second stage.
fn fit_ols_general(region: &str, rows: &[Vec<f64>], y: &[f64]) -> Result<Vec<f64>> {
    let n = rows.len();
    let k = rows[0].len();
    let mut xtx = Mat::<f64>::zeros(k, k);
    let mut xty = vec![0.0_f64; k];
    for t in 0..n {
        let row = &rows[t];
        for a in 0..k {
            xty[a] += row[a] * y[t];
            for b in 0..k {
                xtx[(a, b)] += row[a] * row[b];
            }
        }
    }
    cholesky_solve_general(region, xtx, &xty)
}

/// Solves `xtx * beta = xty` via Cholesky for an arbitrary size, mirroring
/// [`cholesky_solve`]'s two-attempt diagonal-loading regularization.
fn cholesky_solve_general(region: &str, mut xtx: Mat<f64>, xty: &[f64]) -> Result<Vec<f64>> {
    const EPS: f64 = 1e-9;
    let n = xtx.nrows();
    let mut loading = EPS;
    for i in 0..n {
        xtx[(i, i)] += loading;
    }

    for attempt in 0..2 {
        match xtx.cholesky(Side::Lower) {
            Ok(llt) => {
                let l = llt.L().to_owned();
                return Ok(forward_back_substitute_general(&l, xty));
            }
            Err(_) if attempt == 0 => {
                loading *= 1e4;
                for i in 0..n {
                    xtx[(i, i)] += loading;
                }
            }
            Err(_) => {
                return Err(ForecastError::numerical_failure(
                    region,
                    COMPONENT,
                    "Cholesky factorization of the SARMA normal equations failed",
                ));
            }
        }
    }
    unreachable!("loop always returns within two attempts")
}

/// Forward/back substitution against a Cholesky factor, sized generically
/// (see [`forward_back_substitute`] for the fixed three-column version).
fn forward_back_substitute_general(l: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let n = l.nrows();
    let mut z = vec![0.0_f64; n];
    for i in 0..n {
        let mut acc = rhs[i];
        for j in 0..i {
            acc -= l[(i, j)] * z[j];
        }
        z[i] = acc / l[(i, i)];
    }

    let mut beta = vec![0.0_f64; n];
    for i in (0..n).rev() {
        let mut acc = z[i];
        for j in (i + 1)..n {
            acc -= l[(j, i)] * beta[j];
        }
        beta[i] = acc / l[(i, i)];
    }
    beta
}

fn autocovariance(centered: &[f64], max_lag: usize) -> Vec<f64> {
    let n = centered.len();
    let mean = centered.iter().sum::<f64>() / n as f64;
    (0..=max_lag)
        .map(|h| {
            let mut sum = 0.0;
            for t in 0..(n - h) {
                sum += (centered[t + h] - mean) * (centered[t] - mean);
            }
            sum / n as f64
        })
        .collect()
}

fn diff_once(s: &[f64], lag: usize) -> Vec<f64> {
    if s.len() <= lag {
        return Vec::new();
    }
    (lag..s.len()).map(|t| s[t] - s[t - lag]).collect()
}

/// Builds the chain of progressively differenced series: `stages[0]` is the
/// input, each later stage applies one more seasonal (lag 52) difference,
/// then one more nonseasonal (lag 1) difference, in that order. The AR model
/// is fit and forecast on `stages.last()`.
fn forward_diff_stages(series: &[f64], d: usize, seasonal_d: usize) -> Vec<Vec<f64>> {
    let mut stages = vec![series.to_vec()];
    for _ in 0..seasonal_d {
        let next = diff_once(stages.last().unwrap(), SEASON_LEN);
        stages.push(next);
    }
    for _ in 0..d {
        let next = diff_once(stages.last().unwrap(), 1);
        stages.push(next);
    }
    stages
}

/// Reverses `forward_diff_stages`: walks the stage transitions from the
/// most-differenced back to the original scale, accumulating each
/// differencing level's forecast onto the tail of the corresponding
/// less-differenced stage.
fn undo_differencing(forecast_on_final_stage: &[f64], stages: &[Vec<f64>], stage_lags: &[usize]) -> Vec<f64> {
    let mut current = forecast_on_final_stage.to_vec();
    for idx in (0..stage_lags.len()).rev() {
        let lag = stage_lags[idx];
        let mut source = stages[idx].clone();
        let mut out = Vec::with_capacity(current.len());
        for &d_val in &current {
            let base = source[source.len() - lag];
            let val = d_val + base;
            source.push(val);
            out.push(val);
        }
        current = out;
    }
    current
}

/// Appends one more step of naive seasonal replay: `x(t*) = mean(x(t* -
/// 52), x(t* - 104))`, falling back to just `x(t* - 52)` when a second prior
/// season isn't yet available (§4.7).
fn extend_by_seasonal_replay(series: &mut Vec<f64>) {
    let n = series.len();
    let a = series[n - SEASON_LEN];
    let v = if n >= 2 * SEASON_LEN {
        let b = series[n - 2 * SEASON_LEN];
        (a + b) / 2.0
    } else {
        a
    };
    series.push(v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn z_for_level_matches_the_spec_table() {
        assert_relative_eq!(z_for_level(95.0), 1.9600);
        assert_relative_eq!(z_for_level(90.0), 1.6449);
        assert_relative_eq!(z_for_level(80.0), 1.2816);
        assert_relative_eq!(z_for_level(50.0), 0.6745);
    }

    #[test]
    fn rolling_mean_matches_full_window_away_from_the_start() {
        let series: Vec<f64> = (0..104).map(|i| i as f64).collect();
        let rm = rolling_mean(&series, 52);
        let expected: f64 = (52..104).map(|i| i as f64).sum::<f64>() / 52.0;
        assert_relative_eq!(rm[103], expected);
    }

    #[test]
    fn rejects_mismatched_series_lengths() {
        let config = ModelConfig::default();
        let origin = Epiweek::new(2022, 25).unwrap();
        let cases = vec![100.0; 120];
        let temp = vec![25.0; 119];
        let precip = vec![150.0; 120];
        assert!(forecast("SP", &config, &cases, &temp, &precip, origin).is_err());
    }

    #[test]
    fn rejects_training_span_shorter_than_three_seasons() {
        let config = ModelConfig::default();
        let origin = Epiweek::new(2022, 25).unwrap();
        let n = 2 * SEASON_LEN;
        let cases = vec![100.0; n];
        let temp = vec![25.0; n];
        let precip = vec![150.0; n];
        assert!(forecast("SP", &config, &cases, &temp, &precip, origin).is_err());
    }

    #[test]
    fn forecast_produces_52_monotone_weeks_on_a_flat_series() {
        let config = ModelConfig::default();
        let n = 208;
        let cases = vec![100.0; n];
        let temp = vec![25.0; n];
        let precip = vec![150.0; n];
        let origin = Epiweek::new(2022, 25).unwrap();
        let records = forecast("SP", &config, &cases, &temp, &precip, origin).unwrap();
        assert_eq!(records.len(), 52);
        let mut prev_date = records[0].date;
        for r in &records[1..] {
            assert_eq!(r.date.signed_duration_since(prev_date).num_days(), 7);
            prev_date = r.date;
        }
        for r in &records {
            assert!(r.lower_95 <= r.lower_90);
            assert!(r.lower_90 <= r.lower_80);
            assert!(r.lower_80 <= r.lower_50);
            assert!(r.lower_50 <= r.pred);
            assert!(r.pred <= r.upper_50);
            assert!(r.upper_50 <= r.upper_80);
            assert!(r.upper_80 <= r.upper_90);
            assert!(r.upper_90 <= r.upper_95);
        }
    }

    #[test]
    fn gaussian_interval_matches_the_worked_example() {
        // y_mean = log(200), se = 0.1 -> pred = 100, upper_95 ~= 143 (§4.7's
        // worked example), reproduced directly against the z-table formula
        // rather than through the full pipeline.
        let y_mean = 200.0_f64.ln();
        let se = 0.1;
        let pred = (y_mean.exp() - LOG_OFFSET).round();
        let upper_95 = ((y_mean + z_for_level(95.0) * se).exp() - LOG_OFFSET).round();
        assert_relative_eq!(pred, 100.0);
        assert_relative_eq!(upper_95, 143.0, max_relative = 0.02);
    }
}
