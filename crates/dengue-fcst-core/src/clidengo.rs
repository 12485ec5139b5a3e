//! Monte-Carlo forecaster (§4.5): draws `nReal` realizations of growth
//! parameters, initial conditions, and lag-shifted synthetic climate
//! trajectories, integrates the β-logistic ODE core (§4.4) for each, and
//! assembles the weekly cumulative- and incidence-case ensembles.
//!
//! Grounded on the teacher's `forecast_with_exog` dispatch shape (fill →
//! transform → per-realization loop → collect) generalized from a single
//! exogenous regression pass to a full Monte-Carlo ensemble.

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::briere::{briere_normalized, BriereParams};
use crate::climate::{generate, ClimateGeneratorInput};
use crate::error::{ForecastError, Result};
use crate::ode::{integrate, GrowthRhs, Scratch, Tolerances};
use crate::quantiles::Ensemble;
use crate::rng::realization_rng;
use crate::types::{ClimateMode, ClimateTrajectories, GrowthParams, SimGrid};

const COMPONENT: &str = "clidengo";

/// One climate covariate's training-span raw and baseline series, the
/// inputs the climate generator (§4.2) needs to synthesize future paths.
pub struct ClimateTrainingSeries<'a> {
    pub raw: &'a [f64],
    pub baseline: &'a [f64],
}

/// The three climate covariates the β-logistic core can be driven by.
pub struct ClimateTrainingInputs<'a> {
    pub temp: ClimateTrainingSeries<'a>,
    pub precip: ClimateTrainingSeries<'a>,
    pub humid: ClimateTrainingSeries<'a>,
}

/// Biologically plausible Briere suitability windows for each covariate.
/// The spec leaves these as calibration constants (only the shape of the
/// function, §4.3, is mandated); these are the dengue-competence ranges
/// used throughout the vector-suitability literature this model family
/// descends from.
fn temp_suitability() -> BriereParams {
    BriereParams { x_min: 14.0, x_max: 35.0, ..BriereParams::default() }
}
fn precip_suitability() -> BriereParams {
    BriereParams { x_min: 0.0, x_max: 300.0, ..BriereParams::default() }
}
fn humid_suitability() -> BriereParams {
    BriereParams { x_min: 40.0, x_max: 100.0, ..BriereParams::default() }
}

/// Runs the Monte-Carlo forecaster: `nReal` realizations of the β-logistic
/// ODE, returning the cumulative-case ensemble `U` and the incidence
/// ensemble `dU`, both shaped `n_weeks x n_real`.
pub fn monte_carlo_forecast(
    region: &str,
    growth: &GrowthParams,
    climate: &ClimateTrainingInputs,
    climate_mode: ClimateMode,
    ew41_values: &[f64],
    grid: SimGrid,
    n_real: usize,
    seed: u64,
) -> Result<(Ensemble, Ensemble)> {
    if ew41_values.is_empty() {
        return Err(ForecastError::insufficient_data(region, COMPONENT, 1, 0));
    }

    let n_samp = grid.n_weeks;
    let temp_ensemble = generate(
        region,
        &ClimateGeneratorInput { raw: climate.temp.raw, baseline: climate.temp.baseline, stride: 1, n_samp, n_real },
        &mut realization_rng(seed, 0xC11A_7E00),
    )?;
    let precip_ensemble = generate(
        region,
        &ClimateGeneratorInput { raw: climate.precip.raw, baseline: climate.precip.baseline, stride: 1, n_samp, n_real },
        &mut realization_rng(seed, 0xC11A_7E01),
    )?;
    let humid_ensemble = generate(
        region,
        &ClimateGeneratorInput { raw: climate.humid.raw, baseline: climate.humid.baseline, stride: 1, n_samp, n_real },
        &mut realization_rng(seed, 0xC11A_7E02),
    )?;

    let mut u = Ensemble::new(n_samp, n_real);
    let mut du = Ensemble::new(n_samp, n_real);

    for j in 0..n_real {
        let mut rng = realization_rng(seed, j as u64);

        let r0_j = sample_gamma_mean_cv(growth.r0, growth.cv_r0, &mut rng, region)?;
        let k_j = sample_uniform_cv(growth.k, growth.cv_k, &mut rng);
        let q_j = sample_uniform_cv(growth.q, growth.cv_q, &mut rng);
        let p_j = 1.0 + sample_gamma_mean_cv(growth.p, growth.cv_p, &mut rng, region)?;
        let alpha_j = sample_uniform_cv(growth.alpha, growth.cv_alpha, &mut rng);
        let c0_j = ew41_values[rng.gen_range(0..ew41_values.len())];

        // §9 Design Notes' struct-of-fields container: the three lag-shifted
        // synthetic trajectories for this realization travel together rather
        // than as three loose `Vec<f64>` locals.
        let trajectories = ClimateTrajectories {
            temp: circular_shift(temp_ensemble.column(j), growth.lag_t),
            precip: circular_shift(precip_ensemble.column(j), growth.lag_p),
            humid: circular_shift(humid_ensemble.column(j), growth.lag_h),
        };

        let b_t = briere_normalized(&trajectories.temp, &temp_suitability());
        let r_eff: Vec<f64> = match climate_mode {
            ClimateMode::T => b_t.iter().map(|&b| r0_j * b).collect(),
            ClimateMode::TxP => {
                let b_p = briere_normalized(&trajectories.precip, &precip_suitability());
                b_t.iter().zip(b_p.iter()).map(|(&bt, &bp)| r0_j * bt * bp).collect()
            }
            ClimateMode::TxPxH => {
                let b_p = briere_normalized(&trajectories.precip, &precip_suitability());
                let b_h = briere_normalized(&trajectories.humid, &humid_suitability());
                b_t.iter()
                    .zip(b_p.iter())
                    .zip(b_h.iter())
                    .map(|((&bt, &bp), &bh)| r0_j * bt * bp * bh)
                    .collect()
            }
        };

        let rhs = GrowthRhs { r_eff: &r_eff, k: k_j, q: q_j, p: p_j, alpha: alpha_j };
        let mut scratch = Scratch::default();
        let (c, dc) = integrate(region, &rhs, c0_j, 0.0, 1.0, n_samp, Tolerances::default(), &mut scratch)?;

        for i in 0..n_samp {
            if !c[i].is_finite() || !dc[i].is_finite() {
                return Err(ForecastError::numerical_failure(
                    region,
                    COMPONENT,
                    format!("realization {j} produced a non-finite state at week {i}"),
                ));
            }
            u.set(i, j, c[i]);
            du.set(i, j, dc[i]);
        }
    }

    Ok((u, du))
}

/// Runs the full CLiDENGO pipeline for one region/season: calibrate growth
/// parameters against the training cumulative-case ensemble (§4.6), then
/// re-run the Monte-Carlo forecaster at `config.n_real_forecast` (§4.5) and
/// assemble the weekly-incidence ensemble into the ten-column output
/// contract (§4.9). `pred` is the ensemble mean, per the per-model choice
/// recorded in `SPEC_FULL.md` §9 (Open Question 1) — not unified with the
/// percentile(50) `pred` SARIMAX/ARp use.
pub fn forecast(
    region: &str,
    config: &crate::types::ModelConfig,
    climate: &ClimateTrainingInputs,
    ew41_values: &[f64],
    training_cumulative: &Ensemble,
    season_start_year: i32,
) -> Result<Vec<crate::types::ForecastRecord>> {
    const MIN_SEASONS: usize = 2;
    if training_cumulative.n_real < MIN_SEASONS {
        return Err(ForecastError::insufficient_data(region, COMPONENT, MIN_SEASONS, training_cumulative.n_real));
    }

    let growth = crate::calibrate::calibrate(region, config, climate, ew41_values, training_cumulative)?;
    tracing::info!(region, n_real = config.n_real_forecast, "clidengo: calibration converged, forecasting ensemble");

    let grid = SimGrid::default();
    let (_u, du) = monte_carlo_forecast(
        region,
        &growth,
        climate,
        config.climate_mode,
        ew41_values,
        grid,
        config.n_real_forecast,
        config.seed,
    )?;

    let dates: Vec<chrono::NaiveDate> = crate::epiweek::Epiweek::season_window(season_start_year)
        .iter()
        .map(|ew| ew.to_date())
        .collect::<Result<Vec<_>>>()?;

    crate::quantiles::assemble(region, &du, crate::types::PredStatistic::Mean, &dates)
}

/// Samples `Gamma(shape = 1/cv^2, scale = mean * cv^2)`, whose mean is
/// `mean` by construction. `cv = 0` degenerates to the exact mean (used by
/// the `cv_* = 0` boundary test, §8).
fn sample_gamma_mean_cv(mean: f64, cv: f64, rng: &mut impl Rng, region: &str) -> Result<f64> {
    if cv <= 1e-12 || mean <= 0.0 {
        return Ok(mean.max(0.0));
    }
    let shape = 1.0 / (cv * cv);
    let scale = mean * cv * cv;
    let dist = Gamma::new(shape, scale).map_err(|e| {
        ForecastError::numerical_failure(region, COMPONENT, format!("invalid Gamma parameters: {e}"))
    })?;
    Ok(dist.sample(rng))
}

/// Samples `Uniform(mean * (1 - sqrt(3) * cv), mean * (1 + sqrt(3) * cv))`,
/// the variance-matched uniform distribution used for `K`, `q`, `alpha`.
fn sample_uniform_cv(mean: f64, cv: f64, rng: &mut impl Rng) -> f64 {
    if cv <= 1e-12 {
        return mean;
    }
    let spread = 3.0_f64.sqrt() * cv;
    let lo = mean * (1.0 - spread);
    let hi = mean * (1.0 + spread);
    if (hi - lo).abs() < 1e-15 {
        mean
    } else {
        rng.gen_range(lo.min(hi)..lo.max(hi))
    }
}

/// Circularly shifts `xs` by an integer lag: negative lag means the
/// climate series leads (its value at simulation week `i` is drawn from
/// `i + |lag|`); positive lag means it trails.
fn circular_shift(xs: &[f64], lag: i32) -> Vec<f64> {
    let n = xs.len() as i32;
    (0..n)
        .map(|i| {
            let src = (i - lag).rem_euclid(n) as usize;
            xs[src]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(value: f64, weeks: usize) -> Vec<f64> {
        vec![value; weeks]
    }

    fn constant_inputs(k: usize) -> (Vec<f64>, Vec<f64>) {
        (flat_series(25.0, 52 * k), flat_series(25.0, 52 * k))
    }

    #[test]
    fn zero_cv_degenerates_to_single_trajectory_modulo_climate_noise() {
        let (temp_raw, temp_base) = constant_inputs(4);
        let (precip_raw, precip_base) = (flat_series(150.0, 52 * 4), flat_series(150.0, 52 * 4));
        let (humid_raw, humid_base) = (flat_series(70.0, 52 * 4), flat_series(70.0, 52 * 4));
        let climate = ClimateTrainingInputs {
            temp: ClimateTrainingSeries { raw: &temp_raw, baseline: &temp_base },
            precip: ClimateTrainingSeries { raw: &precip_raw, baseline: &precip_base },
            humid: ClimateTrainingSeries { raw: &humid_raw, baseline: &humid_base },
        };
        let growth = GrowthParams {
            r0: 0.3,
            k: 5000.0,
            q: 0.9,
            p: 2.0,
            alpha: 1.2,
            cv_r0: 0.0,
            cv_k: 0.0,
            cv_q: 0.0,
            cv_p: 0.0,
            cv_alpha: 0.0,
            lag_t: -4,
            lag_p: -4,
            lag_h: -4,
        };
        let ew41 = vec![100.0];
        let (u, _du) = monte_carlo_forecast(
            "SP",
            &growth,
            &climate,
            ClimateMode::TxPxH,
            &ew41,
            SimGrid::default(),
            8,
            30_081_984,
        )
        .unwrap();

        let last_week: Vec<f64> = (0..8).map(|j| u.column(j)[51]).collect();
        let mean = last_week.iter().sum::<f64>() / last_week.len() as f64;
        for &v in &last_week {
            assert!((v - mean).abs() / mean.max(1.0) < 0.5, "columns should stay close under zero cv");
        }
    }

    #[test]
    fn lag_shift_changes_the_incidence_trajectory() {
        // §8 scenario 4: identical inputs except lag_t, phase-shifted climate
        // drive should make the two incidence ensembles differ (L2 distance > 0).
        let (temp_raw, temp_base) = (
            (0..52 * 4)
                .map(|i| 25.0 + 8.0 * (2.0 * std::f64::consts::PI * (i % 52) as f64 / 52.0).sin())
                .collect::<Vec<f64>>(),
            (0..52 * 4)
                .map(|i| 25.0 + 8.0 * (2.0 * std::f64::consts::PI * (i % 52) as f64 / 52.0).sin())
                .collect::<Vec<f64>>(),
        );
        let (precip_raw, precip_base) = (flat_series(150.0, 52 * 4), flat_series(150.0, 52 * 4));
        let (humid_raw, humid_base) = (flat_series(70.0, 52 * 4), flat_series(70.0, 52 * 4));
        let climate = ClimateTrainingInputs {
            temp: ClimateTrainingSeries { raw: &temp_raw, baseline: &temp_base },
            precip: ClimateTrainingSeries { raw: &precip_raw, baseline: &precip_base },
            humid: ClimateTrainingSeries { raw: &humid_raw, baseline: &humid_base },
        };
        let ew41 = vec![100.0];

        let mut growth = GrowthParams {
            r0: 0.3,
            k: 5000.0,
            q: 0.9,
            p: 2.0,
            alpha: 1.2,
            cv_r0: 0.0,
            cv_k: 0.0,
            cv_q: 0.0,
            cv_p: 0.0,
            cv_alpha: 0.0,
            lag_t: -2,
            lag_p: -4,
            lag_h: -4,
        };
        let (u_lag2, _) = monte_carlo_forecast(
            "SP", &growth, &climate, ClimateMode::T, &ew41, SimGrid::default(), 4, 30_081_984,
        )
        .unwrap();

        growth.lag_t = -10;
        let (u_lag10, _) = monte_carlo_forecast(
            "SP", &growth, &climate, ClimateMode::T, &ew41, SimGrid::default(), 4, 30_081_984,
        )
        .unwrap();

        let l2: f64 = (0..52)
            .map(|i| {
                let a = u_lag2.column(0)[i];
                let b = u_lag10.column(0)[i];
                (a - b).powi(2)
            })
            .sum();
        assert!(l2 > 0.0, "lag_t shift should change the cumulative-case trajectory");
    }

    #[test]
    fn circular_shift_is_a_permutation() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let shifted = circular_shift(&xs, -3);
        let mut sorted = shifted.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, xs);
    }

    #[test]
    fn full_pipeline_produces_52_monotone_weeks() {
        let (temp_raw, temp_base) = constant_inputs(3);
        let (precip_raw, precip_base) = (flat_series(150.0, 52 * 3), flat_series(150.0, 52 * 3));
        let (humid_raw, humid_base) = (flat_series(70.0, 52 * 3), flat_series(70.0, 52 * 3));
        let climate = ClimateTrainingInputs {
            temp: ClimateTrainingSeries { raw: &temp_raw, baseline: &temp_base },
            precip: ClimateTrainingSeries { raw: &precip_raw, baseline: &precip_base },
            humid: ClimateTrainingSeries { raw: &humid_raw, baseline: &humid_base },
        };
        let ew41 = vec![90.0, 100.0, 110.0];

        let mut training = Ensemble::new(52, 3);
        for season in 0..3 {
            let mut cumulative = 0.0;
            for week in 0..52 {
                cumulative += 95.0;
                training.set(week, season, cumulative);
            }
        }

        let mut config = crate::types::ModelConfig::default();
        config.n_real_calibrate = 8;
        config.n_real_forecast = 16;

        let records = forecast("SP", &config, &climate, &ew41, &training, 2023).unwrap();
        assert_eq!(records.len(), 52);
        assert_eq!(records[0].date, chrono::NaiveDate::from_ymd_opt(2023, 10, 8).unwrap());
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
    fn rejects_training_span_shorter_than_two_seasons() {
        let (temp_raw, temp_base) = constant_inputs(1);
        let (precip_raw, precip_base) = (flat_series(150.0, 52), flat_series(150.0, 52));
        let (humid_raw, humid_base) = (flat_series(70.0, 52), flat_series(70.0, 52));
        let climate = ClimateTrainingInputs {
            temp: ClimateTrainingSeries { raw: &temp_raw, baseline: &temp_base },
            precip: ClimateTrainingSeries { raw: &precip_raw, baseline: &precip_base },
            humid: ClimateTrainingSeries { raw: &humid_raw, baseline: &humid_base },
        };
        let ew41 = vec![90.0];
        let training = Ensemble::new(52, 1);
        let config = crate::types::ModelConfig::default();
        assert!(forecast("SP", &config, &climate, &ew41, &training, 2023).is_err());
    }
}
