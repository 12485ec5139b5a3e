//! Parameter calibrator (§4.6): constrained local minimization of a
//! model/data misfit functional over the 13-dimensional growth-parameter
//! box, returning the mean parameters and spread coefficients the
//! Monte-Carlo forecaster (§4.5) samples around.
//!
//! Grounded on the teacher's own declared dependency stack: the workspace
//! `Cargo.toml` pins `argmin`/`argmin-math` (via `[patch.crates-io]`) for
//! exactly this purpose, even though the two crates this repo was copied
//! from use it only transitively through `anofox-forecast`/`anofox-regression`.

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::neldermead::NelderMead;
use rand::Rng;

use crate::clidengo::{monte_carlo_forecast, ClimateTrainingInputs};
use crate::error::{ForecastError, Result};
use crate::quantiles::Ensemble;
use crate::rng::realization_rng;
use crate::types::{GrowthParams, Misfit, ModelConfig};

const COMPONENT: &str = "calibrate";
const N_DIM: usize = 13;

struct MisfitProblem<'a> {
    region: &'a str,
    config: &'a ModelConfig,
    climate: &'a ClimateTrainingInputs<'a>,
    ew41_values: &'a [f64],
    training_cumulative: &'a Ensemble,
    bounds: ([f64; N_DIM], [f64; N_DIM]),
}

impl<'a> MisfitProblem<'a> {
    /// Projects `x` onto the box constraints before evaluating — the
    /// "simple box constraints" handling §4.6 calls for, implemented as a
    /// clamp rather than a true SQP/interior-point formulation since the
    /// objective itself is a black-box Monte-Carlo simulation.
    fn clamp(&self, x: &[f64]) -> [f64; N_DIM] {
        let (lo, hi) = &self.bounds;
        let mut out = [0.0; N_DIM];
        for i in 0..N_DIM {
            out[i] = x[i].clamp(lo[i], hi[i]);
        }
        out
    }

    fn evaluate(&self, x: &[f64]) -> Result<f64> {
        let clamped = self.clamp(x);
        let growth = GrowthParams::from_vec13(&clamped);
        let (u, _du) = monte_carlo_forecast(
            self.region,
            &growth,
            self.climate,
            self.config.climate_mode,
            self.ew41_values,
            crate::types::SimGrid::default(),
            self.config.n_real_calibrate,
            self.config.seed,
        )?;
        Ok(match self.config.misfit {
            Misfit::Mse => mse_misfit(&u, self.training_cumulative),
            Misfit::MeanVar { w } => mean_var_misfit(&u, self.training_cumulative, w),
        })
    }
}

impl<'a> CostFunction for MisfitProblem<'a> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        match self.evaluate(param) {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Ok(f64::MAX),
        }
    }
}

fn column_mean(e: &Ensemble) -> Vec<f64> {
    (0..e.n_weeks)
        .map(|i| (0..e.n_real).map(|j| e.column(j)[i]).sum::<f64>() / e.n_real as f64)
        .collect()
}

/// Whole-matrix coefficient of variation: `std(all entries) / mean(all entries)`.
fn matrix_cov(e: &Ensemble) -> f64 {
    let n = e.values.len() as f64;
    let mean = e.values.iter().sum::<f64>() / n;
    let var = e.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if mean.abs() < 1e-12 {
        0.0
    } else {
        var.sqrt() / mean.abs()
    }
}

/// `J(X) = ||mean_col(U) - mean_col(D)||^2 + E_col ||U - mean_col(U)||^2`.
fn mse_misfit(u: &Ensemble, d: &Ensemble) -> f64 {
    let u_mean = column_mean(u);
    let d_mean = column_mean(d);
    let term1: f64 = u_mean.iter().zip(d_mean.iter()).map(|(a, b)| (a - b).powi(2)).sum();

    let term2: f64 = (0..u.n_real)
        .map(|j| u.column(j).iter().zip(u_mean.iter()).map(|(c, m)| (c - m).powi(2)).sum::<f64>())
        .sum::<f64>()
        / u.n_real as f64;

    term1 + term2
}

/// `J(X) = w * (||u - d||^2 / ||d||^2) + (1 - w) * ((cov_U - cov_D) / cov_D)^2`.
fn mean_var_misfit(u: &Ensemble, d: &Ensemble, w: f64) -> f64 {
    let u_mean = column_mean(u);
    let d_mean = column_mean(d);
    let num: f64 = u_mean.iter().zip(d_mean.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    let den: f64 = d_mean.iter().map(|b| b * b).sum::<f64>().max(1e-9);

    let cov_u = matrix_cov(u);
    let cov_d = matrix_cov(d);
    let var_term = if cov_d.abs() > 1e-9 { ((cov_u - cov_d) / cov_d).powi(2) } else { 0.0 };

    w * (num / den) + (1.0 - w) * var_term
}

/// Builds the `N_DIM + 1` vertex simplex Nelder-Mead needs, centered at the
/// box midpoint with each vertex perturbed along one axis by 10% of that
/// axis's box width, clamped back into the box.
fn initial_simplex(bounds: &([f64; N_DIM], [f64; N_DIM])) -> Vec<Vec<f64>> {
    let (lo, hi) = bounds;
    let midpoint: Vec<f64> = (0..N_DIM).map(|i| (lo[i] + hi[i]) / 2.0).collect();
    let mut simplex = vec![midpoint.clone()];
    for i in 0..N_DIM {
        let mut vertex = midpoint.clone();
        let step = 0.1 * (hi[i] - lo[i]);
        vertex[i] = (vertex[i] + step).clamp(lo[i], hi[i]);
        if (vertex[i] - midpoint[i]).abs() < 1e-12 {
            vertex[i] = (vertex[i] - step).clamp(lo[i], hi[i]);
        }
        simplex.push(vertex);
    }
    simplex
}

fn run_nelder_mead(problem: MisfitProblem, simplex: Vec<Vec<f64>>) -> Result<(Vec<f64>, f64)> {
    let region = problem.region.to_string();
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-6)
        .map_err(|e| ForecastError::model_fit(region.clone(), COMPONENT, e.to_string()))?;

    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(200))
        .run()
        .map_err(|e| ForecastError::model_fit(region.clone(), COMPONENT, e.to_string()))?;

    let best_param = result.state().get_best_param().cloned().ok_or_else(|| {
        ForecastError::model_fit(region.clone(), COMPONENT, "optimizer returned no best parameter")
    })?;
    let best_cost = result.state().get_best_cost();
    tracing::debug!(
        region,
        iters = result.state().get_iter(),
        cost = best_cost,
        "calibrate: nelder-mead converged"
    );
    Ok((best_param, best_cost))
}

/// Runs the constrained calibrator: initial guess is the box midpoint
/// (§4.6); terminates at `sd_tolerance <= 1e-6` or 200 iterations. If the
/// optimizer fails to reduce the objective from the initial point, retries
/// once from a perturbed initial guess before surfacing `ModelFit`.
pub fn calibrate(
    region: &str,
    config: &ModelConfig,
    climate: &ClimateTrainingInputs,
    ew41_values: &[f64],
    training_cumulative: &Ensemble,
) -> Result<GrowthParams> {
    let bounds = GrowthParams::bounds();

    let problem = MisfitProblem { region, config, climate, ew41_values, training_cumulative, bounds };
    let initial_cost = problem.evaluate(&initial_simplex(&bounds)[0])?;

    let simplex = initial_simplex(&bounds);
    let problem = MisfitProblem { region, config, climate, ew41_values, training_cumulative, bounds };
    let (best_param, best_cost) = run_nelder_mead(problem, simplex)?;

    if best_cost < initial_cost {
        return Ok(GrowthParams::from_vec13(&clamp_to_bounds(&best_param, &bounds)));
    }

    // Single optimizer restart from a perturbed initial guess (§7, "local
    // retry is limited to ... a single optimizer restart from a perturbed
    // initial guess").
    let mut rng = realization_rng(config.seed, 0xCA11_B8A7);
    let mut restart_simplex = initial_simplex(&bounds);
    for vertex in restart_simplex.iter_mut() {
        for (i, v) in vertex.iter_mut().enumerate() {
            let jitter = (bounds.1[i] - bounds.0[i]) * rng.gen_range(-0.05..0.05);
            *v = (*v + jitter).clamp(bounds.0[i], bounds.1[i]);
        }
    }
    let problem = MisfitProblem { region, config, climate, ew41_values, training_cumulative, bounds };
    let (best_param, best_cost) = run_nelder_mead(problem, restart_simplex)?;

    if best_cost < initial_cost {
        Ok(GrowthParams::from_vec13(&clamp_to_bounds(&best_param, &bounds)))
    } else {
        Err(ForecastError::model_fit(
            region,
            COMPONENT,
            "optimizer did not reduce the objective from the initial point after one restart",
        ))
    }
}

fn clamp_to_bounds(x: &[f64], bounds: &([f64; N_DIM], [f64; N_DIM])) -> [f64; N_DIM] {
    let mut out = [0.0; N_DIM];
    for i in 0..N_DIM {
        out[i] = x[i].clamp(bounds.0[i], bounds.1[i]);
    }
    out
}
