//! Adaptive Runge-Kutta-Fehlberg/Dormand-Prince (RK45) integrator for the
//! β-logistic growth ODE core (§4.4). No ODE solver crate is part of this
//! codebase's dependency stack, following its existing practice of
//! hand-rolling numerical routines (time-series decomposition, entropy)
//! rather than reaching for a heavy external solver.

use crate::error::{ForecastError, Result};

const COMPONENT: &str = "ode";

/// Right-hand side of an autonomous-in-structure, time-dependent scalar ODE.
pub trait Rhs {
    fn eval(&self, t: f64, c: f64) -> f64;
}

/// Tolerances for the adaptive step controller, matching §4.4's requirement
/// of `rtol <= 1e-6`, `atol <= 1e-9`.
#[derive(Debug, Clone, Copy)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances { rtol: 1e-6, atol: 1e-9 }
    }
}

/// Per-thread scratch buffers reused across realizations, per
/// `SPEC_FULL.md` §9 ("ODE integration" design note): the right-hand side
/// allocates nothing, and the stage buffer here is the only heap state a
/// caller needs to keep alive across repeated `integrate` calls.
#[derive(Debug, Default)]
pub struct Scratch {
    stage: [f64; 7],
}

/// Dormand-Prince (RK45) Butcher tableau coefficients.
mod tableau {
    pub const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
    pub const A: [[f64; 6]; 6] = [
        [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
        [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
        [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
        [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
        [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
    ];
    // 5th-order solution weights (= last row of A, the FSAL property).
    pub const B5: [f64; 7] = [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0, 0.0];
    // 4th-order solution weights, for the embedded error estimate.
    pub const B4: [f64; 7] = [
        5179.0 / 57600.0,
        0.0,
        7571.0 / 16695.0,
        393.0 / 640.0,
        -92097.0 / 339200.0,
        187.0 / 2100.0,
        1.0 / 40.0,
    ];
}

/// Integrates `rhs` from `t0` to `t0 + n_steps * dt`, returning the state
/// `c(t_k)` and the right-hand side `dc(t_k)` at each of the `n_steps`
/// reporting points (the integer weekly mesh of §4.4), taking as many
/// adaptive sub-steps as needed between reporting points.
pub fn integrate(
    region: &str,
    rhs: &impl Rhs,
    c0: f64,
    t0: f64,
    dt: f64,
    n_steps: usize,
    tol: Tolerances,
    scratch: &mut Scratch,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if !c0.is_finite() || c0 < 0.0 {
        return Err(ForecastError::invalid_input(region, COMPONENT, "initial condition must be finite and non-negative"));
    }

    let mut c = vec![0.0_f64; n_steps];
    let mut dc = vec![0.0_f64; n_steps];
    let mut t = t0;
    let mut y = c0;

    for k in 0..n_steps {
        let target = t0 + dt * (k + 1) as f64;
        y = step_to(region, rhs, t, y, target, tol, scratch)?;
        t = target;
        c[k] = y;
        dc[k] = rhs_real_part(rhs, t, y, region)?;
    }

    Ok((c, dc))
}

/// Evaluates the right-hand side and enforces the "real part only" contract
/// of §4.5: a non-finite derivative indicates solver/model breakdown on the
/// real axis and is surfaced as `NumericalFailure` rather than silently
/// propagated as NaN.
fn rhs_real_part(rhs: &impl Rhs, t: f64, y: f64, region: &str) -> Result<f64> {
    let v = rhs.eval(t, y);
    if !v.is_finite() {
        return Err(ForecastError::numerical_failure(
            region,
            COMPONENT,
            "right-hand side evaluated to a non-finite value",
        ));
    }
    Ok(v)
}

/// Advances the adaptive integrator from `t_start` to `t_end`, taking as
/// many accepted sub-steps as the error controller requires.
fn step_to(
    region: &str,
    rhs: &impl Rhs,
    t_start: f64,
    y_start: f64,
    t_end: f64,
    tol: Tolerances,
    scratch: &mut Scratch,
) -> Result<f64> {
    let mut t = t_start;
    let mut y = y_start;
    let mut h = (t_end - t_start).max(1e-6);
    let mut rejected = 0u32;
    const MAX_SUBSTEPS: usize = 10_000;

    for _ in 0..MAX_SUBSTEPS {
        if t >= t_end {
            if rejected > 0 {
                tracing::debug!(region, rejected, "ode: substeps rejected by error controller");
            }
            return Ok(y);
        }
        h = h.min(t_end - t);
        let (y5, err) = dopri_step(rhs, t, y, h, &mut scratch.stage);
        if !y5.is_finite() {
            return Err(ForecastError::numerical_failure(region, COMPONENT, "state became non-finite during integration"));
        }
        let scale = tol.atol + tol.rtol * y.abs().max(y5.abs());
        let err_norm = if scale > 0.0 { (err / scale).abs() } else { err.abs() };

        if err_norm <= 1.0 || h <= 1e-10 {
            t += h;
            y = y5;
            let growth = if err_norm > 0.0 { 0.9 * err_norm.powf(-0.2) } else { 5.0 };
            h *= growth.clamp(0.2, 5.0);
        } else {
            rejected += 1;
            let shrink = 0.9 * err_norm.powf(-0.25);
            h *= shrink.clamp(0.1, 0.9);
        }
    }

    Err(ForecastError::numerical_failure(
        region,
        COMPONENT,
        "integrator exceeded maximum substep count without converging",
    ))
}

/// One Dormand-Prince stage evaluation, returning the accepted 5th-order
/// state and the embedded 4th-order error estimate.
fn dopri_step(rhs: &impl Rhs, t: f64, y: f64, h: f64, stage: &mut [f64; 7]) -> (f64, f64) {
    use tableau::{A, B4, B5, C};

    stage[0] = rhs.eval(t, y);
    for i in 1..7 {
        let ti = t + C[i] * h;
        let mut yi = y;
        for j in 0..i {
            yi += h * A[i - 1][j] * stage[j];
        }
        stage[i] = rhs.eval(ti, yi);
    }

    let y5: f64 = y + h * B5.iter().zip(stage.iter()).map(|(b, k)| b * k).sum::<f64>();
    let y4: f64 = y + h * B4.iter().zip(stage.iter()).map(|(b, k)| b * k).sum::<f64>();
    (y5, y5 - y4)
}

/// Right-hand side of the β-logistic growth ODE (§4.4):
///
/// `dC/dt = r_eff(t) * C^q * (1 - (C/K)^alpha)^p`
///
/// `r_eff` is a precomputed weekly effective-rate trajectory
/// (`r0 * B_T(T(t)) * B_P(P(t)) * B_H(H(t))`, gated by the configured
/// climate mode); combining the per-factor Briere suitabilities is the
/// Monte-Carlo forecaster's job (§4.5), not the ODE core's — this keeps the
/// solver itself climate-agnostic.
pub struct GrowthRhs<'a> {
    pub r_eff: &'a [f64],
    pub k: f64,
    pub q: f64,
    pub p: f64,
    pub alpha: f64,
}

impl<'a> Rhs for GrowthRhs<'a> {
    fn eval(&self, t: f64, c: f64) -> f64 {
        if c <= 0.0 {
            return 0.0;
        }
        let r = interp(self.r_eff, t);
        let ratio = (c / self.k).clamp(0.0, 1.0 - 1e-12);
        r * c.powf(self.q) * (1.0 - ratio.powf(self.alpha)).powf(self.p)
    }
}

/// Linear interpolation on the integer weekly grid; a no-op at integer
/// nodes `t`, present so the adaptive solver's sub-step samples land on a
/// well-defined value instead of an out-of-range index.
fn interp(series: &[f64], t: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let n = series.len();
    let clamped = t.clamp(0.0, (n - 1) as f64);
    let lo = clamped.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = clamped - lo as f64;
    series[lo] * (1.0 - frac) + series[hi] * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroSuitability;
    impl Rhs for ZeroSuitability {
        fn eval(&self, _t: f64, _c: f64) -> f64 {
            0.0
        }
    }

    struct ExponentialGrowth {
        rate: f64,
    }
    impl Rhs for ExponentialGrowth {
        fn eval(&self, _t: f64, c: f64) -> f64 {
            self.rate * c
        }
    }

    #[test]
    fn zero_suitability_holds_state_constant() {
        let mut scratch = Scratch::default();
        let (c, dc) = integrate("SP", &ZeroSuitability, 42.0, 0.0, 1.0, 52, Tolerances::default(), &mut scratch).unwrap();
        for &v in &c {
            assert!((v - 42.0).abs() < 1e-6);
        }
        for &v in &dc {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn exponential_growth_matches_closed_form() {
        let mut scratch = Scratch::default();
        let rate = 0.3;
        let (c, _dc) = integrate("SP", &ExponentialGrowth { rate }, 1.0, 0.0, 1.0, 10, Tolerances::default(), &mut scratch).unwrap();
        for (k, &v) in c.iter().enumerate() {
            let expected = (rate * (k + 1) as f64).exp();
            let rel_err = (v - expected).abs() / expected;
            assert!(rel_err < 1e-5, "step {k}: got {v}, expected {expected}");
        }
    }

    #[test]
    fn rejects_negative_initial_condition() {
        let mut scratch = Scratch::default();
        assert!(integrate("SP", &ZeroSuitability, -1.0, 0.0, 1.0, 5, Tolerances::default(), &mut scratch).is_err());
    }

    #[test]
    fn growth_rhs_saturates_toward_carrying_capacity() {
        let r_eff = [0.5_f64; 52];
        let rhs = GrowthRhs { r_eff: &r_eff, k: 1000.0, q: 1.0, p: 1.0, alpha: 1.0 };
        let mut scratch = Scratch::default();
        let (c, _dc) = integrate("SP", &rhs, 10.0, 0.0, 1.0, 52, Tolerances::default(), &mut scratch).unwrap();
        let last = *c.last().unwrap();
        assert!(last > 10.0 && last <= 1000.0 + 1e-6);
        assert!(c.windows(2).all(|w| w[1] >= w[0] - 1e-9));
    }

    #[test]
    fn growth_rhs_zero_rate_holds_state_constant() {
        let r_eff = [0.0_f64; 52];
        let rhs = GrowthRhs { r_eff: &r_eff, k: 1000.0, q: 1.0, p: 1.0, alpha: 1.0 };
        let mut scratch = Scratch::default();
        let (c, _dc) = integrate("SP", &rhs, 50.0, 0.0, 1.0, 52, Tolerances::default(), &mut scratch).unwrap();
        for &v in &c {
            assert!((v - 50.0).abs() < 1e-6);
        }
    }
}
