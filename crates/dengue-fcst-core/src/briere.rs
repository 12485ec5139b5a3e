//! Generalized Briere suitability function: a smooth, bounded climate-response
//! nonlinearity mapping a climate value to a growth-suitability weight in `[0, 1]`.

use crate::error::{ForecastError, Result};

const COMPONENT: &str = "briere";

/// Parameters of the generalized Briere function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BriereParams {
    pub x_min: f64,
    pub x_max: f64,
    pub a: f64,
    pub m: f64,
    pub delta: f64,
    pub beta: f64,
}

impl Default for BriereParams {
    fn default() -> Self {
        BriereParams {
            x_min: 0.0,
            x_max: 1.0,
            a: 1.0,
            m: 2.0,
            delta: 1.0,
            beta: 50.0,
        }
    }
}

impl BriereParams {
    pub fn validate(&self, region: &str) -> Result<()> {
        if !(self.x_max > self.x_min) {
            return Err(ForecastError::invalid_input(
                region,
                COMPONENT,
                format!("x_max ({}) must exceed x_min ({})", self.x_max, self.x_min),
            ));
        }
        if self.a < 0.0 {
            return Err(ForecastError::invalid_input(region, COMPONENT, "a must be >= 0"));
        }
        if self.m < 1.0 {
            return Err(ForecastError::invalid_input(region, COMPONENT, "m must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.delta) {
            return Err(ForecastError::invalid_input(region, COMPONENT, "delta must be in [0, 1]"));
        }
        if self.beta <= 0.0 {
            return Err(ForecastError::invalid_input(region, COMPONENT, "beta must be > 0"));
        }
        Ok(())
    }
}

/// Numerically stable softplus: `(1/beta) * log(1 + exp(beta * t))`, evaluated
/// as `(1/beta) * (log1p(exp(-|beta * t|)) + max(beta * t, 0))` to avoid
/// overflow for large `|beta * t|`.
pub fn softplus(t: f64, beta: f64) -> f64 {
    let bt = beta * t;
    ((-bt.abs()).exp().ln_1p() + bt.max(0.0)) / beta
}

/// Evaluates the generalized Briere suitability function at `x`:
///
/// `B(x) = a * (x * softplus_beta(x - x_min) * softplus_beta(x_max - x)^(1/m))^delta`
pub fn briere(x: f64, p: &BriereParams) -> f64 {
    let left = softplus(x - p.x_min, p.beta);
    let right = softplus(p.x_max - x, p.beta).powf(1.0 / p.m);
    let base = x * left * right;
    if base <= 0.0 {
        0.0
    } else {
        p.a * base.powf(p.delta)
    }
}

/// Evaluates `briere` over a trajectory and normalizes by its own maximum so
/// the result lies in `[0, 1]`. Returns an all-zero vector unchanged (the
/// degenerate case used by the zero-suitability boundary test).
pub fn briere_normalized(xs: &[f64], p: &BriereParams) -> Vec<f64> {
    let raw: Vec<f64> = xs.iter().map(|&x| briere(x, p)).collect();
    let max = raw.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        raw
    } else {
        raw.into_iter().map(|v| v / max).collect()
    }
}
