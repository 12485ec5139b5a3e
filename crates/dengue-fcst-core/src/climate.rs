//! Synthetic climate trajectory generator (§4.2): produces `nReal` synthetic
//! weekly climate trajectories whose seasonal skeleton matches the training
//! baseline and whose residual autocovariance matches the training
//! residuals, via Gershgorin-regularized Cholesky factorization of the
//! residual covariance matrix.

use faer::{Mat, Side};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{ForecastError, Result};

const COMPONENT: &str = "climate";
pub const WIN_LEN: usize = 52;

/// Inputs to one call of the climate generator.
pub struct ClimateGeneratorInput<'a> {
    pub raw: &'a [f64],
    pub baseline: &'a [f64],
    pub stride: usize,
    pub n_samp: usize,
    pub n_real: usize,
}

/// `nSamp x nReal` ensemble of synthetic trajectories.
pub struct ClimateEnsemble {
    pub n_samp: usize,
    pub n_real: usize,
    /// Column-major: `values[j * n_samp + i]` is week `i` of realization `j`.
    pub values: Vec<f64>,
}

impl ClimateEnsemble {
    pub fn column(&self, j: usize) -> &[f64] {
        &self.values[j * self.n_samp..(j + 1) * self.n_samp]
    }
}

/// Runs the five-step climate generator algorithm of §4.2.
pub fn generate(region: &str, input: &ClimateGeneratorInput, rng: &mut impl Rng) -> Result<ClimateEnsemble> {
    let n = input.raw.len();
    if n != input.baseline.len() {
        return Err(ForecastError::invalid_input(
            region,
            COMPONENT,
            format!(
                "raw series length {n} does not match baseline length {}",
                input.baseline.len()
            ),
        ));
    }
    if n % WIN_LEN != 0 {
        return Err(ForecastError::invalid_input(
            region,
            COMPONENT,
            format!("series length {n} is not a multiple of the {WIN_LEN}-week season window"),
        ));
    }
    if input.raw.iter().chain(input.baseline.iter()).any(|v| !v.is_finite() || *v <= 0.0) {
        return Err(ForecastError::numerical_failure(
            region,
            COMPONENT,
            "climate series must be strictly positive and finite",
        ));
    }

    let k = n / WIN_LEN;

    // 1. Seasonal skeleton: average the baseline across seasons.
    let mut skeleton = vec![0.0_f64; WIN_LEN];
    for (i, slot) in skeleton.iter_mut().enumerate() {
        let mut sum = 0.0;
        for season in 0..k {
            sum += input.baseline[season * WIN_LEN + i];
        }
        *slot = sum / k as f64;
    }

    // 2. Log transform.
    let lx: Vec<f64> = input.raw.iter().map(|v| v.ln()).collect();
    let lxbar: Vec<f64> = input.baseline.iter().map(|v| v.ln()).collect();
    let ls: Vec<f64> = skeleton.iter().map(|v| v.ln()).collect();

    // 3. Residual extraction and centering.
    let residual: Vec<f64> = lx.iter().zip(lxbar.iter()).map(|(a, b)| a - b).collect();
    let mu = mean(&residual);
    let centered: Vec<f64> = residual.iter().map(|r| r - mu).collect();

    // 4. Gaussian residual synthesis.
    let max_lag = input.stride * (input.n_samp - 1);
    let gamma = sample_autocovariance(&centered, max_lag);
    let mut cov = Mat::<f64>::zeros(input.n_samp, input.n_samp);
    for i in 0..input.n_samp {
        for j in 0..input.n_samp {
            let lag = input.stride * i.abs_diff(j);
            cov[(i, j)] = gamma[lag];
        }
    }
    let llt = regularized_cholesky(region, &mut cov)?;

    let mean_centered = mean(&centered);
    let mut r_syn = vec![0.0_f64; input.n_samp * input.n_real];
    let mut z = Mat::<f64>::zeros(input.n_samp, input.n_real);
    for j in 0..input.n_real {
        for i in 0..input.n_samp {
            let draw: f64 = StandardNormal.sample(rng);
            z[(i, j)] = draw;
        }
    }
    let l_z = &llt * &z;
    for j in 0..input.n_real {
        for i in 0..input.n_samp {
            r_syn[j * input.n_samp + i] = mean_centered + l_z[(i, j)];
        }
    }

    // 5. Reconstruction.
    let mut values = vec![0.0_f64; input.n_samp * input.n_real];
    for j in 0..input.n_real {
        for i in 0..input.n_samp {
            let season_pos = i % WIN_LEN;
            let lx_syn = ls[season_pos] + mu + r_syn[j * input.n_samp + i];
            let v = lx_syn.exp();
            if !v.is_finite() {
                return Err(ForecastError::numerical_failure(
                    region,
                    COMPONENT,
                    "non-finite value after reconstruction",
                ));
            }
            values[j * input.n_samp + i] = v;
        }
    }

    Ok(ClimateEnsemble {
        n_samp: input.n_samp,
        n_real: input.n_real,
        values,
    })
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample autocovariance `gamma(h) = (1/(N-h)) sum (x[n+h]-mu)(x[n]-mu)` for
/// `h = 0..=max_lag`, where `x` is already centered (so `mu = 0` here).
fn sample_autocovariance(centered: &[f64], max_lag: usize) -> Vec<f64> {
    let n = centered.len();
    (0..=max_lag)
        .map(|h| {
            if h >= n {
                return 0.0;
            }
            let mut sum = 0.0;
            for t in 0..(n - h) {
                sum += centered[t + h] * centered[t];
            }
            sum / (n - h) as f64
        })
        .collect()
}

/// Gershgorin lower bound on the smallest eigenvalue of a symmetric matrix:
/// `min_i (diag[i] - sum_{j != i} |M[i,j]|)`.
fn gershgorin_lower_bound(m: &Mat<f64>) -> f64 {
    let n = m.nrows();
    (0..n)
        .map(|i| {
            let off_diag_sum: f64 = (0..n).filter(|&j| j != i).map(|j| m[(i, j)].abs()).sum();
            m[(i, i)] - off_diag_sum
        })
        .fold(f64::INFINITY, f64::min)
}

/// Regularizes `cov` via the Gershgorin bound before attempting Cholesky
/// factorization (not only after a failed attempt), retrying once more with
/// a larger diagonal loading if the first attempt still fails
/// (`SPEC_FULL.md` §9, "Numerical robustness").
fn regularized_cholesky(region: &str, cov: &mut Mat<f64>) -> Result<Mat<f64>> {
    const EPS: f64 = 1e-8;
    let n = cov.nrows();

    let lambda_min = gershgorin_lower_bound(cov);
    let mut loading = if lambda_min < 0.0 { lambda_min.abs() + EPS } else { EPS };
    for i in 0..n {
        cov[(i, i)] += loading;
    }

    for attempt in 0..2 {
        match cov.cholesky(Side::Lower) {
            Ok(llt) => return Ok(llt.L().to_owned()),
            Err(_) if attempt == 0 => {
                tracing::debug!(region, "climate: cholesky failed, retrying with heavier diagonal loading");
                loading *= 10.0;
                for i in 0..n {
                    cov[(i, i)] += loading;
                }
            }
            Err(_) => {
                return Err(ForecastError::numerical_failure(
                    region,
                    COMPONENT,
                    "Cholesky factorization failed after two regularization attempts",
                ));
            }
        }
    }
    unreachable!("loop always returns within two attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn seasonal_series(k: usize) -> (Vec<f64>, Vec<f64>) {
        let mut raw = Vec::with_capacity(WIN_LEN * k);
        let mut baseline = Vec::with_capacity(WIN_LEN * k);
        for season in 0..k {
            for w in 0..WIN_LEN {
                let skeleton = 20.0 + 5.0 * (2.0 * std::f64::consts::PI * w as f64 / WIN_LEN as f64).sin();
                baseline.push(skeleton);
                raw.push(skeleton * (1.0 + 0.01 * ((season + w) % 3) as f64));
            }
        }
        (raw, baseline)
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let mut rng = StdRng::seed_from_u64(1);
        let input = ClimateGeneratorInput {
            raw: &[1.0, 2.0],
            baseline: &[1.0],
            stride: 1,
            n_samp: 4,
            n_real: 4,
        };
        assert!(generate("SP", &input, &mut rng).is_err());
    }

    #[test]
    fn rejects_non_multiple_of_window() {
        let mut rng = StdRng::seed_from_u64(1);
        let raw = vec![1.0; 10];
        let input = ClimateGeneratorInput {
            raw: &raw,
            baseline: &raw,
            stride: 1,
            n_samp: 4,
            n_real: 4,
        };
        assert!(generate("SP", &input, &mut rng).is_err());
    }

    #[test]
    fn produces_finite_strictly_positive_ensemble() {
        let (raw, baseline) = seasonal_series(6);
        let mut rng = StdRng::seed_from_u64(30_081_984);
        let input = ClimateGeneratorInput {
            raw: &raw,
            baseline: &baseline,
            stride: 1,
            n_samp: WIN_LEN,
            n_real: 16,
        };
        let ensemble = generate("SP", &input, &mut rng).unwrap();
        assert_eq!(ensemble.n_samp, WIN_LEN);
        assert_eq!(ensemble.n_real, 16);
        for &v in &ensemble.values {
            assert!(v.is_finite() && v > 0.0);
        }
    }
}
