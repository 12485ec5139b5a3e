//! Quantile assembler (§4.9): turns a `52 x N` ensemble of weekly
//! trajectories into the ten-field output contract — mean/median `pred` and
//! four symmetric lower/upper percentile pairs, rounded, clipped, and
//! zero-remapped.

use chrono::NaiveDate;

use crate::error::{ForecastError, Result};
use crate::types::{ForecastRecord, PredStatistic};

/// The four central prediction interval levels required by the output
/// contract, widest first (matches the column order in §6).
pub const LEVELS: [f64; 4] = [95.0, 90.0, 80.0, 50.0];

/// A `n_weeks x n_real` matrix of Monte-Carlo or simulated trajectories,
/// column-major (`values[j * n_weeks + i]` is week `i` of realization `j`).
/// Produced once by a forecaster, consumed once by this module, then
/// discarded (§3, Lifecycles).
#[derive(Debug, Clone)]
pub struct Ensemble {
    pub n_weeks: usize,
    pub n_real: usize,
    pub values: Vec<f64>,
}

impl Ensemble {
    pub fn new(n_weeks: usize, n_real: usize) -> Self {
        Ensemble { n_weeks, n_real, values: vec![0.0; n_weeks * n_real] }
    }

    pub fn column(&self, j: usize) -> &[f64] {
        &self.values[j * self.n_weeks..(j + 1) * self.n_weeks]
    }

    pub fn set(&mut self, week: usize, real: usize, v: f64) {
        self.values[real * self.n_weeks + week] = v;
    }

    /// Values of week `i` across every realization (one row of the matrix).
    fn week_row(&self, i: usize) -> Vec<f64> {
        (0..self.n_real).map(|j| self.values[j * self.n_weeks + i]).collect()
    }
}

/// Unrounded, unclipped per-week quantile trajectories, before the output
/// contract's rounding/clip/zero-remap pass. Exposed so the ARp forecaster
/// can run its SSA smoother over each trajectory before finalizing
/// (§4.8, "Post-processing").
#[derive(Debug, Clone)]
pub struct RawQuantiles {
    pub pred: Vec<f64>,
    /// Indexed in the same order as [`LEVELS`]: 95, 90, 80, 50.
    pub lower: [Vec<f64>; 4],
    pub upper: [Vec<f64>; 4],
}

/// Percentile by linear interpolation, `p` on a 0..100 scale. Grounded on
/// the teacher's `stats::percentile` (same interpolation rule), generalized
/// to take an already-computed sorted slice so callers reuse one sort
/// across both the lower and upper percentile of a level.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let n = sorted.len() as f64;
    let idx = (p / 100.0) * (n - 1.0);
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let frac = idx - lower as f64;
    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Computes the raw (unrounded) quantile trajectories from an ensemble.
/// `pred_stat` selects whether `pred` is the ensemble mean (CLiDENGO) or
/// the 50th percentile (SARIMAX, ARp) — see `SPEC_FULL.md` §9, Open
/// Question 1; this is a deliberate per-model choice, not unified.
pub fn compute_raw(ensemble: &Ensemble, pred_stat: PredStatistic) -> RawQuantiles {
    let mut pred = vec![0.0; ensemble.n_weeks];
    let mut lower: [Vec<f64>; 4] = Default::default();
    let mut upper: [Vec<f64>; 4] = Default::default();
    for band in lower.iter_mut().chain(upper.iter_mut()) {
        *band = vec![0.0; ensemble.n_weeks];
    }

    for i in 0..ensemble.n_weeks {
        let mut row = ensemble.week_row(i);
        row.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        pred[i] = match pred_stat {
            PredStatistic::Mean => row.iter().sum::<f64>() / row.len() as f64,
            PredStatistic::Median => percentile(&row, 50.0),
        };

        for (level_idx, &level) in LEVELS.iter().enumerate() {
            let r_minus = (100.0 - level) / 2.0;
            let r_plus = (100.0 + level) / 2.0;
            lower[level_idx][i] = percentile(&row, r_minus);
            upper[level_idx][i] = percentile(&row, r_plus);
        }
    }

    RawQuantiles { pred, lower, upper }
}

/// Final shaping (§4.9, "Final shaping"): round to the nearest integer,
/// clip negatives to 0, substitute 1 for any exact zero, then self-check
/// the row-wise monotonicity invariant of §3 — a violation at this point
/// means finalize's rounding pushed a pair out of order, which must not
/// happen and is surfaced as `OutputContract` rather than silently written.
pub fn finalize(region: &str, raw: &RawQuantiles, dates: &[NaiveDate]) -> Result<Vec<ForecastRecord>> {
    let n = raw.pred.len();
    if dates.len() != n {
        return Err(ForecastError::invalid_input(
            region,
            "quantiles",
            format!("{n} weeks of quantiles but {} dates", dates.len()),
        ));
    }

    let mut records = Vec::with_capacity(n);
    for i in 0..n {
        let pred = shape(raw.pred[i]);
        let l95 = shape(raw.lower[0][i]);
        let l90 = shape(raw.lower[1][i]);
        let l80 = shape(raw.lower[2][i]);
        let l50 = shape(raw.lower[3][i]);
        let u50 = shape(raw.upper[3][i]);
        let u80 = shape(raw.upper[2][i]);
        let u90 = shape(raw.upper[1][i]);
        let u95 = shape(raw.upper[0][i]);

        let ordered = [l95, l90, l80, l50, pred, u50, u80, u90, u95];
        if !ordered.windows(2).all(|w| w[0] <= w[1]) {
            return Err(ForecastError::output_contract(
                region,
                "quantiles",
                format!("week {i}: monotonicity invariant violated after rounding: {ordered:?}"),
            ));
        }

        records.push(ForecastRecord {
            date: dates[i],
            lower_95: l95,
            lower_90: l90,
            lower_80: l80,
            lower_50: l50,
            pred,
            upper_50: u50,
            upper_80: u80,
            upper_90: u90,
            upper_95: u95,
        });
    }
    Ok(records)
}

/// Round to nearest integer, clip negatives at 0, then remap an exact zero
/// to 1 (the output-contract quirk that avoids downstream division-by-zero
/// in scoring).
fn shape(x: f64) -> u64 {
    let rounded = x.round();
    let clipped = if rounded < 0.0 { 0.0 } else { rounded };
    let v = clipped as u64;
    if v == 0 {
        1
    } else {
        v
    }
}

/// Convenience: compute raw quantiles and finalize in one call, for
/// forecasters (CLiDENGO, SARIMAX) that need no post-processing between
/// the two steps.
pub fn assemble(
    region: &str,
    ensemble: &Ensemble,
    pred_stat: PredStatistic,
    dates: &[NaiveDate],
) -> Result<Vec<ForecastRecord>> {
    let raw = compute_raw(ensemble, pred_stat);
    finalize(region, &raw, dates)
}
