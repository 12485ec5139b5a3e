//! Training-span assembly (§4.1, §3): turns ingested observations into the
//! season-aligned series each forecaster consumes — complete `EW41..EW40`
//! seasons for the climate generator, and a single chronological series
//! ending at the validation-window origin for SARIMAX/ARp.
//!
//! The out-of-scope external smoother (`SPEC_FULL.md` §9 / spec.md
//! Non-goals: the original's SVD-Hankel/Savitzky-Golay detrending pipeline
//! is not part of this system) still leaves a climate "baseline" series the
//! generator needs (§4.2 step 1, seasonal skeleton). `moving_average_baseline`
//! is a minimal centered-window stand-in for that excluded pipeline, not a
//! reimplementation of it.

use std::collections::HashMap;

use dengue_fcst_core::epiweek::Epiweek;
use dengue_fcst_core::quantiles::Ensemble;
use dengue_fcst_core::types::{Season, ValidationWindow, WeeklyObservation};
use dengue_fcst_core::{ForecastError, Result};

const COMPONENT: &str = "span";

/// The season-aligned and chronological views of one region's training
/// data, both cut off at the validation-window's forecast origin.
pub struct TrainingSpan {
    /// Every complete 52-week `EW41(y)..EW40(y+1)` season found at or
    /// before `origin`, oldest first.
    pub seasons: Vec<Season>,
    /// Every observation at or before `origin`, sorted ascending —
    /// including weeks that don't close out a complete season, which the
    /// climate generator's `raw`/`baseline` series cannot use but the
    /// SARIMAX/ARp chronological series can.
    pub chronological: Vec<WeeklyObservation>,
    pub origin: Epiweek,
}

/// Builds a region's training span for one validation window, rejecting a
/// region with no complete training season (`InsufficientData`, §7).
pub fn build(
    region: &str,
    observations: &[WeeklyObservation],
    window: ValidationWindow,
    forecast_target_year: i32,
) -> Result<TrainingSpan> {
    let origin = window.forecast_origin_epiweek(forecast_target_year);
    let chronological: Vec<WeeklyObservation> =
        observations.iter().copied().filter(|o| o.epiweek <= origin).collect();

    let by_epiweek: HashMap<Epiweek, WeeklyObservation> =
        chronological.iter().map(|o| (o.epiweek, *o)).collect();

    let mut seasons = Vec::new();
    if let Some(first) = chronological.first() {
        let mut start_year = first.epiweek.year - 1;
        loop {
            let window_weeks = Epiweek::season_window(start_year);
            if window_weeks[0] > origin {
                break;
            }
            if window_weeks[Season::LEN - 1] <= origin {
                let mut weeks = Vec::with_capacity(Season::LEN);
                let mut complete = true;
                for ew in window_weeks.iter() {
                    match by_epiweek.get(ew) {
                        Some(obs) => weeks.push(*obs),
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    seasons.push(Season { start_year, weeks });
                }
            }
            start_year += 1;
        }
    }

    if seasons.is_empty() {
        return Err(ForecastError::insufficient_data(region, COMPONENT, Season::LEN, chronological.len()));
    }

    Ok(TrainingSpan { seasons, chronological, origin })
}

/// One field of the chronological series, in epiweek order.
pub fn chronological_field(span: &TrainingSpan, select: impl Fn(&WeeklyObservation) -> f64) -> Vec<f64> {
    span.chronological.iter().map(|o| select(o)).collect()
}

/// One field concatenated across every complete training season, in season
/// order — the `raw` series shape `climate::generate` requires (a multiple
/// of the 52-week window).
pub fn concat_field(span: &TrainingSpan, select: impl Fn(&WeeklyObservation) -> f64) -> Vec<f64> {
    span.seasons.iter().flat_map(|s| s.weeks.iter().map(|o| select(o))).collect()
}

/// Each training season's EW41 (season-opening week) case count — the
/// empirical draw pool `monte_carlo_forecast` samples `C0_j` from (§4.5).
pub fn ew41_cases(span: &TrainingSpan) -> Vec<f64> {
    span.seasons.iter().map(|s| s.weeks[0].cases as f64).collect()
}

/// Replaces every non-positive or non-finite entry with half the smallest
/// strictly positive, finite value present in `values` (§3, "non-positive
/// climate readings are floored before the log transform"). Falls back to
/// a small fixed epsilon if no entry is positive at all.
pub fn positive_floor(values: &mut [f64]) {
    let smallest_positive = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    let floor = if smallest_positive.is_finite() { smallest_positive / 2.0 } else { 1e-6 };
    for v in values.iter_mut() {
        if !(v.is_finite() && *v > 0.0) {
            *v = floor;
        }
    }
}

/// Centered moving-average smoother standing in for the excluded external
/// detrending pipeline (see module doc comment); clamps the window to the
/// series edges rather than padding.
pub fn moving_average_baseline(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n.saturating_sub(1));
            let slice = &values[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Builds the "observed data" `D` the calibrator's misfit functionals
/// (§4.6) compare the simulated ensemble `U` against: one column per
/// complete training season, each the within-season cumulative case count.
pub fn cumulative_ensemble(span: &TrainingSpan) -> Ensemble {
    let n_seasons = span.seasons.len();
    let mut ensemble = Ensemble::new(Season::LEN, n_seasons);
    for (j, season) in span.seasons.iter().enumerate() {
        let mut running = 0.0;
        for (i, obs) in season.weeks.iter().enumerate() {
            running += obs.cases as f64;
            ensemble.set(i, j, running);
        }
    }
    ensemble
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_obs(year: i32, week: u32, cases: u64) -> WeeklyObservation {
        WeeklyObservation {
            epiweek: Epiweek::new(year, week).unwrap(),
            cases,
            temp_min: 20.0,
            temp_med: 25.0,
            temp_max: 30.0,
            precip_min: 0.0,
            precip_med: 10.0,
            precip_max: 50.0,
            pressure_min: 1000.0,
            pressure_med: 1010.0,
            pressure_max: 1020.0,
            rel_humid_min: 50.0,
            rel_humid_med: 60.0,
            rel_humid_max: 70.0,
            thermal_range: None,
            rainy_days: None,
        }
    }

    fn flat_season_observations(start_year: i32, end_year: i32) -> Vec<WeeklyObservation> {
        let mut out = Vec::new();
        let mut year = start_year;
        loop {
            for ew in Epiweek::season_window(year) {
                out.push(make_obs(ew.year, ew.week, 10));
            }
            if year == end_year {
                break;
            }
            year += 1;
        }
        out
    }

    #[test]
    fn builds_one_complete_season_when_exactly_one_is_available() {
        let obs = flat_season_observations(2021, 2021);
        let origin = ValidationWindow::T3.forecast_origin_epiweek(2023);
        let span = build("SP", &obs, ValidationWindow::T3, 2023).unwrap();
        assert_eq!(span.seasons.len(), 1);
        assert_eq!(span.seasons[0].start_year, 2021);
        assert!(span.origin == origin);
    }

    #[test]
    fn rejects_a_region_with_no_complete_season() {
        let obs = vec![make_obs(2023, 1, 10), make_obs(2023, 2, 11)];
        assert!(build("SP", &obs, ValidationWindow::T3, 2023).is_err());
    }

    #[test]
    fn positive_floor_replaces_zero_and_negative_entries() {
        let mut values = vec![4.0, 0.0, -1.0, 2.0];
        positive_floor(&mut values);
        assert_eq!(values[3], 2.0);
        assert_eq!(values[1], 1.0); // half of the smallest positive entry, 2.0
        assert_eq!(values[2], 1.0);
    }

    #[test]
    fn cumulative_ensemble_accumulates_per_season_column() {
        let obs = flat_season_observations(2021, 2022);
        let span = build("SP", &obs, ValidationWindow::T3, 2024).unwrap();
        assert_eq!(span.seasons.len(), 2);
        let ensemble = cumulative_ensemble(&span);
        assert_eq!(ensemble.n_real, 2);
        assert_eq!(ensemble.column(0).last(), Some(&520.0));
        assert_eq!(ensemble.column(1).last(), Some(&520.0));
    }

    #[test]
    fn moving_average_baseline_preserves_length() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let baseline = moving_average_baseline(&values, 3);
        assert_eq!(baseline.len(), values.len());
    }
}
