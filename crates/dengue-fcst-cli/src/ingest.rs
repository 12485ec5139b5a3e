//! CSV ingest and validation boundary (§6 "Input: aggregated per-region
//! CSV").
//!
//! Reads the case-insensitive, arbitrary-column-order CSV contract into a
//! chronologically sorted `Vec<WeeklyObservation>`, rejecting anything the
//! ingest boundary must catch before the core ever sees it: unknown/missing
//! required columns, non-unique epiweeks, week 53, non-integer or negative
//! case counts, and missing numeric cells (§6: "Missing numeric cells are
//! rejected at the ingest boundary" — the §3 strict-positive-floor
//! replacement is a different concern, applied downstream to present-but-
//! zero climate readings before the log transform, see `span.rs`).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use dengue_fcst_core::epiweek::Epiweek;
use dengue_fcst_core::types::WeeklyObservation;
use dengue_fcst_core::{ForecastError, Result};

const COMPONENT: &str = "ingest";

const REQUIRED_COLUMNS: &[&str] = &[
    "epiweek",
    "cases",
    "temp_min",
    "temp_med",
    "temp_max",
    "precip_min",
    "precip_med",
    "precip_max",
    "pressure_min",
    "pressure_med",
    "pressure_max",
    "rel_humid_min",
    "rel_humid_med",
    "rel_humid_max",
];

/// Reads and validates one region's aggregated weekly CSV, returning the
/// observations sorted ascending by epiweek.
pub fn ingest_csv(region: &str, path: &Path) -> Result<Vec<WeeklyObservation>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| {
            ForecastError::invalid_input(region, COMPONENT, format!("opening {}: {e}", path.display()))
        })?;

    let headers = reader
        .headers()
        .map_err(|e| ForecastError::invalid_input(region, COMPONENT, format!("reading header row: {e}")))?
        .clone();
    let index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
        .collect();

    for col in REQUIRED_COLUMNS {
        if !index.contains_key(*col) {
            return Err(ForecastError::invalid_input(
                region,
                COMPONENT,
                format!("missing required column '{col}'"),
            ));
        }
    }

    let mut observations = Vec::new();
    let mut seen_epiweeks: HashSet<Epiweek> = HashSet::new();

    for (offset, result) in reader.records().enumerate() {
        let row_num = offset + 2; // account for the header row, 1-indexed
        let record = result
            .map_err(|e| ForecastError::invalid_input(region, COMPONENT, format!("row {row_num}: {e}")))?;
        let obs = parse_row(region, &record, &index, row_num)?;
        if !seen_epiweeks.insert(obs.epiweek) {
            return Err(ForecastError::invalid_input(
                region,
                COMPONENT,
                format!("duplicate epiweek {}", obs.epiweek.to_yyyyww()),
            ));
        }
        observations.push(obs);
    }

    observations.sort_by_key(|o| o.epiweek);
    Ok(observations)
}

fn required_cell<'a>(
    region: &str,
    record: &'a csv::StringRecord,
    index: &HashMap<String, usize>,
    col: &str,
    row_num: usize,
) -> Result<&'a str> {
    let i = index[col];
    record
        .get(i)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ForecastError::invalid_input(region, COMPONENT, format!("row {row_num}: missing value for '{col}'"))
        })
}

fn required_f64(
    region: &str,
    record: &csv::StringRecord,
    index: &HashMap<String, usize>,
    col: &str,
    row_num: usize,
) -> Result<f64> {
    let raw = required_cell(region, record, index, col, row_num)?;
    raw.parse::<f64>().map_err(|_| {
        ForecastError::invalid_input(region, COMPONENT, format!("row {row_num}: '{col}' = '{raw}' is not a number"))
    })
}

fn optional_f64(record: &csv::StringRecord, index: &HashMap<String, usize>, col: &str) -> Option<f64> {
    index
        .get(col)
        .and_then(|&i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
}

fn parse_row(
    region: &str,
    record: &csv::StringRecord,
    index: &HashMap<String, usize>,
    row_num: usize,
) -> Result<WeeklyObservation> {
    let epiweek_raw = required_cell(region, record, index, "epiweek", row_num)?;
    let (year, week) = Epiweek::parse_yyyyww(epiweek_raw)?;
    if !(1..=52).contains(&week) {
        return Err(ForecastError::invalid_input(
            region,
            COMPONENT,
            format!("row {row_num}: week {week} outside [1, 52] (week 53 is rejected at ingest)"),
        ));
    }
    let epiweek = Epiweek::new(year, week)?;

    let cases_raw = required_f64(region, record, index, "cases", row_num)?;
    if cases_raw < 0.0 || cases_raw.fract().abs() > 1e-9 {
        return Err(ForecastError::invalid_input(
            region,
            COMPONENT,
            format!("row {row_num}: cases must be a non-negative integer, got {cases_raw}"),
        ));
    }

    Ok(WeeklyObservation {
        epiweek,
        cases: cases_raw.round() as u64,
        temp_min: required_f64(region, record, index, "temp_min", row_num)?,
        temp_med: required_f64(region, record, index, "temp_med", row_num)?,
        temp_max: required_f64(region, record, index, "temp_max", row_num)?,
        precip_min: required_f64(region, record, index, "precip_min", row_num)?,
        precip_med: required_f64(region, record, index, "precip_med", row_num)?,
        precip_max: required_f64(region, record, index, "precip_max", row_num)?,
        pressure_min: required_f64(region, record, index, "pressure_min", row_num)?,
        pressure_med: required_f64(region, record, index, "pressure_med", row_num)?,
        pressure_max: required_f64(region, record, index, "pressure_max", row_num)?,
        rel_humid_min: required_f64(region, record, index, "rel_humid_min", row_num)?,
        rel_humid_med: required_f64(region, record, index, "rel_humid_med", row_num)?,
        rel_humid_max: required_f64(region, record, index, "rel_humid_max", row_num)?,
        thermal_range: optional_f64(record, index, "thermal_range"),
        rainy_days: optional_f64(record, index, "rainy_days"),
    })
}
