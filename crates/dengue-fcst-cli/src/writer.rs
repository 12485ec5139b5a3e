//! CSV output boundary (§6 "Output: ten-column forecast CSV", §4.9).

use std::path::Path;

use dengue_fcst_core::types::ForecastRecord;
use dengue_fcst_core::{ForecastError, Result};

const COMPONENT: &str = "writer";

const HEADER: [&str; 10] = [
    "date",
    "lower_95",
    "lower_90",
    "lower_80",
    "lower_50",
    "pred",
    "upper_50",
    "upper_80",
    "upper_90",
    "upper_95",
];

/// Writes the assembled forecast records as the exact ten-column CSV
/// contract, one row per week in the order given.
pub fn write_csv(region: &str, path: &Path, records: &[ForecastRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(|e| ForecastError::output_contract(region, COMPONENT, format!("opening {}: {e}", path.display())))?;

    writer.write_record(HEADER).map_err(|e| {
        ForecastError::output_contract(region, COMPONENT, format!("writing header: {e}"))
    })?;

    for record in records {
        let row = [
            record.date.format("%Y-%m-%d").to_string(),
            record.lower_95.to_string(),
            record.lower_90.to_string(),
            record.lower_80.to_string(),
            record.lower_50.to_string(),
            record.pred.to_string(),
            record.upper_50.to_string(),
            record.upper_80.to_string(),
            record.upper_90.to_string(),
            record.upper_95.to_string(),
        ];
        writer.write_record(&row).map_err(|e| {
            ForecastError::output_contract(region, COMPONENT, format!("writing row for {}: {e}", record.date))
        })?;
    }

    writer
        .flush()
        .map_err(|e| ForecastError::output_contract(region, COMPONENT, format!("flushing {}: {e}", path.display())))?;
    Ok(())
}
