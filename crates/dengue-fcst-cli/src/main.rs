//! Single-region process boundary (§6, §10.3): reads one region's CSV and
//! TOML configuration, runs the configured model family, and writes the
//! ten-column forecast CSV. A multi-region run is just this binary invoked
//! once per region by an external orchestrator — not this crate's concern.

mod config;
mod ingest;
mod span;
mod writer;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dengue_fcst_core::types::ForecastRecord;
use dengue_fcst_core::{ForecastError, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{ModelFamily, RegionConfig};

#[derive(Debug, Parser)]
#[command(name = "dengue-fcst", about = "Weekly dengue incidence forecaster for one region")]
struct Cli {
    /// Region label, carried through every log line and error (e.g. a
    /// Brazilian state code).
    #[arg(long)]
    region: String,
    /// Path to the aggregated per-region weekly CSV (§6 input contract).
    #[arg(long)]
    input: PathBuf,
    /// Path to the region's model configuration TOML.
    #[arg(long)]
    config: PathBuf,
    /// Path the ten-column forecast CSV is written to.
    #[arg(long)]
    output: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<()> {
    let region = cli.region.as_str();
    let region_config = config::load_region_config(region, &cli.config)?;
    let observations = ingest::ingest_csv(region, &cli.input)?;

    let records = match region_config.model {
        ModelFamily::Clidengo => run_clidengo(region, &region_config, &observations)?,
        ModelFamily::Sarimax => run_sarimax(region, &region_config, &observations)?,
        ModelFamily::Arp => run_arp(region, &region_config, &observations)?,
    };

    writer::write_csv(region, &cli.output, &records)?;
    tracing::info!(region, rows = records.len(), output = %cli.output.display(), "forecast written");
    Ok(())
}

fn run_clidengo(
    region: &str,
    region_config: &RegionConfig,
    observations: &[dengue_fcst_core::types::WeeklyObservation],
) -> Result<Vec<ForecastRecord>> {
    let config = &region_config.model_config;
    let training = span::build(region, observations, config.validation_window, region_config.forecast_target_year)?;

    let mut temp_raw = span::concat_field(&training, |o| o.temp_med);
    let mut precip_raw = span::concat_field(&training, |o| o.precip_med);
    let mut humid_raw = span::concat_field(&training, |o| o.rel_humid_med);
    span::positive_floor(&mut temp_raw);
    span::positive_floor(&mut precip_raw);
    span::positive_floor(&mut humid_raw);

    let mut temp_baseline = span::moving_average_baseline(&temp_raw, dengue_fcst_core::types::Season::LEN);
    let mut precip_baseline = span::moving_average_baseline(&precip_raw, dengue_fcst_core::types::Season::LEN);
    let mut humid_baseline = span::moving_average_baseline(&humid_raw, dengue_fcst_core::types::Season::LEN);
    span::positive_floor(&mut temp_baseline);
    span::positive_floor(&mut precip_baseline);
    span::positive_floor(&mut humid_baseline);

    let climate = dengue_fcst_core::clidengo::ClimateTrainingInputs {
        temp: dengue_fcst_core::clidengo::ClimateTrainingSeries { raw: &temp_raw, baseline: &temp_baseline },
        precip: dengue_fcst_core::clidengo::ClimateTrainingSeries { raw: &precip_raw, baseline: &precip_baseline },
        humid: dengue_fcst_core::clidengo::ClimateTrainingSeries { raw: &humid_raw, baseline: &humid_baseline },
    };

    let ew41_values = span::ew41_cases(&training);
    let training_cumulative = span::cumulative_ensemble(&training);

    let season_start_year = training.origin.year;
    dengue_fcst_core::clidengo::forecast(
        region,
        config,
        &climate,
        &ew41_values,
        &training_cumulative,
        season_start_year,
    )
}

fn run_sarimax(
    region: &str,
    region_config: &RegionConfig,
    observations: &[dengue_fcst_core::types::WeeklyObservation],
) -> Result<Vec<ForecastRecord>> {
    let config = &region_config.model_config;
    let training = span::build(region, observations, config.validation_window, region_config.forecast_target_year)?;

    let cases = span::chronological_field(&training, |o| o.cases as f64);
    let temp_med = span::chronological_field(&training, |o| o.temp_med);
    let precip_med = span::chronological_field(&training, |o| o.precip_med);

    dengue_fcst_core::sarimax::forecast(region, config, &cases, &temp_med, &precip_med, training.origin)
}

fn run_arp(
    region: &str,
    region_config: &RegionConfig,
    observations: &[dengue_fcst_core::types::WeeklyObservation],
) -> Result<Vec<ForecastRecord>> {
    let config = &region_config.model_config;
    let training = span::build(region, observations, config.validation_window, region_config.forecast_target_year)?;
    let cases = span::chronological_field(&training, |o| o.cases as f64);

    dengue_fcst_core::arp::forecast(region, config, &cases, training.origin)
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(exit_hint_u8(&e))
        }
    }
}

fn exit_hint_u8(e: &ForecastError) -> u8 {
    e.to_exit_hint().clamp(0, 255) as u8
}
