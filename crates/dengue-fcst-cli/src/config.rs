//! Per-region TOML model configuration (§6 "Input: model configuration",
//! §10.2).
//!
//! `§6` enumerates `ModelConfig`'s recognized fields but is silent on two
//! things a single binary covering all three model families (§2) still
//! needs: which family to run, and the forecast target year the T1/T2/T3
//! validation window (§4.1) resolves against. `RegionConfig` adds exactly
//! those two fields around the core's `ModelConfig`; see `DESIGN.md`'s Open
//! Question decisions for the record of this choice.

use std::path::Path;

use dengue_fcst_core::types::ModelConfig;
use dengue_fcst_core::{ForecastError, Result};
use serde::{Deserialize, Serialize};

const COMPONENT: &str = "config";

/// Which of the three cooperating model families (§2) a region's
/// configuration invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Clidengo,
    Sarimax,
    Arp,
}

impl Default for ModelFamily {
    fn default() -> Self {
        ModelFamily::Clidengo
    }
}

/// Top-level per-(region, window) configuration record read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Which model family this run invokes.
    pub model: ModelFamily,
    /// The year `Y` that `validation_window` (T1/T2/T3) resolves against
    /// (§4.1): T1 trains through EW25(Y-2), T2 through EW25(Y-1), T3
    /// through EW25(Y).
    pub forecast_target_year: i32,
    /// The shared forecasting parameters, flattened into the same TOML
    /// document rather than nested under a sub-table, so a region's config
    /// file reads as one flat record.
    #[serde(flatten)]
    pub model_config: ModelConfig,
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            model: ModelFamily::default(),
            forecast_target_year: 2023,
            model_config: ModelConfig::default(),
        }
    }
}

/// Reads, parses, and validates a region's configuration TOML file.
pub fn load_region_config(region: &str, path: &Path) -> Result<RegionConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ForecastError::invalid_input(region, COMPONENT, format!("reading config {}: {e}", path.display()))
    })?;
    let config: RegionConfig = toml::from_str(&text).map_err(|e| {
        ForecastError::invalid_input(region, COMPONENT, format!("parsing config {}: {e}", path.display()))
    })?;
    config.model_config.validate(region)?;
    Ok(config)
}
