//! Core forecasting library for weekly dengue incidence at the
//! sub-national (Brazilian state) level.
//!
//! Three cooperating model families share the same input and output
//! contract: a climate-modulated β-logistic growth simulator (CLiDENGO), a
//! seasonal ARIMA with exogenous regressors (SARIMAX), and a high-order
//! autoregressive-excitation forecaster (ARp). Each produces the mean,
//! median, and four symmetric prediction-interval pairs on the same
//! 52-week grid via the shared quantile assembler.

pub mod arp;
pub mod briere;
pub mod calibrate;
pub mod clidengo;
pub mod climate;
pub mod epiweek;
pub mod error;
pub mod ode;
pub mod quantiles;
pub mod rng;
pub mod sarimax;
pub mod types;

pub use epiweek::Epiweek;
pub use error::{ForecastError, Result};
pub use quantiles::{assemble, percentile, Ensemble, RawQuantiles, LEVELS};
pub use types::{
    ClimateMode, ClimateTrajectories, ForecastRecord, GrowthParams, Misfit, ModelConfig,
    PredStatistic, SarimaxOrders, Season, SimGrid, ValidationWindow, WeeklyObservation,
};
