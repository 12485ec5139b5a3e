//! Immutable data-model records shared across the forecasting core:
//! weekly observations, seasons, model configuration, and the three
//! struct-of-fields records (`GrowthParams`, `ClimateTrajectories`,
//! `SimGrid`) that the Monte-Carlo forecaster composes.

use serde::{Deserialize, Serialize};

use crate::epiweek::Epiweek;

/// One region-week of raw input: case count plus the nine climate reals,
/// with optional thermal range / rainy days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyObservation {
    pub epiweek: Epiweek,
    pub cases: u64,
    pub temp_min: f64,
    pub temp_med: f64,
    pub temp_max: f64,
    pub precip_min: f64,
    pub precip_med: f64,
    pub precip_max: f64,
    pub pressure_min: f64,
    pub pressure_med: f64,
    pub pressure_max: f64,
    pub rel_humid_min: f64,
    pub rel_humid_med: f64,
    pub rel_humid_max: f64,
    pub thermal_range: Option<f64>,
    pub rainy_days: Option<f64>,
}

/// An ordered, exactly-52-week slice of observations spanning
/// `EW41(year) .. EW40(year + 1)`.
#[derive(Debug, Clone)]
pub struct Season {
    pub start_year: i32,
    pub weeks: Vec<WeeklyObservation>,
}

impl Season {
    pub const LEN: usize = 52;
}

/// One of the three fixed retrospective forecast origins used for
/// evaluation. Each resolves to an explicit `(year, week)` pair, never to
/// integer arithmetic on a `YYYYWW` encoding (see `DESIGN.md`, Open Question
/// 2: the T3 date offset must go through [`Epiweek::to_date`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationWindow {
    T1,
    T2,
    T3,
}

impl ValidationWindow {
    /// Training-end-year offset relative to the forecast target year `y`:
    /// T1 ends EW25 of `y-2`, T2 of `y-1`, T3 of `y`.
    pub fn training_end_year(&self, forecast_target_year: i32) -> i32 {
        match self {
            ValidationWindow::T1 => forecast_target_year - 2,
            ValidationWindow::T2 => forecast_target_year - 1,
            ValidationWindow::T3 => forecast_target_year,
        }
    }

    /// The forecast origin epiweek for a given training-end year: always
    /// EW25 of that year, constructed explicitly rather than derived by
    /// adding an offset to a `YYYYWW` integer.
    pub fn forecast_origin_epiweek(&self, forecast_target_year: i32) -> Epiweek {
        Epiweek {
            year: self.training_end_year(forecast_target_year),
            week: 25,
        }
    }
}

/// Which climate factors modulate the β-logistic growth rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimateMode {
    T,
    #[serde(rename = "txp")]
    TxP,
    #[serde(rename = "txpxh")]
    TxPxH,
}

/// `pred` is computed either as the ensemble mean (CLiDENGO) or as the
/// ensemble median (SARIMAX, ARp). This is a deliberate per-model choice,
/// not a bug to unify (`SPEC_FULL.md` §9, Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredStatistic {
    Mean,
    Median,
}

/// Misfit functional used by the parameter calibrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Misfit {
    Mse,
    MeanVar { w: f64 },
}

impl Default for Misfit {
    fn default() -> Self {
        Misfit::MeanVar { w: 0.5 }
    }
}

/// Seasonal ARIMA orders `(p, d, q) x (P, D, Q)_52`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SarimaxOrders {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
}

impl Default for SarimaxOrders {
    fn default() -> Self {
        SarimaxOrders {
            p: 1,
            d: 0,
            q: 1,
            seasonal_p: 1,
            seasonal_d: 1,
            seasonal_q: 1,
        }
    }
}

/// Per-(region, window) immutable model configuration. Every component
/// receives this by value; there is no process-wide mutable configuration
/// state (`SPEC_FULL.md` §9, "Per-region config vs global state").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub validation_window: ValidationWindow,
    pub forecast_horizon: usize,
    pub n_real_calibrate: usize,
    pub n_real_forecast: usize,
    pub n_real_arp: usize,
    pub climate_mode: ClimateMode,
    pub lag_t: i32,
    pub lag_p: i32,
    pub lag_h: i32,
    pub sarimax_orders: SarimaxOrders,
    pub ar_order: usize,
    pub seed: u64,
    pub misfit: Misfit,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            validation_window: ValidationWindow::T3,
            forecast_horizon: 67,
            n_real_calibrate: 32,
            n_real_forecast: 1024,
            n_real_arp: 10_000,
            climate_mode: ClimateMode::TxPxH,
            lag_t: -8,
            lag_p: -4,
            lag_h: -2,
            sarimax_orders: SarimaxOrders::default(),
            ar_order: 92,
            seed: 30_081_984,
            misfit: Misfit::default(),
        }
    }
}

impl ModelConfig {
    /// Validates the bounds named throughout §4: lag range, box-constraint
    /// sanity. Called once at construction time rather than scattered
    /// through the numerical code.
    pub fn validate(&self, region: &str) -> crate::error::Result<()> {
        use crate::error::ForecastError;
        const COMPONENT: &str = "config";
        for (name, lag) in [("lag_t", self.lag_t), ("lag_p", self.lag_p), ("lag_h", self.lag_h)] {
            if !(-12..=-2).contains(&lag) {
                return Err(ForecastError::invalid_input(
                    region,
                    COMPONENT,
                    format!("{name} = {lag} outside valid range [-12, -2]"),
                ));
            }
        }
        if self.forecast_horizon == 0 {
            return Err(ForecastError::invalid_input(
                region,
                COMPONENT,
                "forecast_horizon must be positive",
            ));
        }
        if self.n_real_calibrate == 0 || self.n_real_forecast == 0 || self.n_real_arp == 0 {
            return Err(ForecastError::invalid_input(
                region,
                COMPONENT,
                "n_real_* fields must be positive",
            ));
        }
        if let Misfit::MeanVar { w } = self.misfit {
            if !(0.0..=1.0).contains(&w) {
                return Err(ForecastError::invalid_input(
                    region,
                    COMPONENT,
                    format!("misfit weight w = {w} outside [0, 1]"),
                ));
            }
        }
        Ok(())
    }
}

/// Mean β-logistic growth parameters and their coefficients of variation,
/// the 13-vector `X` of §4.5/§4.6.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    pub r0: f64,
    pub k: f64,
    pub q: f64,
    pub p: f64,
    pub alpha: f64,
    pub cv_r0: f64,
    pub cv_k: f64,
    pub cv_q: f64,
    pub cv_p: f64,
    pub cv_alpha: f64,
    pub lag_t: i32,
    pub lag_p: i32,
    pub lag_h: i32,
}

impl GrowthParams {
    /// Box bounds for each of the 13 decision variables, in the same order
    /// as the struct fields (used by the calibrator as lower/upper vectors).
    pub fn bounds() -> ([f64; 13], [f64; 13]) {
        let lower = [
            0.0,        // r0
            1.0,        // K
            0.0,        // q
            1.0,        // p
            1.0,        // alpha
            0.0,        // cv_r0
            0.0,        // cv_K
            0.0,        // cv_q
            0.0,        // cv_p
            0.0,        // cv_alpha
            -12.0,      // lag_T
            -12.0,      // lag_P
            -12.0,      // lag_H
        ];
        let upper = [
            5.0,
            5.0e5,
            1.0,
            10.0,
            2.0,
            std::f64::consts::FRAC_1_SQRT_2,
            (1.0_f64 / 3.0).sqrt(),
            (1.0_f64 / 3.0).sqrt(),
            std::f64::consts::FRAC_1_SQRT_2,
            (1.0_f64 / 3.0).sqrt(),
            -2.0,
            -2.0,
            -2.0,
        ];
        (lower, upper)
    }

    pub fn to_vec13(self) -> [f64; 13] {
        [
            self.r0, self.k, self.q, self.p, self.alpha, self.cv_r0, self.cv_k, self.cv_q,
            self.cv_p, self.cv_alpha, self.lag_t as f64, self.lag_p as f64, self.lag_h as f64,
        ]
    }

    pub fn from_vec13(x: &[f64; 13]) -> Self {
        GrowthParams {
            r0: x[0],
            k: x[1],
            q: x[2],
            p: x[3],
            alpha: x[4],
            cv_r0: x[5],
            cv_k: x[6],
            cv_q: x[7],
            cv_p: x[8],
            cv_alpha: x[9],
            lag_t: x[10].round() as i32,
            lag_p: x[11].round() as i32,
            lag_h: x[12].round() as i32,
        }
    }
}

/// Synthesized weekly climate trajectories for one Monte-Carlo realization,
/// already lag-shifted (§4.5 step 2).
#[derive(Debug, Clone)]
pub struct ClimateTrajectories {
    pub temp: Vec<f64>,
    pub precip: Vec<f64>,
    pub humid: Vec<f64>,
}

/// The integer weekly simulation mesh shared by every ODE integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimGrid {
    pub n_weeks: usize,
}

impl Default for SimGrid {
    fn default() -> Self {
        SimGrid { n_weeks: Season::LEN }
    }
}

/// One assembled output row: `(date, lower_95, lower_90, lower_80, lower_50,
/// pred, upper_50, upper_80, upper_90, upper_95)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastRecord {
    pub date: chrono::NaiveDate,
    pub lower_95: u64,
    pub lower_90: u64,
    pub lower_80: u64,
    pub lower_50: u64,
    pub pred: u64,
    pub upper_50: u64,
    pub upper_80: u64,
    pub upper_90: u64,
    pub upper_95: u64,
}
