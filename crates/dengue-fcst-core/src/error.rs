//! Error taxonomy for the dengue forecasting core.

use thiserror::Error;

/// Result type for forecasting operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors surfaced by any forecasting component, each tagged with the
/// region and component that raised it so the process boundary can print
/// a one-line diagnostic without re-deriving context.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("{region}: {component}: invalid input: {message}")]
    InvalidInput {
        region: String,
        component: &'static str,
        message: String,
    },

    #[error("{region}: {component}: insufficient data: need at least {needed}, got {got}")]
    InsufficientData {
        region: String,
        component: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{region}: {component}: numerical failure: {message}")]
    NumericalFailure {
        region: String,
        component: &'static str,
        message: String,
    },

    #[error("{region}: {component}: model fit failed: {message}")]
    ModelFit {
        region: String,
        component: &'static str,
        message: String,
    },

    #[error("{region}: {component}: output contract violated: {message}")]
    OutputContract {
        region: String,
        component: &'static str,
        message: String,
    },
}

impl ForecastError {
    pub fn invalid_input(
        region: impl Into<String>,
        component: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ForecastError::InvalidInput {
            region: region.into(),
            component,
            message: message.into(),
        }
    }

    pub fn insufficient_data(
        region: impl Into<String>,
        component: &'static str,
        needed: usize,
        got: usize,
    ) -> Self {
        ForecastError::InsufficientData {
            region: region.into(),
            component,
            needed,
            got,
        }
    }

    pub fn numerical_failure(
        region: impl Into<String>,
        component: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ForecastError::NumericalFailure {
            region: region.into(),
            component,
            message: message.into(),
        }
    }

    pub fn model_fit(
        region: impl Into<String>,
        component: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ForecastError::ModelFit {
            region: region.into(),
            component,
            message: message.into(),
        }
    }

    pub fn output_contract(
        region: impl Into<String>,
        component: &'static str,
        message: impl Into<String>,
    ) -> Self {
        ForecastError::OutputContract {
            region: region.into(),
            component,
            message: message.into(),
        }
    }

    /// Region tag carried by every variant.
    pub fn region(&self) -> &str {
        match self {
            ForecastError::InvalidInput { region, .. }
            | ForecastError::InsufficientData { region, .. }
            | ForecastError::NumericalFailure { region, .. }
            | ForecastError::ModelFit { region, .. }
            | ForecastError::OutputContract { region, .. } => region,
        }
    }

    /// Component tag carried by every variant.
    pub fn component(&self) -> &'static str {
        match self {
            ForecastError::InvalidInput { component, .. }
            | ForecastError::InsufficientData { component, .. }
            | ForecastError::NumericalFailure { component, .. }
            | ForecastError::ModelFit { component, .. }
            | ForecastError::OutputContract { component, .. } => component,
        }
    }

    /// Stable non-zero process exit status for the CLI boundary.
    pub fn to_exit_hint(&self) -> i32 {
        match self {
            ForecastError::InvalidInput { .. } => 1,
            ForecastError::InsufficientData { .. } => 2,
            ForecastError::NumericalFailure { .. } => 3,
            ForecastError::ModelFit { .. } => 4,
            ForecastError::OutputContract { .. } => 5,
        }
    }
}
