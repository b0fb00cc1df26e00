use thiserror::Error;

/// Errors that cross the aggregator boundary.
///
/// Provider failures never show up here: they are absorbed inside each
/// provider and reported as an absent result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    #[error("City is required.")]
    EmptyCity,

    #[error("Country is required.")]
    EmptyCountry,

    #[error("Forecast request was cancelled")]
    Cancelled,
}

impl ForecastError {
    /// True for errors caused by bad caller input.
    pub fn is_validation(&self) -> bool {
        matches!(self, ForecastError::EmptyCity | ForecastError::EmptyCountry)
    }
}
