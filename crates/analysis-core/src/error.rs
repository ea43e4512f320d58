use thiserror::Error;

/// Closed set of failure kinds for the analysis pipeline.
///
/// Stage failures are never retried at this layer; each kind maps to one
/// HTTP status in non-streaming endpoints and to the `kind` tag of the
/// terminal error event in streaming endpoints.
#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    /// The data source does not recognize the identifier, or returned an
    /// empty series for it.
    #[error("Symbol not found: {0}")]
    NotFound(String),

    /// The data source reported an explicit retrieval error.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Aggregation completed but produced nothing usable.
    #[error("No result: {0}")]
    NoResult(String),

    /// Any other unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Stable snake_case tag carried in streamed error events.
    pub fn kind_str(&self) -> &'static str {
        match self {
            AnalysisError::NotFound(_) => "not_found",
            AnalysisError::DataUnavailable(_) => "data_unavailable",
            AnalysisError::NoResult(_) => "no_result",
            AnalysisError::Internal(_) => "internal",
        }
    }
}
