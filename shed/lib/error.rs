use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use shedutils::ShedutilsError;

use crate::fetcher::RegistryResponseError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a shed-related operation.
pub type ShedResult<T> = Result<T, ShedError>;

/// An error that occurred while managing layers, quotas or images.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ShedError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The requested layer or image is not in the graph.
    #[error("not found: {0}")]
    NotFound(String),

    /// The layer or relationship is already recorded.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An external command exited unsuccessfully, or a shared utility failed.
    #[error(transparent)]
    Command(#[from] ShedutilsError),

    /// A required parameter is missing or a setting is invalid.
    #[error("{0}")]
    Configuration(String),

    /// The graph driver does not support quota-enforced layers.
    #[error("graph driver `{driver}` does not support quotas")]
    QuotaUnsupported {
        /// The name of the driver.
        driver: String,
    },

    /// Several independent operations failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// An error that occurred while querying the graph database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while migrating the graph database.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error response from an image registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryResponseError),

    /// No manifest matched the requested tag and platform.
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// An error that occurred while encoding or decoding JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred while parsing a TOML configuration.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A rootfs URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// A collection of errors from operations that continue past individual failures.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ShedError>,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShedError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ShedError {
        ShedError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Wraps this error with a description of the operation that failed.
    pub fn context(self, context: impl Display) -> ShedError {
        ShedError::custom(anyhow::Error::new(self).context(context.to_string()))
    }

    /// Returns true if the error reports a missing layer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ShedError::NotFound(_))
    }
}

impl AggregateError {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records another failure.
    pub fn push(&mut self, error: ShedError) {
        self.errors.push(error);
    }

    /// The recorded failures, in the order they happened.
    pub fn errors(&self) -> &[ShedError] {
        &self.errors
    }

    /// Returns true if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `Ok(())` if nothing failed, otherwise the aggregate as an error.
    pub fn into_result(self) -> ShedResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ShedError::Aggregate(self))
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {error}")?;
        }
        Ok(())
    }
}

impl Error for AggregateError {}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_lists_every_failure() {
        let mut errors = AggregateError::new();
        assert!(errors.is_empty());

        errors.push(ShedError::NotFound("layer-a".to_string()));
        errors.push(ShedError::Configuration("bad".to_string()));

        let err = errors.into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("2 error(s) occurred:"));
        assert!(message.contains("not found: layer-a"));
        assert!(message.contains("bad"));
    }

    #[test]
    fn test_context_keeps_the_cause() {
        let err = ShedError::NotFound("abc".to_string()).context("deleting graph entry");
        assert_eq!(err.to_string(), "deleting graph entry: not found: abc");
    }
}
