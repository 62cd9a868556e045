//! `shedutils::error` is a module containing error utilities for the shed project.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a shedutils-related operation.
pub type ShedutilsResult<T> = Result<T, ShedutilsError>;

/// An error that occurred in one of the shared utilities.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ShedutilsError {
    /// An error that occurred when validating paths
    #[error("path validation error: {0}")]
    PathValidation(String),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed ({status}): {output}")]
    CommandFailed {
        /// The rendered command line.
        command: String,

        /// The exit status, or a description of how the process ended.
        status: String,

        /// Combined stdout and stderr captured from the command.
        output: String,
    },

    /// An error that occurred when performing an IO operation
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Custom error.
    #[error("Custom error: {0}")]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShedutilsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> ShedutilsError {
        ShedutilsError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the captured output if this error came from a failed command.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            ShedutilsError::CommandFailed { output, .. } => Some(output),
            _ => None,
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

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
