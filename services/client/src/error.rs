use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Outbound operation, used in error messages and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Detection,
    Generation,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Upload => "Image upload",
            Operation::Detection => "Ingredient detection",
            Operation::Generation => "Recipe generation",
        };
        f.write_str(name)
    }
}

/// Errors surfaced to callers of the API client
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("{operation} request timed out after {after:?}")]
    Timeout { operation: Operation, after: Duration },

    #[error("{operation} request failed: {message}")]
    Network { operation: Operation, message: String },

    #[error("{operation} failed: {body}")]
    Status {
        operation: Operation,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an unreadable response: {message}")]
    Decode { operation: Operation, message: String },

    #[error("{0} was cancelled")]
    Cancelled(Operation),

    #[error("{operation} failed after {attempts} attempts")]
    Exhausted { operation: Operation, attempts: u32 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl InvokeError {
    pub fn network(operation: Operation, error: reqwest::Error) -> Self {
        InvokeError::Network {
            operation,
            message: error.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvokeError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_shows_raw_body() {
        let error = InvokeError::Status {
            operation: Operation::Detection,
            status: 500,
            body: "{\"error\":\"Failed to detect ingredients\"}".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Ingredient detection failed: {\"error\":\"Failed to detect ingredients\"}"
        );
    }

    #[test]
    fn test_exhausted_message() {
        let error = InvokeError::Exhausted {
            operation: Operation::Generation,
            attempts: 0,
        };
        assert_eq!(error.to_string(), "Recipe generation failed after 0 attempts");
    }
}
