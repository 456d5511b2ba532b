//! Error types for the devops-model crate.

use thiserror::Error;

/// Errors that can occur while building or validating model values.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// An endpoint address could not be turned into a URL.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}
