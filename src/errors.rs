//! Definition of errors.

use thiserror::Error;

/// The error type for clique models.
#[derive(Debug, Error)]
pub enum CliqueError {
    /// Mismatched arrays, queries against the wrong clique, or otherwise malformed input.
    #[error("InvalidArgumentError: {0}")]
    InvalidArgument(String),

    /// The operation is intentionally not meaningful for this model variant.
    #[error("UnsupportedOperationError: {0}")]
    Unsupported(&'static str),

    /// A feature or label combination is missing from an open index.
    #[error("LookupMissError: {0}")]
    LookupMiss(String),

    /// An entry was added to a frozen feature map outside of its frozen bounds.
    #[error("FrozenBoundsError: feature {feature} with label code {code} is outside the frozen table")]
    FrozenBounds {
        /// Feature ID of the rejected entry.
        feature: usize,

        /// Label code of the rejected entry.
        code: usize,
    },

    /// The numerical optimizer failed.
    #[error("OptimizerError: {0}")]
    Optimizer(String),
}

impl CliqueError {
    /// Creates a new [`CliqueError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a new [`CliqueError::Unsupported`].
    pub const fn unsupported(msg: &'static str) -> Self {
        Self::Unsupported(msg)
    }

    /// Creates a new [`CliqueError::LookupMiss`].
    pub fn lookup_miss(msg: impl Into<String>) -> Self {
        Self::LookupMiss(msg.into())
    }
}

#[cfg(feature = "train")]
impl From<argmin::core::Error> for CliqueError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Optimizer(e.to_string())
    }
}

/// A specialized Result type.
pub type Result<T, E = CliqueError> = core::result::Result<T, E>;
