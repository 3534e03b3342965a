//! Policy error types.

use thiserror::Error;

/// Errors raised while building rules and rule sets.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A rule string or definition value could not be classified.
    #[error("invalid rule definition: {0}")]
    InvalidRuleDefinition(String),

    /// A name collides with a reserved word, an unsafe name, or an existing member.
    #[error("restricted identifier: {0}")]
    RestrictedIdentifier(String),

    /// A perimeter name is not a valid identifier.
    #[error("invalid perimeter name: {0:?}")]
    InvalidPerimeterName(String),

    /// Failed to parse a rule set.
    #[error("failed to parse rule set: {0}")]
    Parse(String),

    /// An I/O error occurred while reading a rule set.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
