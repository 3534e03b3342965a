use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The verdict for an action was deny.
    #[error(
        "access denied: {action}{}",
        .target.as_ref().map(|t| format!(" ({t})")).unwrap_or_default()
    )]
    AccessDenied {
        action: String,
        target: Option<String>,
    },

    /// An exposed name does not resolve to an operation on the perimeter.
    #[error("perimeter {perimeter} does not provide exposed operation {operation}")]
    MissingExposedOperation { perimeter: String, operation: String },

    #[error("invalid governess: {0}")]
    InvalidGoverness(String),

    #[error("invalid sandbox: {0}")]
    InvalidSandbox(String),

    /// A perimeter is already bound to a different sandbox.
    #[error("perimeter {0} is already attached to another sandbox")]
    AlreadyAttached(String),

    #[error("no purpose named {0}")]
    UnknownPurpose(String),

    #[error("purpose {purpose} has no operation {operation}")]
    UnknownOperation { purpose: String, operation: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A protected operation failed on its own terms.
    #[error("operation failed: {0}")]
    Operation(String),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

impl Error {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Error::AccessDenied { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
