//! Error types for aqueduct

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Item at '{0}' could not be found, folders must end with '/'")]
    NotFound(String),

    #[error("Bad credentials provided")]
    Auth,

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict '{0}'.")]
    Conflict(String),

    #[error("Item at '{0}' has been removed")]
    Gone(String),

    #[error("{0} not supported by this provider")]
    MethodNotSupported(String),

    #[error("Unknown provider: {0}")]
    ProviderNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error ({code}): {message}")]
    Provider { code: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Error::InvalidPath(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }

    pub fn provider(code: u16, message: impl Into<String>) -> Self {
        Error::Provider {
            code,
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// The HTTP status code this error maps to at the API surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidPath(_) | Error::InvalidRequest(_) | Error::Serialization(_) => 400,
            Error::Auth => 401,
            Error::Forbidden => 403,
            Error::NotFound(_) | Error::ProviderNotFound(_) => 404,
            Error::MethodNotSupported(_) => 405,
            Error::Conflict(_) => 409,
            Error::Gone(_) => 410,
            Error::Provider { code, .. } => *code,
            Error::Network(_) | Error::Io(_) | Error::Internal(_) => 500,
        }
    }
}
