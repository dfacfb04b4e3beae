use thiserror::Error;

/// All the ways things can go wrong in wedhub
///
/// The saved-vendor cache swallows these (it reports a bool and a log line),
/// but gateways, config and the router all speak this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Local store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<wedhub_api::ApiError> for Error {
    fn from(err: wedhub_api::ApiError) -> Self {
        use wedhub_api::ApiError;
        match err {
            ApiError::Conflict(msg) => Error::Conflict(msg),
            ApiError::NotFound(what) => Error::NotFound(what),
            ApiError::AuthRequired => Error::AuthError(err.to_string()),
            other => Error::ApiError(other.to_string()),
        }
    }
}

impl From<wedhub_store::StoreError> for Error {
    fn from(err: wedhub_store::StoreError) -> Self {
        match err {
            wedhub_store::StoreError::Conflict { .. } => Error::Conflict(err.to_string()),
            other => Error::StoreError(other.to_string()),
        }
    }
}
