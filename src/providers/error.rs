use crate::errors::ServiceError;

/// Adapter-layer errors. Confined to `providers::*`; the orchestrator maps
/// them into the service taxonomy so provider-specific detail never leaks
/// past the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("webhook signature verification failed")]
    InvalidSignature,

    #[error("malformed provider payload: {0}")]
    InvalidPayload(String),

    #[error("provider network error: {0}")]
    Network(String),

    #[error("provider api error {code}: {message}")]
    Api {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn into_service_error(self) -> ServiceError {
        match self {
            ProviderError::InvalidSignature => ServiceError::SignatureInvalid,
            ProviderError::InvalidPayload(msg) => ServiceError::BadRequest(msg),
            ProviderError::Unsupported(msg) => ServiceError::ValidationError(msg),
            ProviderError::Network(msg) => ServiceError::ProviderUnavailable(msg),
            ProviderError::Api { code, message, .. } => {
                ServiceError::ProviderUnavailable(format!("{code}: {message}"))
            }
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
