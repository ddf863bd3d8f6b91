use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub const CODE_INTERNAL: i32 = -1;
pub const CODE_UNAUTHENTICATED: i32 = -2;
pub const CODE_ENCRYPTION_REQUIRED: i32 = -3;
pub const CODE_QUOTA_EXCEEDED: i32 = -4;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("decrypt failed: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("sign failed: {0}")]
    Sign(#[from] SignError),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure to open an encrypted request envelope.
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("envelope must have 3 colon-separated segments, got {0}")]
    MalformedEnvelope(usize),

    #[error("no encrypted payload submitted")]
    Missing,

    #[error("no token bound to request")]
    NoToken,

    #[error("invalid base64 in {0} segment")]
    Base64(&'static str),

    #[error("private key unusable: {0}")]
    PrivateKey(String),

    #[error("session key unwrap failed")]
    KeyUnwrap,

    #[error("session key must be 16 bytes, got {0}")]
    SessionKey(usize),

    #[error("iv must be 16 bytes, got {0}")]
    Iv(usize),

    #[error("symmetric decryption failed")]
    Cipher,

    #[error("plaintext is not valid JSON")]
    Json,
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("only JSON objects can be signed")]
    NotAnObject,

    #[error("no token bound to request")]
    NoToken,

    #[error("private key unusable: {0}")]
    PrivateKey(String),

    #[error("signing failed: {0}")]
    Signature(String),

    #[error("canonical serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Error body shape sent to clients: `{"code": .., "message"?: .., "description"?: ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ErrorBody {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Decrypt(_) => StatusCode::BAD_REQUEST,
            GatewayError::Sign(_)
            | GatewayError::Handler(_)
            | GatewayError::Store(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            GatewayError::Unauthenticated => CODE_UNAUTHENTICATED,
            GatewayError::QuotaExceeded => CODE_QUOTA_EXCEEDED,
            GatewayError::Decrypt(_) => CODE_ENCRYPTION_REQUIRED,
            GatewayError::Sign(_)
            | GatewayError::Handler(_)
            | GatewayError::Store(_)
            | GatewayError::Internal(_) => CODE_INTERNAL,
        }
    }

    /// Client-facing body. Only handler failures carry dynamic text.
    pub fn error_body(&self) -> ErrorBody {
        let code = self.code();
        match self {
            GatewayError::Unauthenticated => ErrorBody::new(code, "Please Authenticate"),
            GatewayError::QuotaExceeded => {
                ErrorBody::new(code, "Too many request in configured timeframe.")
            }
            GatewayError::Decrypt(_) => ErrorBody::new(code, "Encryption required"),
            GatewayError::Sign(e) => {
                tracing::error!("Response signing error: {}", e);
                ErrorBody::new(code, "Internal Server Error")
                    .with_description("response signing failed")
            }
            GatewayError::Handler(msg) => {
                ErrorBody::new(code, "Internal Server Error").with_description(msg.clone())
            }
            GatewayError::Store(e) => {
                tracing::error!("Storage error: {:#}", e);
                ErrorBody::new(code, "Internal Server Error").with_description("storage failure")
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorBody::new(code, "Internal Server Error")
            }
        }
    }
}
