use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("External API error: {0}")]
    ExternalAPI(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Token already tracked: {0}")]
    TokenAlreadyTracked(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(u64),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No active balance session")]
    SessionInactive,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable code for callers that render a dismissible error message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BlockchainRPC(_) => "BLOCKCHAIN_RPC_ERROR",
            AppError::ExternalAPI(_) => "EXTERNAL_API_ERROR",
            AppError::InvalidAddress(_) => "INVALID_ADDRESS",
            AppError::TokenAlreadyTracked(_) => "TOKEN_ALREADY_TRACKED",
            AppError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            AppError::Decode(_) => "DECODE_ERROR",
            AppError::SessionInactive => "SESSION_INACTIVE",
            AppError::Cancelled => "CANCELLED",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }

    // Connectivity failures are the ones worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Timeout(_) => true,
            AppError::BlockchainRPC(msg) | AppError::ExternalAPI(msg) => {
                looks_like_transient_error(msg)
            }
            _ => false,
        }
    }
}

// Internal helper that supports `looks_like_transient_error` operations.
fn looks_like_transient_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("gateway")
        || lower.contains("temporarily unavailable")
        || lower.contains("connection reset")
}

pub type Result<T> = std::result::Result<T, AppError>;
