use thiserror::Error;

/// Rejected store mutations. Missing ids are not errors; those calls are no-ops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("persona {0} is built in and cannot be modified")]
    BuiltInPersona(String),
}

/// Failures of a single completion exchange.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("request rejected as invalid: {0}")]
    Validation(String),

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("gateway not configured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::MalformedResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
