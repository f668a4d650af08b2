use actix_web::error::BlockingError;
use sign_proxy_broker::BrokerError;
use thiserror::Error;

// Each error type must have a corresponding HTTP status code (see `routes/mod.rs`)
#[derive(Error, Debug)]
pub enum ServerError {
    // Failures of the session broker, mapped according to their kind
    #[error(transparent)]
    Broker(#[from] BrokerError),

    // Malformed requests
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    // Invalid or incomplete configuration
    #[error("Configuration Error: {0}")]
    ConfigurationError(String),

    // Any errors related to a bad behavior of the server but not related to the user input
    #[error("Unexpected server error: {0}")]
    ServerError(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::ServerError(e.to_string())
    }
}

impl From<BlockingError> for ServerError {
    fn from(e: BlockingError) -> Self {
        Self::ServerError(format!("the blocking task was canceled: {e}"))
    }
}

/// Return early with a configuration error if a condition is not satisfied.
#[macro_export]
macro_rules! sign_proxy_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::error::ServerError::ConfigurationError($msg.to_owned()));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::error::ServerError::ConfigurationError(format!($fmt, $($arg)*)));
        }
    };
}
