use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Exchange error: {}", .0.join(","))]
    Exchange(Vec<String>),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

/// Coarse classification used to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket or HTTP I/O failure. Fatal to the connection or call.
    Transport,
    /// Malformed frame or unknown type/channel/method. Logged, never fatal.
    Protocol,
    /// Bad key material or signing failure. Returned, never retried.
    Auth,
    /// The exchange answered but reported errors.
    Exchange,
    Config,
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HttpError(_)
            | Self::NetworkError(_)
            | Self::ConnectionTimeout(_)
            | Self::ChannelClosed => ErrorKind::Transport,
            Self::JsonError(_)
            | Self::ParseError(_)
            | Self::UnknownEventType(_)
            | Self::UnsupportedChannel(_)
            | Self::UnsupportedMethod(_)
            | Self::ChannelNotFound(_) => ErrorKind::Protocol,
            Self::InvalidKeyEncoding(_) | Self::AuthError(_) => ErrorKind::Auth,
            Self::Exchange(_) | Self::ApiError { .. } => ErrorKind::Exchange,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    pub fn is_protocol(&self) -> bool {
        self.kind() == ErrorKind::Protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_joins_messages() {
        let err = ExchangeError::Exchange(vec![
            "EGeneral:Invalid arguments".to_string(),
            "EOrder:Insufficient funds".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Exchange error: EGeneral:Invalid arguments,EOrder:Insufficient funds"
        );
        assert_eq!(err.kind(), ErrorKind::Exchange);
    }

    #[test]
    fn test_error_kinds() {
        assert!(ExchangeError::UnknownEventType("x".into()).is_protocol());
        assert!(ExchangeError::ChannelNotFound("ohlc".into()).is_protocol());
        assert_eq!(
            ExchangeError::InvalidKeyEncoding("bad".into()).kind(),
            ErrorKind::Auth
        );
        assert_eq!(ExchangeError::ChannelClosed.kind(), ErrorKind::Transport);
    }
}
