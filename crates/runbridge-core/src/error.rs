//! Error types for runbridge Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Request construction errors
    #[error("Missing host header")]
    MissingHost,

    #[error("Missing URL")]
    MissingUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid host header: {host} does not match URL hostname {hostname}")]
    InvalidHost { host: String, hostname: String },

    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    // Body errors
    #[error("ReadableStream is locked")]
    StreamLocked,

    #[error("Body has already been consumed")]
    BodyUsed,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Body exceeds maximum allowed size of {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    // Handler errors
    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Conventional error name, as reported to the invocation's error sink
    pub fn name(&self) -> &'static str {
        match self {
            Error::MissingHost => "MissingHostError",
            Error::MissingUrl => "MissingURLError",
            Error::InvalidUrl(_) => "InvalidURLError",
            Error::InvalidHost { .. } => "InvalidHostError",
            Error::RequestBuild(_) => "RequestBuildError",
            Error::StreamLocked => "StreamLockedError",
            Error::BodyUsed => "BodyUsedError",
            Error::Stream(_) => "StreamError",
            Error::BodyTooLarge(_) => "BodyTooLargeError",
            Error::InvalidHeader(_) => "InvalidHeaderError",
            Error::Aborted(_) => "AbortError",
            Error::Timeout(_) => "TimeoutError",
            Error::Handler(_) => "HandlerError",
            Error::Serialization(_) => "SerializationError",
            Error::Io(_) => "IoError",
        }
    }

    /// Timeout-named errors map to a 504 by default
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Errors raised while turning an invocation into a request
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Error::MissingHost
                | Error::MissingUrl
                | Error::InvalidUrl(_)
                | Error::InvalidHost { .. }
                | Error::RequestBuild(_)
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout(message.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
