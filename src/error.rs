//! Error handling for camhub

use crate::device_adapter::ResolveError;
use crate::stream_manager::CaptureError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera not known to the registry
    #[error("Camera not found: {0}")]
    NotFound(String),

    /// Camera has no resolved video source yet
    #[error("Camera {0} has no resolved video source")]
    NotResolved(String),

    /// start() superseded by stop / resolve / registry reset while opening
    #[error("Stream start cancelled: {0}")]
    StreamCancelled(String),

    /// Discovery socket failure (never escapes DiscoveryEngine::probe)
    #[error("Discovery transport error: {0}")]
    DiscoveryTransport(String),

    /// DeviceAdapter failure (unreachable / auth / resolution)
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Capture resource failure (open / read / release)
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Handoff code that does not decode
    #[error("Invalid handoff token: {0}")]
    InvalidToken(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable code for the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::NotResolved(_) => "NOT_RESOLVED",
            Error::StreamCancelled(_) => "STREAM_CANCELLED",
            Error::DiscoveryTransport(_) => "DISCOVERY_TRANSPORT",
            Error::Resolve(ResolveError::DeviceUnreachable(_)) => "DEVICE_UNREACHABLE",
            Error::Resolve(ResolveError::AuthenticationFailure(_)) => "AUTHENTICATION_FAILURE",
            Error::Resolve(ResolveError::ResolutionFailure(_)) => "RESOLUTION_FAILURE",
            Error::Capture(CaptureError::Open(_)) => "STREAM_OPEN_FAILURE",
            Error::Capture(CaptureError::Read(_)) => "STREAM_READ_FAILURE",
            Error::Capture(CaptureError::Release(_)) => "RESOURCE_RELEASE_ERROR",
            Error::InvalidToken(_) => "INVALID_TOKEN",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        let e: Error = ResolveError::AuthenticationFailure("NotAuthorized".into()).into();
        assert_eq!(e.code(), "AUTHENTICATION_FAILURE");
        assert_eq!(e.to_string(), "Authentication failed: NotAuthorized");

        let e: Error = CaptureError::Open("connection refused".into()).into();
        assert_eq!(e.code(), "STREAM_OPEN_FAILURE");

        assert_eq!(Error::NotFound("10.0.0.9".into()).code(), "NOT_FOUND");
        assert_eq!(Error::StreamCancelled("10.0.0.5".into()).code(), "STREAM_CANCELLED");
    }
}
