//! Client-side error type

use shared::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to server lost")]
    ConnectionLost,

    #[error("no response from {0}")]
    ConnectTimeout(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for ClientError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Closed => ClientError::ConnectionLost,
            FrameError::Io(e) => ClientError::Io(e),
            other => ClientError::Handshake(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_frame_means_connection_lost() {
        assert!(matches!(
            ClientError::from(FrameError::Closed),
            ClientError::ConnectionLost
        ));
    }

    #[test]
    fn test_oversized_frame_is_reported() {
        let err = ClientError::from(FrameError::TooLarge(1 << 20));
        assert!(err.to_string().contains("1048576"));
    }
}
