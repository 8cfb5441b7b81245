//! Error taxonomy for the recording lifecycle
//!
//! Fatal errors abort the recording before any capture happens and surface at
//! the process boundary as a non-zero exit. Per-sample append failures are
//! deliberately not represented here: they are absorbed and logged by the
//! writer without aborting an in-progress recording.

use thiserror::Error;

/// Errors that end a recording before (or instead of) capturing
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Invalid or unsupported options: unknown device or display, unsupported
    /// codec, or a track the container refused to accept
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The writer could not begin encoding
    #[error("could not start recording: {0}")]
    WriteStart(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_detail() {
        let err = RecorderError::Configuration("audio device 'x' not found".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: audio device 'x' not found"
        );

        let err = RecorderError::WriteStart("pipeline refused to play".into());
        assert!(err.to_string().starts_with("could not start recording"));
    }
}
