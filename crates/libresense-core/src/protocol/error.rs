//! Protocol errors

use thiserror::Error;

/// Errors produced while decoding a single frame from raw bytes.
///
/// `Incomplete` is transient: the caller should read more bytes and decode
/// again. The other variants mean the buffer cannot become a valid frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame incomplete: expected at least {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("invalid frame header")]
    InvalidHeader,

    #[error("invalid framing: {0} byte not at expected offset")]
    InvalidFraming(&'static str),

    #[error("checksum mismatch: computed {computed:#06x}, found {found:#06x}")]
    ChecksumMismatch { computed: u16, found: u16 },
}

impl FrameError {
    /// Whether reading more bytes could turn this into a valid frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FrameError::Incomplete { .. })
    }
}

/// Errors that can occur during protocol communication with a device
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection to {host} could not be established: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("not connected to device")]
    NotConnected,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no valid answer after {attempts} attempts")]
    QueryFailed { attempts: u32 },

    #[error("device reported status {code:#04x} ({name})")]
    DeviceStatus { code: u8, name: &'static str },

    #[error("data type {0:#04x} not implemented")]
    UnsupportedDataType(u8),

    #[error("unexpected answer: {0}")]
    UnexpectedAnswer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_is_transient() {
        assert!(FrameError::Incomplete {
            expected: 12,
            actual: 4
        }
        .is_incomplete());
        assert!(!FrameError::InvalidHeader.is_incomplete());
        assert!(!FrameError::ChecksumMismatch {
            computed: 0x1234,
            found: 0x4321
        }
        .is_incomplete());
    }

    #[test]
    fn test_display() {
        let err = ProtocolError::DeviceStatus {
            code: 0x24,
            name: "INVALID_CHANNEL",
        };
        assert_eq!(err.to_string(), "device reported status 0x24 (INVALID_CHANNEL)");
    }
}
