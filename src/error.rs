//! Error taxonomy for the protocol engine

use crate::protocol::{self, status};

/// Errors surfaced by the frame codec, the transaction engine and the
/// continuous-read controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Transport layer error (UART, serial, closed port, etc.)
    #[error("transport error: {0}")]
    Transport(String),

    /// No valid frame arrived within the time budget (resync retries included).
    #[error("timed out waiting for a response to opcode {opcode:#04X}")]
    Timeout { opcode: u8 },

    /// A frame was found but its checksum does not match.
    #[error("checksum mismatch (frame carried {received:#06X}, computed {computed:#06X})")]
    ChecksumFault { received: u16, computed: u16 },

    /// The module answered with a different opcode than the one sent.
    #[error("unexpected opcode {received:#04X} (expected {expected:#04X})")]
    UnexpectedOpcode { expected: u8, received: u8 },

    /// The module sent its boot notice: it was reset and must be reconnected.
    #[error("device was reset externally, reconnect required")]
    DeviceReset,

    /// Non-success status code returned by the module.
    #[error("module fault {code:#06X} ({})", protocol::fault_name(*code))]
    ModuleFault { code: u16 },

    /// The module firmware hit an assertion. Fatal for the session.
    #[error("module assertion failed at {file}:{line}")]
    ModuleAssertion { file: String, line: u32 },

    /// The on-module tag buffer overflowed.
    #[error("module tag buffer full")]
    BufferFull,

    /// The module is already streaming reports on its own.
    #[error("module is streaming autonomously")]
    AutonomousModeConflict,

    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A response was too short or carried an inconsistent field.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A wire antenna field has no logical antenna in the active map.
    #[error("no logical antenna mapped to tx {tx} / rx {rx}")]
    UnmappedAntenna { tx: u8, rx: u8 },

    #[error("invalid antenna map: {0}")]
    InvalidAntennaMap(String),

    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not allowed in the current read state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Reader configuration or listener registration conflict.
    #[error("configuration error: {0}")]
    Config(String),

    /// The background read loop went away before answering.
    #[error("continuous read session closed")]
    SessionClosed,

    #[error("operation cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// Build the fault for a non-success status word.
    pub(crate) fn from_status(code: u16, data: &[u8]) -> Self {
        if protocol::is_assertion(code) {
            let (file, line) = protocol::decode_assertion(data);
            return Self::ModuleAssertion { file, line };
        }
        match code {
            status::TAG_ID_BUFFER_FULL => Self::BufferFull,
            _ => Self::ModuleFault { code },
        }
    }

    /// Faults after which the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModuleAssertion { .. }
                | Self::DeviceReset
                | Self::Timeout { .. }
                | Self::Transport(_)
                | Self::SessionClosed
                | Self::Cancelled
        )
    }

    /// Faults worth re-issuing a command for (used by [`crate::RetryPolicy`]).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ChecksumFault { .. })
    }

    /// The benign "search finished without tags" status.
    pub fn is_no_tags_found(&self) -> bool {
        matches!(self, Self::ModuleFault { code } if *code == status::NO_TAGS_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_buffer_full() {
        assert_eq!(ProtocolError::from_status(0x0601, &[]), ProtocolError::BufferFull);
    }

    #[test]
    fn test_from_status_plain_fault() {
        let err = ProtocolError::from_status(0x0105, &[]);
        assert_eq!(err, ProtocolError::ModuleFault { code: 0x0105 });
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("0x0105"));
    }

    #[test]
    fn test_from_status_assertion() {
        let mut data = 123u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"file.c");
        let err = ProtocolError::from_status(0x7F01, &data);
        assert_eq!(
            err,
            ProtocolError::ModuleAssertion {
                file: "file.c".into(),
                line: 123
            }
        );
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "module assertion failed at file.c:123");
    }

    #[test]
    fn test_no_tags_found() {
        assert!(ProtocolError::ModuleFault { code: 0x0400 }.is_no_tags_found());
        assert!(!ProtocolError::BufferFull.is_no_tags_found());
    }

    #[test]
    fn test_retryable() {
        assert!(ProtocolError::Timeout { opcode: 0x2F }.is_retryable());
        assert!(!ProtocolError::ModuleFault { code: 0x0105 }.is_retryable());
    }
}
