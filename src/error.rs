//! Error taxonomy for reader operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during RFID operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UhfError {
    /// The link could not be opened
    #[error("Failed to open {port}: {reason}")]
    Connection { port: String, reason: String },

    /// The transport failed after the link was established
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No complete frame arrived within the timeout
    #[error("Timed out after {0:?} waiting for a frame")]
    Timeout(Duration),

    /// The frame's trailing checksum does not match its contents
    #[error("Checksum mismatch: computed 0x{computed:04X}, frame carries 0x{received:04X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// A checksum-valid frame whose payload cannot be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid argument passed to a command builder or reader operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The reader answered a configuration command with a failure status
    #[error("Command 0x{command:02X} rejected with status 0x{status:02X}")]
    CommandRejected { command: u8, status: u8 },

    /// A tag write did not take effect
    #[error("Write rejected: {reason}")]
    WriteRejected { status: Option<u8>, reason: String },

    /// No valid reply to the connection check
    #[error("Device not responding after {attempts} attempts")]
    DeviceNotResponding { attempts: u32 },

    /// Operation attempted on a disconnected reader
    #[error("Reader is not connected")]
    NotConnected,

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UhfError {
    /// Parse-level and timing failures: drop the frame and carry on with the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            UhfError::Timeout(_) | UhfError::ChecksumMismatch { .. } | UhfError::MalformedResponse(_)
        )
    }

    /// The link is gone and needs an explicit reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UhfError::Connection { .. } | UhfError::ConnectionLost(_) | UhfError::NotConnected
        )
    }
}
