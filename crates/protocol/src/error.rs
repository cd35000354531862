//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Command field does not name a known USB/IP command
    #[error("Unknown USB/IP command: {0:#010x}")]
    UnknownCommand(u32),

    /// Header carried a command other than the one being decoded
    #[error("Unexpected USB/IP command: expected {expected:#x}, got {actual:#x}")]
    UnexpectedCommand { expected: u32, actual: u32 },

    /// Direction field is neither USBIP_DIR_OUT nor USBIP_DIR_IN
    #[error("Invalid direction: {0}")]
    InvalidDirection(u32),

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// I/O error while reading or writing a header
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
