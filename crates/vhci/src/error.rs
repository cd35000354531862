//! Pairing core error types
//!
//! Every error is scoped to a single operation; none of them leaves the
//! controller unusable.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VhciError {
    /// The request pool had no free object
    #[error("Request pool exhausted")]
    ResourceExhausted,

    /// The operation was aborted, or the controller was torn down under it
    #[error("Operation cancelled")]
    Cancelled,

    /// The encoder rejected the paired request
    #[error("Invalid request")]
    InvalidRequest,

    /// No outstanding request carries this sequence number
    #[error("No request with sequence number {seqnum}")]
    NotFound { seqnum: u32 },

    /// A reader is already waiting on this controller
    #[error("A reader is already waiting")]
    ReaderBusy,
}

pub type Result<T> = std::result::Result<T, VhciError>;
