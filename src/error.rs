//! Error types for the distributed cache.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the distributed cache.
#[derive(Error, Debug)]
pub enum Error {
    /// The node is not bootstrapped yet or is shutting down.
    /// Senders should retry later.
    #[error("node not operable: {0}")]
    NotOperable(String),

    /// Malformed transfer payload. Permanent for that payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// A request referenced state this node does not hold, e.g. a partition
    /// it no longer owns. Permanent for the current routing epoch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Network communication errors. Retryable.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage layer errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cluster membership errors.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage layer errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No entry for the requested hkey.
    #[error("key not found")]
    KeyNotFound,

    /// The fragment holds too much garbage. The triggering write succeeded;
    /// the caller should schedule an asynchronous compaction and continue.
    #[error("storage fragmented, compaction required")]
    Fragmented,

    /// An exported fragment failed validation on import.
    #[error("corrupt fragment: {0}")]
    Corrupt(String),

    /// Any other storage failure.
    #[error("storage internal: {0}")]
    Internal(String),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to send a request.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a response.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer answered with something other than a response message.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Cluster membership errors.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// No member with the given id is known.
    #[error("member not found: {0}")]
    MemberNotFound(u64),
}

/// Failure class carried on the wire so the sender can reconstruct the
/// error without sharing concrete types.
///
/// `StorageFragmented` never crosses the wire; it is resolved locally during
/// merges. It exists here so every taxonomy kind has a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Receiver not bootstrapped or shutting down; retryable.
    NotOperable,
    /// Malformed payload; permanent.
    Decode,
    /// Ownership check failed; permanent for the current routing epoch.
    InvalidArgument,
    /// Merge-local compaction signal; never surfaced externally.
    StorageFragmented,
    /// Network failure; retryable.
    Transport,
    /// Any other storage failure.
    StorageInternal,
}

impl Error {
    /// The wire-level failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotOperable(_) => ErrorKind::NotOperable,
            Error::Decode(_) => ErrorKind::Decode,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Storage(StorageError::Fragmented) => ErrorKind::StorageFragmented,
            Error::Storage(StorageError::Corrupt(_)) => ErrorKind::Decode,
            Error::Storage(_) => ErrorKind::StorageInternal,
            Error::Membership(_) | Error::Config(_) | Error::Internal(_) => {
                ErrorKind::StorageInternal
            }
        }
    }

    /// Whether the sender may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotOperable | ErrorKind::Transport)
    }

    /// Rebuild an error from a wire kind code and message.
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::NotOperable => Error::NotOperable(message),
            ErrorKind::Decode => Error::Decode(message),
            ErrorKind::InvalidArgument => Error::InvalidArgument(message),
            ErrorKind::Transport => Error::Transport(TransportError::SendFailed(message)),
            ErrorKind::StorageFragmented => Error::Storage(StorageError::Fragmented),
            ErrorKind::StorageInternal => Error::Storage(StorageError::Internal(message)),
        }
    }
}
