//! System message types for node-to-node communication.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};

/// Envelope for all node-to-node communication.
///
/// A discriminated union over operation codes; new operations become new
/// variants. Responses are messages too, so one framing path serves both
/// directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Ship one data-map fragment to its new owner.
    MoveFragment(MoveFragment),

    /// Generic success response.
    Ok,

    /// Error response carrying a failure class.
    Error(ErrorResponse),
}

/// Request body of a fragment move.
///
/// `package` is a msgpack-encoded [`FragmentPackage`]; it stays opaque at
/// this layer so the envelope format and the transfer codec can evolve
/// independently.
///
/// [`FragmentPackage`]: crate::rebalance::FragmentPackage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveFragment {
    /// Encoded transfer payload.
    pub package: Vec<u8>,
}

/// Error response with a kind code the sender can act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Failure class.
    pub kind: ErrorKind,

    /// Human-readable description.
    pub message: String,
}

impl ErrorResponse {
    /// Build a response from a local error.
    pub fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Reconstruct the error on the sender side.
    pub fn into_error(self) -> Error {
        Error::from_kind(self.kind, self.message)
    }
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(msg)
}

/// Decode a message from bytes.
pub fn decode_message(data: &[u8]) -> Result<Message, bincode::Error> {
    bincode::deserialize(data)
}

/// Frame a message with a length prefix for TCP transmission.
pub fn frame_message(msg: &Message) -> Result<Vec<u8>, bincode::Error> {
    let data = encode_message(msg)?;
    let len = data.len() as u32;

    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&data);

    Ok(framed)
}
