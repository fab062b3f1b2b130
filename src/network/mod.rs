//! Network communication layer.

pub mod client;
pub mod rpc;
pub mod server;

pub use client::{TcpTransport, Transport};
pub use rpc::{decode_message, encode_message, frame_message, ErrorResponse, Message, MoveFragment};
pub use server::{MessageHandler, NetworkServer};
