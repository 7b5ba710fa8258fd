//! `px-stomp`: STOMP 1.2 framing and a subscribe-only client.
//!
//! The client runs over any `AsyncRead + AsyncWrite` byte stream. The pxGrid
//! pub/sub bridge hands it one half of an in-memory duplex whose other half
//! is pumped to and from a WebSocket.

mod client;
mod codec;
mod error;
mod frame;

pub use client::{ConnectOptions, Delivery, StompClient, StompSubscription};
pub use codec::{StompCodec, DEFAULT_MAX_FRAME_BYTES};
pub use error::StompError;
pub use frame::{header, Command, Frame};
