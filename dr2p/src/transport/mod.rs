//! The frame-transport contract the peer state machine is written against.
//!
//! The transport owns framing, connection lifecycle, and byte delivery; this
//! crate only consumes it. `send`/`recv` move one frame at a time, blocking,
//! where a frame is a string-keyed attribute map plus an opaque body. The two
//! failure signals the core keys behavior on are
//! [`TransportError::PeerClosed`] (clean termination, ends the receive loop)
//! and [`TransportError::ConnectionRefused`] (drives the client's reconnect
//! decision).

pub mod memory;

use crate::core::frame::HeadMap;
use crate::error::TransportError;
use std::sync::Arc;

/// One bidirectional framed connection.
pub trait FrameTransport: Send + Sync {
  /// Send one frame. Blocks; the block is the layer's backpressure.
  fn send(&self, head: &HeadMap, body: &[u8]) -> Result<(), TransportError>;

  /// Receive one frame. Blocks until a frame arrives; returns
  /// [`TransportError::PeerClosed`] on clean termination.
  fn recv(&self) -> Result<(HeadMap, Vec<u8>), TransportError>;

  /// Close the connection; unblocks pending `recv` calls on both ends.
  fn close(&self) -> Result<(), TransportError>;

  /// Re-establish the connection, retrying internally until it succeeds.
  fn reconnect(&self) -> Result<(), TransportError>;
}

/// A frame transport that actively establishes its connection.
pub trait ClientTransport: FrameTransport {
  fn connect(&self, host: &str, port: u16) -> Result<(), TransportError>;
}

/// Invoked by the accept loop with one sub-transport per accepted connection.
pub type AcceptCallback = Box<dyn FnMut(Arc<dyn FrameTransport>) + Send>;

/// The listening side: accepts connections and hands each to a callback.
pub trait ServerTransport: Send + Sync {
  fn bind(&self, host: &str, port: u16) -> Result<(), TransportError>;

  /// Run the accept loop on the current thread until the listener closes.
  fn accept_loop(&self, on_accept: AcceptCallback) -> Result<(), TransportError>;

  fn close(&self) -> Result<(), TransportError>;
}
