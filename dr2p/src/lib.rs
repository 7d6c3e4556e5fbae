//! DR2P, a symmetric request/response layer over a framed message transport.
//!
//! Every endpoint is a [`core::peer::Peer`]: whether it accepted the
//! connection or initiated it, it can issue path-addressed requests and
//! serve handlers for inbound ones on the same connection. Many in-flight
//! requests are multiplexed by correlation id, with one-shot,
//! fire-and-forget, and streamed response modes, per-request timeouts, and
//! per-peer cookie state.
//!
//! The frame transport (framing, connection lifecycle, byte delivery) is an
//! external collaborator behind the traits in [`transport`].

pub mod client;
pub mod core;
pub mod error;
pub mod server;
pub mod transport;
