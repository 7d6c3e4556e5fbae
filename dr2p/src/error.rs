use std::io;

/// Errors surfaced at the request/serve API boundary.
#[derive(Debug, thiserror::Error)]
pub enum Dr2pError {
  #[error("peer is not connected")]
  PeerNotConnected,

  #[error("request timed out")]
  RequestTimeout,

  #[error("unknown client id: {0}")]
  UnknownClient(u64),

  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Codec(#[from] CodecError),

  #[error("head is not serializable: {0}")]
  MalformedHead(#[from] serde_json::Error),

  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

/// Failure signals of the frame transport. `PeerClosed` and
/// `ConnectionRefused` must stay distinguishable: the receive loop treats the
/// former as a clean exit, and the client's connect path keys its reconnect
/// decision on the latter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("peer closed the connection")]
  PeerClosed,

  #[error("connection refused")]
  ConnectionRefused,

  #[error("transport io error: {0}")]
  Io(#[from] io::Error),
}

/// Body encode/decode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  #[error("invalid json body: {0}")]
  Json(#[from] serde_json::Error),

  #[error("payload cannot be encoded as {tag}")]
  PayloadMismatch { tag: String },
}
