use crate::core::codec::Payload;
use crate::core::handler::HandlerFactory;
use crate::core::peer::{OneShotCallback, Peer, Reply, RequestOptions, StreamCallback};
use crate::error::{Dr2pError, TransportError};
use crate::transport::ClientTransport;
use std::sync::Arc;
use tracing::info;

/// A peer that actively connects. Apart from connection establishment it is
/// the same endpoint type as the accepting side: it serves handlers and
/// issues requests over the one connection.
pub struct Client {
  peer: Peer,
  transport: Arc<dyn ClientTransport>,
}

impl Client {
  pub fn new<T: ClientTransport + 'static>(transport: Arc<T>) -> Client {
    let peer = Peer::new(transport.clone());
    Client { peer, transport }
  }

  /// Connect to `host:port`. On connection-refused, either hand over to
  /// `transport.reconnect()` (which retries internally until it succeeds)
  /// or surface the failure, depending on `reconnect`.
  pub fn connect(&self, host: &str, port: u16, reconnect: bool) -> Result<(), Dr2pError> {
    if let Err(err) = self.transport.connect(host, port) {
      match err {
        TransportError::ConnectionRefused if reconnect => {
          info!("[DR2P] connection refused, trying to reconnect");
          self.transport.reconnect()?;
        },
        err => return Err(err.into()),
      }
    }
    self.peer.set_remote_host(host);
    Ok(())
  }

  pub fn peer(&self) -> &Peer {
    &self.peer
  }

  pub fn set_handler(&self, path: &str, factory: impl HandlerFactory + 'static) {
    self.peer.set_handler(path, factory);
  }

  pub fn request(&self, path: &str, msg: Payload, opts: RequestOptions) -> Result<Reply, Dr2pError> {
    self.peer.request(path, msg, opts)
  }

  pub fn request_with_callback(
    &self,
    path: &str,
    msg: Payload,
    opts: RequestOptions,
    callback: Box<dyn OneShotCallback>,
  ) -> Result<(), Dr2pError> {
    self.peer.request_with_callback(path, msg, opts, callback)
  }

  pub fn stream_request(
    &self,
    path: &str,
    msg: Payload,
    opts: RequestOptions,
    callback: impl StreamCallback + 'static,
  ) -> Result<(), Dr2pError> {
    self.peer.stream_request(path, msg, opts, callback)
  }

  pub fn notify(&self, path: &str, msg: Payload, opts: RequestOptions) -> Result<(), Dr2pError> {
    self.peer.notify(path, msg, opts)
  }

  pub fn start_mainloop(&self, reconnect: bool) {
    self.peer.start_mainloop(reconnect);
  }

  pub fn mainloop(&self) -> Result<(), TransportError> {
    self.peer.mainloop()
  }

  pub fn is_connected(&self) -> bool {
    self.peer.is_connected()
  }

  pub fn close(&self) -> Result<(), TransportError> {
    self.peer.close()
  }
}
