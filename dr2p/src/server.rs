use crate::core::codec::{default_registry, CodecRegistry, Payload};
use crate::core::handler::HandlerFactory;
use crate::core::peer::{Peer, Reply, RequestOptions, SharedHandlers};
use crate::error::{Dr2pError, TransportError};
use crate::transport::ServerTransport;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

struct ServerState {
  transport: Arc<dyn ServerTransport>,
  handlers: SharedHandlers,
  codecs: Arc<CodecRegistry>,
  clients: Mutex<BTreeMap<u64, Peer>>,
  next_cid: AtomicU64,
}

/// The accepting side: one [`Peer`] per accepted connection, all sharing the
/// server's handler table. Accepted peers are full duplex endpoints, so the
/// server can issue requests to any connected client by id.
pub struct Server(Arc<ServerState>);

impl Clone for Server {
  fn clone(&self) -> Self {
    Server(self.0.clone())
  }
}

impl Server {
  pub fn new(transport: Arc<dyn ServerTransport>) -> Server {
    Server::with_codecs(transport, default_registry())
  }

  pub fn with_codecs(transport: Arc<dyn ServerTransport>, codecs: Arc<CodecRegistry>) -> Server {
    Server(Arc::new(ServerState {
      transport,
      handlers: Arc::new(Mutex::new(HashMap::new())),
      codecs,
      clients: Mutex::new(BTreeMap::new()),
      next_cid: AtomicU64::new(1),
    }))
  }

  pub fn bind(&self, host: &str, port: u16) -> Result<(), TransportError> {
    self.0.transport.bind(host, port)
  }

  /// Register a handler factory for a path. The table is shared with every
  /// accepted peer, including ones already connected.
  pub fn set_handler(&self, path: &str, factory: impl HandlerFactory + 'static) {
    self.0.handlers.lock().insert(path.to_string(), Arc::new(factory));
  }

  /// Issue a request to the client with the given id.
  pub fn request(&self, client_id: u64, path: &str, msg: Payload) -> Result<Reply, Dr2pError> {
    let peer = self
      .client(client_id)
      .ok_or(Dr2pError::UnknownClient(client_id))?;
    peer.request(path, msg, RequestOptions::default())
  }

  pub fn client(&self, client_id: u64) -> Option<Peer> {
    self.0.clients.lock().get(&client_id).cloned()
  }

  pub fn client_ids(&self) -> Vec<u64> {
    self.0.clients.lock().keys().copied().collect()
  }

  /// Run the accept loop on the current thread. Each accepted connection
  /// gets a monotonic client id, a peer labelled with it, and a receive
  /// loop on a background thread.
  pub fn mainloop(&self) -> Result<(), TransportError> {
    let state = self.0.clone();
    info!("[DR2P] server mainloop start");
    self.0.transport.accept_loop(Box::new(move |sub| {
      let client_id = state.next_cid.fetch_add(1, Ordering::SeqCst);
      let peer = Peer::with_shared(sub, state.handlers.clone(), state.codecs.clone());
      peer.set_remote_host(client_id.to_string());
      state.clients.lock().insert(client_id, peer.clone());
      trace!("[DR2P] client {} connected", client_id);
      peer.start_mainloop(false);
    }))
  }

  pub fn close(&self) -> Result<(), TransportError> {
    self.0.transport.close()
  }
}
