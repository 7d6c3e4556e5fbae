use crate::core::codec::{default_registry, CodecRegistry, Payload};
use crate::core::frame::{Head, HeadMap};
use crate::core::handler::{HandlerFactory, RequestCtx, ResponsePayload};
use crate::error::{Dr2pError, TransportError};
use crate::transport::FrameTransport;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// Handler table shared between a peer and the server that spawned it.
pub(crate) type SharedHandlers = Arc<Mutex<HashMap<String, Arc<dyn HandlerFactory>>>>;

/// The record handed back for a completed request: the decoded message plus
/// the raw head and body it arrived with.
#[derive(Debug, Clone)]
pub struct Reply {
  pub msg: Payload,
  pub head: Head,
  pub body: Vec<u8>,
}

/// Per-request knobs for the send path.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub body_type: Option<String>,
  pub headers: Vec<(String, JsonValue)>,
  pub timeout: Option<Duration>,
}

impl RequestOptions {
  pub fn body_type(mut self, tag: impl Into<String>) -> Self {
    self.body_type = Some(tag.into());
    self
  }

  pub fn header(mut self, key: impl Into<String>, value: JsonValue) -> Self {
    self.headers.push((key.into(), value));
    self
  }

  /// Deadline for a normal-mode request. Ignored by the other modes, which
  /// never block on a response.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }
}

/// One-shot completion callback for a normal-mode request issued without
/// blocking the caller.
pub trait OneShotCallback: Send {
  fn call(self: Box<Self>, result: Result<Reply, Dr2pError>);
}

impl<F: Send + FnOnce(Result<Reply, Dr2pError>)> OneShotCallback for F {
  fn call(self: Box<F>, result: Result<Reply, Dr2pError>) {
    (*self)(result)
  }
}

/// Invoked once per stream frame, in transport order; `is_continue == false`
/// marks the final invocation.
pub trait StreamCallback: Send + Sync {
  fn call(&self, reply: Reply, is_continue: bool);
}

impl<F: Send + Sync + Fn(Reply, bool)> StreamCallback for F {
  fn call(&self, reply: Reply, is_continue: bool) {
    (*self)(reply, is_continue)
  }
}

enum ResponseHandler {
  Chan(mpsc::Sender<Result<Reply, Dr2pError>>),
  Callback(Box<dyn OneShotCallback>),
}

impl ResponseHandler {
  fn invoke(self, result: Result<Reply, Dr2pError>) {
    match self {
      ResponseHandler::Chan(tx) => {
        let _ = tx.send(result);
      },
      ResponseHandler::Callback(f) => f.call(result),
    }
  }
}

/// How a request registers for its response(s).
enum Registration {
  OneShot(ResponseHandler),
  Stream(Arc<dyn StreamCallback>),
  NoResponse,
}

struct PeerState {
  transport: Arc<dyn FrameTransport>,
  codecs: Arc<CodecRegistry>,
  handlers: SharedHandlers,
  next_rid: AtomicU64,
  callbacks: Mutex<BTreeMap<u64, ResponseHandler>>,
  stream_callbacks: Mutex<BTreeMap<u64, Arc<dyn StreamCallback>>>,
  cookie: Mutex<BTreeMap<String, String>>,
  remote_host: Mutex<Option<String>>,
  running: AtomicBool,
}

/// One endpoint of a DR2P conversation. Both sides of a connection hold the
/// same type: a peer issues path-addressed requests and serves handlers for
/// inbound ones, multiplexed over one frame-transport connection by
/// correlation id.
///
/// `Peer` is a cheap clone over shared state; clones address the same
/// connection.
pub struct Peer(Arc<PeerState>);

impl Clone for Peer {
  fn clone(&self) -> Self {
    Peer(self.0.clone())
  }
}

impl Peer {
  pub fn new(transport: Arc<dyn FrameTransport>) -> Peer {
    Peer::with_codecs(transport, default_registry())
  }

  pub fn with_codecs(transport: Arc<dyn FrameTransport>, codecs: Arc<CodecRegistry>) -> Peer {
    Peer::with_shared(transport, Arc::new(Mutex::new(HashMap::new())), codecs)
  }

  pub(crate) fn with_shared(
    transport: Arc<dyn FrameTransport>,
    handlers: SharedHandlers,
    codecs: Arc<CodecRegistry>,
  ) -> Peer {
    Peer(Arc::new(PeerState {
      transport,
      codecs,
      handlers,
      next_rid: AtomicU64::new(1),
      callbacks: Mutex::new(BTreeMap::new()),
      stream_callbacks: Mutex::new(BTreeMap::new()),
      cookie: Mutex::new(BTreeMap::new()),
      remote_host: Mutex::new(None),
      running: AtomicBool::new(false),
    }))
  }

  /// Register a handler factory for a path, overwriting any prior entry.
  pub fn set_handler(&self, path: &str, factory: impl HandlerFactory + 'static) {
    self.0.handlers.lock().insert(path.to_string(), Arc::new(factory));
  }

  pub fn remote_host(&self) -> Option<String> {
    self.0.remote_host.lock().clone()
  }

  pub fn set_remote_host(&self, host: impl Into<String>) {
    *self.0.remote_host.lock() = Some(host.into());
  }

  /// Current value in this peer's cookie jar, as merged from `Set_Cookie`
  /// fields on received responses.
  pub fn cookie(&self, key: &str) -> Option<String> {
    self.0.cookie.lock().get(key).cloned()
  }

  /// True while the receive loop is active.
  pub fn is_connected(&self) -> bool {
    self.0.running.load(Ordering::Acquire)
  }

  /// Close the underlying transport; the receive loop terminates on the
  /// next peer-closed signal.
  pub fn close(&self) -> Result<(), TransportError> {
    self.0.transport.close()
  }

  /// Issue a request and block until the matching response arrives.
  ///
  /// Fails with [`Dr2pError::RequestTimeout`] once `opts.timeout` elapses,
  /// and with [`Dr2pError::PeerNotConnected`] (without touching the
  /// transport) when the receive loop is not running.
  pub fn request(&self, path: &str, msg: Payload, opts: RequestOptions) -> Result<Reply, Dr2pError> {
    self.ensure_connected()?;
    let (tx, rx) = mpsc::channel();
    self.send_request(path, &msg, &opts, Registration::OneShot(ResponseHandler::Chan(tx)))?;
    rx.recv().unwrap_or(Err(Dr2pError::PeerNotConnected))
  }

  /// Normal-mode request that returns once the frame is sent; the outcome
  /// (response or timeout) is delivered to `callback` exactly once.
  pub fn request_with_callback(
    &self,
    path: &str,
    msg: Payload,
    opts: RequestOptions,
    callback: Box<dyn OneShotCallback>,
  ) -> Result<(), Dr2pError> {
    self.ensure_connected()?;
    self.send_request(
      path,
      &msg,
      &opts,
      Registration::OneShot(ResponseHandler::Callback(callback)),
    )?;
    Ok(())
  }

  /// Issue a streaming request. Returns once the frame is sent; `callback`
  /// then runs once per response frame, in transport order, until the frame
  /// with `Continued == false`. Frames arriving after that are discarded.
  pub fn stream_request(
    &self,
    path: &str,
    msg: Payload,
    opts: RequestOptions,
    callback: impl StreamCallback + 'static,
  ) -> Result<(), Dr2pError> {
    self.ensure_connected()?;
    self.send_request(path, &msg, &opts, Registration::Stream(Arc::new(callback)))?;
    Ok(())
  }

  /// Fire-and-forget request: the frame carries `No_Response: true`, the
  /// remote must not reply, and no callback is registered.
  pub fn notify(&self, path: &str, msg: Payload, opts: RequestOptions) -> Result<(), Dr2pError> {
    self.ensure_connected()?;
    self.send_request(path, &msg, &opts, Registration::NoResponse)?;
    Ok(())
  }

  fn ensure_connected(&self) -> Result<(), Dr2pError> {
    if self.is_connected() {
      Ok(())
    } else {
      Err(Dr2pError::PeerNotConnected)
    }
  }

  /// The send path: allocate a correlation id, build and encode the frame,
  /// register per the mode, then hand the frame to the transport. The
  /// registration happens before the send; a failed send takes it back out.
  fn send_request(
    &self,
    path: &str,
    msg: &Payload,
    opts: &RequestOptions,
    registration: Registration,
  ) -> Result<u64, Dr2pError> {
    let rid = self.0.next_rid.fetch_add(1, Ordering::SeqCst);
    let mut head = Head::request(self.remote_host(), path, rid);
    let (body, tag) = self.0.codecs.encode(msg, opts.body_type.as_deref())?;
    head.body_type = Some(tag);
    {
      let jar = self.0.cookie.lock();
      if !jar.is_empty() {
        head.cookie = Some(jar.clone());
      }
    }
    match registration {
      Registration::NoResponse => head.no_response = Some(true),
      Registration::Stream(callback) => {
        self.0.stream_callbacks.lock().insert(rid, callback);
      },
      Registration::OneShot(handler) => {
        self.0.callbacks.lock().insert(rid, handler);
        if let Some(timeout) = opts.timeout {
          self.spawn_timeout(rid, timeout);
        }
      },
    }
    for (key, value) in &opts.headers {
      head.set_field(key, value.clone());
    }
    trace!("[DR2P] send request {} {}", rid, path);
    if let Err(err) = self.send_frame(&head, &body) {
      self.0.callbacks.lock().remove(&rid);
      self.0.stream_callbacks.lock().remove(&rid);
      return Err(err);
    }
    Ok(rid)
  }

  /// Timer task for a normal-mode request. Whichever of the timer and the
  /// response removes the table entry first delivers to the user; the loser
  /// finds the entry gone and is a no-op.
  fn spawn_timeout(&self, rid: u64, timeout: Duration) {
    let state = Arc::downgrade(&self.0);
    thread::spawn(move || {
      thread::sleep(timeout);
      let state = match state.upgrade() {
        Some(state) => state,
        None => return,
      };
      let handler = state.callbacks.lock().remove(&rid);
      if let Some(handler) = handler {
        trace!("[DR2P] request {} timed out", rid);
        handler.invoke(Err(Dr2pError::RequestTimeout));
      }
    });
  }

  fn send_frame(&self, head: &Head, body: &[u8]) -> Result<(), Dr2pError> {
    let map = head.to_map()?;
    self.0.transport.send(&map, body)?;
    Ok(())
  }

  /// Start the receive loop on a background thread. With `reconnect`, a
  /// clean peer-close leads to `transport.reconnect()` and a fresh loop;
  /// any other termination ends the thread.
  pub fn start_mainloop(&self, reconnect: bool) {
    let peer = self.clone();
    self.0.running.store(true, Ordering::Release);
    thread::spawn(move || loop {
      match peer.mainloop() {
        Ok(()) if reconnect => {
          info!("[DR2P] trying to reconnect");
          if let Err(err) = peer.0.transport.reconnect() {
            error!("[DR2P] reconnect failed: {}", err);
            break;
          }
        },
        _ => break,
      }
    });
  }

  /// Run the receive loop on the current thread until the connection
  /// terminates. Every inbound frame is dispatched on its own worker thread
  /// so handler execution never blocks the receiver; in-flight workers are
  /// joined before this returns. `Ok(())` means a clean peer-close.
  pub fn mainloop(&self) -> Result<(), TransportError> {
    self.0.running.store(true, Ordering::Release);
    let result = crossbeam_utils::thread::scope(|scope| loop {
      match self.0.transport.recv() {
        Ok((head, body)) => {
          let peer = self.clone();
          scope.spawn(move |_| peer.dispatch(head, body));
        },
        Err(TransportError::PeerClosed) => {
          info!("[DR2P] session closed");
          return Ok(());
        },
        Err(err) => {
          error!("[DR2P] receive failed: {}", err);
          return Err(err);
        },
      }
    });
    self.0.running.store(false, Ordering::Release);
    match result {
      Ok(exit) => exit,
      Err(_) => {
        error!("[DR2P] request worker panicked");
        Err(TransportError::Io(io::Error::new(
          io::ErrorKind::Other,
          "request worker panicked",
        )))
      },
    }
  }

  fn dispatch(&self, head: HeadMap, body: Vec<u8>) {
    let head = match Head::from_map(head) {
      Ok(head) => head,
      Err(err) => {
        warn!("[DR2P] dropping frame with malformed head: {}", err);
        return;
      },
    };
    if head.is_request() {
      self.handle_request(head, body);
    } else if head.is_response() {
      self.handle_response(head, body);
    } else {
      warn!("[DR2P] dropping frame with unknown type {:?}", head.kind);
    }
  }

  fn handle_request(&self, head: Head, body: Vec<u8>) {
    let path = head.path.clone().unwrap_or_default();
    let rid = head.id.clone().unwrap_or_default();
    trace!("[DR2P] receive request {} {}", rid, path);
    let factory = self.0.handlers.lock().get(&path).cloned();
    let factory = match factory {
      Some(factory) => factory,
      None => {
        error!("[DR2P] no handler for path {}", path);
        return;
      },
    };
    let msg = match self.0.codecs.decode(&body, head.body_type.as_deref()) {
      Ok(msg) => msg,
      Err(err) => {
        error!("[DR2P] failed to decode request {} body: {}", rid, err);
        return;
      },
    };
    let no_response = head.is_no_response();
    let mut handler = factory.create();
    let mut ctx = RequestCtx {
      peer: self.clone(),
      head,
      body,
      res_head: Head::response(&rid),
    };
    let outcome = match handler.handle(&mut ctx, msg) {
      Ok(outcome) => outcome,
      Err(err) => {
        error!("[DR2P] handler for {} failed: {}", path, err);
        return;
      },
    };
    // No_Response is decided by the request frame alone; whatever the
    // handler returned or put on res_head is discarded.
    if no_response {
      trace!("[DR2P] request {} forbids a response", rid);
      return;
    }
    match outcome {
      ResponsePayload::Value(value) => {
        if let Err(err) = self.send_response(&mut ctx.res_head, &value) {
          error!("[DR2P] failed to send response {}: {}", rid, err);
        }
      },
      ResponsePayload::Stream(mut frames) => loop {
        match frames.next() {
          Some((value, is_continue)) => {
            ctx.res_head.continued = Some(is_continue);
            if let Err(err) = self.send_response(&mut ctx.res_head, &value) {
              error!("[DR2P] failed to send stream frame {}: {}", rid, err);
              return;
            }
            if !is_continue {
              break;
            }
          },
          None => {
            warn!("[DR2P] stream for request {} ended without terminal frame", rid);
            break;
          },
        }
      },
    }
  }

  fn send_response(&self, res_head: &mut Head, value: &Payload) -> Result<(), Dr2pError> {
    let (body, tag) = self.0.codecs.encode(value, res_head.body_type.as_deref())?;
    res_head.body_type = Some(tag);
    self.send_frame(res_head, &body)
  }

  fn handle_response(&self, head: Head, body: Vec<u8>) {
    let msg = match self.0.codecs.decode(&body, head.body_type.as_deref()) {
      Ok(msg) => msg,
      Err(err) => {
        error!("[DR2P] failed to decode response {:?} body: {}", head.id, err);
        return;
      },
    };
    if let Some(entries) = &head.set_cookie {
      let mut jar = self.0.cookie.lock();
      for entry in entries {
        jar.insert(entry.key.clone(), entry.value.clone());
      }
    }
    let rid = match head.id.as_deref().and_then(|id| id.parse::<u64>().ok()) {
      Some(rid) => rid,
      None => {
        warn!("[DR2P] dropping response with unusable id {:?}", head.id);
        return;
      },
    };
    trace!("[DR2P] receive response {}", rid);
    match head.continued {
      Some(is_continue) => {
        let callback = {
          let mut streams = self.0.stream_callbacks.lock();
          if is_continue {
            streams.get(&rid).cloned()
          } else {
            streams.remove(&rid)
          }
        };
        match callback {
          Some(callback) => callback.call(Reply { msg, head, body }, is_continue),
          None => trace!("[DR2P] stream callback not found for {}, dropping frame", rid),
        }
      },
      None => {
        let handler = self.0.callbacks.lock().remove(&rid);
        match handler {
          Some(handler) => handler.invoke(Ok(Reply { msg, head, body })),
          None => info!("[DR2P] callback not found for {}, maybe timeout", rid),
        }
      },
    }
  }
}
