use dr2p::core::codec::Payload;
use dr2p::core::frame::HeadMap;
use dr2p::core::handler::{Handler, RequestCtx, ResponsePayload};
use dr2p::core::peer::Peer;
use dr2p::error::{Dr2pError, TransportError};
use dr2p::transport::memory::{memory_pair, MemoryListener, MemoryTransport};
use dr2p::transport::{ClientTransport, FrameTransport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn setup_log() {
  static START: Once = Once::new();
  START.call_once(|| {
    let level = "trace";
    let mut filters = vec![];
    filters.push(format!("dr2p={}", level));
    std::env::set_var("RUST_LOG", filters.join(","));

    let subscriber = Subscriber::builder()
      .with_env_filter(EnvFilter::from_default_env())
      .with_line_number(true)
      .with_ansi(true)
      .finish();
    subscriber.try_init().unwrap();
  });
}

/// Two peers over a loopback connection, both receive loops running.
pub fn connected_pair() -> (Peer, Peer) {
  let (a, b) = memory_pair();
  let left = Peer::new(a);
  let right = Peer::new(b);
  left.start_mainloop(false);
  right.start_mainloop(false);
  (left, right)
}

/// Poll `cond` until it holds or `deadline` passes.
pub fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
  let start = Instant::now();
  while start.elapsed() < deadline {
    if cond() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  false
}

/// Frame transport wrapper counting the frames that cross it.
pub struct CountingTransport {
  inner: Arc<dyn FrameTransport>,
  sent: AtomicUsize,
  received: AtomicUsize,
}

impl CountingTransport {
  pub fn new(inner: Arc<dyn FrameTransport>) -> Arc<CountingTransport> {
    Arc::new(CountingTransport {
      inner,
      sent: AtomicUsize::new(0),
      received: AtomicUsize::new(0),
    })
  }

  pub fn sent(&self) -> usize {
    self.sent.load(Ordering::Acquire)
  }

  pub fn received(&self) -> usize {
    self.received.load(Ordering::Acquire)
  }
}

impl FrameTransport for CountingTransport {
  fn send(&self, head: &HeadMap, body: &[u8]) -> Result<(), TransportError> {
    self.sent.fetch_add(1, Ordering::AcqRel);
    self.inner.send(head, body)
  }

  fn recv(&self) -> Result<(HeadMap, Vec<u8>), TransportError> {
    let frame = self.inner.recv()?;
    self.received.fetch_add(1, Ordering::AcqRel);
    Ok(frame)
  }

  fn close(&self) -> Result<(), TransportError> {
    self.inner.close()
  }

  fn reconnect(&self) -> Result<(), TransportError> {
    self.inner.reconnect()
  }
}

/// Client transport over a [`MemoryListener`], with a refuse-once switch for
/// exercising the connect/reconnect policy.
pub struct TestClientTransport {
  listener: Arc<MemoryListener>,
  conn: Mutex<Option<Arc<MemoryTransport>>>,
  refuse_next: AtomicBool,
}

impl TestClientTransport {
  pub fn new(listener: Arc<MemoryListener>) -> Arc<TestClientTransport> {
    Arc::new(TestClientTransport {
      listener,
      conn: Mutex::new(None),
      refuse_next: AtomicBool::new(false),
    })
  }

  pub fn refuse_next_connect(&self) {
    self.refuse_next.store(true, Ordering::Release);
  }

  fn current(&self) -> Result<Arc<MemoryTransport>, TransportError> {
    self.conn.lock().clone().ok_or_else(|| {
      TransportError::Io(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    })
  }
}

impl FrameTransport for TestClientTransport {
  fn send(&self, head: &HeadMap, body: &[u8]) -> Result<(), TransportError> {
    self.current()?.send(head, body)
  }

  fn recv(&self) -> Result<(HeadMap, Vec<u8>), TransportError> {
    self.current()?.recv()
  }

  fn close(&self) -> Result<(), TransportError> {
    self.current()?.close()
  }

  fn reconnect(&self) -> Result<(), TransportError> {
    for _ in 0..50 {
      if let Ok(conn) = self.listener.connect() {
        *self.conn.lock() = Some(conn);
        return Ok(());
      }
      thread::sleep(Duration::from_millis(10));
    }
    Err(TransportError::ConnectionRefused)
  }
}

impl ClientTransport for TestClientTransport {
  fn connect(&self, _host: &str, _port: u16) -> Result<(), TransportError> {
    if self.refuse_next.swap(false, Ordering::AcqRel) {
      return Err(TransportError::ConnectionRefused);
    }
    *self.conn.lock() = Some(self.listener.connect()?);
    Ok(())
  }
}

/// Build a response head the way a remote implementation would put it on the
/// wire, for driving a peer through a raw transport end.
pub fn raw_response_head(id: &str, continued: Option<bool>) -> HeadMap {
  let mut head = HeadMap::new();
  head.insert("Type".into(), json!("response"));
  head.insert("Code".into(), json!("OK"));
  head.insert("ID".into(), json!(id));
  head.insert("Version".into(), json!("0"));
  head.insert("Body_Type".into(), json!("text/json"));
  if let Some(flag) = continued {
    head.insert("Continued".into(), json!(flag));
  }
  head
}

/// Echoes the decoded JSON message back.
pub struct EchoHandler;

impl Handler for EchoHandler {
  fn handle(&mut self, _ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    Ok(ResponsePayload::Value(msg))
  }
}

/// Echoes raw bytes, switching the response codec to `bytes/raw` first.
pub struct RawEchoHandler;

impl Handler for RawEchoHandler {
  fn handle(&mut self, ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    let tag = ctx.head.body_type.clone().unwrap_or_else(|| "bytes/raw".to_string());
    ctx.set_header_body_type(&tag);
    Ok(ResponsePayload::Value(msg))
  }
}

/// Records every message it sees; the response is a fixed marker.
pub struct RecordingHandler {
  pub record: Arc<Mutex<Vec<Payload>>>,
}

impl Handler for RecordingHandler {
  fn handle(&mut self, _ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    self.record.lock().push(msg);
    Ok(ResponsePayload::json(json!("recorded")))
  }
}

/// Sleeps before answering; for timeout tests.
pub struct SleepyHandler {
  pub delay: Duration,
}

impl Handler for SleepyHandler {
  fn handle(&mut self, _ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    thread::sleep(self.delay);
    Ok(ResponsePayload::Value(msg))
  }
}

/// Streams a fixed list of `(value, is_continue)` frames.
pub struct StreamHandler {
  pub frames: Vec<(Value, bool)>,
}

impl Handler for StreamHandler {
  fn handle(&mut self, _ctx: &mut RequestCtx, _msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    let frames = self.frames.clone();
    Ok(ResponsePayload::stream(
      frames.into_iter().map(|(value, cont)| (Payload::Json(value), cont)),
    ))
  }
}

/// Applies a fixed list of cookie updates and answers `null`.
pub struct CookieSetHandler {
  pub entries: Vec<(String, String)>,
}

impl Handler for CookieSetHandler {
  fn handle(&mut self, ctx: &mut RequestCtx, _msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    for (key, value) in &self.entries {
      ctx.set_cookie(key, value);
    }
    Ok(ResponsePayload::null())
  }
}

/// Answers with the request's cookie value for a key, or `null`.
pub struct CookieReadHandler {
  pub key: String,
}

impl Handler for CookieReadHandler {
  fn handle(&mut self, ctx: &mut RequestCtx, _msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    let value = ctx.get_cookie(&self.key).map(str::to_string);
    Ok(ResponsePayload::json(json!(value)))
  }
}

/// Forwards the message to another path on the same connection and answers
/// with whatever comes back; exercises the duplex direction.
pub struct RelayHandler {
  pub target: String,
}

impl Handler for RelayHandler {
  fn handle(&mut self, ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    let reply = ctx.peer.request(&self.target, msg, Default::default())?;
    Ok(ResponsePayload::Value(reply.msg))
  }
}
