//! In-process loopback transport over std channels. Carries frames between
//! two endpoints in the same process; used by the test-suite and usable as a
//! same-process transport. Close is signalled with an in-band sentinel so a
//! blocked `recv` on either end wakes up.

use super::{AcceptCallback, FrameTransport, ServerTransport};
use crate::core::frame::HeadMap;
use crate::error::TransportError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

enum Event {
  Frame(HeadMap, Vec<u8>),
  Closed,
}

pub struct MemoryTransport {
  peer_tx: Mutex<Sender<Event>>,
  self_tx: Mutex<Sender<Event>>,
  rx: Mutex<Receiver<Event>>,
  closed: AtomicBool,
}

/// Two connected loopback endpoints.
pub fn memory_pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
  let (a_tx, a_rx) = channel();
  let (b_tx, b_rx) = channel();
  let a = MemoryTransport {
    peer_tx: Mutex::new(b_tx.clone()),
    self_tx: Mutex::new(a_tx.clone()),
    rx: Mutex::new(a_rx),
    closed: AtomicBool::new(false),
  };
  let b = MemoryTransport {
    peer_tx: Mutex::new(a_tx),
    self_tx: Mutex::new(b_tx),
    rx: Mutex::new(b_rx),
    closed: AtomicBool::new(false),
  };
  (Arc::new(a), Arc::new(b))
}

impl FrameTransport for MemoryTransport {
  fn send(&self, head: &HeadMap, body: &[u8]) -> Result<(), TransportError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(TransportError::PeerClosed);
    }
    self
      .peer_tx
      .lock()
      .send(Event::Frame(head.clone(), body.to_vec()))
      .map_err(|_| TransportError::PeerClosed)
  }

  fn recv(&self) -> Result<(HeadMap, Vec<u8>), TransportError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(TransportError::PeerClosed);
    }
    let rx = self.rx.lock();
    match rx.recv() {
      Ok(Event::Frame(head, body)) => Ok((head, body)),
      Ok(Event::Closed) | Err(_) => {
        self.closed.store(true, Ordering::Release);
        Err(TransportError::PeerClosed)
      },
    }
  }

  fn close(&self) -> Result<(), TransportError> {
    self.closed.store(true, Ordering::Release);
    let _ = self.self_tx.lock().send(Event::Closed);
    let _ = self.peer_tx.lock().send(Event::Closed);
    Ok(())
  }

  fn reconnect(&self) -> Result<(), TransportError> {
    Err(TransportError::ConnectionRefused)
  }
}

/// Accept side of the loopback transport: `connect` fabricates a pair and
/// queues the far end for the accept loop.
pub struct MemoryListener {
  accept_tx: Mutex<Sender<Option<Arc<MemoryTransport>>>>,
  accept_rx: Mutex<Receiver<Option<Arc<MemoryTransport>>>>,
  closed: AtomicBool,
}

impl Default for MemoryListener {
  fn default() -> Self {
    let (accept_tx, accept_rx) = channel();
    MemoryListener {
      accept_tx: Mutex::new(accept_tx),
      accept_rx: Mutex::new(accept_rx),
      closed: AtomicBool::new(false),
    }
  }
}

impl MemoryListener {
  pub fn new() -> MemoryListener {
    MemoryListener::default()
  }

  /// Establish a new connection, returning the caller's endpoint.
  pub fn connect(&self) -> Result<Arc<MemoryTransport>, TransportError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(TransportError::ConnectionRefused);
    }
    let (local, remote) = memory_pair();
    self
      .accept_tx
      .lock()
      .send(Some(remote))
      .map_err(|_| TransportError::ConnectionRefused)?;
    Ok(local)
  }
}

impl ServerTransport for MemoryListener {
  fn bind(&self, _host: &str, _port: u16) -> Result<(), TransportError> {
    Ok(())
  }

  fn accept_loop(&self, mut on_accept: AcceptCallback) -> Result<(), TransportError> {
    loop {
      let accepted = { self.accept_rx.lock().recv() };
      match accepted {
        Ok(Some(sub)) => on_accept(sub),
        Ok(None) | Err(_) => return Ok(()),
      }
    }
  }

  fn close(&self) -> Result<(), TransportError> {
    self.closed.store(true, Ordering::Release);
    let _ = self.accept_tx.lock().send(None);
    Ok(())
  }
}
