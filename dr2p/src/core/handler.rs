use crate::core::codec::Payload;
use crate::core::frame::Head;
use crate::core::peer::Peer;
use crate::error::Dr2pError;
use serde_json::Value as JsonValue;

/// What a handler produces: one value, or a stream of `(value, is_continue)`
/// frames where the first `false` terminates the stream on the wire.
pub enum ResponsePayload {
  Value(Payload),
  Stream(Box<dyn Iterator<Item = (Payload, bool)> + Send>),
}

impl ResponsePayload {
  pub fn json(value: JsonValue) -> ResponsePayload {
    ResponsePayload::Value(Payload::Json(value))
  }

  pub fn raw(bytes: Vec<u8>) -> ResponsePayload {
    ResponsePayload::Value(Payload::Raw(bytes))
  }

  pub fn null() -> ResponsePayload {
    ResponsePayload::Value(Payload::null())
  }

  pub fn stream<I>(iter: I) -> ResponsePayload
  where
    I: Iterator<Item = (Payload, bool)> + Send + 'static,
  {
    ResponsePayload::Stream(Box::new(iter))
  }
}

/// Per-inbound-request context handed to [`Handler::handle`]. Read access to
/// the incoming frame, mutators for the outgoing response head.
pub struct RequestCtx {
  pub peer: Peer,
  pub head: Head,
  pub body: Vec<u8>,
  pub res_head: Head,
}

impl RequestCtx {
  /// Set an arbitrary field on the response head.
  pub fn set_header(&mut self, key: &str, value: JsonValue) {
    self.res_head.set_field(key, value);
  }

  /// Choose the codec for the response body.
  pub fn set_header_body_type(&mut self, tag: &str) {
    self.res_head.body_type = Some(tag.to_string());
  }

  /// Value from the incoming request's cookie jar snapshot, if any.
  pub fn get_cookie(&self, key: &str) -> Option<&str> {
    self
      .head
      .cookie
      .as_ref()
      .and_then(|jar| jar.get(key))
      .map(String::as_str)
  }

  /// Queue a cookie update for the requester's jar.
  pub fn set_cookie(&mut self, key: &str, value: &str) {
    self.res_head.push_set_cookie(key, value);
  }
}

/// User code serving one path. A fresh instance is constructed per inbound
/// request, so implementations may keep per-request state in `self`.
pub trait Handler: Send {
  fn handle(&mut self, ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError>;
}

/// Zero-arg constructor yielding a fresh handler per inbound request.
pub trait HandlerFactory: Send + Sync {
  fn create(&self) -> Box<dyn Handler>;
}

impl<F> HandlerFactory for F
where
  F: Fn() -> Box<dyn Handler> + Send + Sync,
{
  fn create(&self) -> Box<dyn Handler> {
    (self)()
  }
}

/// Adapter turning a plain closure into a [`Handler`], for routes that do
/// not need per-request state.
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
  F: FnMut(&mut RequestCtx, Payload) -> Result<ResponsePayload, Dr2pError> + Send,
{
  fn handle(&mut self, ctx: &mut RequestCtx, msg: Payload) -> Result<ResponsePayload, Dr2pError> {
    (self.0)(ctx, msg)
  }
}
