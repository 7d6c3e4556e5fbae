use crate::error::CodecError;
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Tag for UTF-8 JSON bodies; the default on encode.
pub const TEXT_JSON: &str = "text/json";
/// Tag for opaque byte bodies; the default on decode.
pub const BYTES_RAW: &str = "bytes/raw";

/// A decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  Json(JsonValue),
  Raw(Vec<u8>),
}

impl Payload {
  pub fn null() -> Payload {
    Payload::Json(JsonValue::Null)
  }

  pub fn as_json(&self) -> Option<&JsonValue> {
    match self {
      Payload::Json(value) => Some(value),
      Payload::Raw(_) => None,
    }
  }

  pub fn into_json(self) -> Option<JsonValue> {
    match self {
      Payload::Json(value) => Some(value),
      Payload::Raw(_) => None,
    }
  }

  pub fn as_raw(&self) -> Option<&[u8]> {
    match self {
      Payload::Json(_) => None,
      Payload::Raw(bytes) => Some(bytes),
    }
  }
}

impl From<JsonValue> for Payload {
  fn from(value: JsonValue) -> Payload {
    Payload::Json(value)
  }
}

impl From<Vec<u8>> for Payload {
  fn from(bytes: Vec<u8>) -> Payload {
    Payload::Raw(bytes)
  }
}

/// Encode/decode functions behind one body-type tag.
pub trait BodyCodec: Send + Sync {
  fn encode(&self, msg: &Payload) -> Result<Vec<u8>, CodecError>;
  fn decode(&self, body: &[u8]) -> Result<Payload, CodecError>;
}

struct JsonCodec;

impl BodyCodec for JsonCodec {
  fn encode(&self, msg: &Payload) -> Result<Vec<u8>, CodecError> {
    match msg {
      Payload::Json(value) => Ok(serde_json::to_vec(value)?),
      Payload::Raw(_) => Err(CodecError::PayloadMismatch {
        tag: TEXT_JSON.to_string(),
      }),
    }
  }

  fn decode(&self, body: &[u8]) -> Result<Payload, CodecError> {
    Ok(Payload::Json(serde_json::from_slice(body)?))
  }
}

struct RawCodec;

impl BodyCodec for RawCodec {
  fn encode(&self, msg: &Payload) -> Result<Vec<u8>, CodecError> {
    match msg {
      Payload::Raw(bytes) => Ok(bytes.clone()),
      Payload::Json(_) => Err(CodecError::PayloadMismatch {
        tag: BYTES_RAW.to_string(),
      }),
    }
  }

  fn decode(&self, body: &[u8]) -> Result<Payload, CodecError> {
    Ok(Payload::Raw(body.to_vec()))
  }
}

/// Maps body-type tags to codecs. An unregistered tag falls back to the
/// identity codec in both directions, which keeps frames from peers with
/// newer codec tables readable as raw bytes.
pub struct CodecRegistry {
  codecs: HashMap<String, Arc<dyn BodyCodec>>,
  fallback: Arc<dyn BodyCodec>,
}

impl Default for CodecRegistry {
  fn default() -> Self {
    let mut registry = CodecRegistry {
      codecs: HashMap::new(),
      fallback: Arc::new(RawCodec),
    };
    registry.register(TEXT_JSON, Arc::new(JsonCodec));
    registry.register(BYTES_RAW, Arc::new(RawCodec));
    registry
  }
}

impl CodecRegistry {
  pub fn register(&mut self, tag: &str, codec: Arc<dyn BodyCodec>) {
    self.codecs.insert(tag.to_string(), codec);
  }

  fn lookup(&self, tag: &str) -> &dyn BodyCodec {
    match self.codecs.get(tag) {
      Some(codec) => codec.as_ref(),
      None => self.fallback.as_ref(),
    }
  }

  /// Encode `msg` under `tag` (default `text/json`), returning the bytes
  /// and the resolved tag to be stamped on the head.
  pub fn encode(&self, msg: &Payload, tag: Option<&str>) -> Result<(Vec<u8>, String), CodecError> {
    let tag = tag.unwrap_or(TEXT_JSON);
    let body = self.lookup(tag).encode(msg)?;
    Ok((body, tag.to_string()))
  }

  /// Decode `body` under `tag` (default `bytes/raw`).
  pub fn decode(&self, body: &[u8], tag: Option<&str>) -> Result<Payload, CodecError> {
    let tag = tag.unwrap_or(BYTES_RAW);
    self.lookup(tag).decode(body)
  }
}

static DEFAULT_REGISTRY: Lazy<Arc<CodecRegistry>> = Lazy::new(|| Arc::new(CodecRegistry::default()));

/// The shared registry holding the two built-in codecs.
pub fn default_registry() -> Arc<CodecRegistry> {
  DEFAULT_REGISTRY.clone()
}
