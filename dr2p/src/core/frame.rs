use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Protocol version stamped on every frame.
pub const PROTOCOL_VERSION: &str = "0";
/// The only outcome tag the protocol currently defines.
pub const CODE_OK: &str = "OK";

/// The transport's view of a head: a plain string-keyed attribute map.
pub type HeadMap = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
  #[serde(rename = "request")]
  Request,
  #[serde(rename = "response")]
  Response,
}

/// One `Set_Cookie` entry; merged into the requester's jar in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCookie {
  #[serde(rename = "Key")]
  pub key: String,
  #[serde(rename = "Value")]
  pub value: String,
}

/// A frame head: the well-known fields of the wire table plus an overflow
/// map. Custom headers land in `extra` and unknown keys received from the
/// wire round-trip through it verbatim.
///
/// Field names on the wire are case-sensitive; the serde renames below are
/// the canonical capitalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Head {
  #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<FrameKind>,

  /// Correlation id, ASCII decimal. Response heads echo the request's id
  /// string verbatim.
  #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,

  /// Remote host label on requests; informational.
  #[serde(rename = "Host", default, skip_serializing_if = "Option::is_none")]
  pub host: Option<String>,

  /// Handler route key on requests.
  #[serde(rename = "Path", default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,

  /// Outcome tag on responses.
  #[serde(rename = "Code", default, skip_serializing_if = "Option::is_none")]
  pub code: Option<String>,

  #[serde(rename = "Body_Type", default, skip_serializing_if = "Option::is_none")]
  pub body_type: Option<String>,

  #[serde(rename = "No_Response", default, skip_serializing_if = "Option::is_none")]
  pub no_response: Option<bool>,

  /// Present only on stream frames; `false` marks the final frame.
  #[serde(rename = "Continued", default, skip_serializing_if = "Option::is_none")]
  pub continued: Option<bool>,

  /// Cookie jar snapshot attached to requests.
  #[serde(rename = "Cookie", default, skip_serializing_if = "Option::is_none")]
  pub cookie: Option<BTreeMap<String, String>>,

  /// Ordered cookie updates attached to responses.
  #[serde(rename = "Set_Cookie", default, skip_serializing_if = "Option::is_none")]
  pub set_cookie: Option<Vec<SetCookie>>,

  #[serde(flatten)]
  pub extra: HeadMap,
}

impl Head {
  /// Head for an outgoing request, before body/cookie/mode fields are
  /// filled in by the send path.
  pub fn request(host: Option<String>, path: &str, rid: u64) -> Head {
    Head {
      kind: Some(FrameKind::Request),
      host,
      path: Some(path.to_string()),
      id: Some(rid.to_string()),
      version: Some(PROTOCOL_VERSION.to_string()),
      ..Default::default()
    }
  }

  /// Head for a response to the request carrying `rid`. The id is echoed
  /// back as received, not reparsed.
  pub fn response(rid: &str) -> Head {
    Head {
      kind: Some(FrameKind::Response),
      code: Some(CODE_OK.to_string()),
      id: Some(rid.to_string()),
      version: Some(PROTOCOL_VERSION.to_string()),
      ..Default::default()
    }
  }

  pub fn is_request(&self) -> bool {
    self.kind == Some(FrameKind::Request)
  }

  pub fn is_response(&self) -> bool {
    self.kind == Some(FrameKind::Response)
  }

  pub fn is_no_response(&self) -> bool {
    self.no_response.unwrap_or(false)
  }

  /// Set an arbitrary head field. Well-known keys are routed into their
  /// typed slot (string and bool values; a mistyped value clears the slot),
  /// anything else goes to the overflow map.
  pub fn set_field(&mut self, key: &str, value: JsonValue) {
    match key {
      "Type" => self.kind = serde_json::from_value(value).ok(),
      "ID" => self.id = as_string(value),
      "Version" => self.version = as_string(value),
      "Host" => self.host = as_string(value),
      "Path" => self.path = as_string(value),
      "Code" => self.code = as_string(value),
      "Body_Type" => self.body_type = as_string(value),
      "No_Response" => self.no_response = value.as_bool(),
      "Continued" => self.continued = value.as_bool(),
      "Cookie" => self.cookie = serde_json::from_value(value).ok(),
      "Set_Cookie" => self.set_cookie = serde_json::from_value(value).ok(),
      _ => {
        self.extra.insert(key.to_string(), value);
      },
    }
  }

  /// Append one `Set_Cookie` entry, creating the list if absent.
  pub fn push_set_cookie(&mut self, key: &str, value: &str) {
    self.set_cookie.get_or_insert_with(Vec::new).push(SetCookie {
      key: key.to_string(),
      value: value.to_string(),
    });
  }

  /// Flatten into the attribute map handed to the transport.
  pub fn to_map(&self) -> Result<HeadMap, serde_json::Error> {
    match serde_json::to_value(self)? {
      JsonValue::Object(map) => Ok(map),
      other => Err(serde::ser::Error::custom(format!(
        "head serialized to non-object: {}",
        other
      ))),
    }
  }

  /// Parse an attribute map received from the transport.
  pub fn from_map(map: HeadMap) -> Result<Head, serde_json::Error> {
    serde_json::from_value(JsonValue::Object(map))
  }
}

fn as_string(value: JsonValue) -> Option<String> {
  match value {
    JsonValue::String(s) => Some(s),
    _ => None,
  }
}
