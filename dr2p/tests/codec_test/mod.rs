use crate::util::{connected_pair, setup_log, RawEchoHandler, RecordingHandler};
use dr2p::core::codec::Payload;
use dr2p::core::frame::HeadMap;
use dr2p::core::handler::Handler;
use dr2p::core::peer::{Peer, RequestOptions};
use dr2p::transport::memory::memory_pair;
use dr2p::transport::FrameTransport;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// A frame without `Body_Type` decodes as raw bytes, and the response head
/// echoes the request id string verbatim.
#[test]
fn missing_body_type_decodes_as_raw() {
  setup_log();
  let (local, remote) = memory_pair();
  let peer = Peer::new(local);
  peer.start_mainloop(false);

  let record = Arc::new(Mutex::new(Vec::new()));
  let sink = record.clone();
  peer.set_handler("/ingest", move || {
    Box::new(RecordingHandler {
      record: sink.clone(),
    }) as Box<dyn Handler>
  });

  let mut head = HeadMap::new();
  head.insert("Type".into(), json!("request"));
  head.insert("Path".into(), json!("/ingest"));
  head.insert("ID".into(), json!("007"));
  head.insert("Version".into(), json!("0"));
  remote.send(&head, b"blob").unwrap();

  let (res_head, res_body) = remote.recv().unwrap();
  assert_eq!(res_head.get("Type"), Some(&json!("response")));
  assert_eq!(res_head.get("Code"), Some(&json!("OK")));
  assert_eq!(res_head.get("ID"), Some(&json!("007")));
  assert_eq!(res_head.get("Body_Type"), Some(&json!("text/json")));
  assert_eq!(res_body, serde_json::to_vec(&json!("recorded")).unwrap());
  assert_eq!(record.lock().as_slice(), &[Payload::Raw(b"blob".to_vec())]);
  peer.close().unwrap();
}

/// An unregistered tag passes bodies through untouched on both peers.
#[test]
fn unknown_body_type_passes_through() {
  setup_log();
  let (client, server) = connected_pair();
  server.set_handler("/opaque", || Box::new(RawEchoHandler) as Box<dyn Handler>);

  let reply = client
    .request(
      "/opaque",
      Payload::Raw(b"future bytes".to_vec()),
      RequestOptions::default().body_type("application/x-future"),
    )
    .unwrap();
  assert_eq!(reply.msg, Payload::Raw(b"future bytes".to_vec()));
  assert_eq!(reply.head.body_type.as_deref(), Some("application/x-future"));
  client.close().unwrap();
}
