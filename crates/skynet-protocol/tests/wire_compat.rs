// Verify the event envelope wire format matches what clients expect.

use skynet_protocol::{make_event, Envelope, MakeOpts};

#[test]
fn envelope_round_trip_preserves_type_data_session_source() {
    let raw = r#"{"type":"input.text","id":"abc-123","data":{"text":"hello"},"ts":1700000000,"sessionId":"s1","source":"ui"}"#;
    let env = Envelope::parse(raw).unwrap();
    assert_eq!(env.event_type, "input.text");
    assert_eq!(env.id.as_deref(), Some("abc-123"));
    assert_eq!(env.data_str("text"), Some("hello"));
    assert_eq!(env.session_id.as_deref(), Some("s1"));
    assert_eq!(env.source.as_deref(), Some("ui"));
    assert_eq!(env.ts, 1700000000);
}

#[test]
fn envelope_round_trip_autofills_id_and_ts_when_absent() {
    let env = Envelope::parse(r#"{"type":"input.text","data":{}}"#).unwrap();
    assert!(env.id.is_none());

    let out = make_event(&env.event_type, serde_json::Value::Object(env.data.clone()), MakeOpts::default());
    let obj = out.as_object().unwrap();
    assert!(!obj.get("id").unwrap().as_str().unwrap().is_empty());
    assert!(obj.get("ts").unwrap().as_i64().unwrap() > 0);
}

#[test]
fn egress_always_mirrors_data_under_payload() {
    let out = make_event("output.chat.delta", serde_json::json!({"text": "Hi"}), MakeOpts::default());
    let obj = out.as_object().unwrap();
    assert_eq!(obj["data"], obj["payload"]);
    assert_eq!(obj["data"]["text"], "Hi");
}

#[test]
fn egress_session_id_is_camel_case_only() {
    let out = make_event("session.started", serde_json::json!({}), MakeOpts::with_session("s1"));
    let obj = out.as_object().unwrap();
    assert_eq!(obj["sessionId"], "s1");
    assert!(obj.get("session_id").is_none());
}
