use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EventError;

/// The canonical JSON shape of every event on the wire:
/// `{type, id, data, ts, session_id?, source?}`. On egress `data` is also
/// copied under `payload` for older clients.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event_type: String,
    pub id: Option<String>,
    pub data: Map<String, Value>,
    pub ts: i64,
    pub session_id: Option<String>,
    pub source: Option<String>,
}

impl Envelope {
    /// Parse a raw JSON text frame into an envelope.
    ///
    /// Accepts only top-level JSON objects. Prefers `data`; falls back to
    /// `payload` when `data` is absent. `ts` defaults to the current wall
    /// clock when missing *or* not a JSON integer (a float or string `ts` is
    /// replaced, never coerced). `session_id` is read from the top level
    /// (`session_id`/`sessionId`) in preference to the same keys inside
    /// `data`. `id` is left `None` when absent — only `make` auto-generates
    /// one.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| EventError::InvalidJson)?;
        let Value::Object(mut root) = value else {
            return Err(EventError::NotAnObject);
        };

        let event_type = match root.remove("type") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err(EventError::MissingType),
        };

        let data = match root.remove("data").or_else(|| root.remove("payload")) {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(EventError::DataNotAnObject),
        };

        let ts = match root.get("ts") {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {
                n.as_i64().unwrap_or_else(now_secs)
            }
            _ => now_secs(),
        };

        let id = root.remove("id").map(|v| coerce_string(&v));

        let session_id = top_level_str(&root, "session_id")
            .or_else(|| top_level_str(&root, "sessionId"))
            .or_else(|| top_level_str_in(&data, "session_id"))
            .or_else(|| top_level_str_in(&data, "sessionId"));

        let source = root
            .remove("source")
            .map(|v| coerce_string(&v))
            .filter(|s| !s.is_empty());

        Ok(Envelope {
            event_type,
            id,
            data,
            ts,
            session_id,
            source,
        })
    }

    /// Read a top-level-or-nested session id the way the dispatcher's
    /// `_resolve_session_id` does: `data.user_id` outranks the envelope's own
    /// precomputed `session_id` (itself already top-level-or-nested), which
    /// in turn outranks the caller-supplied default.
    pub fn resolve_session_id(&self, fallback: &str) -> String {
        if let Some(user_id) = self.data.get("user_id").and_then(Value::as_str) {
            if !user_id.is_empty() {
                return user_id.to_string();
            }
        }
        if let Some(ref sid) = self.session_id {
            if !sid.is_empty() {
                return sid.clone();
            }
        }
        fallback.to_string()
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Build an outbound event object. Always stamps `id` and `ts`; includes
/// `session_id` (legacy) and camelCase `sessionId` only when non-empty;
/// `source` only when non-empty; always mirrors `data` under `payload`.
pub fn make_event(event_type: &str, data: Value, opts: MakeOpts) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String(event_type.to_string()));
    obj.insert(
        "id".to_string(),
        Value::String(opts.id.unwrap_or_else(|| Uuid::new_v4().simple().to_string())),
    );
    obj.insert("ts".to_string(), Value::Number(now_secs().into()));

    if let Some(ref sid) = opts.session_id {
        if !sid.is_empty() {
            obj.insert("sessionId".to_string(), Value::String(sid.clone()));
        }
    }
    if let Some(ref src) = opts.source {
        if !src.is_empty() {
            obj.insert("source".to_string(), Value::String(src.clone()));
        }
    }
    obj.insert("data".to_string(), data.clone());
    obj.insert("payload".to_string(), data);
    Value::Object(obj)
}

#[derive(Debug, Clone, Default)]
pub struct MakeOpts {
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub source: Option<String>,
}

impl MakeOpts {
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn coerce_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn top_level_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn top_level_str_in(map: &Map<String, Value>, key: &str) -> Option<String> {
    top_level_str(map, key)
}

/// Normalizes legacy event-type aliases to their canonical `input.*` names.
/// Lives as a single lookup table, not scattered conditionals.
pub fn normalize_event_type(event_type: &str) -> &str {
    match event_type {
        "user.text" => "input.text",
        "user.audio.chunk" => "input.voice.chunk",
        "user.interrupt" => "input.interrupt",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_invalid_json() {
        assert!(matches!(Envelope::parse("{"), Err(EventError::InvalidJson)));
    }

    #[test]
    fn parse_rejects_non_object_root() {
        assert!(matches!(
            Envelope::parse("[1,2,3]"),
            Err(EventError::NotAnObject)
        ));
    }

    #[test]
    fn parse_rejects_missing_type() {
        assert!(matches!(
            Envelope::parse(r#"{"data":{}}"#),
            Err(EventError::MissingType)
        ));
    }

    #[test]
    fn parse_accepts_payload_fallback() {
        let env = Envelope::parse(r#"{"type":"input.text","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(env.data_str("text"), Some("hi"));
    }

    #[test]
    fn parse_prefers_top_level_session_id() {
        let env = Envelope::parse(
            r#"{"type":"input.text","sessionId":"top","data":{"session_id":"nested"}}"#,
        )
        .unwrap();
        assert_eq!(env.session_id.as_deref(), Some("top"));
    }

    #[test]
    fn parse_non_integer_ts_is_replaced() {
        let env = Envelope::parse(r#"{"type":"x","ts":"not-a-number"}"#).unwrap();
        assert!(env.ts > 0);
    }

    #[test]
    fn parse_leaves_id_none_when_absent() {
        let env = Envelope::parse(r#"{"type":"x"}"#).unwrap();
        assert!(env.id.is_none());
    }

    #[test]
    fn make_event_always_stamps_id_and_ts() {
        let out = make_event("x", serde_json::json!({"a":1}), MakeOpts::default());
        let obj = out.as_object().unwrap();
        assert!(obj.get("id").unwrap().as_str().unwrap().len() > 0);
        assert!(obj.get("ts").unwrap().as_i64().unwrap() > 0);
        assert_eq!(obj.get("payload"), obj.get("data"));
    }

    #[test]
    fn make_event_omits_empty_session_and_source() {
        let out = make_event("x", serde_json::json!({}), MakeOpts::default());
        let obj = out.as_object().unwrap();
        assert!(!obj.contains_key("sessionId"));
        assert!(!obj.contains_key("source"));
    }

    #[test]
    fn make_event_includes_session_as_camel_case_only() {
        let out = make_event("x", serde_json::json!({}), MakeOpts::with_session("s1"));
        let obj = out.as_object().unwrap();
        assert_eq!(obj.get("sessionId").unwrap(), "s1");
        assert!(!obj.contains_key("session_id"));
    }

    #[test]
    fn resolve_session_id_falls_back_to_user_id_then_default() {
        let env = Envelope::parse(r#"{"type":"input.text","data":{"user_id":"u1"}}"#).unwrap();
        assert_eq!(env.resolve_session_id("default"), "u1");

        let env2 = Envelope::parse(r#"{"type":"input.text","data":{}}"#).unwrap();
        assert_eq!(env2.resolve_session_id("default"), "default");
    }

    #[test]
    fn resolve_session_id_user_id_outranks_own_session_id() {
        // data.user_id must win even when the envelope already carries a
        // resolved session_id (top-level or nested) — matching the Python
        // dispatcher's `payload.get("user_id")` check happening before its
        // `fallback` parameter (== this envelope's own session_id).
        let env = Envelope::parse(
            r#"{"type":"input.text","sessionId":"top","data":{"user_id":"u1"}}"#,
        )
        .unwrap();
        assert_eq!(env.session_id.as_deref(), Some("top"));
        assert_eq!(env.resolve_session_id("default"), "u1");
    }

    #[test]
    fn resolve_session_id_uses_own_session_id_when_no_user_id() {
        let env = Envelope::parse(r#"{"type":"input.text","sessionId":"top","data":{}}"#).unwrap();
        assert_eq!(env.resolve_session_id("default"), "top");
    }

    #[test]
    fn alias_normalization() {
        assert_eq!(normalize_event_type("user.text"), "input.text");
        assert_eq!(normalize_event_type("user.audio.chunk"), "input.voice.chunk");
        assert_eq!(normalize_event_type("user.interrupt"), "input.interrupt");
        assert_eq!(normalize_event_type("session.start"), "session.start");
    }
}
