use std::collections::HashSet;

use axum::extract::ws::Message;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use skynet_protocol::{make_event, normalize_event_type, Envelope, MakeOpts};

use crate::app::AppState;
use crate::dispatch;

/// Per-peer connection record. `tx` forwards frames to the connection task
/// that owns the actual socket sink; everything else is mutated in place
/// through the `DashMap` entry.
pub struct PeerHandle {
    pub tx: mpsc::UnboundedSender<Message>,
    pub authenticated: bool,
    pub name: String,
    pub index: Option<i64>,
    pub possible_events: HashSet<String>,
    pub active_voice_session_id: Option<String>,
}

impl PeerHandle {
    fn new(tx: mpsc::UnboundedSender<Message>, authenticated: bool) -> Self {
        Self {
            tx,
            authenticated,
            name: String::new(),
            index: None,
            possible_events: HashSet::new(),
            active_voice_session_id: None,
        }
    }
}

/// Registers a new peer and returns its id plus the receiving half of its
/// outbound channel, which the connection task drains into the socket.
pub fn connect(state: &AppState) -> (String, mpsc::UnboundedReceiver<Message>) {
    let peer_id = uuid::Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::unbounded_channel();
    let authenticated = state.auth_token.is_none();
    state.peers.insert(peer_id.clone(), PeerHandle::new(tx, authenticated));
    if authenticated {
        send(state, &peer_id, make_event("module.authenticated", json!({"authenticated": true}), MakeOpts::default()));
    }
    (peer_id, rx)
}

pub fn disconnect(state: &AppState, peer_id: &str) {
    unregister_module(state, peer_id);
    state.peers.remove(peer_id);
}

pub async fn handle_text(state: &AppState, peer_id: &str, raw: &str) {
    let event = match Envelope::parse(raw) {
        Ok(event) => event,
        Err(err) => {
            send(state, peer_id, make_event("error", json!({"message": err.to_string()}), MakeOpts::default()));
            return;
        }
    };

    match event.event_type.as_str() {
        "module.authenticate" => return handle_authenticate(state, peer_id, &event),
        "module.announce" => return handle_announce(state, peer_id, &event),
        "ui.configure" => return handle_ui_configure(state, peer_id, &event),
        _ => {}
    }

    let Some(mut peer) = state.peers.get_mut(peer_id) else {
        return;
    };
    if !peer.authenticated {
        drop(peer);
        send(state, peer_id, make_event("error", json!({"message": "not authenticated"}), MakeOpts::default()));
        return;
    }

    let mut event = event;
    if event.source.is_none() && !peer.name.is_empty() {
        event.source = Some(peer.name.clone());
    }
    match normalize_event_type(&event.event_type) {
        "input.voice.start" => peer.active_voice_session_id = event.session_id.clone(),
        "input.voice.end" => peer.active_voice_session_id = None,
        _ => {}
    }
    drop(peer);

    let responses = dispatch::dispatch(state, &event).await;
    if !responses.is_empty() {
        broadcast_json(state, &responses, None);
    }
    broadcast_json(state, &[normalize_outgoing(&event)], Some(peer_id));
}

pub async fn handle_bytes(state: &AppState, peer_id: &str, chunk: Vec<u8>) {
    let Some(peer) = state.peers.get(peer_id) else {
        return;
    };
    if !peer.authenticated {
        drop(peer);
        send(state, peer_id, make_event("error", json!({"message": "not authenticated"}), MakeOpts::default()));
        return;
    }
    let Some(session_id) = peer.active_voice_session_id.clone() else {
        drop(peer);
        send(
            state,
            peer_id,
            make_event("error", json!({"message": "input.voice.start required before audio chunks"}), MakeOpts::default()),
        );
        return;
    }
    let source = if peer.name.is_empty() { None } else { Some(peer.name.clone()) };
    drop(peer);

    let mut data = serde_json::Map::new();
    data.insert("audio".to_string(), Value::Array(chunk.into_iter().map(|b| Value::Number(b.into())).collect()));
    let event = Envelope {
        event_type: "input.voice.chunk".to_string(),
        id: None,
        data,
        ts: chrono::Utc::now().timestamp(),
        session_id: Some(session_id),
        source,
    };

    let responses = dispatch::dispatch(state, &event).await;
    if !responses.is_empty() {
        broadcast_json(state, &responses, None);
    }
}

fn handle_authenticate(state: &AppState, peer_id: &str, event: &Envelope) {
    let token = event.data_str("token");
    if let Some(expected) = &state.auth_token {
        if token != Some(expected.as_str()) {
            send(state, peer_id, make_event("error", json!({"message": "invalid token"}), MakeOpts::default()));
            return;
        }
    }
    if let Some(mut peer) = state.peers.get_mut(peer_id) {
        peer.authenticated = true;
    }
    send(state, peer_id, make_event("module.authenticated", json!({"authenticated": true}), MakeOpts::default()));
}

fn handle_announce(state: &AppState, peer_id: &str, event: &Envelope) {
    let authenticated = state.peers.get(peer_id).map(|p| p.authenticated).unwrap_or(false);
    if state.auth_token.is_some() && !authenticated {
        send(
            state,
            peer_id,
            make_event("error", json!({"message": "must authenticate before announcing"}), MakeOpts::default()),
        );
        return;
    }

    let name = event.data.get("name").and_then(Value::as_str);
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        send(
            state,
            peer_id,
            make_event("error", json!({"message": "module.announce requires non-empty name"}), MakeOpts::default()),
        );
        return;
    };

    let index = match event.data.get("index") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
        Some(_) => {
            send(
                state,
                peer_id,
                make_event("error", json!({"message": "module.announce index must be an integer"}), MakeOpts::default()),
            );
            return;
        }
    };

    let possible_events: HashSet<String> = event
        .data
        .get("possibleEvents")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    unregister_module(state, peer_id);
    if let Some(mut peer) = state.peers.get_mut(peer_id) {
        peer.name = name.to_string();
        peer.index = index;
        peer.possible_events = possible_events;
    }
    register_module(state, peer_id);
}

fn handle_ui_configure(state: &AppState, peer_id: &str, event: &Envelope) {
    let module_name = event.data.get("moduleName").and_then(Value::as_str);
    let Some(module_name) = module_name.filter(|n| !n.is_empty()) else {
        send(state, peer_id, make_event("error", json!({"message": "ui.configure requires moduleName"}), MakeOpts::default()));
        return;
    };
    let module_index = match event.data.get("moduleIndex") {
        Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
        _ => None,
    };
    let config = event.data.get("config").cloned().unwrap_or(Value::Null);

    let target_peer_id = state
        .modules
        .get(module_name)
        .and_then(|group| group.get(&module_index).map(|entry| entry.clone()));

    let Some(target_peer_id) = target_peer_id else {
        send(state, peer_id, make_event("error", json!({"message": "module not found"}), MakeOpts::default()));
        return;
    };

    let opts = MakeOpts {
        source: event.source.clone(),
        ..Default::default()
    };
    send(state, &target_peer_id, make_event("module.configure", json!({"config": config}), opts));
}

fn register_module(state: &AppState, peer_id: &str) {
    let Some(peer) = state.peers.get(peer_id) else {
        return;
    };
    if peer.name.is_empty() {
        return;
    }
    let group = state.modules.entry(peer.name.clone()).or_default();
    group.insert(peer.index, peer_id.to_string());
}

fn unregister_module(state: &AppState, peer_id: &str) {
    let Some(peer) = state.peers.get(peer_id) else {
        return;
    };
    if peer.name.is_empty() {
        return;
    }
    if let Some(group) = state.modules.get(&peer.name) {
        group.remove(&peer.index);
        let empty = group.is_empty();
        drop(group);
        if empty {
            state.modules.remove(&peer.name);
        }
    }
}

fn send(state: &AppState, peer_id: &str, event: Value) {
    state.send_to_peer(peer_id, event);
}

fn broadcast_json(state: &AppState, events: &[Value], exclude_peer: Option<&str>) {
    for entry in state.peers.iter() {
        let (id, peer) = entry.pair();
        if exclude_peer == Some(id.as_str()) {
            continue;
        }
        if !peer.authenticated {
            continue;
        }
        for event in events {
            let text = event.to_string();
            if peer.tx.send(Message::Text(text.into())).is_err() {
                warn!(peer_id = %id, "failed to forward event, peer likely gone");
            }
        }
    }
}

fn normalize_outgoing(event: &Envelope) -> Value {
    let opts = MakeOpts {
        session_id: event.session_id.clone(),
        source: event.source.clone(),
        ..Default::default()
    };
    make_event(&event.event_type, Value::Object(event.data.clone()), opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppState;

    fn test_state() -> AppState {
        AppState::new(skynet_core::config::SkynetConfig::default())
    }

    #[test]
    fn connect_without_token_is_pre_authenticated() {
        let state = test_state();
        let (peer_id, _rx) = connect(&state);
        assert!(state.peers.get(&peer_id).unwrap().authenticated);
    }

    #[test]
    fn register_then_unregister_module_round_trips() {
        let state = test_state();
        let (peer_id, _rx) = connect(&state);
        {
            let mut peer = state.peers.get_mut(&peer_id).unwrap();
            peer.name = "vision".to_string();
            peer.index = Some(2);
        }
        register_module(&state, &peer_id);
        assert_eq!(
            state.modules.get("vision").unwrap().get(&Some(2)).map(|e| e.clone()),
            Some(peer_id.clone())
        );

        unregister_module(&state, &peer_id);
        assert!(state.modules.get("vision").is_none());
    }

    #[test]
    fn disconnect_removes_peer_and_module_entry() {
        let state = test_state();
        let (peer_id, _rx) = connect(&state);
        {
            let mut peer = state.peers.get_mut(&peer_id).unwrap();
            peer.name = "vision".to_string();
            peer.index = None;
        }
        register_module(&state, &peer_id);

        disconnect(&state, &peer_id);

        assert!(state.peers.get(&peer_id).is_none());
        assert!(state.modules.get("vision").is_none());
    }

    #[test]
    fn unregister_module_leaves_sibling_indices_intact() {
        let state = test_state();
        let (peer_a, _rx_a) = connect(&state);
        let (peer_b, _rx_b) = connect(&state);
        {
            let mut a = state.peers.get_mut(&peer_a).unwrap();
            a.name = "vision".to_string();
            a.index = Some(0);
        }
        {
            let mut b = state.peers.get_mut(&peer_b).unwrap();
            b.name = "vision".to_string();
            b.index = Some(1);
        }
        register_module(&state, &peer_a);
        register_module(&state, &peer_b);

        unregister_module(&state, &peer_a);

        let group = state.modules.get("vision").unwrap();
        assert!(group.get(&Some(0)).is_none());
        assert_eq!(group.get(&Some(1)).map(|e| e.clone()), Some(peer_b.clone()));
    }
}
