use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::SessionState;

/// In-memory registry of session state, one entry per `session_id`. Sessions
/// are never persisted or evicted — a single process owns its peers and its
/// sessions for the lifetime of the process (see non-goals: no cross-node
/// coordination, no durability guarantee across restarts).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session on first reference, applying sticky updates:
    /// a truthy `user_id`/`profile_id` overwrites the stored value, a falsy
    /// one leaves an existing value untouched.
    pub fn get_or_create(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        profile_id: Option<&str>,
    ) -> SessionState {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(session_id.to_string()).or_default();
        if let Some(uid) = user_id.filter(|s| !s.is_empty()) {
            entry.user_id = Some(uid.to_string());
        }
        if let Some(pid) = profile_id.filter(|s| !s.is_empty()) {
            entry.profile_id = Some(pid.to_string());
        }
        entry.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn get_conversation_id(&self, session_id: &str, provider_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .and_then(|s| s.conversation_ids.get(provider_id).cloned())
    }

    /// No-op when `conversation_id` is falsy; lazily creates the session
    /// entry if missing; overwrites by key otherwise.
    pub fn set_conversation_id(&self, session_id: &str, provider_id: &str, conversation_id: &str) {
        if conversation_id.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(session_id.to_string()).or_default();
        entry
            .conversation_ids
            .insert(provider_id.to_string(), conversation_id.to_string());
    }

    pub fn set_session_meta(&self, session_id: &str, meta: &str) {
        if meta.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock().unwrap();
        sessions.entry(session_id.to_string()).or_default().session_meta = Some(meta.to_string());
    }

    pub fn get_session_meta(&self, session_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .and_then(|s| s.session_meta.clone())
    }

    pub fn set_developer_prompt(&self, session_id: &str, prompt: &str) {
        if prompt.is_empty() {
            return;
        }
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .developer_prompt = Some(prompt.to_string());
    }

    pub fn get_developer_prompt(&self, session_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .and_then(|s| s.developer_prompt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_sticky_for_falsy_updates() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1", Some("u1"), Some("p1"));
        let state = registry.get_or_create("s1", None, None);
        assert_eq!(state.user_id.as_deref(), Some("u1"));
        assert_eq!(state.profile_id.as_deref(), Some("p1"));
    }

    #[test]
    fn conversation_id_set_is_noop_when_falsy() {
        let registry = SessionRegistry::new();
        registry.set_conversation_id("s1", "openai", "");
        assert!(registry.get_conversation_id("s1", "openai").is_none());
        registry.set_conversation_id("s1", "openai", "conv-1");
        assert_eq!(
            registry.get_conversation_id("s1", "openai").as_deref(),
            Some("conv-1")
        );
    }

    #[test]
    fn conversation_ids_are_appended_by_key() {
        let registry = SessionRegistry::new();
        registry.set_conversation_id("s1", "dify", "d1");
        registry.set_conversation_id("s1", "coze", "c1");
        assert_eq!(registry.get_conversation_id("s1", "dify").as_deref(), Some("d1"));
        assert_eq!(registry.get_conversation_id("s1", "coze").as_deref(), Some("c1"));
    }
}
