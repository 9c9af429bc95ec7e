use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// In-memory per-session state, keyed by the client-chosen `session_id`.
/// Created on first reference, never evicted within the process lifetime,
/// mutated only by the dispatcher. `conversation_ids` is append-only by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: Option<String>,
    pub profile_id: Option<String>,
    #[serde(default)]
    pub conversation_ids: HashMap<String, String>,
    pub session_meta: Option<String>,
    pub developer_prompt: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }
}
