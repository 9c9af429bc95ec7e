use serde::{Deserialize, Serialize};

/// Immutable triple that keys every memory operation. `"default"` is the
/// sentinel for a missing part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub session_id: String,
    pub user_id: String,
    pub profile_id: String,
}

impl MemoryScope {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        let non_empty = |s: String| if s.is_empty() { "default".to_string() } else { s };
        Self {
            session_id: non_empty(session_id.into()),
            user_id: non_empty(user_id.into()),
            profile_id: non_empty(profile_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: i64,
    pub profile_id: String,
    pub user_id: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Accepted,
    Rejected,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Accepted => "accepted",
            CandidateStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "accepted" => Ok(CandidateStatus::Accepted),
            "rejected" => Ok(CandidateStatus::Rejected),
            other => Err(format!("unknown candidate status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub id: i64,
    pub profile_id: String,
    pub user_id: String,
    pub content: String,
    pub reason: String,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: i64,
    pub session_id: String,
    pub profile_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: i64,
}

/// Result of context assembly — the `system` text plus any session messages
/// to splice into a structured message list.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub system: String,
    pub messages: Vec<MemoryMessage>,
}

impl MemoryContext {
    pub fn has_content(&self) -> bool {
        !self.system.is_empty() || !self.messages.is_empty()
    }
}
