use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You summarize user chat history for long-term memory. \
Return JSON only with keys: title, summary, facts.
Rules:
- Use the user's language.
- Be objective and factual; avoid subjective judgments or tone labels.
- Do not copy formatting, markup, or special tokens (e.g. <|...|>); paraphrase in plain text.
- title: 4-8 words, short and neutral.
- summary: <= 400 characters, focused on user's goals, preferences, or ongoing topics.
- Decide if any long-term memory is truly valuable to store.
- facts: list of stable user facts ONLY when they are high-confidence and long-term useful.
- Prefer user preferences first, then goals/learning, then identity/role; \
each {\"content\": \"...\", \"reason\": \"name|identity|role|preference|learning|goal|other\"}.
- If nothing is worth storing, return facts as [].
- Do not include sensitive or temporary details.
";

/// Minimal capability a summarizer needs from an LLM: produce text for a
/// prompt. Concrete providers living in `skynet-agent` are adapted to this
/// trait at the call site (kept here, rather than depending on
/// `skynet-agent`, to avoid a memory→agent dependency edge).
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryFact {
    pub content: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct MemorySummaryResult {
    pub title: String,
    pub summary: String,
    pub facts: Vec<SummaryFact>,
}

pub struct MemorySummarizer;

impl MemorySummarizer {
    /// Prompt `provider` with the recent user messages and parse the
    /// response leniently. Returns `None` when the provider fails, the
    /// response can't be parsed at all, or the parsed `summary` is empty.
    pub async fn summarize(
        provider: &dyn SummaryProvider,
        user_messages: &[String],
    ) -> Option<MemorySummaryResult> {
        if user_messages.is_empty() {
            return None;
        }
        let prompt = Self::user_prompt(user_messages);
        let full_prompt = format!("{SYSTEM_PROMPT}\n\n{prompt}");
        let text = provider.complete(&full_prompt).await.ok()?;
        let parsed = Self::parse_response(&text)?;
        if parsed.summary.trim().is_empty() {
            return None;
        }
        Some(parsed)
    }

    fn user_prompt(user_messages: &[String]) -> String {
        let items = user_messages
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("User messages:\n{items}\n\nReturn JSON only.")
    }

    /// Direct `serde_json::from_str` first; on failure, try the substring
    /// between the first `{` and the last `}`.
    fn parse_response(text: &str) -> Option<MemorySummaryResult> {
        let value = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .or_else(|| {
                let start = text.find('{')?;
                let end = text.rfind('}')?;
                if end < start {
                    return None;
                }
                serde_json::from_str::<serde_json::Value>(&text[start..=end]).ok()
            })?;

        let title = value.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let summary = value.get("summary").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let facts = Self::normalize_facts(value.get("facts"));

        Some(MemorySummaryResult { title, summary, facts })
    }

    /// Accepts a list of strings, a list of objects, or a single object;
    /// drops empty content.
    fn normalize_facts(value: Option<&serde_json::Value>) -> Vec<SummaryFact> {
        let Some(value) = value else {
            return Vec::new();
        };
        let items: Vec<&serde_json::Value> = match value {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(_) => vec![value],
            _ => return Vec::new(),
        };

        items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(SummaryFact {
                    content: s.clone(),
                    reason: default_reason(),
                }),
                serde_json::Value::Object(obj) => {
                    let content = obj.get("content").and_then(|v| v.as_str())?.to_string();
                    if content.trim().is_empty() {
                        return None;
                    }
                    let reason = obj
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(default_reason);
                    Some(SummaryFact { content, reason })
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_direct_json() {
        let text = r#"{"title":"t","summary":"s","facts":[{"content":"likes tea","reason":"preference"}]}"#;
        let parsed = MemorySummarizer::parse_response(text).unwrap();
        assert_eq!(parsed.title, "t");
        assert_eq!(parsed.summary, "s");
        assert_eq!(parsed.facts.len(), 1);
        assert_eq!(parsed.facts[0].reason, "preference");
    }

    #[test]
    fn parse_response_substring_fallback() {
        let text = "Sure thing! {\"title\":\"t\",\"summary\":\"s\",\"facts\":[]} Hope that helps.";
        let parsed = MemorySummarizer::parse_response(text).unwrap();
        assert_eq!(parsed.summary, "s");
    }

    #[test]
    fn parse_response_rejects_garbage() {
        assert!(MemorySummarizer::parse_response("not json at all").is_none());
    }

    #[test]
    fn normalize_facts_coerces_string_list() {
        let value = serde_json::json!(["speaks French", "likes Celsius"]);
        let facts = MemorySummarizer::normalize_facts(Some(&value));
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].reason, "other");
    }

    #[test]
    fn normalize_facts_drops_empty_content() {
        let value = serde_json::json!([{"content": "", "reason": "x"}, {"content": "keep", "reason": "y"}]);
        let facts = MemorySummarizer::normalize_facts(Some(&value));
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "keep");
    }
}
