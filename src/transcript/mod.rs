//! Transcript — the ordered conversation record and the assembler rules
//! that build it.
//!
//! Entries are append-only except for one case: a *provisional*
//! assistant entry at the tail absorbs streamed `assistant_message`
//! frames in place. Any append finalizes it, so at most one provisional
//! entry exists and it is always the last one.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Discriminant of a [`ChatEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Thinking,
    Error,
    FilesUploaded,
}

/// Descriptor of a file the user attached. Never holds the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    pub media_type: String,
}

/// Variant-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    User {
        attachments: Vec<Attachment>,
    },
    Assistant {
        /// Still eligible for in-place streaming updates.
        provisional: bool,
    },
    ToolCall {
        invocation_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        invocation_id: String,
        tool_name: String,
        result: Value,
    },
    Thinking,
    Error,
    FilesUploaded,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    pub id: String,
    /// Milliseconds since the Unix epoch, non-decreasing within a transcript.
    pub timestamp: u64,
    pub content: String,
    #[serde(flatten)]
    pub body: EventBody,
}

impl ChatEvent {
    pub fn kind(&self) -> ChatEventKind {
        match self.body {
            EventBody::User { .. } => ChatEventKind::User,
            EventBody::Assistant { .. } => ChatEventKind::Assistant,
            EventBody::ToolCall { .. } => ChatEventKind::ToolCall,
            EventBody::ToolResult { .. } => ChatEventKind::ToolResult,
            EventBody::Thinking => ChatEventKind::Thinking,
            EventBody::Error => ChatEventKind::Error,
            EventBody::FilesUploaded => ChatEventKind::FilesUploaded,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self.body, EventBody::Assistant { provisional: true })
    }

    /// Invocation id for tool calls and results.
    pub fn invocation_id(&self) -> Option<&str> {
        match &self.body {
            EventBody::ToolCall { invocation_id, .. }
            | EventBody::ToolResult { invocation_id, .. } => Some(invocation_id),
            _ => None,
        }
    }

    /// Empty or whitespace-only assistant content renders as a placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.kind() == ChatEventKind::Assistant && self.content.trim().is_empty()
    }
}

/// Result of [`Transcript::merge_assistant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated,
    Appended,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Ordered, insertion-ordered conversation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    events: Vec<ChatEvent>,
    #[serde(skip)]
    last_timestamp: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ChatEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&ChatEvent> {
        self.events.last()
    }

    pub fn get(&self, id: &str) -> Option<&ChatEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Drop every entry. Timestamps keep increasing afterwards.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn next_timestamp(&mut self) -> u64 {
        self.last_timestamp = self.last_timestamp.max(now_millis());
        self.last_timestamp
    }

    /// Append a new entry, finalizing any provisional tail first.
    pub fn append(&mut self, content: impl Into<String>, body: EventBody) -> &ChatEvent {
        self.finalize_provisional();
        let event = ChatEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: self.next_timestamp(),
            content: content.into(),
            body,
        };
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn push_user(&mut self, content: impl Into<String>, attachments: Vec<Attachment>) -> &ChatEvent {
        self.append(content, EventBody::User { attachments })
    }

    /// A finished assistant entry (confirmations, notices).
    pub fn push_notice(&mut self, content: impl Into<String>) -> &ChatEvent {
        self.append(content, EventBody::Assistant { provisional: false })
    }

    pub fn push_error(&mut self, content: impl Into<String>) -> &ChatEvent {
        self.append(content, EventBody::Error)
    }

    pub fn push_tool_call(&mut self, invocation_id: String, tool_name: String, arguments: Value) -> &ChatEvent {
        let content = format!("Calling tool: {tool_name}");
        self.append(
            content,
            EventBody::ToolCall {
                invocation_id,
                tool_name,
                arguments,
            },
        )
    }

    pub fn push_tool_result(&mut self, invocation_id: String, tool_name: String, result: Value) -> &ChatEvent {
        let content = format!("Tool result from {tool_name}");
        self.append(
            content,
            EventBody::ToolResult {
                invocation_id,
                tool_name,
                result,
            },
        )
    }

    pub fn push_files_uploaded(&mut self, summary: impl Into<String>) -> &ChatEvent {
        self.append(summary, EventBody::FilesUploaded)
    }

    /// Streaming-merge rule: replace the content of the provisional tail,
    /// or append a new provisional assistant entry.
    pub fn merge_assistant(&mut self, content: impl Into<String>) -> MergeOutcome {
        let content = content.into();
        let timestamp = self.next_timestamp();
        if let Some(last) = self.events.last_mut().filter(|e| e.is_provisional()) {
            last.content = content;
            last.timestamp = timestamp;
            return MergeOutcome::Updated;
        }
        self.events.push(ChatEvent {
            id: Uuid::new_v4().to_string(),
            timestamp,
            content,
            body: EventBody::Assistant { provisional: true },
        });
        MergeOutcome::Appended
    }

    /// Freeze the provisional tail, if any. Returns whether one existed.
    pub fn finalize_provisional(&mut self) -> bool {
        match self.events.last_mut() {
            Some(ChatEvent {
                body: EventBody::Assistant { provisional },
                ..
            }) if *provisional => {
                *provisional = false;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn new_transcript_is_empty() {
        let t = Transcript::new();
        assert!(t.is_empty());
        assert!(t.last().is_none());
    }

    #[test]
    fn consecutive_assistant_chunks_merge() {
        let mut t = Transcript::new();
        assert_eq!(t.merge_assistant("Hi"), MergeOutcome::Appended);
        assert_eq!(t.merge_assistant("Hi there"), MergeOutcome::Updated);
        assert_eq!(t.len(), 1);
        assert_eq!(t.events()[0].content, "Hi there");
        assert!(t.events()[0].is_provisional());
    }

    #[test]
    fn append_finalizes_provisional_tail() {
        let mut t = Transcript::new();
        t.merge_assistant("Looking it up");
        t.push_tool_call("T1".into(), "search".into(), json!({}));
        assert!(!t.events()[0].is_provisional());

        assert_eq!(t.merge_assistant("Found it"), MergeOutcome::Appended);
        assert_eq!(t.len(), 3);
        assert_eq!(t.events()[0].content, "Looking it up");
    }

    #[test]
    fn notices_are_never_merged_into() {
        let mut t = Transcript::new();
        t.push_notice("Successfully switched to gemini");
        assert_eq!(t.merge_assistant("Hello"), MergeOutcome::Appended);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn finalize_reports_whether_anything_changed() {
        let mut t = Transcript::new();
        assert!(!t.finalize_provisional());
        t.merge_assistant("x");
        assert!(t.finalize_provisional());
        assert!(!t.finalize_provisional());
        assert_eq!(t.merge_assistant("y"), MergeOutcome::Appended);
    }

    #[test]
    fn whitespace_content_still_recorded() {
        let mut t = Transcript::new();
        t.merge_assistant("   ");
        assert_eq!(t.len(), 1);
        assert!(t.events()[0].is_placeholder());
        t.merge_assistant("");
        assert_eq!(t.len(), 1);
        assert!(t.events()[0].is_placeholder());
    }

    #[test]
    fn ids_unique_and_timestamps_non_decreasing() {
        let mut t = Transcript::new();
        for i in 0..50 {
            match i % 4 {
                0 => {
                    t.merge_assistant(format!("chunk {i}"));
                }
                1 => {
                    t.push_tool_call(format!("T{i}"), "search".into(), Value::Null);
                }
                2 => {
                    t.push_error("boom");
                }
                _ => {
                    t.push_user("hi", vec![]);
                }
            }
        }
        let ids: HashSet<_> = t.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), t.len());
        assert!(t
            .events()
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn tool_entries_carry_invocation_id() {
        let mut t = Transcript::new();
        let call = t.push_tool_call("T1".into(), "search".into(), json!({"q": 1}));
        assert_eq!(call.kind(), ChatEventKind::ToolCall);
        assert_eq!(call.invocation_id(), Some("T1"));
        assert_eq!(call.content, "Calling tool: search");

        let result = t.push_tool_result("T1".into(), "search".into(), json!([1]));
        assert_eq!(result.content, "Tool result from search");
        assert_eq!(result.invocation_id(), Some("T1"));

        let err = t.push_error("x");
        assert_eq!(err.invocation_id(), None);
    }

    #[test]
    fn clear_keeps_clock_monotonic() {
        let mut t = Transcript::new();
        let first = t.push_user("a", vec![]).timestamp;
        t.clear();
        assert!(t.is_empty());
        let second = t.push_user("b", vec![]).timestamp;
        assert!(second >= first);
    }

    #[test]
    fn get_by_id() {
        let mut t = Transcript::new();
        let id = t.push_files_uploaded("Successfully processed 1 file(s)").id.clone();
        assert_eq!(t.get(&id).map(|e| e.kind()), Some(ChatEventKind::FilesUploaded));
        assert!(t.get("missing").is_none());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let mut t = Transcript::new();
        t.push_user(
            "see file",
            vec![Attachment {
                name: "a.csv".into(),
                size: 3,
                media_type: "text/csv".into(),
            }],
        );
        let json = serde_json::to_value(&t.events()[0]).unwrap();
        assert_eq!(json["kind"], "user");
        assert_eq!(json["attachments"][0]["name"], "a.csv");
    }
}
