//! Tool executions — pairs each `tool_call` entry with its eventual
//! `tool_result`, keyed by the server-issued invocation id.
//!
//! The projection is derived from the full transcript on demand and
//! borrows from it; nothing here is stored in the session.
//!
//! Unmatched results (no open call with that id, an empty id, or a
//! second result for an already-closed call) are never attached to an
//! execution. They are surfaced separately in [`Correlation::unmatched`].

use serde_json::Value;

use crate::transcript::{ChatEvent, ChatEventKind, EventBody};

/// A tool call and, once observed, its result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution<'a> {
    pub invocation_id: &'a str,
    pub call: &'a ChatEvent,
    pub result: Option<&'a ChatEvent>,
    pub completed: bool,
}

impl<'a> ToolExecution<'a> {
    pub fn tool_name(&self) -> &'a str {
        let call: &'a ChatEvent = self.call;
        match &call.body {
            EventBody::ToolCall { tool_name, .. } => tool_name,
            _ => "",
        }
    }
}

/// Output of [`correlate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation<'a> {
    /// In call order.
    pub executions: Vec<ToolExecution<'a>>,
    /// Results that closed nothing, in arrival order.
    pub unmatched: Vec<&'a ChatEvent>,
}

impl<'a> Correlation<'a> {
    pub fn pending(&self) -> impl Iterator<Item = &ToolExecution<'a>> {
        self.executions.iter().filter(|e| !e.completed)
    }

    pub fn find(&self, invocation_id: &str) -> Option<&ToolExecution<'a>> {
        self.executions
            .iter()
            .rev()
            .find(|e| e.invocation_id == invocation_id)
    }
}

/// Derive tool executions from transcript entries (insertion order is
/// timestamp order).
pub fn correlate(events: &[ChatEvent]) -> Correlation<'_> {
    let mut correlation = Correlation::default();

    for event in events {
        match event.kind() {
            ChatEventKind::ToolCall => {
                let invocation_id = event.invocation_id().unwrap_or_default();
                correlation.executions.push(ToolExecution {
                    invocation_id,
                    call: event,
                    result: None,
                    completed: false,
                });
            }
            ChatEventKind::ToolResult => {
                let invocation_id = event.invocation_id().unwrap_or_default();
                let open = correlation
                    .executions
                    .iter_mut()
                    .rev()
                    .find(|e| !e.completed && !invocation_id.is_empty() && e.invocation_id == invocation_id);
                match open {
                    Some(execution) => {
                        execution.result = Some(event);
                        execution.completed = true;
                    }
                    None => correlation.unmatched.push(event),
                }
            }
            _ => {}
        }
    }

    correlation
}

/// Render tool arguments for display.
pub fn format_tool_args(args: &Value) -> String {
    match args {
        Value::Null => "No arguments".into(),
        Value::Object(_) | Value::Array(_) => pretty(args),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render an opaque tool result for display.
///
/// Results often arrive as a list of text blocks whose first element is a
/// JSON document; that document is pretty-printed when it parses.
pub fn format_tool_result(result: &Value) -> String {
    match result {
        Value::Null => String::new(),
        Value::Array(items) => match items.first() {
            Some(Value::String(first)) => match serde_json::from_str::<Value>(first) {
                Ok(parsed) => pretty(&parsed),
                Err(_) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            _ => pretty(result),
        },
        Value::Object(_) => pretty(result),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => pretty(&parsed),
            _ => s.clone(),
        },
        other => other.to_string(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
