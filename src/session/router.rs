//! Router — one inbound frame, one state transition.
//!
//! `route` is a reducer over `&mut Session`. The only thing it cannot do
//! synchronously (drop the busy flag after a grace delay) is returned as
//! an [`Effect`] for the session loop to schedule.

use std::time::Duration;

use tracing::{debug, info};

use crate::protocol::InboundFrame;

use super::Session;

pub const AUTHENTICATED_NOTICE: &str =
    "Successfully authenticated! You can now start chatting and uploading files.";

/// Router tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub tool_result_grace: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tool_result_grace: Duration::from_millis(1000),
        }
    }
}

/// Deferred work requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ClearBusyAfter(Duration),
}

fn or_default(message: Option<String>, default: &str) -> String {
    message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Apply one inbound frame to the session.
pub fn route(session: &mut Session, frame: InboundFrame, config: &RouterConfig) -> Vec<Effect> {
    let transcript = &mut session.transcript;

    match frame {
        InboundFrame::Connected => {
            info!("chat service ready");
        }

        InboundFrame::Authenticated { model } => {
            session.is_authenticated = true;
            if let Some(model) = model.filter(|m| !m.is_empty()) {
                session.active_model = model;
            }
            transcript.push_notice(AUTHENTICATED_NOTICE);
        }

        InboundFrame::AuthenticationFailed { message } => {
            session.is_authenticated = false;
            transcript.push_error(format!(
                "Authentication failed: {}",
                or_default(message, "Unknown error")
            ));
        }

        InboundFrame::ModelSwitched { model } => {
            info!(%model, "model switched");
            transcript.push_notice(format!("Successfully switched to {model}"));
            session.active_model = model;
        }

        InboundFrame::ModelSwitchFailed { message } => {
            transcript.push_error(format!(
                "Failed to switch model: {}",
                or_default(message, "Unknown error")
            ));
        }

        // Already echoed locally when sent.
        InboundFrame::UserMessage { content } => {
            debug!(len = content.len(), "user message confirmed by server");
        }

        InboundFrame::AssistantMessage { content } => {
            session.is_busy = false;
            let outcome = transcript.merge_assistant(content);
            debug!(?outcome, total = transcript.len(), "assistant message");
        }

        InboundFrame::Thinking => {
            session.is_busy = true;
        }

        InboundFrame::ToolCall {
            tool_id,
            tool_name,
            tool_args,
        } => {
            debug!(%tool_id, %tool_name, "tool call");
            transcript.push_tool_call(tool_id, tool_name, tool_args);
        }

        InboundFrame::ToolResult {
            tool_id,
            tool_name,
            result,
        } => {
            debug!(%tool_id, %tool_name, "tool result");
            transcript.push_tool_result(tool_id, tool_name, result);
            return vec![Effect::ClearBusyAfter(config.tool_result_grace)];
        }

        InboundFrame::FileProcessed { file_name, status } => {
            debug!(?file_name, ?status, "file processed");
        }

        InboundFrame::FilesUploaded { message } => {
            transcript.push_files_uploaded(message);
        }

        InboundFrame::FileError { file_name, error } => {
            transcript.push_error(format!("Error processing file \"{file_name}\": {error}"));
        }

        InboundFrame::Completed => {
            session.is_busy = false;
            transcript.finalize_provisional();
        }

        InboundFrame::Error { message } => {
            session.is_busy = false;
            transcript.push_error(or_default(message, "An error occurred"));
        }

        InboundFrame::Unknown { kind } => {
            debug!(%kind, "ignoring unknown frame type");
        }
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{ChatEventKind, EventBody};
    use serde_json::json;
    use std::collections::HashSet;

    fn apply(session: &mut Session, frames: Vec<InboundFrame>) -> Vec<Effect> {
        let config = RouterConfig::default();
        frames
            .into_iter()
            .flat_map(|f| route(session, f, &config))
            .collect()
    }

    fn assistant(content: &str) -> InboundFrame {
        InboundFrame::AssistantMessage {
            content: content.into(),
        }
    }

    #[test]
    fn full_turn_scenario() {
        let mut s = Session::new("gemini");
        let effects = apply(
            &mut s,
            vec![
                InboundFrame::Connected,
                InboundFrame::Authenticated {
                    model: Some("claude".into()),
                },
            ],
        );
        assert!(effects.is_empty());
        assert!(s.is_authenticated);
        assert_eq!(s.active_model, "claude");
        // The confirmation notice is not part of the turn being checked.
        s.transcript.clear();

        let effects = apply(
            &mut s,
            vec![
                assistant("Hi"),
                assistant("Hi there"),
                InboundFrame::ToolCall {
                    tool_id: "T1".into(),
                    tool_name: "search".into(),
                    tool_args: json!({}),
                },
                InboundFrame::ToolResult {
                    tool_id: "T1".into(),
                    tool_name: "search".into(),
                    result: json!([1, 2, 3]),
                },
                InboundFrame::Completed,
            ],
        );
        assert_eq!(
            effects,
            vec![Effect::ClearBusyAfter(Duration::from_millis(1000))]
        );

        let events = s.transcript.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind(), ChatEventKind::Assistant);
        assert_eq!(events[0].content, "Hi there");
        assert!(!events[0].is_provisional());
        assert_eq!(events[1].kind(), ChatEventKind::ToolCall);
        assert_eq!(events[1].invocation_id(), Some("T1"));
        assert_eq!(events[2].kind(), ChatEventKind::ToolResult);
        assert_eq!(events[2].invocation_id(), Some("T1"));
        assert!(!s.is_busy);

        let tools = s.tool_executions();
        assert_eq!(tools.executions.len(), 1);
        assert!(tools.executions[0].completed);
    }

    #[test]
    fn authenticated_notice_is_appended() {
        let mut s = Session::default();
        apply(&mut s, vec![InboundFrame::Authenticated { model: None }]);
        assert_eq!(s.active_model, "claude");
        assert_eq!(s.transcript.len(), 1);
        assert_eq!(s.transcript.events()[0].content, AUTHENTICATED_NOTICE);
        assert_eq!(
            s.transcript.events()[0].body,
            EventBody::Assistant { provisional: false }
        );
    }

    #[test]
    fn authentication_failure_defaults_reason() {
        let mut s = Session::default();
        s.is_authenticated = true;
        apply(
            &mut s,
            vec![
                InboundFrame::AuthenticationFailed { message: None },
                InboundFrame::AuthenticationFailed {
                    message: Some("bad token".into()),
                },
            ],
        );
        assert!(!s.is_authenticated);
        let events = s.transcript.events();
        assert_eq!(events[0].content, "Authentication failed: Unknown error");
        assert_eq!(events[1].content, "Authentication failed: bad token");
        assert!(events.iter().all(|e| e.kind() == ChatEventKind::Error));
    }

    #[test]
    fn model_switch_success_and_failure() {
        let mut s = Session::default();
        apply(
            &mut s,
            vec![
                InboundFrame::ModelSwitched {
                    model: "gemini".into(),
                },
                InboundFrame::ModelSwitchFailed {
                    message: Some("no key".into()),
                },
            ],
        );
        assert_eq!(s.active_model, "gemini");
        assert_eq!(s.transcript.events()[0].content, "Successfully switched to gemini");
        assert_eq!(s.transcript.events()[1].content, "Failed to switch model: no key");
        assert_eq!(s.transcript.events()[1].kind(), ChatEventKind::Error);
    }

    #[test]
    fn user_message_echo_is_suppressed() {
        let mut s = Session::default();
        apply(
            &mut s,
            vec![InboundFrame::UserMessage {
                content: "hello".into(),
            }],
        );
        assert!(s.transcript.is_empty());
    }

    #[test]
    fn thinking_sets_busy_without_entry() {
        let mut s = Session::default();
        apply(&mut s, vec![InboundFrame::Thinking]);
        assert!(s.is_busy);
        assert!(s.transcript.is_empty());

        apply(&mut s, vec![assistant("answer")]);
        assert!(!s.is_busy);
    }

    #[test]
    fn tool_result_asks_for_grace_clear() {
        let mut s = Session::default();
        let config = RouterConfig {
            tool_result_grace: Duration::from_millis(250),
        };
        s.is_busy = true;
        let effects = route(
            &mut s,
            InboundFrame::ToolResult {
                tool_id: "T9".into(),
                tool_name: "x".into(),
                result: json!(null),
            },
            &config,
        );
        assert_eq!(effects, vec![Effect::ClearBusyAfter(Duration::from_millis(250))]);
        // Busy is cleared later by the loop, not here.
        assert!(s.is_busy);
    }

    #[test]
    fn file_frames() {
        let mut s = Session::default();
        apply(
            &mut s,
            vec![
                InboundFrame::FileProcessed {
                    file_name: Some("a.csv".into()),
                    status: Some("processing".into()),
                },
                InboundFrame::FilesUploaded {
                    message: "Successfully processed 1 file(s): a.csv (3 bytes)".into(),
                },
                InboundFrame::FileError {
                    file_name: "b.pdf".into(),
                    error: "corrupt".into(),
                },
            ],
        );
        let events = s.transcript.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), ChatEventKind::FilesUploaded);
        assert_eq!(events[1].content, "Error processing file \"b.pdf\": corrupt");
    }

    #[test]
    fn error_frame_clears_busy_and_finalizes() {
        let mut s = Session::default();
        apply(
            &mut s,
            vec![
                InboundFrame::Thinking,
                assistant("partial"),
                InboundFrame::Error { message: None },
                assistant("next"),
            ],
        );
        assert!(!s.is_busy);
        let events = s.transcript.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].content, "An error occurred");
        assert_eq!(events[0].content, "partial");
        assert_eq!(events[2].content, "next");
    }

    #[test]
    fn completed_freezes_streamed_reply() {
        let mut s = Session::default();
        apply(
            &mut s,
            vec![assistant("first"), InboundFrame::Completed, assistant("second")],
        );
        assert_eq!(s.transcript.len(), 2);
        assert_eq!(s.transcript.events()[0].content, "first");
    }

    #[test]
    fn unknown_frames_change_nothing() {
        let mut s = Session::default();
        let before = s.clone();
        apply(
            &mut s,
            vec![InboundFrame::Unknown {
                kind: "conversation_cleared".into(),
            }],
        );
        assert_eq!(s, before);
    }

    #[test]
    fn arbitrary_sequences_keep_ids_unique_and_ordered() {
        let mut s = Session::default();
        let mut frames = Vec::new();
        for i in 0..40 {
            frames.push(match i % 7 {
                0 => assistant("a"),
                1 => InboundFrame::ToolCall {
                    tool_id: format!("T{i}"),
                    tool_name: "t".into(),
                    tool_args: json!(null),
                },
                2 => InboundFrame::ToolResult {
                    tool_id: format!("T{}", i - 1),
                    tool_name: "t".into(),
                    result: json!(null),
                },
                3 => InboundFrame::Error { message: None },
                4 => assistant("b"),
                5 => InboundFrame::Completed,
                _ => InboundFrame::FilesUploaded {
                    message: "ok".into(),
                },
            });
        }
        apply(&mut s, frames);

        let events = s.transcript.events();
        let ids: HashSet<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), events.len());
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(s.tool_executions().executions.iter().all(|e| e.completed));
    }
}
