//! Conversation state and the reducer that applies stream events to it.

use crate::protocol::{is_handoff, HistoryEntry, Role, StreamEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Booking-flow handoff, including any `prefill_data`. Set at most once.
    pub handoff: Option<Value>,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id.into(), Role::User, content.into())
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self::new(id.into(), Role::Assistant, String::new())
    }

    fn new(id: String, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            handoff: None,
        }
    }

    pub fn handoff_prefill(&self) -> Option<&Value> {
        self.handoff.as_ref()?.get("prefill_data")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnStatus {
    #[default]
    Idle,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnStatus::Completed | TurnStatus::Errored | TurnStatus::Cancelled
        )
    }
}

/// Snapshot of everything a caller can observe.
///
/// The message list is shared copy-on-write, so cloning a snapshot is cheap
/// and a held snapshot never changes.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    messages: Arc<Vec<Message>>,
    active: Option<String>,
    is_streaming: bool,
    error: Option<String>,
    status: TurnStatus,
}

impl ChatState {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// The assistant message currently receiving events.
    pub fn active_message(&self) -> Option<&Message> {
        let id = self.active.as_deref()?;
        self.messages.iter().rev().find(|m| m.id == id)
    }

    /// Prior turns as sent to the service: only messages with content.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }

    fn active_mut(&mut self) -> Option<&mut Message> {
        let id = self.active.clone()?;
        Arc::make_mut(&mut self.messages)
            .iter_mut()
            .rev()
            .find(|m| m.id == id)
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// A turn starts: the user message and an empty assistant placeholder.
    Begin { user: Message, assistant: Message },
    Event(StreamEvent),
    /// Transport-level failure. `display` fills an empty assistant bubble.
    Fail { error: String, display: String },
    Finish(TurnStatus),
    Clear,
}

pub fn reduce(state: &mut ChatState, action: Action) {
    match action {
        Action::Begin { user, assistant } => {
            state.active = Some(assistant.id.clone());
            let messages = Arc::make_mut(&mut state.messages);
            messages.push(user);
            messages.push(assistant);
            state.error = None;
            state.is_streaming = true;
            state.status = TurnStatus::Streaming;
        }
        Action::Event(event) => apply_event(state, event),
        // A turn whose message was cleared has nowhere to report to.
        Action::Fail { error, display } => {
            let Some(message) = state.active_mut() else {
                return;
            };
            if message.content.is_empty() {
                message.content = display;
            }
            state.error = Some(error);
        }
        Action::Finish(status) => {
            if !state.is_streaming {
                return;
            }
            state.is_streaming = false;
            state.active = None;
            state.status = match status {
                TurnStatus::Completed if state.error.is_some() => TurnStatus::Errored,
                other => other,
            };
        }
        // An in-flight turn keeps streaming into nothing until it finishes;
        // the caller is expected to cancel it.
        Action::Clear => {
            state.messages = Arc::new(Vec::new());
            state.error = None;
            if !state.is_streaming {
                state.status = TurnStatus::Idle;
            }
        }
    }
}

fn apply_event(state: &mut ChatState, event: StreamEvent) {
    let Some(message) = state.active_mut() else {
        return;
    };

    match event {
        StreamEvent::Error { message: text } => {
            let text = text.unwrap_or_else(|| GENERIC_ERROR.to_string());
            if message.content.is_empty() {
                message.content = text.clone();
            }
            state.error = Some(text);
        }
        StreamEvent::Token { content } => message.content.push_str(&content),
        StreamEvent::ToolCall { tool } => message.tool_calls.push(ToolCall { tool }),
        StreamEvent::ToolResult { tool, result } => {
            if message.handoff.is_none() && is_handoff(&result) {
                message.handoff = Some(result.clone());
            }
            message.tool_results.push(ToolResult { tool, result });
        }
        StreamEvent::Done | StreamEvent::Unknown { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn streaming_state() -> ChatState {
        let mut state = ChatState::default();
        reduce(
            &mut state,
            Action::Begin {
                user: Message::user("u1", "Can I book a pickup?"),
                assistant: Message::assistant("a1"),
            },
        );
        state
    }

    fn token(text: &str) -> Action {
        Action::Event(StreamEvent::Token {
            content: text.to_string(),
        })
    }

    #[test]
    fn begin_appends_user_and_placeholder() {
        let state = streaming_state();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].role, Role::User);
        assert_eq!(state.messages()[1].role, Role::Assistant);
        assert_eq!(state.messages()[1].content, "");
        assert!(state.is_streaming());
        assert_eq!(state.status(), TurnStatus::Streaming);
    }

    #[test]
    fn tokens_append_and_every_snapshot_is_a_prefix() {
        let mut state = streaming_state();
        let mut snapshots = Vec::new();
        for part in ["Sure", ", ", "what's the ", "postcode?"] {
            reduce(&mut state, token(part));
            snapshots.push(state.clone());
        }

        let last = state.messages()[1].content.clone();
        assert_eq!(last, "Sure, what's the postcode?");
        for snapshot in &snapshots {
            assert!(last.starts_with(&snapshot.messages()[1].content));
        }
        // Earlier snapshots were not mutated by later events.
        assert_eq!(snapshots[0].messages()[1].content, "Sure");
    }

    #[test]
    fn tool_calls_and_results_are_recorded_in_order() {
        let mut state = streaming_state();
        reduce(
            &mut state,
            Action::Event(StreamEvent::ToolCall {
                tool: "get_quote".to_string(),
            }),
        );
        reduce(
            &mut state,
            Action::Event(StreamEvent::ToolResult {
                tool: "get_quote".to_string(),
                result: json!({"price": 12.5}),
            }),
        );

        let message = &state.messages()[1];
        assert_eq!(message.tool_calls, vec![ToolCall { tool: "get_quote".to_string() }]);
        assert_eq!(message.tool_results[0].result, json!({"price": 12.5}));
        assert_eq!(message.handoff, None);
    }

    #[test]
    fn first_handoff_wins() {
        let mut state = streaming_state();
        let first = json!({
            "action": "open_booking_wizard",
            "prefill_data": {"pickup_postcode": "SW1A 1AA", "parcels": 2}
        });
        let second = json!({"action": "open_booking_wizard", "prefill_data": {}});

        for result in [first.clone(), second] {
            reduce(
                &mut state,
                Action::Event(StreamEvent::ToolResult {
                    tool: "start_booking".to_string(),
                    result,
                }),
            );
        }

        let message = &state.messages()[1];
        assert_eq!(message.handoff.as_ref(), Some(&first));
        assert_eq!(message.handoff_prefill(), Some(&first["prefill_data"]));
        assert_eq!(message.tool_results.len(), 2);
    }

    #[test]
    fn error_event_fills_empty_content_only() {
        let mut state = streaming_state();
        reduce(
            &mut state,
            Action::Event(StreamEvent::Error {
                message: Some("Quote service down".to_string()),
            }),
        );
        assert_eq!(state.error(), Some("Quote service down"));
        assert_eq!(state.messages()[1].content, "Quote service down");

        let mut state = streaming_state();
        reduce(&mut state, token("Partial"));
        reduce(&mut state, Action::Event(StreamEvent::Error { message: None }));
        assert_eq!(state.error(), Some(GENERIC_ERROR));
        assert_eq!(state.messages()[1].content, "Partial");
        // Streaming continues after a protocol error.
        assert!(state.is_streaming());
    }

    #[test]
    fn finish_after_error_event_is_errored() {
        let mut state = streaming_state();
        reduce(&mut state, Action::Event(StreamEvent::Error { message: None }));
        reduce(&mut state, Action::Finish(TurnStatus::Completed));
        assert_eq!(state.status(), TurnStatus::Errored);
        assert!(!state.is_streaming());
    }

    #[test]
    fn finish_only_applies_once() {
        let mut state = streaming_state();
        reduce(&mut state, Action::Finish(TurnStatus::Cancelled));
        reduce(&mut state, Action::Finish(TurnStatus::Completed));
        assert_eq!(state.status(), TurnStatus::Cancelled);
        assert!(state.active_message().is_none());
    }

    #[test]
    fn events_after_finish_are_ignored() {
        let mut state = streaming_state();
        reduce(&mut state, token("Done."));
        reduce(&mut state, Action::Finish(TurnStatus::Completed));
        reduce(&mut state, token(" extra"));
        assert_eq!(state.messages()[1].content, "Done.");
    }

    #[test]
    fn done_and_unknown_events_do_not_mutate() {
        let mut state = streaming_state();
        reduce(&mut state, token("x"));
        reduce(&mut state, Action::Event(StreamEvent::Done));
        reduce(
            &mut state,
            Action::Event(StreamEvent::Unknown {
                event: "thinking".to_string(),
            }),
        );
        assert_eq!(state.messages()[1].content, "x");
        assert!(state.is_streaming());
    }

    #[test]
    fn fail_sets_error_and_display_text() {
        let mut state = streaming_state();
        reduce(
            &mut state,
            Action::Fail {
                error: "overloaded".to_string(),
                display: "overloaded".to_string(),
            },
        );
        assert_eq!(state.error(), Some("overloaded"));
        assert_eq!(state.messages()[1].content, "overloaded");
    }

    #[test]
    fn begin_clears_previous_error() {
        let mut state = streaming_state();
        reduce(&mut state, Action::Event(StreamEvent::Error { message: None }));
        reduce(&mut state, Action::Finish(TurnStatus::Completed));
        reduce(
            &mut state,
            Action::Begin {
                user: Message::user("u2", "again"),
                assistant: Message::assistant("a2"),
            },
        );
        assert_eq!(state.error(), None);
        assert_eq!(state.active_message().map(|m| m.id.as_str()), Some("a2"));
    }

    #[test]
    fn history_skips_empty_messages() {
        let mut state = streaming_state();
        let history = state.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);

        reduce(&mut state, token("Yes"));
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.history()[1].content, "Yes");
    }

    #[test]
    fn clear_discards_messages() {
        let mut state = streaming_state();
        reduce(&mut state, token("Hi"));
        reduce(&mut state, Action::Finish(TurnStatus::Completed));
        reduce(&mut state, Action::Clear);
        assert!(state.messages().is_empty());
        assert_eq!(state.status(), TurnStatus::Idle);
    }

    #[test]
    fn clear_mid_turn_drops_late_events_until_finish() {
        let mut state = streaming_state();
        reduce(&mut state, token("Hi"));
        reduce(&mut state, Action::Clear);
        reduce(&mut state, token("late"));
        assert!(state.messages().is_empty());
        assert!(state.is_streaming());

        reduce(&mut state, Action::Finish(TurnStatus::Cancelled));
        assert!(!state.is_streaming());
        assert_eq!(state.status(), TurnStatus::Cancelled);
    }

    #[test]
    fn failures_after_mid_turn_clear_leave_error_unset() {
        let mut state = streaming_state();
        reduce(&mut state, Action::Clear);
        reduce(
            &mut state,
            Action::Event(StreamEvent::Error {
                message: Some("Quote service unavailable".to_string()),
            }),
        );
        reduce(
            &mut state,
            Action::Fail {
                error: "stream interrupted".to_string(),
                display: "sorry".to_string(),
            },
        );
        reduce(&mut state, Action::Finish(TurnStatus::Completed));

        assert_eq!(state.error(), None);
        assert!(state.messages().is_empty());
        assert_eq!(state.status(), TurnStatus::Completed);
    }
}
