//! Folds pipeline events into the authoritative session state.
//!
//! Every event re-resolves its target session and message by id; a target
//! deleted mid-stream makes the event a benign no-op. The registry holds
//! one turn per session at most, which is the processing gate.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::chat_stream::{StreamEvent, StreamTag};
use crate::core::store::{SessionStore, StoreEvent};

/// Lifecycle of one turn. The registry only holds live turns; reaching a
/// terminal phase removes the entry and releases the session's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingFirstByte,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnPhase::Completed | TurnPhase::Errored | TurnPhase::Cancelled
        )
    }
}

struct Turn {
    message_id: String,
    stream_id: u64,
    phase: TurnPhase,
    cancel_token: CancellationToken,
}

/// Tracks in-flight turns, keyed by session id. At most one turn per
/// session; turns across different sessions overlap freely.
#[derive(Default)]
pub struct TurnRegistry {
    turns: HashMap<String, Turn>,
    next_stream_id: u64,
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session's gate for a new turn. `None` when a turn is
    /// already in flight for this session.
    pub fn begin(&mut self, session_id: &str, message_id: &str) -> Option<(u64, CancellationToken)> {
        if self.turns.contains_key(session_id) {
            return None;
        }
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        let cancel_token = CancellationToken::new();
        self.turns.insert(
            session_id.to_string(),
            Turn {
                message_id: message_id.to_string(),
                stream_id,
                phase: TurnPhase::AwaitingFirstByte,
                cancel_token: cancel_token.clone(),
            },
        );
        Some((stream_id, cancel_token))
    }

    pub fn is_processing(&self, session_id: &str) -> bool {
        self.turns.contains_key(session_id)
    }

    /// Whether an event tag still addresses the live turn for its session.
    /// Stale stream ids (from a cancelled or superseded turn) are rejected.
    pub fn accepts(&self, tag: &StreamTag) -> bool {
        self.turns
            .get(&tag.session_id)
            .map(|turn| turn.stream_id == tag.stream_id && turn.message_id == tag.message_id)
            .unwrap_or(false)
    }

    pub fn phase(&self, session_id: &str) -> Option<TurnPhase> {
        self.turns.get(session_id).map(|turn| turn.phase)
    }

    fn note_first_byte(&mut self, session_id: &str) {
        if let Some(turn) = self.turns.get_mut(session_id) {
            if turn.phase == TurnPhase::AwaitingFirstByte {
                turn.phase = TurnPhase::Streaming;
            }
        }
    }

    /// Move the session's turn to a terminal phase, releasing the gate.
    fn finish(&mut self, session_id: &str, phase: TurnPhase) {
        debug_assert!(phase.is_terminal());
        if let Some(mut turn) = self.turns.remove(session_id) {
            turn.phase = phase;
            debug!(session_id, stream_id = turn.stream_id, ?phase, "turn finished");
        }
    }

    /// Cancel the session's in-flight turn, if any. The token stops the
    /// transport task; removing the entry makes any already-queued events
    /// for the turn stale.
    pub fn cancel(&mut self, session_id: &str) -> bool {
        if let Some(turn) = self.turns.get(session_id) {
            turn.cancel_token.cancel();
            self.finish(session_id, TurnPhase::Cancelled);
            true
        } else {
            false
        }
    }

    /// Cancel everything; used on shutdown.
    pub fn cancel_all(&mut self) {
        let sessions: Vec<String> = self.turns.keys().cloned().collect();
        for session_id in sessions {
            self.cancel(&session_id);
        }
    }
}

/// Apply one pipeline event to the store. Returns the store notifications
/// the event produced; an empty vec means the event was stale or targeted
/// state that no longer exists.
pub fn apply_stream_event(
    store: &mut SessionStore,
    turns: &mut TurnRegistry,
    tag: &StreamTag,
    event: StreamEvent,
) -> Vec<StoreEvent> {
    if !turns.accepts(tag) {
        debug!(
            session_id = %tag.session_id,
            stream_id = tag.stream_id,
            "dropping event for stale stream"
        );
        return Vec::new();
    }

    let mut notifications = Vec::new();

    match event {
        StreamEvent::Chunk(text) => {
            turns.note_first_byte(&tag.session_id);
            let mut updated = false;
            store.update_session(&tag.session_id, |session| {
                if let Some(message) = session.message_mut(&tag.message_id) {
                    message.text.push_str(&text);
                    updated = true;
                }
            });
            if updated {
                notifications.push(StoreEvent::MessageUpdated {
                    session_id: tag.session_id.clone(),
                    message_id: tag.message_id.clone(),
                });
            }
        }
        StreamEvent::Thought(text) => {
            turns.note_first_byte(&tag.session_id);
            let mut updated = false;
            store.update_session(&tag.session_id, |session| {
                if let Some(message) = session.message_mut(&tag.message_id) {
                    message
                        .thinking_log
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                    updated = true;
                }
            });
            if updated {
                notifications.push(StoreEvent::MessageUpdated {
                    session_id: tag.session_id.clone(),
                    message_id: tag.message_id.clone(),
                });
            }
        }
        StreamEvent::Grounding(sources) => {
            turns.note_first_byte(&tag.session_id);
            let mut updated = false;
            store.update_session(&tag.session_id, |session| {
                if let Some(message) = session.message_mut(&tag.message_id) {
                    updated = message.merge_grounding_sources(&sources);
                }
            });
            if updated {
                notifications.push(StoreEvent::MessageUpdated {
                    session_id: tag.session_id.clone(),
                    message_id: tag.message_id.clone(),
                });
            }
        }
        StreamEvent::Errored(text) => {
            let mut updated = false;
            store.update_session(&tag.session_id, |session| {
                if let Some(message) = session.message_mut(&tag.message_id) {
                    message.text = text.clone();
                    message.is_error = true;
                    updated = true;
                }
                session.touch();
            });
            turns.finish(&tag.session_id, TurnPhase::Errored);
            if updated {
                notifications.push(StoreEvent::MessageUpdated {
                    session_id: tag.session_id.clone(),
                    message_id: tag.message_id.clone(),
                });
            }
            notifications.push(StoreEvent::TurnFinished {
                session_id: tag.session_id.clone(),
            });
        }
        StreamEvent::Completed => {
            store.update_session(&tag.session_id, |session| session.touch());
            turns.finish(&tag.session_id, TurnPhase::Completed);
            notifications.push(StoreEvent::TurnFinished {
                session_id: tag.session_id.clone(),
            });
        }
    }

    notifications
}
