use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

/// Title given to a session before its first user message arrives.
pub const UNTITLED_SESSION: &str = "New chat";

/// Number of grapheme clusters kept when deriving a session title from the
/// first user message.
const TITLE_GRAPHEME_LIMIT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    /// Wire role for conversation turns. System messages are never forwarded
    /// as turns, so they map to `None`.
    pub fn api_role(self) -> Option<&'static str> {
        match self {
            Role::User => Some("user"),
            Role::Model => Some("model"),
            Role::System => None,
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }
}

/// A web citation attached to a model reply when search augmentation was
/// used. Identity is the uri; titles are display-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grounding_sources: Vec<GroundingSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_log: Option<String>,
}

impl Message {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: false,
            grounding_sources: Vec::new(),
            thinking_log: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    /// Placeholder for a streamed model reply. Created empty; chunks append
    /// until the turn's terminal event freezes it.
    pub fn pending_model() -> Self {
        Self::with_role(Role::Model, String::new())
    }

    /// Whether this message counts as conversation context. Errored messages
    /// and empty placeholders are transcript artifacts only.
    pub fn is_context_eligible(&self) -> bool {
        !self.is_error && !self.text.trim().is_empty()
    }

    /// Fold newly cited sources into this message, keeping the first
    /// occurrence of each uri and the order sources arrived in.
    pub fn merge_grounding_sources(&mut self, incoming: &[GroundingSource]) -> bool {
        let mut added = false;
        for source in incoming {
            if !self
                .grounding_sources
                .iter()
                .any(|existing| existing.uri == source.uri)
            {
                self.grounding_sources.push(source.clone());
                added = true;
            }
        }
        added
    }
}

/// Derive a session title from the first user message: the leading
/// graphemes, with an ellipsis when the message was longer.
pub fn derive_session_title(first_user_text: &str) -> String {
    let graphemes: Vec<&str> = first_user_text.graphemes(true).collect();
    if graphemes.len() > TITLE_GRAPHEME_LIMIT {
        let mut title: String = graphemes[..TITLE_GRAPHEME_LIMIT].concat();
        title.push_str("...");
        title
    } else {
        first_user_text.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
    pub persona_id: String,
}

impl ChatSession {
    pub fn new(persona_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: UNTITLED_SESSION.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
            persona_id: persona_id.into(),
        }
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// Append a message, deriving the title when this is the first user
    /// message of the session.
    pub fn push_message(&mut self, message: Message) {
        if message.role.is_user() && !self.messages.iter().any(|m| m.role.is_user()) {
            self.title = derive_session_title(&message.text);
        }
        self.messages.push(message);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role.is_user())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_truncated_past_fifteen_graphemes() {
        assert_eq!(
            derive_session_title("Hello world this is long"),
            "Hello world thi..."
        );
    }

    #[test]
    fn short_title_is_kept_verbatim() {
        assert_eq!(derive_session_title("Hi"), "Hi");
    }

    #[test]
    fn exactly_fifteen_graphemes_get_no_ellipsis() {
        let text = "abcdefghijklmno";
        assert_eq!(text.chars().count(), 15);
        assert_eq!(derive_session_title(text), text);
    }

    #[test]
    fn multibyte_titles_truncate_on_grapheme_boundaries() {
        let text = "naïve résumé étude naïve résumé";
        let title = derive_session_title(text);
        assert!(title.ends_with("..."));
        assert_eq!(title.trim_end_matches("...").graphemes(true).count(), 15);
    }

    #[test]
    fn first_user_message_sets_session_title() {
        let mut session = ChatSession::new("test-persona");
        assert_eq!(session.title, UNTITLED_SESSION);

        session.push_message(Message::user("Hi"));
        assert_eq!(session.title, "Hi");

        session.push_message(Message::user("a much longer second message"));
        assert_eq!(session.title, "Hi");
    }

    #[test]
    fn model_messages_do_not_set_the_title() {
        let mut session = ChatSession::new("test-persona");
        session.push_message(Message::pending_model());
        assert_eq!(session.title, UNTITLED_SESSION);
    }

    #[test]
    fn grounding_sources_deduplicate_by_uri() {
        let mut message = Message::pending_model();
        let first = GroundingSource {
            uri: "https://example.com/a".to_string(),
            title: "A".to_string(),
        };
        let second = GroundingSource {
            uri: "https://example.com/b".to_string(),
            title: "B".to_string(),
        };

        assert!(message.merge_grounding_sources(&[first.clone()]));
        assert!(message.merge_grounding_sources(&[first.clone(), second.clone()]));
        assert!(!message.merge_grounding_sources(&[first.clone()]));

        assert_eq!(message.grounding_sources, vec![first, second]);
    }

    #[test]
    fn duplicate_uri_with_different_title_keeps_the_first() {
        let mut message = Message::pending_model();
        message.merge_grounding_sources(&[GroundingSource {
            uri: "https://example.com".to_string(),
            title: "Original".to_string(),
        }]);
        message.merge_grounding_sources(&[GroundingSource {
            uri: "https://example.com".to_string(),
            title: "Renamed".to_string(),
        }]);

        assert_eq!(message.grounding_sources.len(), 1);
        assert_eq!(message.grounding_sources[0].title, "Original");
    }

    #[test]
    fn errored_and_empty_messages_are_not_context() {
        let mut errored = Message::user("bad turn");
        errored.is_error = true;
        assert!(!errored.is_context_eligible());

        assert!(!Message::pending_model().is_context_eligible());
        assert!(!Message::user("   ").is_context_eligible());
        assert!(Message::user("fine").is_context_eligible());
    }

    #[test]
    fn roles_round_trip_through_serde() {
        let json = serde_json::to_string(&Role::Model).unwrap();
        assert_eq!(json, "\"model\"");
        let back: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Role::Model);
    }

    #[test]
    fn system_role_has_no_api_role() {
        assert_eq!(Role::System.api_role(), None);
        assert_eq!(Role::User.api_role(), Some("user"));
        assert_eq!(Role::Model.api_role(), Some("model"));
    }
}
