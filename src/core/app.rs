//! The controller: consumes UI intents, owns the session store and turn
//! registry, and feeds the stream service. The driver loop (see
//! [`crate::cli`]) forwards intents in and drains stream events back
//! through [`ChatApp::apply_stream_event`].

use tracing::warn;

use crate::core::builtin_personas::PersonaConfig;
use crate::core::chat_stream::{
    resolve_credential, ChatStreamService, StreamEvent, StreamParams, StreamTag, DEFAULT_BASE_URL,
};
use crate::core::config::Preferences;
use crate::core::message::{Message, Role};
use crate::core::persona::PersonaRegistry;
use crate::core::reconcile::{self, TurnRegistry};
use crate::core::storage::{
    load_history, load_key_overrides, save_history, save_key_overrides, StoragePaths,
};
use crate::core::store::{SessionStore, StoreEvent};
use crate::utils::logging::LoggingState;

/// User intents the engine consumes. The presentation layer translates
/// whatever affordances it has into these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    NewSession,
    SendMessage(String),
    SelectSession(String),
    SelectPersona(String),
    UpdatePersonaKey { persona_id: String, key: String },
    DeleteSession(String),
    ToggleSearch,
    /// Drop the last model reply of the active session and stream it again
    /// from the same prompt.
    ResendLast,
}

/// Everything the controller needs at startup, loaded from local storage.
pub struct AppContext {
    pub registry: PersonaRegistry,
    pub store: SessionStore,
    pub preferences: Preferences,
    pub paths: Option<StoragePaths>,
    pub logging: LoggingState,
    pub base_url: String,
}

impl AppContext {
    pub fn load(
        base_url: Option<String>,
        log_file: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let preferences = Preferences::load();
        let paths = StoragePaths::resolve()?;

        let mut registry = PersonaRegistry::builtin();
        registry.apply_key_overrides(&load_key_overrides(&paths.keys));

        let store = SessionStore::from_sessions(load_history(&paths.history));
        let logging = LoggingState::new(log_file)?;

        Ok(Self {
            registry,
            store,
            preferences,
            paths: Some(paths),
            logging,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    #[cfg(test)]
    pub fn ephemeral(registry: PersonaRegistry) -> Self {
        Self {
            registry,
            store: SessionStore::new(),
            preferences: Preferences::default(),
            paths: None,
            logging: LoggingState::new(None).expect("no-op logging"),
            base_url: "http://127.0.0.1:9/unreachable".to_string(),
        }
    }
}

pub struct ChatApp {
    store: SessionStore,
    registry: PersonaRegistry,
    turns: TurnRegistry,
    stream: ChatStreamService,
    client: reqwest::Client,
    base_url: String,
    paths: Option<StoragePaths>,
    preferences: Preferences,
    logging: LoggingState,
    active_persona_id: String,
    enable_search: bool,
}

impl ChatApp {
    pub fn new(ctx: AppContext, stream: ChatStreamService) -> Self {
        let AppContext {
            registry,
            store,
            preferences,
            paths,
            logging,
            base_url,
        } = ctx;

        let active_persona_id = registry
            .resolve(preferences.default_persona.as_deref().unwrap_or(""))
            .id
            .clone();
        let enable_search = preferences.search_enabled();

        Self {
            store,
            registry,
            turns: TurnRegistry::new(),
            stream,
            client: reqwest::Client::new(),
            base_url,
            paths,
            preferences,
            logging,
            active_persona_id,
            enable_search,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn personas(&self) -> &[PersonaConfig] {
        self.registry.list()
    }

    pub fn active_persona(&self) -> &PersonaConfig {
        self.registry.resolve(&self.active_persona_id)
    }

    pub fn search_enabled(&self) -> bool {
        self.enable_search
    }

    pub fn is_processing(&self, session_id: &str) -> bool {
        self.turns.is_processing(session_id)
    }

    /// Cancel every in-flight turn; used on shutdown so spawned transport
    /// tasks stop promptly.
    pub fn shutdown(&mut self) {
        self.turns.cancel_all();
    }

    pub fn handle_intent(&mut self, intent: Intent) -> Vec<StoreEvent> {
        match intent {
            Intent::NewSession => self.new_session(),
            Intent::SendMessage(text) => self.send_message(text),
            Intent::SelectSession(id) => self.select_session(&id),
            Intent::SelectPersona(id) => self.select_persona(&id),
            Intent::UpdatePersonaKey { persona_id, key } => {
                self.update_persona_key(&persona_id, &key)
            }
            Intent::DeleteSession(id) => self.delete_session(&id),
            Intent::ToggleSearch => self.toggle_search(),
            Intent::ResendLast => self.resend_last(),
        }
    }

    /// Fold one pipeline event into the store. Terminal events persist the
    /// history and append the finished turn to the transcript log.
    pub fn apply_stream_event(&mut self, tag: &StreamTag, event: StreamEvent) -> Vec<StoreEvent> {
        let was_terminal = event.is_terminal();
        let notifications =
            reconcile::apply_stream_event(&mut self.store, &mut self.turns, tag, event);
        if was_terminal && !notifications.is_empty() {
            self.log_finished_turn(&tag.session_id, &tag.message_id);
            self.persist_history();
        }
        notifications
    }

    fn new_session(&mut self) -> Vec<StoreEvent> {
        self.store.create_session(&self.active_persona_id);
        self.persist_history();
        vec![StoreEvent::SessionListChanged, StoreEvent::ActiveSessionChanged]
    }

    fn select_session(&mut self, id: &str) -> Vec<StoreEvent> {
        if self.store.set_active(id) {
            vec![StoreEvent::ActiveSessionChanged]
        } else {
            Vec::new()
        }
    }

    fn select_persona(&mut self, id: &str) -> Vec<StoreEvent> {
        let resolved = self.registry.resolve(id).id.clone();
        self.active_persona_id = resolved.clone();
        self.preferences.default_persona = Some(resolved);
        self.persist_preferences();
        Vec::new()
    }

    fn update_persona_key(&mut self, persona_id: &str, key: &str) -> Vec<StoreEvent> {
        if self.registry.set_user_api_key(persona_id, key) {
            self.persist_keys();
        }
        Vec::new()
    }

    fn delete_session(&mut self, id: &str) -> Vec<StoreEvent> {
        let was_active = self.store.active_id() == Some(id);
        self.turns.cancel(id);
        if !self.store.delete_session(id) {
            return Vec::new();
        }
        self.persist_history();

        let mut events = vec![StoreEvent::SessionListChanged];
        if was_active {
            events.push(StoreEvent::ActiveSessionChanged);
        }
        events
    }

    fn toggle_search(&mut self) -> Vec<StoreEvent> {
        self.enable_search = !self.enable_search;
        self.preferences.enable_search = Some(self.enable_search);
        self.persist_preferences();
        Vec::new()
    }

    fn send_message(&mut self, text: String) -> Vec<StoreEvent> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let session_id = match self.store.active_id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.store.create_session(&self.active_persona_id);
                events.push(StoreEvent::ActiveSessionChanged);
                id
            }
        };

        // Processing gate: one turn per session at a time.
        if self.turns.is_processing(&session_id) {
            return Vec::new();
        }

        let user_message = Message::user(text);
        let user_message_id = user_message.id.clone();
        self.store
            .update_session(&session_id, |s| s.push_message(user_message));
        events.push(StoreEvent::SessionListChanged);
        events.push(StoreEvent::MessageUpdated {
            session_id: session_id.clone(),
            message_id: user_message_id,
        });

        events.extend(self.start_turn(&session_id));
        events
    }

    fn resend_last(&mut self) -> Vec<StoreEvent> {
        let Some(session_id) = self.store.active_id().map(str::to_string) else {
            return Vec::new();
        };
        if self.turns.is_processing(&session_id) {
            return Vec::new();
        }
        let Some(session) = self.store.session(&session_id) else {
            return Vec::new();
        };
        if session.last_user_message().is_none() {
            return Vec::new();
        }

        // Drop the trailing model reply (streamed or errored) so the last
        // user prompt becomes the prompt again.
        let mut dropped = false;
        self.store.update_session(&session_id, |s| {
            if s.messages.last().map(|m| m.role == Role::Model).unwrap_or(false) {
                s.messages.pop();
                dropped = true;
            }
        });

        let mut events = Vec::new();
        if dropped {
            events.push(StoreEvent::SessionListChanged);
        }
        events.extend(self.start_turn(&session_id));
        events
    }

    /// Append the placeholder reply and hand the turn to the stream
    /// service. The history snapshot excludes the placeholder.
    fn start_turn(&mut self, session_id: &str) -> Vec<StoreEvent> {
        if self.turns.is_processing(session_id) {
            return Vec::new();
        }
        let Some(history) = self.store.session(session_id).map(|s| s.messages.clone()) else {
            return Vec::new();
        };

        let placeholder = Message::pending_model();
        let message_id = placeholder.id.clone();
        self.store
            .update_session(session_id, |s| s.push_message(placeholder));

        let Some((stream_id, cancel_token)) = self.turns.begin(session_id, &message_id) else {
            return Vec::new();
        };

        let persona = self.active_persona().clone();
        let api_key = resolve_credential(&persona);

        self.stream.spawn_stream(StreamParams {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key,
            persona,
            history,
            enable_search: self.enable_search,
            cancel_token,
            tag: StreamTag {
                session_id: session_id.to_string(),
                message_id: message_id.clone(),
                stream_id,
            },
        });

        self.persist_history();
        vec![
            StoreEvent::SessionListChanged,
            StoreEvent::MessageUpdated {
                session_id: session_id.to_string(),
                message_id,
            },
        ]
    }

    fn log_finished_turn(&self, session_id: &str, message_id: &str) {
        if !self.logging.is_active() {
            return;
        }
        let Some(session) = self.store.session(session_id) else {
            return;
        };
        if let Some(prompt) = session.last_user_message() {
            if let Err(e) = self.logging.log_message(&format!("You: {}", prompt.text)) {
                warn!("failed to log prompt: {e}");
            }
        }
        if let Some(reply) = session.message(message_id) {
            let speaker = self.registry.resolve(&session.persona_id).display_name.clone();
            if let Err(e) = self.logging.log_message(&format!("{speaker}: {}", reply.text)) {
                warn!("failed to log reply: {e}");
            }
        }
    }

    fn persist_history(&self) {
        if let Some(paths) = &self.paths {
            if let Err(e) = save_history(&paths.history, &self.store.snapshot()) {
                warn!("failed to save history: {e}");
            }
        }
    }

    fn persist_keys(&self) {
        if let Some(paths) = &self.paths {
            if let Err(e) = save_key_overrides(&paths.keys, &self.registry.key_overrides()) {
                warn!("failed to save key overrides: {e}");
            }
        }
    }

    fn persist_preferences(&self) {
        if self.paths.is_none() {
            return;
        }
        if let Err(e) = self.preferences.save() {
            warn!("failed to save preferences: {e}");
        }
    }

    #[cfg(test)]
    pub(crate) fn session(&self, id: &str) -> Option<&crate::core::message::ChatSession> {
        self.store.session(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builtin_personas::PersonaConfig;

    fn test_registry() -> PersonaRegistry {
        PersonaRegistry::from_personas(vec![
            PersonaConfig {
                id: "alpha".to_string(),
                display_name: "Alpha".to_string(),
                provider: "Test".to_string(),
                description: String::new(),
                supports_search: true,
                supports_thinking: false,
                model: "model-a".to_string(),
                system_instruction: None,
                user_api_key: Some("sk-test".to_string()),
                tags: vec![],
            },
            PersonaConfig {
                id: "beta".to_string(),
                display_name: "Beta".to_string(),
                provider: "Test".to_string(),
                description: String::new(),
                supports_search: false,
                supports_thinking: true,
                model: "model-b".to_string(),
                system_instruction: None,
                user_api_key: None,
                tags: vec![],
            },
        ])
    }

    fn test_app() -> ChatApp {
        let (stream, _rx) = ChatStreamService::new();
        ChatApp::new(AppContext::ephemeral(test_registry()), stream)
    }

    #[tokio::test]
    async fn sending_creates_a_session_with_prompt_and_placeholder() {
        let mut app = test_app();

        let events = app.handle_intent(Intent::SendMessage("Hello world this is long".into()));
        assert!(events.contains(&StoreEvent::ActiveSessionChanged));

        let session = app.store().active_session().expect("active session");
        assert_eq!(session.title, "Hello world thi...");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].role, Role::Model);
        assert!(session.messages[1].text.is_empty());
        assert!(app.is_processing(&session.id));
    }

    #[tokio::test]
    async fn a_second_send_is_rejected_while_processing() {
        let mut app = test_app();
        app.handle_intent(Intent::SendMessage("first".into()));
        let session_id = app.store().active_id().unwrap().to_string();

        let events = app.handle_intent(Intent::SendMessage("second".into()));
        assert!(events.is_empty());
        assert_eq!(app.session(&session_id).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn sends_in_different_sessions_overlap() {
        let mut app = test_app();
        app.handle_intent(Intent::SendMessage("first".into()));
        let first = app.store().active_id().unwrap().to_string();

        app.handle_intent(Intent::NewSession);
        let events = app.handle_intent(Intent::SendMessage("second".into()));
        let second = app.store().active_id().unwrap().to_string();

        assert!(!events.is_empty());
        assert_ne!(first, second);
        assert!(app.is_processing(&first));
        assert!(app.is_processing(&second));
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut app = test_app();
        assert!(app.handle_intent(Intent::SendMessage("   ".into())).is_empty());
        assert!(app.store().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_streaming_session_cancels_its_turn() {
        let mut app = test_app();
        app.handle_intent(Intent::SendMessage("hello".into()));
        let session_id = app.store().active_id().unwrap().to_string();
        assert!(app.is_processing(&session_id));

        let events = app.handle_intent(Intent::DeleteSession(session_id.clone()));
        assert!(events.contains(&StoreEvent::SessionListChanged));
        assert!(events.contains(&StoreEvent::ActiveSessionChanged));
        assert!(!app.is_processing(&session_id));
        assert!(app.store().is_empty());
        assert_eq!(app.store().active_id(), None);
    }

    #[tokio::test]
    async fn stream_events_flow_into_the_placeholder() {
        let mut app = test_app();
        app.handle_intent(Intent::SendMessage("question".into()));
        let session_id = app.store().active_id().unwrap().to_string();
        let message_id = app.session(&session_id).unwrap().messages[1].id.clone();
        let tag = StreamTag {
            session_id: session_id.clone(),
            message_id: message_id.clone(),
            stream_id: 1,
        };

        app.apply_stream_event(&tag, StreamEvent::Chunk("answer".into()));
        app.apply_stream_event(&tag, StreamEvent::Completed);

        let message = app.session(&session_id).unwrap().message(&message_id).unwrap().clone();
        assert_eq!(message.text, "answer");
        assert!(!app.is_processing(&session_id));
    }

    #[tokio::test]
    async fn resend_drops_the_stale_reply_and_streams_again() {
        let mut app = test_app();
        app.handle_intent(Intent::SendMessage("question".into()));
        let session_id = app.store().active_id().unwrap().to_string();
        let first_reply_id = app.session(&session_id).unwrap().messages[1].id.clone();
        let tag = StreamTag {
            session_id: session_id.clone(),
            message_id: first_reply_id.clone(),
            stream_id: 1,
        };
        app.apply_stream_event(&tag, StreamEvent::Errored("**failed**".into()));
        assert!(!app.is_processing(&session_id));

        app.handle_intent(Intent::ResendLast);

        let session = app.session(&session_id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_ne!(session.messages[1].id, first_reply_id);
        assert!(session.messages[1].text.is_empty());
        assert!(!session.messages[1].is_error);
        assert!(app.is_processing(&session_id));
    }

    #[tokio::test]
    async fn resend_without_a_user_message_is_ignored() {
        let mut app = test_app();
        app.handle_intent(Intent::NewSession);
        assert!(app.handle_intent(Intent::ResendLast).is_empty());
    }

    #[test]
    fn selecting_an_unknown_persona_degrades_to_the_first() {
        let (stream, _rx) = ChatStreamService::new();
        let mut app = ChatApp::new(AppContext::ephemeral(test_registry()), stream);

        app.handle_intent(Intent::SelectPersona("beta".into()));
        assert_eq!(app.active_persona().id, "beta");

        app.handle_intent(Intent::SelectPersona("missing".into()));
        assert_eq!(app.active_persona().id, "alpha");
    }

    #[test]
    fn toggling_search_flips_the_flag() {
        let mut app = test_app();
        assert!(app.search_enabled());
        app.handle_intent(Intent::ToggleSearch);
        assert!(!app.search_enabled());
        app.handle_intent(Intent::ToggleSearch);
        assert!(app.search_enabled());
    }

    #[test]
    fn updating_a_key_lands_on_the_persona() {
        let mut app = test_app();
        app.handle_intent(Intent::UpdatePersonaKey {
            persona_id: "beta".to_string(),
            key: "sk-new".to_string(),
        });
        let beta = app.personas().iter().find(|p| p.id == "beta").unwrap();
        assert_eq!(beta.user_api_key.as_deref(), Some("sk-new"));
    }
}
