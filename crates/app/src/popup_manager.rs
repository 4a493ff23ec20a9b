//! Popup manager: turns page and user events into registry operations and
//! relay traffic.
//!
//! Every method handles one event to completion, so registry state is never
//! observed half-updated.

use services::selection::{anchors, Point, Rect, Selection, SelectionExtractor};
use services::template_picker::{PickerKey, TemplatePicker};
use shared::settings::AppSettings;
use shared::template::Template;
use shared::wire::{OutgoingRequest, RoleConvention};

use crate::registry::{Opening, PopupRegistry, SessionIndex};
use crate::relay::{Relay, Transport};

pub const ICON_SESSION_HEADER: &str = "Chat";

/// Page state reported with a pointer-up.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerUp {
    pub pointer: Point,
    pub selection_rect: Option<Rect>,
    pub scroll: Point,
}

pub struct PopupManager<T: Transport> {
    registry: PopupRegistry,
    relay: Relay<T>,
    templates: Vec<Template>,
    extractor: SelectionExtractor,
    picker: Option<TemplatePicker>,
    selection: Option<Selection>,
    popup_anchor: Point,
    settings: AppSettings,
}

impl<T: Transport> PopupManager<T> {
    /// Takes ownership of the relay and opens it; the relay lives as long as
    /// the manager.
    pub fn new(mut relay: Relay<T>, templates: Vec<Template>, settings: AppSettings) -> Self {
        relay.open();
        Self {
            registry: PopupRegistry::new(),
            relay,
            templates,
            extractor: SelectionExtractor::new(settings.selection),
            picker: None,
            selection: None,
            popup_anchor: Point::default(),
            settings,
        }
    }

    pub fn registry(&self) -> &PopupRegistry {
        &self.registry
    }

    pub fn relay(&self) -> &Relay<T> {
        &self.relay
    }

    pub fn picker(&self) -> Option<&TemplatePicker> {
        self.picker.as_ref()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Replace the picker's templates after the catalog changed.
    pub fn set_templates(&mut self, templates: Vec<Template>) {
        self.templates = templates;
    }

    /// Opens the template picker for a non-empty selection; an empty one
    /// dismisses it. Returns whether the picker is open afterwards.
    pub fn on_pointer_up(&mut self, page_text: &str, raw_selection: &str, event: PointerUp) -> bool {
        let Some(selection) = self.extractor.extract(page_text, raw_selection, event.pointer) else {
            self.picker = None;
            return false;
        };

        let anchors = anchors(event.selection_rect, event.pointer, event.scroll);
        self.popup_anchor = anchors.popup;
        self.picker = Some(TemplatePicker::new(self.templates.clone(), anchors.picker));
        tracing::debug!("selection of {} chars, picker opened", selection.selected_text.chars().count());
        self.selection = Some(selection);
        true
    }

    pub fn set_picker_query(&mut self, query: &str) {
        if let Some(picker) = self.picker.as_mut() {
            picker.set_query(query);
        }
    }

    /// Keyboard focus moved into the picker; the first row is highlighted.
    pub fn focus_picker(&mut self) {
        if let Some(picker) = self.picker.as_mut() {
            picker.focus();
        }
    }

    pub fn dismiss_picker(&mut self) {
        self.picker = None;
    }

    /// Forward a key to the picker; Enter on a row opens a session for it.
    pub fn on_picker_key(&mut self, key: PickerKey) -> Option<SessionIndex> {
        let template = self.picker.as_mut()?.handle_key(key)?;
        self.commit_template(&template)
    }

    /// Open a user-first session for `template` and send the rendered prompt.
    pub fn commit_template(&mut self, template: &Template) -> Option<SessionIndex> {
        let selection = self.selection.as_ref()?;
        let prompt = template.render(&selection.selected_text, &selection.surrounding_text);
        let header = template.header(&selection.selected_text);

        let index = self.registry.create_session(
            RoleConvention::UserFirst,
            Opening::AutoSend,
            self.popup_anchor,
            header,
        );
        let request = self.registry.submit_user_message(index, &prompt);
        self.dispatch(index, request);
        self.picker = None;
        Some(index)
    }

    /// Toolbar icon: a fresh assistant-first chat at the top-right corner.
    ///
    /// With a greeting prompt configured the assistant opens the conversation;
    /// otherwise the session starts idle and waits for the user.
    pub fn on_icon_click(&mut self, viewport_width: f32) -> SessionIndex {
        let popup = self.settings.popup;
        let anchor = Point::new(viewport_width - popup.width - popup.right_margin, 0.0);
        let greet = !self.settings.greeting_prompt.trim().is_empty();
        let opening = if greet { Opening::AutoSend } else { Opening::Idle };

        let index = self.registry.create_session(
            RoleConvention::AssistantFirst,
            opening,
            anchor,
            ICON_SESSION_HEADER,
        );
        if greet {
            let request = self.registry.request_for(index);
            self.dispatch(index, request);
        }
        index
    }

    /// User typed a message into a popup. Returns false when it was rejected.
    pub fn send_message(&mut self, index: SessionIndex, text: &str) -> bool {
        let request = self.registry.submit_user_message(index, text);
        let accepted = request.is_some();
        self.dispatch(index, request);
        accepted
    }

    /// Ask again for the last answer, replacing it.
    ///
    /// The old answer is dropped only once the request is out; a failed send
    /// keeps it and adds an error entry below.
    pub fn regenerate(&mut self, index: SessionIndex) -> bool {
        let Some(request) = self.registry.regenerate_request(index) else {
            return false;
        };
        match self.relay.send(&request) {
            Ok(()) => {
                self.registry.regenerate(index);
            }
            Err(e) => {
                tracing::warn!("session {}: regenerate failed: {}", index, e);
                self.registry.apply_error(index, &e.to_string());
            }
        }
        true
    }

    pub fn close_popup(&mut self, index: SessionIndex) -> bool {
        self.registry.close_session(index)
    }

    pub fn focus_popup(&mut self, index: SessionIndex) -> bool {
        self.registry.focus_session(index)
    }

    pub fn move_popup(&mut self, index: SessionIndex, to: Point) -> bool {
        self.registry.move_session(index, to)
    }

    pub fn toggle_pin(&mut self, index: SessionIndex) -> Option<bool> {
        self.registry.toggle_pin(index)
    }

    pub fn on_inbound(&mut self, raw: &str) -> Vec<SessionIndex> {
        self.relay.on_message(raw, &mut self.registry)
    }

    pub fn on_disconnect(&mut self) -> Vec<SessionIndex> {
        self.relay.on_disconnect(&mut self.registry)
    }

    /// Close the relay; in-flight answers are not cancelled.
    pub fn shutdown(&mut self) {
        self.relay.close();
    }

    /// Send `request`; a failed send is shown in the session and ends the turn.
    fn dispatch(&mut self, index: SessionIndex, request: Option<OutgoingRequest>) {
        let Some(request) = request else {
            return;
        };
        if let Err(e) = self.relay.send(&request) {
            tracing::warn!("session {}: send failed: {}", index, e);
            self.registry.apply_error(index, &e.to_string());
            self.registry.mark_turn_complete(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TurnState;
    use crate::relay::tests::MockTransport;
    use crate::relay::ChannelTransport;
    use agent_host::offline::EchoStream;
    use agent_host::AgentHost;
    use shared::wire::Role;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn manager() -> PopupManager<MockTransport> {
        manager_with(AppSettings::default())
    }

    fn manager_with(settings: AppSettings) -> PopupManager<MockTransport> {
        PopupManager::new(
            Relay::new(MockTransport::default()),
            vec![
                Template::new("Explain", "Explain: {selectedText}"),
                Template::new("Explain in context", "{selectedText} / {surroundingText}"),
            ],
            settings,
        )
    }

    fn select(m: &mut PopupManager<MockTransport>, page: &str, text: &str) -> bool {
        m.on_pointer_up(
            page,
            text,
            PointerUp {
                pointer: Point::new(100.0, 200.0),
                selection_rect: None,
                scroll: Point::new(0.0, 50.0),
            },
        )
    }

    fn texts<X: Transport>(m: &PopupManager<X>, index: SessionIndex) -> Vec<String> {
        m.registry()
            .get(index)
            .unwrap()
            .transcript
            .iter()
            .map(|msg| msg.text.clone())
            .collect()
    }

    #[test]
    fn test_select_pick_and_stream() {
        let mut m = manager();
        assert!(select(&mut m, "The capital of France is Paris.", "Paris"));
        assert_eq!(m.picker().unwrap().position(), Point::new(100.0, 250.0));

        m.focus_picker();
        let index = m.on_picker_key(PickerKey::Enter).unwrap();
        assert_eq!(index, 0);
        assert!(m.picker().is_none());

        let session = m.registry().get(index).unwrap();
        assert_eq!(session.header, "Explain: Paris");
        assert_eq!(session.anchor, Point::new(100.0, 200.0));
        assert_eq!(session.turn_state, TurnState::AwaitingResponse);
        assert_eq!(texts(&m, index), vec!["Explain: Paris"]);
        assert_eq!(m.relay().transport().sent[0].transcript, vec!["Explain: Paris"]);

        m.on_inbound(r#"{"sessionIndex":0,"fragment":"It's"}"#);
        m.on_inbound(r#"{"sessionIndex":0,"fragment":" the capital"}"#);
        m.on_inbound(r#"{"sessionIndex":0,"fragment":" of France."}"#);
        assert_eq!(texts(&m, index), vec!["Explain: Paris", "It's the capital of France."]);

        m.on_inbound(r#"{"sessionIndex":0,"terminal":true}"#);
        assert_eq!(m.registry().get(index).unwrap().turn_state, TurnState::Ready);
    }

    #[test]
    fn test_surrounding_text_reaches_prompt() {
        let mut m = manager();
        select(&mut m, "alpha beta gamma", "beta");
        let in_context = m.templates[1].clone();
        let index = m.commit_template(&in_context).unwrap();
        assert_eq!(texts(&m, index), vec!["beta / alpha beta gamma"]);
    }

    #[test]
    fn test_empty_selection_dismisses_picker() {
        let mut m = manager();
        select(&mut m, "page", "page");
        assert!(m.picker().is_some());
        assert!(!select(&mut m, "page", ""));
        assert!(m.picker().is_none());
    }

    #[test]
    fn test_custom_prompt_from_query() {
        let mut m = manager();
        select(&mut m, "Rust ownership rules", "ownership");
        m.set_picker_query("Give an example of");
        let index = m.on_picker_key(PickerKey::Enter).unwrap();
        assert_eq!(texts(&m, index), vec!["Give an example of:\nownership"]);
    }

    #[test]
    fn test_icon_click_assistant_first_flow() {
        let mut m = manager();
        let index = m.on_icon_click(1280.0);

        let session = m.registry().get(index).unwrap();
        assert_eq!(session.anchor, Point::new(852.0, 0.0));
        assert_eq!(session.role_convention, RoleConvention::AssistantFirst);
        assert!(m.relay().transport().sent[0].transcript.is_empty());

        m.on_inbound(r#"{"sessionIndex":0,"fragment":"Hello, how can I help?"}"#);
        assert_eq!(texts(&m, index), vec!["Hello, how can I help?"]);
        m.on_inbound(r#"{"sessionIndex":0,"terminal":true}"#);

        assert!(m.send_message(index, "Summarize this page"));
        assert_eq!(texts(&m, index), vec!["Hello, how can I help?", "Summarize this page"]);
        let sent = &m.relay().transport().sent[1];
        assert_eq!(sent.transcript, vec!["Hello, how can I help?", "Summarize this page"]);
        assert_eq!(sent.role_convention, RoleConvention::AssistantFirst);
        assert_eq!(sent.roles, vec![Role::Assistant, Role::User]);
    }

    #[test]
    fn test_icon_click_without_greeting_opens_idle() {
        let settings = AppSettings {
            greeting_prompt: String::new(),
            ..AppSettings::default()
        };
        let mut m = manager_with(settings);
        let index = m.on_icon_click(1000.0);
        assert_eq!(m.registry().get(index).unwrap().turn_state, TurnState::Ready);
        assert!(m.relay().transport().sent.is_empty());
        assert!(m.send_message(index, "Hi"));
    }

    #[test]
    fn test_disconnect_releases_only_waiting_sessions() {
        let mut m = manager();
        select(&mut m, "one two three", "one");
        let a = m.commit_template(&Template::new("A", "{selectedText}")).unwrap();
        select(&mut m, "one two three", "two");
        let b = m.commit_template(&Template::new("B", "{selectedText}")).unwrap();
        select(&mut m, "one two three", "three");
        let c = m.commit_template(&Template::new("C", "{selectedText}")).unwrap();
        m.on_inbound(r#"{"sessionIndex":2,"terminal":true}"#);

        assert_eq!(m.on_disconnect(), vec![a, b]);
        for i in [a, b, c] {
            assert_eq!(m.registry().get(i).unwrap().turn_state, TurnState::Ready);
        }
    }

    #[test]
    fn test_send_after_disconnect_shows_error() {
        let mut m = manager();
        let index = m.on_icon_click(800.0);
        m.on_disconnect();

        assert!(m.send_message(index, "anyone there?"));
        let session = m.registry().get(index).unwrap();
        assert!(session.transcript.last().unwrap().is_error);
        assert_eq!(session.turn_state, TurnState::Ready);
    }

    #[test]
    fn test_regenerate_and_double_send() {
        let mut m = manager();
        select(&mut m, "x", "x");
        let index = m.commit_template(&Template::new("T", "{selectedText}?")).unwrap();
        assert!(!m.send_message(index, "again"));
        m.on_inbound(r#"{"sessionIndex":0,"fragment":"first"}"#);
        m.on_inbound(r#"{"sessionIndex":0,"terminal":true}"#);

        assert!(m.regenerate(index));
        assert_eq!(m.relay().transport().sent.last().unwrap().transcript, vec!["x?"]);
        m.on_inbound(r#"{"sessionIndex":0,"fragment":"second"}"#);
        assert_eq!(texts(&m, index), vec!["x?", "second"]);
    }

    #[test]
    fn test_transport_failure_shows_error_and_releases_turn() {
        let mut m = manager();
        m.relay.transport_mut().fail = true;
        select(&mut m, "The capital of France is Paris.", "Paris");
        let index = m.commit_template(&Template::new("Explain", "Explain: {selectedText}")).unwrap();

        let session = m.registry().get(index).unwrap();
        assert_eq!(session.turn_state, TurnState::Ready);
        assert_eq!(
            texts(&m, index),
            vec!["Explain: Paris", "An error occurred: transport failed: port closed"]
        );
        assert!(session.transcript[1].is_error);
        assert!(m.relay().transport().sent.is_empty());
    }

    #[test]
    fn test_failed_regenerate_keeps_answer() {
        let mut m = manager();
        select(&mut m, "x", "x");
        let index = m.commit_template(&Template::new("T", "{selectedText}?")).unwrap();
        m.on_inbound(r#"{"sessionIndex":0,"fragment":"kept"}"#);
        m.on_inbound(r#"{"sessionIndex":0,"terminal":true}"#);

        m.relay.transport_mut().fail = true;
        assert!(m.regenerate(index));
        let session = m.registry().get(index).unwrap();
        assert_eq!(session.turn_state, TurnState::Ready);
        let shown = texts(&m, index);
        assert_eq!(&shown[..2], ["x?", "kept"]);
        assert!(session.transcript[2].is_error);

        m.relay.transport_mut().fail = false;
        assert!(m.regenerate(index));
        assert_eq!(m.relay().transport().sent.last().unwrap().transcript, vec!["x?"]);
        assert_eq!(texts(&m, index), vec!["x?"]);
    }

    #[test]
    fn test_shutdown_closes_transport() {
        let mut m = manager();
        m.shutdown();
        assert!(m.relay().transport().closed);
    }

    #[tokio::test]
    async fn test_round_trip_through_host() {
        let (transport, requests) = ChannelTransport::pair();
        let (events_tx, mut events) = unbounded_channel();
        let host = Arc::new(AgentHost::with_source(
            Arc::new(EchoStream::new(Duration::ZERO)),
            "greet",
        ));
        let handle = host.spawn(requests, events_tx);

        let template = Template::new("Explain", "Explain: {selectedText}");
        let mut m = PopupManager::new(Relay::new(transport), vec![template.clone()], AppSettings::default());
        m.on_pointer_up("Paris is nice", "Paris", PointerUp::default());
        let index = m.commit_template(&template).unwrap();

        while m.registry().get(index).unwrap().turn_state == TurnState::AwaitingResponse {
            let raw = events.recv().await.unwrap();
            m.on_inbound(&raw);
        }
        assert_eq!(
            texts(&m, index),
            vec!["Explain: Paris", "You said: Explain: Paris"]
        );

        m.shutdown();
        handle.await.unwrap();
        assert!(events.recv().await.is_none());
    }
}
