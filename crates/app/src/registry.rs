//! Popup registry: one record per chat popup and the rules for merging streamed
//! fragments into the right transcript entry.
//!
//! Sessions are only ever appended. Closing hides a session but keeps its slot,
//! so a late fragment for a closed popup lands in its own (hidden) record and an
//! index never points at a different conversation.

use services::selection::Point;
use shared::wire::{OutgoingRequest, Role, RoleConvention};

pub type SessionIndex = usize;

/// Whether the session may take a new user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingResponse,
    Ready,
}

/// How a session starts out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opening {
    /// Nothing sent yet; the user may type right away.
    Idle,
    /// A request goes out as part of opening.
    AutoSend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    /// Synthetic entry describing a failure; never sent back to the backend.
    pub is_error: bool,
}

impl Message {
    fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            is_error: false,
        }
    }

    fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            is_error: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub index: SessionIndex,
    pub transcript: Vec<Message>,
    pub role_convention: RoleConvention,
    pub turn_state: TurnState,
    pub anchor: Point,
    pub is_open: bool,
    pub header: String,
    pub pinned: bool,
    pub z_order: u32,
}

impl Session {
    /// Input is enabled only between turns, or before the first user message of a
    /// user-first session.
    pub fn accepts_input(&self) -> bool {
        self.turn_state == TurnState::Ready
            || (self.role_convention == RoleConvention::UserFirst && self.transcript.is_empty())
    }

    /// Request carrying the whole conversation; the backend keeps no history.
    pub fn request(&self) -> OutgoingRequest {
        self.request_upto(self.transcript.len())
    }

    fn request_upto(&self, end: usize) -> OutgoingRequest {
        let sent = self.transcript[..end].iter().filter(|m| !m.is_error);
        let (roles, transcript) = sent.map(|m| (m.role, m.text.clone())).unzip();
        OutgoingRequest {
            session_index: self.index,
            transcript,
            role_convention: self.role_convention,
            roles,
        }
    }

    pub fn last_text(&self) -> Option<&str> {
        self.transcript.last().map(|m| m.text.as_str())
    }

    /// Position of the first entry of the trailing answer (every assistant
    /// entry after the last user entry, error entries included). `None` while
    /// a turn is running or when there is no answer to replace.
    fn answer_start(&self) -> Option<usize> {
        if self.turn_state != TurnState::Ready {
            return None;
        }
        let start = self
            .transcript
            .iter()
            .rposition(|m| m.role != Role::Assistant)
            .map_or(0, |p| p + 1);
        (start < self.transcript.len()).then_some(start)
    }

    /// Whether the next fragment opens a new assistant entry instead of
    /// extending the last one.
    fn fragment_starts_entry(&self) -> bool {
        if self.turn_state == TurnState::Ready {
            return true;
        }
        match self.transcript.last() {
            Some(last) => last.role != Role::Assistant || last.is_error,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct PopupRegistry {
    sessions: Vec<Session>,
    top_z: u32,
}

impl PopupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, index: SessionIndex) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Open sessions, back to front.
    pub fn visible_sessions(&self) -> Vec<&Session> {
        let mut open: Vec<&Session> = self.sessions.iter().filter(|s| s.is_open).collect();
        open.sort_by_key(|s| s.z_order);
        open
    }

    /// Append a session. Its index is the collection length before the append.
    pub fn create_session(
        &mut self,
        role_convention: RoleConvention,
        opening: Opening,
        anchor: Point,
        header: impl Into<String>,
    ) -> SessionIndex {
        let index = self.sessions.len();
        self.top_z += 1;
        self.sessions.push(Session {
            index,
            transcript: Vec::new(),
            role_convention,
            turn_state: match opening {
                Opening::Idle => TurnState::Ready,
                Opening::AutoSend => TurnState::AwaitingResponse,
            },
            anchor,
            is_open: true,
            header: header.into(),
            pinned: false,
            z_order: self.top_z,
        });
        tracing::debug!("created session {} ({:?}, {:?})", index, role_convention, opening);
        index
    }

    /// Append a user message and return the request to send.
    ///
    /// Blank text, an unknown index, or a session that is not accepting input
    /// leave everything untouched and return `None`.
    pub fn submit_user_message(&mut self, index: SessionIndex, text: &str) -> Option<OutgoingRequest> {
        if text.trim().is_empty() {
            return None;
        }
        let session = self.sessions.get_mut(index)?;
        if !session.accepts_input() {
            tracing::debug!("session {}: rejected message while awaiting response", index);
            return None;
        }
        session.transcript.push(Message::user(text));
        session.turn_state = TurnState::AwaitingResponse;
        Some(session.request())
    }

    /// Merge one streamed fragment. Returns false for an unknown index.
    pub fn apply_fragment(&mut self, index: SessionIndex, text: &str) -> bool {
        let Some(session) = self.sessions.get_mut(index) else {
            tracing::warn!("fragment for unknown session {}", index);
            return false;
        };
        if text.is_empty() {
            return true;
        }
        if session.fragment_starts_entry() {
            session.transcript.push(Message::assistant(text));
        } else if let Some(last) = session.transcript.last_mut() {
            last.text.push_str(text);
        }
        session.turn_state = TurnState::AwaitingResponse;
        true
    }

    /// Record a backend or transport failure as its own transcript entry.
    /// The turn state is left as it is; the terminal signal settles it.
    pub fn apply_error(&mut self, index: SessionIndex, message: &str) -> bool {
        let Some(session) = self.sessions.get_mut(index) else {
            tracing::warn!("error for unknown session {}: {}", index, message);
            return false;
        };
        session.transcript.push(Message {
            role: Role::Assistant,
            text: format!("An error occurred: {}", message),
            is_error: true,
        });
        true
    }

    pub fn mark_turn_complete(&mut self, index: SessionIndex) -> bool {
        match self.sessions.get_mut(index) {
            Some(session) => {
                session.turn_state = TurnState::Ready;
                true
            }
            None => false,
        }
    }

    pub fn close_session(&mut self, index: SessionIndex) -> bool {
        match self.sessions.get_mut(index) {
            Some(session) => {
                session.is_open = false;
                true
            }
            None => false,
        }
    }

    /// Request that asks for the last answer again, leaving the transcript
    /// untouched. Commit with [`PopupRegistry::regenerate`] once it is sent.
    pub fn regenerate_request(&self, index: SessionIndex) -> Option<OutgoingRequest> {
        let session = self.sessions.get(index)?;
        let start = session.answer_start()?;
        Some(session.request_upto(start))
    }

    /// Drop the last answer and ask for it again.
    ///
    /// Only between turns and only when the transcript ends with assistant
    /// output. The whole answer goes, partial text and error entries alike, so
    /// the replacement streams into a fresh entry.
    pub fn regenerate(&mut self, index: SessionIndex) -> Option<OutgoingRequest> {
        let session = self.sessions.get_mut(index)?;
        let start = session.answer_start()?;
        session.transcript.truncate(start);
        session.turn_state = TurnState::AwaitingResponse;
        Some(session.request())
    }

    /// Request for a session's current transcript, used for the opening send.
    pub fn request_for(&self, index: SessionIndex) -> Option<OutgoingRequest> {
        self.sessions.get(index).map(Session::request)
    }

    /// Release every waiting session. Returns the indices that changed.
    pub fn force_ready_all_awaiting(&mut self) -> Vec<SessionIndex> {
        self.sessions
            .iter_mut()
            .filter(|s| s.turn_state == TurnState::AwaitingResponse)
            .map(|s| {
                s.turn_state = TurnState::Ready;
                s.index
            })
            .collect()
    }

    pub fn move_session(&mut self, index: SessionIndex, anchor: Point) -> bool {
        match self.sessions.get_mut(index) {
            Some(session) => {
                session.anchor = anchor;
                true
            }
            None => false,
        }
    }

    /// Raise a popup above all others.
    pub fn focus_session(&mut self, index: SessionIndex) -> bool {
        let next = self.top_z + 1;
        match self.sessions.get_mut(index) {
            Some(session) => {
                session.z_order = next;
                self.top_z = next;
                true
            }
            None => false,
        }
    }

    /// Flip between page-scrolling and viewport-fixed placement.
    pub fn toggle_pin(&mut self, index: SessionIndex) -> Option<bool> {
        let session = self.sessions.get_mut(index)?;
        session.pinned = !session.pinned;
        Some(session.pinned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(registry: &PopupRegistry, index: SessionIndex) -> Vec<String> {
        registry
            .get(index)
            .unwrap()
            .transcript
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }

    fn open(registry: &mut PopupRegistry, convention: RoleConvention, opening: Opening) -> SessionIndex {
        registry.create_session(convention, opening, Point::default(), "Chat")
    }

    #[test]
    fn test_template_session_streams_answer() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        assert_eq!(i, 0);

        let req = registry.submit_user_message(i, "Explain: Paris").unwrap();
        assert_eq!(req.transcript, vec!["Explain: Paris"]);
        assert_eq!(registry.get(i).unwrap().turn_state, TurnState::AwaitingResponse);

        for fragment in ["It's", " the capital", " of France."] {
            assert!(registry.apply_fragment(i, fragment));
        }
        assert_eq!(texts(&registry, i), vec!["Explain: Paris", "It's the capital of France."]);
        assert_eq!(registry.get(i).unwrap().turn_state, TurnState::AwaitingResponse);

        registry.mark_turn_complete(i);
        assert_eq!(registry.get(i).unwrap().turn_state, TurnState::Ready);
    }

    #[test]
    fn test_assistant_first_greeting_then_user() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::AssistantFirst, Opening::AutoSend);

        registry.apply_fragment(i, "Hello, how can I help?");
        assert_eq!(texts(&registry, i), vec!["Hello, how can I help?"]);
        registry.mark_turn_complete(i);

        let req = registry.submit_user_message(i, "Summarize this page").unwrap();
        assert_eq!(req.transcript, vec!["Hello, how can I help?", "Summarize this page"]);
        assert_eq!(req.role_convention, RoleConvention::AssistantFirst);
        assert_eq!(req.roles, vec![Role::Assistant, Role::User]);
    }

    #[test]
    fn test_double_submit_is_rejected() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::Idle);

        assert!(registry.submit_user_message(i, "first").is_some());
        assert!(registry.submit_user_message(i, "second").is_none());
        assert_eq!(registry.get(i).unwrap().transcript.len(), 1);
    }

    #[test]
    fn test_blank_and_unknown_submit_are_noops() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::Idle);
        assert!(registry.submit_user_message(i, "  ").is_none());
        assert!(registry.submit_user_message(9, "hi").is_none());
        assert!(registry.get(i).unwrap().transcript.is_empty());
    }

    #[test]
    fn test_assistant_first_awaiting_rejects_user() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::AssistantFirst, Opening::AutoSend);
        assert!(registry.submit_user_message(i, "too early").is_none());
    }

    #[test]
    fn test_fragment_after_complete_starts_new_entry() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::AssistantFirst, Opening::AutoSend);
        registry.apply_fragment(i, "one");
        registry.mark_turn_complete(i);
        registry.apply_fragment(i, "two");

        assert_eq!(texts(&registry, i), vec!["one", "two"]);
        assert_eq!(registry.get(i).unwrap().turn_state, TurnState::AwaitingResponse);
    }

    #[test]
    fn test_streaming_never_adds_phantom_entries() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        registry.submit_user_message(i, "q");
        for fragment in ["", "a", "", "b", "c", ""] {
            registry.apply_fragment(i, fragment);
        }
        assert_eq!(texts(&registry, i), vec!["q", "abc"]);
    }

    #[test]
    fn test_indices_never_reused() {
        let mut registry = PopupRegistry::new();
        for n in 0..3 {
            assert_eq!(open(&mut registry, RoleConvention::UserFirst, Opening::Idle), n);
        }
        registry.close_session(2);
        assert_eq!(open(&mut registry, RoleConvention::UserFirst, Opening::Idle), 3);
        assert_eq!(registry.len(), 4);
        assert!(!registry.get(2).unwrap().is_open);
    }

    #[test]
    fn test_late_fragment_for_closed_session() {
        let mut registry = PopupRegistry::new();
        let a = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        let b = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        registry.submit_user_message(a, "qa");
        registry.submit_user_message(b, "qb");
        registry.close_session(a);

        registry.apply_fragment(a, "late");
        assert_eq!(texts(&registry, a), vec!["qa", "late"]);
        assert_eq!(texts(&registry, b), vec!["qb"]);
        assert_eq!(registry.visible_sessions().len(), 1);
    }

    #[test]
    fn test_force_ready_only_touches_waiting() {
        let mut registry = PopupRegistry::new();
        let a = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        let b = open(&mut registry, RoleConvention::AssistantFirst, Opening::AutoSend);
        let c = open(&mut registry, RoleConvention::UserFirst, Opening::Idle);

        assert_eq!(registry.force_ready_all_awaiting(), vec![a, b]);
        for i in [a, b, c] {
            assert_eq!(registry.get(i).unwrap().turn_state, TurnState::Ready);
        }
    }

    #[test]
    fn test_error_entry_is_separate_and_not_sent() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        registry.submit_user_message(i, "q");
        registry.apply_fragment(i, "partial");
        registry.apply_error(i, "stream read error");
        assert_eq!(registry.get(i).unwrap().turn_state, TurnState::AwaitingResponse);

        registry.apply_fragment(i, "more");
        assert_eq!(
            texts(&registry, i),
            vec!["q", "partial", "An error occurred: stream read error", "more"]
        );

        registry.mark_turn_complete(i);
        let req = registry.submit_user_message(i, "retry").unwrap();
        assert_eq!(req.transcript, vec!["q", "partial", "more", "retry"]);
    }

    #[test]
    fn test_regenerate_replaces_last_answer() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        registry.submit_user_message(i, "q");
        assert!(registry.regenerate(i).is_none());

        registry.apply_fragment(i, "old answer");
        registry.mark_turn_complete(i);

        let req = registry.regenerate(i).unwrap();
        assert_eq!(req.transcript, vec!["q"]);
        registry.apply_fragment(i, "new answer");
        assert_eq!(texts(&registry, i), vec!["q", "new answer"]);
    }

    #[test]
    fn test_regenerate_drops_partial_answer_and_error() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::UserFirst, Opening::AutoSend);
        registry.submit_user_message(i, "q");
        registry.apply_fragment(i, "partial");
        registry.apply_error(i, "stream read error");
        registry.mark_turn_complete(i);

        let preview = registry.regenerate_request(i).unwrap();
        assert_eq!(preview.transcript, vec!["q"]);
        assert_eq!(texts(&registry, i).len(), 3);

        let req = registry.regenerate(i).unwrap();
        assert_eq!(req.transcript, vec!["q"]);
        registry.apply_fragment(i, "fresh answer");
        assert_eq!(texts(&registry, i), vec!["q", "fresh answer"]);
    }

    #[test]
    fn test_regenerate_greeting_empties_transcript() {
        let mut registry = PopupRegistry::new();
        let i = open(&mut registry, RoleConvention::AssistantFirst, Opening::AutoSend);
        registry.apply_fragment(i, "Hello!");
        registry.mark_turn_complete(i);

        let req = registry.regenerate(i).unwrap();
        assert!(req.transcript.is_empty());
        assert!(texts(&registry, i).is_empty());
        assert!(registry.regenerate_request(i).is_none());
    }

    #[test]
    fn test_view_state() {
        let mut registry = PopupRegistry::new();
        let a = open(&mut registry, RoleConvention::UserFirst, Opening::Idle);
        let b = open(&mut registry, RoleConvention::UserFirst, Opening::Idle);
        assert_eq!(registry.visible_sessions()[1].index, b);

        registry.focus_session(a);
        assert_eq!(registry.visible_sessions()[1].index, a);

        registry.move_session(a, Point::new(40.0, 50.0));
        assert_eq!(registry.get(a).unwrap().anchor, Point::new(40.0, 50.0));
        assert_eq!(registry.toggle_pin(a), Some(true));
        assert_eq!(registry.toggle_pin(a), Some(false));
        assert_eq!(registry.toggle_pin(7), None);
    }
}
