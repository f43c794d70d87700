//! Chat state and the single reducer every update flows through.

use crate::constants::{SESSION_STARTED_PATTERN, TITLE_MAX_CHARS};
use crate::str_utils::ellipsize;
use crate::streaming::StreamOutcome;
use crate::types::*;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SESSION_STARTED: Regex =
        Regex::new(SESSION_STARTED_PATTERN).expect("Invalid session-started regex");
}

pub fn is_session_started_notice(text: &str) -> bool {
    SESSION_STARTED.is_match(text)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    UserSent { text: String },
    Thinking { message: String },
    ToolStarted { tool: String, status: String },
    Reply(MessageBody),
    Products(Vec<Product>),
    Cart(CartContext),
    Failed { message: String },
    SessionLearned { session_id: String },
    Completed { outcome: StreamOutcome },
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Reply(_) | Self::Products(_) | Self::Cart(_) | Self::Failed { .. }
        )
    }
}

/// An action addressed to one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub chat: ChatId,
    pub action: Action,
}

impl Envelope {
    pub fn new(chat: ChatId, action: Action) -> Self {
        Self { chat, action }
    }
}

#[derive(Debug)]
pub struct ChatState {
    sessions: Vec<ChatSession>,
    active: ChatId,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    pub fn new() -> Self {
        let first = ChatSession::new(ChatId::new());
        let active = first.id.clone();
        Self {
            sessions: vec![first],
            active,
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn active_id(&self) -> &ChatId {
        &self.active
    }

    pub fn active(&self) -> &ChatSession {
        // `active` always names a live session; see close_session.
        match self.sessions.iter().find(|s| s.id == self.active) {
            Some(s) => s,
            None => &self.sessions[0],
        }
    }

    pub fn active_index(&self) -> usize {
        self.sessions
            .iter()
            .position(|s| s.id == self.active)
            .unwrap_or(0)
    }

    pub fn session(&self, id: &ChatId) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    fn session_mut(&mut self, id: &ChatId) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| &s.id == id)
    }

    pub fn create_session(&mut self) -> ChatId {
        let session = ChatSession::new(ChatId::new());
        let id = session.id.clone();
        self.sessions.push(session);
        self.active = id.clone();
        tracing::debug!("Created chat {}", id.short());
        id
    }

    pub fn close_session(&mut self, id: &ChatId) -> Result<()> {
        if self.session(id).is_none() {
            return Err(ShopChatError::UnknownChat(id.to_string()).into());
        }
        if self.sessions.len() == 1 {
            return Err(ShopChatError::LastChat.into());
        }
        self.sessions.retain(|s| &s.id != id);
        if &self.active == id {
            self.active = self.sessions[0].id.clone();
        }
        tracing::debug!("Closed chat {}", id.short());
        Ok(())
    }

    pub fn switch_session(&mut self, id: &ChatId) -> Result<()> {
        if self.session(id).is_none() {
            return Err(ShopChatError::UnknownChat(id.to_string()).into());
        }
        self.active = id.clone();
        Ok(())
    }

    /// Moves the active chat by `offset`, wrapping around.
    pub fn cycle_session(&mut self, offset: isize) {
        let len = self.sessions.len() as isize;
        let idx = (self.active_index() as isize + offset).rem_euclid(len) as usize;
        self.active = self.sessions[idx].id.clone();
    }
}

fn push(session: &mut ChatSession, body: MessageBody) {
    session.messages.push(ChatMessage::new(body));
}

fn clear_placeholders(session: &mut ChatSession) {
    session.messages.retain(|m| !m.body.is_placeholder());
}

/// Applies one action to the chat it addresses. Returns false when that
/// chat no longer exists.
pub fn reduce(state: &mut ChatState, envelope: Envelope) -> bool {
    let Envelope { chat, action } = envelope;
    let session = match state.session_mut(&chat) {
        Some(s) => s,
        None => {
            tracing::debug!("Dropping {:?} for closed chat {}", action, chat.short());
            return false;
        }
    };

    if action.is_terminal() {
        clear_placeholders(session);
    }

    match action {
        Action::UserSent { text } => {
            if session.title == crate::constants::NEW_CHAT_TITLE {
                session.title = ellipsize(&text, TITLE_MAX_CHARS);
            }
            session.last_user_text = Some(text.clone());
            push(session, MessageBody::User { content: text });
        }
        Action::Thinking { message } => {
            session
                .messages
                .retain(|m| !matches!(m.body, MessageBody::Thinking { .. }));
            push(session, MessageBody::Thinking { message });
        }
        Action::ToolStarted { tool, status } => {
            session
                .messages
                .retain(|m| !matches!(m.body, MessageBody::ToolExecuting { .. }));
            push(session, MessageBody::ToolExecuting { tool, status });
        }
        Action::Reply(body) => {
            let suppressed = match &body {
                MessageBody::Bot { content } => {
                    content.trim().is_empty() || is_session_started_notice(content)
                }
                _ => false,
            };
            if suppressed {
                tracing::debug!("Suppressed session notice in chat {}", chat.short());
            } else {
                push(session, body);
            }
        }
        Action::Products(products) => {
            if products.is_empty() {
                push(
                    session,
                    MessageBody::Bot {
                        content: "I couldn't find any matching products.".to_string(),
                    },
                );
            } else {
                push(session, MessageBody::ProductList { products });
            }
        }
        Action::Cart(cart) => push(session, MessageBody::CartView { cart }),
        Action::Failed { message } => push(
            session,
            MessageBody::Error {
                message,
                retryable: true,
            },
        ),
        Action::SessionLearned { session_id } => {
            let learned = BackendSessionId(session_id);
            if session.backend_session.as_ref() != Some(&learned) {
                tracing::debug!("Chat {} bound to backend session {}", chat.short(), learned);
                session.backend_session = Some(learned);
            }
        }
        Action::Completed { outcome } => {
            if outcome != StreamOutcome::Aborted {
                clear_placeholders(session);
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_started_phrasing_matches() {
        assert!(is_session_started_notice("Session started"));
        assert!(is_session_started_notice("New session created: abc123"));
        assert!(is_session_started_notice("session initialized."));
        assert!(!is_session_started_notice("Your session of yoga mats is ready"));
    }

    #[test]
    fn thinking_placeholder_is_replaced_not_stacked() {
        let mut state = ChatState::new();
        let id = state.active_id().clone();
        for msg in ["one", "two"] {
            reduce(
                &mut state,
                Envelope::new(id.clone(), Action::Thinking { message: msg.into() }),
            );
        }
        let session = state.active();
        assert_eq!(session.placeholder_count(), 1);
        assert_eq!(
            session.messages[0].body,
            MessageBody::Thinking {
                message: "two".into()
            }
        );
    }

    #[test]
    fn title_is_taken_from_first_user_message() {
        let mut state = ChatState::new();
        let id = state.active_id().clone();
        reduce(
            &mut state,
            Envelope::new(
                id,
                Action::UserSent {
                    text: "show me running shoes under 3000 rupees please".into(),
                },
            ),
        );
        assert_eq!(state.active().title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn cycle_wraps_around() {
        let mut state = ChatState::new();
        let first = state.active_id().clone();
        state.create_session();
        state.cycle_session(1);
        assert_eq!(state.active_id(), &first);
        state.cycle_session(-1);
        assert_ne!(state.active_id(), &first);
    }
}
