//! Bridges spawned request tasks and the UI task.
//!
//! Each send runs on its own tokio task with a `ChannelObserver` that turns
//! stream callbacks into reducer actions tagged with the chat and the
//! request generation. The UI task owns `ChatState` and applies updates one
//! at a time through `Dispatcher::apply`.

use crate::client::ShopClient;
use crate::normalize::{normalize_cart, normalize_products, normalize_response};
use crate::reducer::{reduce, Action, ChatState, Envelope};
use crate::request::RequestTable;
use crate::streaming::{StreamObserver, StreamOutcome};
use crate::types::*;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub chat: ChatId,
    pub generation: u64,
    pub action: Action,
}

pub struct ChannelObserver {
    chat: ChatId,
    generation: u64,
    session: Option<String>,
    tx: mpsc::UnboundedSender<Update>,
}

impl ChannelObserver {
    pub fn new(chat: ChatId, generation: u64, tx: mpsc::UnboundedSender<Update>) -> Self {
        Self {
            chat,
            generation,
            session: None,
            tx,
        }
    }

    fn send(&self, action: Action) {
        let update = Update {
            chat: self.chat.clone(),
            generation: self.generation,
            action,
        };
        if self.tx.send(update).is_err() {
            tracing::debug!("UI channel closed; dropping update for {}", self.chat.short());
        }
    }

    fn learn(&mut self, session_id: Option<&str>) {
        let Some(id) = session_id.filter(|s| !s.is_empty()) else {
            return;
        };
        if self.session.as_deref() != Some(id) {
            self.session = Some(id.to_string());
            self.send(Action::SessionLearned {
                session_id: id.to_string(),
            });
        }
    }

    fn learn_from(&mut self, payload: &Value) {
        let id = payload
            .get("session_id")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        self.learn(id.as_deref());
    }
}

impl StreamObserver for ChannelObserver {
    fn on_thinking(&mut self, message: &str, session_id: Option<&str>) {
        self.learn(session_id);
        self.send(Action::Thinking {
            message: message.to_string(),
        });
    }

    fn on_tool_start(&mut self, tool: &str, status: &str, session_id: Option<&str>) {
        self.learn(session_id);
        self.send(Action::ToolStarted {
            tool: tool.to_string(),
            status: status.to_string(),
        });
    }

    fn on_response(&mut self, payload: Value) {
        self.learn_from(&payload);
        self.send(Action::Reply(normalize_response(&payload)));
    }

    fn on_raw_products(&mut self, payload: Value) {
        self.learn_from(&payload);
        self.send(Action::Products(normalize_products(&payload)));
    }

    fn on_raw_cart(&mut self, payload: Value) {
        self.learn_from(&payload);
        self.send(Action::Cart(normalize_cart(&payload)));
    }

    fn on_data(&mut self, payload: Value) {
        self.learn_from(&payload);
        tracing::debug!("[SSE] data frame for chat {}", self.chat.short());
    }

    fn on_error(&mut self, error: &ObservedError) {
        self.send(Action::Failed {
            message: error.to_string(),
        });
    }

    fn on_complete(&mut self, outcome: StreamOutcome) {
        self.send(Action::Completed { outcome });
    }
}

pub struct Dispatcher {
    client: Arc<ShopClient>,
    requests: RequestTable,
    tx: mpsc::UnboundedSender<Update>,
}

impl Dispatcher {
    pub fn new(client: Arc<ShopClient>) -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                requests: RequestTable::new(),
                tx,
            },
            rx,
        )
    }

    /// Sends `text` from the active chat. Returns the request generation, or
    /// `None` for blank input.
    pub fn send(&mut self, state: &mut ChatState, text: &str) -> Option<u64> {
        let chat = state.active_id().clone();
        self.send_to(state, &chat, text)
    }

    pub fn send_to(&mut self, state: &mut ChatState, chat: &ChatId, text: &str) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if !reduce(
            state,
            Envelope::new(
                chat.clone(),
                Action::UserSent {
                    text: text.to_string(),
                },
            ),
        ) {
            return None;
        }
        let session = state
            .session(chat)
            .and_then(|s| s.backend_session.clone());

        let handle = self.requests.begin(chat);
        let generation = handle.generation;
        let client = Arc::clone(&self.client);
        let mut observer = ChannelObserver::new(chat.clone(), generation, self.tx.clone());
        let message = text.to_string();

        tracing::info!(
            "Chat {} sending request gen {} ({:?})",
            chat.short(),
            generation,
            client.mode()
        );
        tokio::spawn(async move {
            let session = session.as_ref().map(|s| s.0.as_str());
            client
                .chat(&message, session, &handle.token, &mut observer)
                .await;
        });
        Some(generation)
    }

    /// Resends the active chat's last user text.
    pub fn retry(&mut self, state: &mut ChatState) -> Option<u64> {
        let text = state.active().last_user_text.clone()?;
        tracing::info!("Retrying last message in chat {}", state.active_id().short());
        self.send(state, &text)
    }

    /// Applies an update from a request task. Updates from a request that
    /// has since been replaced or aborted are dropped.
    pub fn apply(&mut self, state: &mut ChatState, update: Update) -> bool {
        let Update {
            chat,
            generation,
            action,
        } = update;
        if !self.requests.is_current(&chat, generation) {
            tracing::debug!(
                "Dropping stale {:?} for chat {} gen {}",
                action,
                chat.short(),
                generation
            );
            return false;
        }
        if matches!(action, Action::Completed { .. }) {
            self.requests.finish(&chat, generation);
        }
        reduce(state, Envelope::new(chat, action))
    }

    /// Cancels the active chat's request. Placeholders stay until the next
    /// send or terminal event.
    pub fn abort_active(&mut self, state: &ChatState) -> bool {
        let aborted = self.requests.abort(state.active_id());
        if aborted {
            tracing::info!("Aborted request in chat {}", state.active_id().short());
        }
        aborted
    }

    pub fn close_chat(&mut self, state: &mut ChatState, id: &ChatId) -> Result<()> {
        state.close_session(id)?;
        self.requests.remove(id);
        Ok(())
    }

    pub fn is_busy(&self, chat: &ChatId) -> bool {
        self.requests.in_flight(chat)
    }

    pub fn shutdown(&mut self) {
        self.requests.abort_all();
    }

    #[cfg(test)]
    fn begin_for_test(&mut self, chat: &ChatId) -> u64 {
        self.requests.begin(chat).generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_helper::FetchMode;

    fn dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<Update>) {
        let client = ShopClient::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:9/api/v1",
            FetchMode::Stream,
        );
        Dispatcher::new(Arc::new(client))
    }

    #[test]
    fn observer_learns_session_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut obs = ChannelObserver::new(ChatId::from("c1"), 1, tx);
        obs.on_thinking("Looking", Some("s-1"));
        obs.on_tool_start("search", "running", Some("s-1"));

        let mut actions = Vec::new();
        while let Ok(u) = rx.try_recv() {
            actions.push(u.action);
        }
        assert_eq!(
            actions[0],
            Action::SessionLearned {
                session_id: "s-1".into()
            }
        );
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn stale_generation_is_dropped() {
        let (mut d, _rx) = dispatcher();
        let mut state = ChatState::new();
        let chat = state.active_id().clone();
        let old = d.begin_for_test(&chat);
        let new = d.begin_for_test(&chat);

        let stale = Update {
            chat: chat.clone(),
            generation: old,
            action: Action::Thinking {
                message: "old".into(),
            },
        };
        assert!(!d.apply(&mut state, stale));
        assert!(state.active().messages.is_empty());

        let done = Update {
            chat: chat.clone(),
            generation: new,
            action: Action::Completed {
                outcome: StreamOutcome::Done,
            },
        };
        assert!(d.apply(&mut state, done));
        assert!(!d.is_busy(&chat));
    }

    #[test]
    fn closing_last_chat_is_refused() {
        let (mut d, _rx) = dispatcher();
        let mut state = ChatState::new();
        let only = state.active_id().clone();
        assert!(d.close_chat(&mut state, &only).is_err());
        assert_eq!(state.sessions().len(), 1);
    }

    #[test]
    fn blank_input_is_not_sent() {
        let (mut d, _rx) = dispatcher();
        let mut state = ChatState::new();
        assert_eq!(d.send(&mut state, "   "), None);
        assert!(state.active().messages.is_empty());
    }
}
