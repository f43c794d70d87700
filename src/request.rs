//! Per-chat handle for the single in-flight request.
//!
//! Starting a request cancels whatever the chat had in flight and bumps a
//! generation counter. Updates tagged with an older generation are stale and
//! must not touch the handle of the request that replaced them.

use crate::types::ChatId;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct InFlight {
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct RequestSlot {
    current: Option<InFlight>,
    generation: u64,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any previous request and installs a fresh handle.
    pub fn begin(&mut self) -> InFlight {
        if let Some(prev) = self.current.take() {
            tracing::debug!("Cancelling in-flight request gen {}", prev.generation);
            prev.token.cancel();
        }
        self.generation += 1;
        let handle = InFlight {
            generation: self.generation,
            token: CancellationToken::new(),
        };
        self.current = Some(handle.clone());
        handle
    }

    /// Releases the handle if `generation` is still the current request.
    pub fn finish(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn abort(&mut self) -> bool {
        match self.current.take() {
            Some(cur) => {
                cur.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        matches!(&self.current, Some(cur) if cur.generation == generation)
    }

    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }
}

/// Request slots for every chat, created lazily.
#[derive(Debug, Default)]
pub struct RequestTable {
    slots: HashMap<ChatId, RequestSlot>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, chat: &ChatId) -> InFlight {
        self.slots.entry(chat.clone()).or_default().begin()
    }

    pub fn finish(&mut self, chat: &ChatId, generation: u64) -> bool {
        match self.slots.get_mut(chat) {
            Some(slot) => slot.finish(generation),
            None => false,
        }
    }

    pub fn abort(&mut self, chat: &ChatId) -> bool {
        match self.slots.get_mut(chat) {
            Some(slot) => slot.abort(),
            None => false,
        }
    }

    pub fn is_current(&self, chat: &ChatId, generation: u64) -> bool {
        match self.slots.get(chat) {
            Some(slot) => slot.is_current(generation),
            None => false,
        }
    }

    pub fn in_flight(&self, chat: &ChatId) -> bool {
        match self.slots.get(chat) {
            Some(slot) => slot.in_flight(),
            None => false,
        }
    }

    /// Cancels and forgets the slot of a closed chat.
    pub fn remove(&mut self, chat: &ChatId) {
        if let Some(mut slot) = self.slots.remove(chat) {
            slot.abort();
        }
    }

    pub fn abort_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.abort();
        }
    }
}
