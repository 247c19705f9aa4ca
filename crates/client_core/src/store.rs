//! Per-scope ordered message buffer.
//!
//! Invariants: at most one entry per message id, entries sorted ascending by
//! `sequence`. Every mutation reports the index it touched so a renderer can patch its
//! view without re-reading the whole buffer.

use std::collections::HashSet;

use shared::domain::{MessageId, Scope, Sequence};

use crate::types::{ChatMessage, InsertPosition, StoreChange};

#[derive(Debug, Clone)]
pub struct ConversationStore {
    scope: Scope,
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
}

impl ConversationStore {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Inserts `message` unless its id is already present. `position` is a hint for the
    /// common case; the sequence order is kept either way.
    pub fn insert(
        &mut self,
        message: ChatMessage,
        position: InsertPosition,
    ) -> Option<StoreChange> {
        if self.ids.contains(&message.id) {
            return None;
        }

        let index = match position {
            InsertPosition::Append
                if self
                    .messages
                    .last()
                    .map_or(true, |last| last.sequence <= message.sequence) =>
            {
                self.messages.len()
            }
            InsertPosition::Prepend
                if self
                    .messages
                    .first()
                    .map_or(true, |first| first.sequence > message.sequence) =>
            {
                0
            }
            _ => self
                .messages
                .partition_point(|existing| existing.sequence <= message.sequence),
        };

        self.ids.insert(message.id.clone());
        self.messages.insert(index, message.clone());
        Some(StoreChange::Inserted {
            index,
            position,
            message,
        })
    }

    /// Merges a backfill page that is already in prepend (ascending) order. Entries
    /// whose ids are present, including repeats inside the page, are dropped.
    pub fn prepend_page(&mut self, page: Vec<ChatMessage>) -> Vec<StoreChange> {
        page.into_iter()
            .filter_map(|message| self.insert(message, InsertPosition::Prepend))
            .collect()
    }

    pub fn remove_by_id(&mut self, id: &MessageId) -> Option<StoreChange> {
        if !self.ids.remove(id) {
            return None;
        }
        let index = self.messages.iter().position(|message| &message.id == id)?;
        self.messages.remove(index);
        Some(StoreChange::Removed {
            index,
            id: id.clone(),
        })
    }

    /// Drops every entry at once. Returns `None` when there was nothing to clear.
    pub fn clear(&mut self) -> Option<StoreChange> {
        if self.messages.is_empty() {
            return None;
        }
        let removed = self.messages.len();
        self.messages.clear();
        self.ids.clear();
        Some(StoreChange::Cleared { removed })
    }

    pub fn oldest_sequence(&self) -> Option<Sequence> {
        self.messages.first().map(|message| message.sequence)
    }

    pub fn newest_sequence(&self) -> Option<Sequence> {
        self.messages.last().map(|message| message.sequence)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn sequences(&self) -> Vec<Sequence> {
        self.messages.iter().map(|message| message.sequence).collect()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
