use std::collections::HashMap;

use shared::domain::{Scope, UserId};

use crate::types::{ChatMessage, UnreadChange};

/// Per-scope unread counters. Every method that changes a counter returns the change so
/// the caller can forward it to the title/badge collaborator.
#[derive(Debug, Default, Clone)]
pub struct UnreadTracker {
    counts: HashMap<Scope, u32>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A received message counts only when someone else wrote it and its scope is not
    /// the one on screen.
    pub fn should_count(
        message: &ChatMessage,
        local_user: UserId,
        active_scope: Option<Scope>,
    ) -> bool {
        message.sender_id != local_user && active_scope != Some(message.scope)
    }

    pub fn increment(&mut self, scope: Scope) -> UnreadChange {
        let count = self.counts.entry(scope).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        UnreadChange {
            scope,
            count,
            total: self.total(),
        }
    }

    pub fn reset(&mut self, scope: Scope) -> Option<UnreadChange> {
        let previous = self.counts.remove(&scope)?;
        if previous == 0 {
            return None;
        }
        Some(UnreadChange {
            scope,
            count: 0,
            total: self.total(),
        })
    }

    /// Zeroes every counter, reporting one change per scope that was non-zero.
    pub fn reset_all(&mut self) -> Vec<UnreadChange> {
        let mut scopes: Vec<Scope> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(scope, _)| *scope)
            .collect();
        scopes.sort_by_key(|scope| scope.group_id().map_or(i64::MIN, |group_id| group_id.0));
        self.counts.clear();
        scopes
            .into_iter()
            .map(|scope| UnreadChange {
                scope,
                count: 0,
                total: 0,
            })
            .collect()
    }

    pub fn count(&self, scope: Scope) -> u32 {
        self.counts.get(&scope).copied().unwrap_or(0)
    }

    /// Global unread plus the sum over all groups.
    pub fn total(&self) -> u32 {
        self.counts
            .values()
            .fold(0u32, |total, count| total.saturating_add(*count))
    }
}

/// Renders the window/tab title the badge collaborator shows.
pub fn badge_title(base: &str, total_unread: u32) -> String {
    match total_unread {
        0 => base.to_string(),
        1..=99 => format!("({total_unread}) {base}"),
        _ => format!("(99+) {base}"),
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
