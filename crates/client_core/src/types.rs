use chrono::{DateTime, Utc};
use shared::{
    domain::{
        ConnectionState, ContentKind, GroupId, GroupSummary, MessageBody, MessageId, Scope,
        Sequence, UserId, UserSummary,
    },
    protocol::MessagePayload,
};

use crate::error::{AuthFailure, DataError};

/// A validated message. Only values of this type ever enter a conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sequence: Sequence,
    /// Display only; never used for ordering.
    pub timestamp: Option<DateTime<Utc>>,
    pub scope: Scope,
    pub sender_id: UserId,
    pub sender_display_name: String,
    pub sender_avatar_ref: Option<String>,
    pub content_kind: ContentKind,
    pub body: MessageBody,
}

impl ChatMessage {
    /// Validates a wire payload. `expected_scope` is the scope the delivery was requested
    /// for (history and reconciliation); push deliveries must name their own scope.
    pub fn from_payload(
        payload: MessagePayload,
        expected_scope: Option<Scope>,
    ) -> Result<Self, DataError> {
        let id = payload.id.ok_or(DataError::MissingId)?;
        let sequence = payload
            .sequence
            .ok_or_else(|| DataError::MissingSequence(id.clone()))?;
        let sender_id = payload
            .sender_id
            .ok_or_else(|| DataError::MissingSender(id.clone()))?;
        let scope = match (payload.scope, expected_scope) {
            (Some(own), Some(expected)) if own != expected => {
                return Err(DataError::ScopeMismatch { id, expected });
            }
            (Some(own), _) => own,
            (None, Some(expected)) => expected,
            (None, None) => return Err(DataError::MissingScope(id)),
        };
        let body = payload
            .payload
            .ok_or_else(|| DataError::MissingPayload(id.clone()))?;

        Ok(Self {
            id,
            sequence,
            timestamp: payload.timestamp,
            scope,
            sender_id,
            sender_display_name: payload.sender_display_name,
            sender_avatar_ref: payload.sender_avatar_ref,
            content_kind: payload.content_kind,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: UserId,
    pub session_token: String,
    pub connection_state: ConnectionState,
}

impl SessionContext {
    pub fn new(user_id: UserId, session_token: impl Into<String>) -> Self {
        Self {
            user_id,
            session_token: session_token.into(),
            connection_state: ConnectionState::Connecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Append,
    Prepend,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    Inserted {
        index: usize,
        position: InsertPosition,
        message: ChatMessage,
    },
    Removed {
        index: usize,
        id: MessageId,
    },
    Cleared {
        removed: usize,
    },
}

/// Per-conversation sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    Unloaded,
    LoadingInitial,
    Ready,
    Backfilling,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadChange {
    pub scope: Scope,
    pub count: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    LoggedOut,
    Invalidated(AuthFailure),
}

impl SessionEnd {
    pub fn requires_reauth(&self) -> bool {
        matches!(self, SessionEnd::Invalidated(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Store {
        scope: Scope,
        change: StoreChange,
    },
    Unread(UnreadChange),
    ConversationPhaseChanged {
        scope: Scope,
        phase: ConversationPhase,
    },
    ActiveScopeChanged(Option<Scope>),
    ConnectionStateChanged(ConnectionState),
    PresenceUpdated(Vec<UserSummary>),
    GroupUpdated(GroupSummary),
    GroupRemoved(GroupId),
    SessionEnded(SessionEnd),
    /// Transient, user-visible notice (failed poll, failed fallback send, ...).
    Notice(String),
}
