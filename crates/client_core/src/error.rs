use shared::domain::{MessageId, Scope};
use thiserror::Error;

/// Why a session stopped being valid. Every variant forces the same teardown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("session expired")]
    SessionExpired,
    #[error("account logged in elsewhere: {0}")]
    LoggedInElsewhere(String),
    #[error("credentials rejected")]
    Rejected,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("authentication failure: {0}")]
    Auth(#[from] AuthFailure),
    #[error("fallback request failed: {0}")]
    Request(String),
    #[error("malformed message: {0}")]
    Data(#[from] DataError),
    #[error("no active session")]
    NoSession,
    #[error("no conversation is open")]
    NoActiveConversation,
}

impl SyncError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

/// A single server-supplied message that cannot be merged. Only that entry is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("message is missing an id")]
    MissingId,
    #[error("message {0} is missing a sequence")]
    MissingSequence(MessageId),
    #[error("message {0} is missing a sender")]
    MissingSender(MessageId),
    #[error("message {0} has no scope")]
    MissingScope(MessageId),
    #[error("message {id} does not belong to {expected}")]
    ScopeMismatch { id: MessageId, expected: Scope },
    #[error("message {0} has no payload")]
    MissingPayload(MessageId),
}
