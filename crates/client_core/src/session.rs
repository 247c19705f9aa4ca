use shared::domain::{ConnectionState, UserId};
use tracing::info;

use crate::{
    error::{AuthFailure, SyncError},
    types::SessionContext,
};

/// Owns the current `SessionContext`. Everything else asks the guard before acting and
/// treats a missing session as "do nothing".
#[derive(Debug, Default)]
pub struct SessionGuard {
    context: Option<SessionContext>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn establish(&mut self, context: SessionContext) {
        info!(user_id = context.user_id.0, "session: established");
        self.context = Some(context);
    }

    pub fn is_valid(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn require(&self) -> Result<&SessionContext, SyncError> {
        self.context.as_ref().ok_or(SyncError::NoSession)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.context.as_ref().map(|context| context.user_id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.context
            .as_ref()
            .map_or(ConnectionState::Disconnected, |context| {
                context.connection_state
            })
    }

    /// Records a channel transition. Returns `false` when there is no session or the
    /// state did not change.
    pub fn set_connection_state(&mut self, state: ConnectionState) -> bool {
        match self.context.as_mut() {
            Some(context) if context.connection_state != state => {
                context.connection_state = state;
                true
            }
            _ => false,
        }
    }

    /// Drops the session. `reason` is `None` for an explicit logout.
    pub fn invalidate(&mut self, reason: Option<&AuthFailure>) -> Option<SessionContext> {
        let context = self.context.take()?;
        match reason {
            Some(reason) => info!(user_id = context.user_id.0, %reason, "session: invalidated"),
            None => info!(user_id = context.user_id.0, "session: logged out"),
        }
        Some(context)
    }
}
