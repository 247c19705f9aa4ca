//! Per-conversation sync state machine.
//!
//! `SyncEngine` is synchronous and does no I/O. Every operation returns [`Effects`]: the
//! push-channel requests to emit and the events to publish. The async driver in
//! `lib.rs` applies inputs one at a time, which keeps merges deterministic no matter in
//! which order the network completes.
//!
//! Staleness is decided with an epoch counter bumped on every conversation switch,
//! reconnect and teardown. A history reply is matched to the oldest pending request of
//! its kind for the scope its messages carry. Empty pages carry no scope and fall back to
//! the oldest pending request of their kind.

use std::collections::{HashMap, VecDeque};

use shared::{
    domain::{
        ConnectionState, GroupId, GroupSummary, MessageId, Scope, UserSummary, Watermark,
    },
    protocol::{ClientRequest, MessagePayload, RefreshMessagesResponse, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::{
    error::{AuthFailure, SyncError},
    protocol_client::is_success_status,
    session::SessionGuard,
    store::ConversationStore,
    types::{
        ChatMessage, ClientEvent, ConversationPhase, InsertPosition, SessionContext, SessionEnd,
    },
    unread::UnreadTracker,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Effects {
    pub requests: Vec<ClientRequest>,
    pub events: Vec<ClientEvent>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.events.is_empty()
    }

    fn request(&mut self, request: ClientRequest) {
        self.requests.push(request);
    }

    fn event(&mut self, event: ClientEvent) {
        self.events.push(event);
    }

    fn merge(&mut self, other: Effects) {
        self.requests.extend(other.requests);
        self.events.extend(other.events);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Initial,
    Backfill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingHistory {
    scope: Scope,
    kind: HistoryKind,
    epoch: u64,
}

/// What the reconciliation poller should ask for on its next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTarget {
    pub scope: Scope,
    pub last_update: Option<Watermark>,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    store: ConversationStore,
    phase: ConversationPhase,
    has_more_older: bool,
    watermark: Option<Watermark>,
}

impl Conversation {
    fn new(scope: Scope) -> Self {
        Self {
            store: ConversationStore::new(scope),
            phase: ConversationPhase::Unloaded,
            has_more_older: true,
            watermark: None,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn has_more_older(&self) -> bool {
        self.has_more_older
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    pub fn oldest_loaded_sequence(&self) -> Option<shared::domain::Sequence> {
        self.store.oldest_sequence()
    }
}

#[derive(Debug)]
pub struct SyncEngine {
    page_size: u32,
    session: SessionGuard,
    unread: UnreadTracker,
    conversations: HashMap<Scope, Conversation>,
    active: Option<Scope>,
    epoch: u64,
    pending: VecDeque<PendingHistory>,
    foreground: bool,
    groups: HashMap<GroupId, GroupSummary>,
    online_users: Vec<UserSummary>,
}

impl SyncEngine {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            session: SessionGuard::new(),
            unread: UnreadTracker::new(),
            conversations: HashMap::new(),
            active: None,
            epoch: 0,
            pending: VecDeque::new(),
            foreground: true,
            groups: HashMap::new(),
            online_users: Vec::new(),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.context()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_valid()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn active_scope(&self) -> Option<Scope> {
        self.active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn conversation(&self, scope: Scope) -> Option<&Conversation> {
        self.conversations.get(&scope)
    }

    pub fn phase(&self, scope: Scope) -> ConversationPhase {
        self.conversations
            .get(&scope)
            .map_or(ConversationPhase::Unloaded, Conversation::phase)
    }

    pub fn unread_count(&self, scope: Scope) -> u32 {
        self.unread.count(scope)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.total()
    }

    pub fn group(&self, group_id: GroupId) -> Option<&GroupSummary> {
        self.groups.get(&group_id)
    }

    pub fn online_users(&self) -> &[UserSummary] {
        &self.online_users
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    /// Installs a freshly authenticated (or restored) session. Any previous session's
    /// state is torn down first.
    pub fn establish_session(&mut self, context: SessionContext) -> Effects {
        let mut effects = self.teardown(SessionEnd::LoggedOut);
        effects.events.retain(|event| !matches!(event, ClientEvent::SessionEnded(_)));
        self.pending.clear();
        self.session.establish(context);
        effects
    }

    pub fn logout(&mut self) -> Effects {
        self.teardown(SessionEnd::LoggedOut)
    }

    /// The server rejected the session outside the push channel (fallback HTTP).
    pub fn auth_failed(&mut self, reason: AuthFailure) -> Effects {
        self.teardown(SessionEnd::Invalidated(reason))
    }

    /// Makes `scope` the visible conversation. On a switch the unread counter is reset
    /// before anything else so no increment for the new scope can slip in first.
    /// Counters never move for the active scope, so re-activating it resets nothing.
    pub fn activate(&mut self, scope: Scope) -> Effects {
        let mut effects = Effects::default();
        if !self.session.is_valid() {
            return effects;
        }

        if self.active != Some(scope) {
            if let Some(change) = self.unread.reset(scope) {
                effects.event(ClientEvent::Unread(change));
            }
            if let Some(previous) = self.active {
                if let Some(conversation) = self.conversations.get_mut(&previous) {
                    if conversation.phase == ConversationPhase::Backfilling {
                        conversation.phase = ConversationPhase::Ready;
                        effects.event(ClientEvent::ConversationPhaseChanged {
                            scope: previous,
                            phase: ConversationPhase::Ready,
                        });
                    }
                }
            }
            self.epoch += 1;
            self.active = Some(scope);
            debug!(scope = %scope, epoch = self.epoch, "sync: active conversation switched");
            effects.event(ClientEvent::ActiveScopeChanged(Some(scope)));
        }

        let phase = self
            .conversations
            .entry(scope)
            .or_insert_with(|| Conversation::new(scope))
            .phase;
        if matches!(phase, ConversationPhase::Unloaded | ConversationPhase::Error)
            && self.session.connection_state() == ConnectionState::Connected
        {
            effects.merge(self.start_initial_load(scope));
        }
        effects
    }

    /// Backward-scroll trigger for the active conversation. Ignored while a backfill is
    /// already in flight, before the initial page landed, or once history is exhausted.
    pub fn request_backfill(&mut self) -> Effects {
        let mut effects = Effects::default();
        let Some(context) = self.session.context() else {
            return effects;
        };
        if context.connection_state != ConnectionState::Connected {
            return effects;
        }
        let session_token = context.session_token.clone();
        let Some(scope) = self.active else {
            return effects;
        };
        let Some(conversation) = self.conversations.get_mut(&scope) else {
            return effects;
        };
        if conversation.phase != ConversationPhase::Ready || !conversation.has_more_older {
            return effects;
        }
        let Some(oldest) = conversation.store.oldest_sequence() else {
            return effects;
        };

        conversation.phase = ConversationPhase::Backfilling;
        self.pending.push_back(PendingHistory {
            scope,
            kind: HistoryKind::Backfill,
            epoch: self.epoch,
        });
        debug!(scope = %scope, older_than = oldest.0, "sync: requesting backfill");
        effects.event(ClientEvent::ConversationPhaseChanged {
            scope,
            phase: ConversationPhase::Backfilling,
        });
        effects.request(ClientRequest::Join {
            scope,
            session_token,
            cursor: Some(oldest),
            limit: self.page_size,
        });
        effects
    }

    pub fn handle_connection_state(&mut self, state: ConnectionState) -> Effects {
        let mut effects = Effects::default();
        if !self.session.set_connection_state(state) {
            return effects;
        }
        info!(?state, "sync: connection state changed");
        effects.event(ClientEvent::ConnectionStateChanged(state));

        match state {
            ConnectionState::Connected => effects.merge(self.resume_after_connect()),
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                effects.merge(self.fail_in_flight())
            }
        }
        effects
    }

    pub fn handle_server_event(&mut self, event: ServerEvent) -> Effects {
        if !self.session.is_valid() {
            debug!("sync: dropping server event without session");
            return Effects::default();
        }

        match event {
            ServerEvent::History {
                messages,
                last_update,
                load_more,
            } => self.handle_history(messages, last_update, load_more),
            ServerEvent::MessageReceived { message } => {
                match ChatMessage::from_payload(message, None) {
                    Ok(message) => self.ingest_live(vec![message]),
                    Err(err) => {
                        warn!(error = %err, "sync: skipping malformed pushed message");
                        Effects::default()
                    }
                }
            }
            ServerEvent::MessageDeleted { message_id } => self.remove_message(&message_id),
            ServerEvent::OnlineUsers { users } | ServerEvent::UsersUpdated { users } => {
                self.online_users = users.clone();
                let mut effects = Effects::default();
                effects.event(ClientEvent::PresenceUpdated(users));
                effects
            }
            ServerEvent::SessionExpired => {
                self.teardown(SessionEnd::Invalidated(AuthFailure::SessionExpired))
            }
            ServerEvent::AccountLoggedInElsewhere { message } => self.teardown(
                SessionEnd::Invalidated(AuthFailure::LoggedInElsewhere(message)),
            ),
            ServerEvent::GroupCreated { group } => {
                self.groups.insert(group.group_id, group.clone());
                let mut effects = Effects::default();
                effects.event(ClientEvent::GroupUpdated(group));
                effects
            }
            ServerEvent::GroupNameUpdated { group_id, name } => {
                self.update_group(group_id, |group| group.name = name)
            }
            ServerEvent::MembersAdded { group_id, members } => {
                self.update_group(group_id, |group| {
                    for member in members {
                        if !group.members.contains(&member) {
                            group.members.push(member);
                        }
                    }
                })
            }
            ServerEvent::MemberRemoved { group_id, user_id } => {
                if self.session.user_id() == Some(user_id) {
                    self.leave_group(group_id)
                } else {
                    self.update_group(group_id, |group| {
                        group.members.retain(|member| *member != user_id)
                    })
                }
            }
            ServerEvent::GroupDissolved { group_id } => self.leave_group(group_id),
            ServerEvent::AllGroupMessagesRecalled { group_id } => self.recall_all(group_id),
            ServerEvent::Error(api_error) => {
                if api_error.is_auth_failure() {
                    return self.teardown(SessionEnd::Invalidated(AuthFailure::Rejected));
                }
                warn!(code = ?api_error.code, message = %api_error.message, "sync: server error");
                let mut effects = self.reject_pending_history();
                effects.event(ClientEvent::Notice(api_error.message));
                effects
            }
        }
    }

    /// Next reconciliation poll, if one should run now.
    pub fn reconcile_target(&self) -> Option<ReconcileTarget> {
        if !self.session.is_valid() || !self.foreground {
            return None;
        }
        let scope = self.active?;
        let conversation = self.conversations.get(&scope)?;
        if conversation.phase == ConversationPhase::Unloaded {
            return None;
        }
        Some(ReconcileTarget {
            scope,
            last_update: conversation.watermark.clone(),
        })
    }

    /// Merges a reconciliation poll result. An unchanged watermark or an empty change
    /// list produces no effects at all.
    pub fn apply_reconciliation(
        &mut self,
        scope: Scope,
        response: RefreshMessagesResponse,
    ) -> Effects {
        if !self.session.is_valid() {
            return Effects::default();
        }
        if !is_success_status(&response.status) {
            warn!(scope = %scope, status = %response.status, "sync: reconciliation rejected");
            let mut effects = Effects::default();
            effects.event(ClientEvent::Notice(format!(
                "Background sync failed; retrying shortly ({})",
                response.status
            )));
            return effects;
        }
        let Some(conversation) = self.conversations.get_mut(&scope) else {
            return Effects::default();
        };
        if response.last_update.is_some() && response.last_update == conversation.watermark {
            return Effects::default();
        }
        if !response.has_new_messages || response.messages.is_empty() {
            if response.last_update.is_some() {
                conversation.watermark = response.last_update;
            }
            return Effects::default();
        }

        let batch = validate_batch(response.messages, scope);
        let effects = self.ingest_live(batch);
        if let (Some(conversation), Some(last_update)) =
            (self.conversations.get_mut(&scope), response.last_update)
        {
            conversation.watermark = Some(last_update);
        }
        effects
    }

    /// A failed poll is reported and left for the next tick. Auth failures tear the
    /// session down instead.
    pub fn reconciliation_failed(&mut self, scope: Scope, err: &SyncError) -> Effects {
        if !self.session.is_valid() {
            return Effects::default();
        }
        if let SyncError::Auth(reason) = err {
            return self.auth_failed(reason.clone());
        }
        warn!(scope = %scope, error = %err, "sync: reconciliation poll failed");
        let mut effects = Effects::default();
        effects.event(ClientEvent::Notice(format!(
            "Background sync failed; retrying shortly ({err})"
        )));
        effects
    }

    pub fn send_request(&self, content: &str) -> Result<ClientRequest, SyncError> {
        let context = self.session.require()?;
        let scope = self.active.ok_or(SyncError::NoActiveConversation)?;
        Ok(ClientRequest::Send {
            scope,
            content: content.to_string(),
            session_token: context.session_token.clone(),
        })
    }

    pub fn delete_request(&self, message_id: MessageId) -> Result<ClientRequest, SyncError> {
        let context = self.session.require()?;
        Ok(ClientRequest::DeleteMessage {
            message_id,
            user_id: context.user_id,
            session_token: context.session_token.clone(),
        })
    }

    pub fn online_users_request(&self) -> Option<ClientRequest> {
        self.session
            .is_valid()
            .then_some(ClientRequest::GetOnlineUsers)
    }

    fn start_initial_load(&mut self, scope: Scope) -> Effects {
        let mut effects = Effects::default();
        let Some(context) = self.session.context() else {
            return effects;
        };
        let session_token = context.session_token.clone();
        let conversation = self
            .conversations
            .entry(scope)
            .or_insert_with(|| Conversation::new(scope));
        conversation.phase = ConversationPhase::LoadingInitial;
        self.pending.push_back(PendingHistory {
            scope,
            kind: HistoryKind::Initial,
            epoch: self.epoch,
        });
        effects.event(ClientEvent::ConversationPhaseChanged {
            scope,
            phase: ConversationPhase::LoadingInitial,
        });
        effects.request(ClientRequest::Join {
            scope,
            session_token,
            cursor: None,
            limit: self.page_size,
        });
        effects
    }

    fn resume_after_connect(&mut self) -> Effects {
        let mut effects = Effects::default();
        let Some(context) = self.session.context() else {
            return effects;
        };
        effects.request(ClientRequest::Identify {
            user_id: context.user_id,
            session_token: context.session_token.clone(),
        });

        // Nothing sent on the previous connection will be answered on this one.
        self.pending.clear();
        self.epoch += 1;

        let mut reload: Vec<Scope> = self
            .conversations
            .iter()
            .filter(|(scope, conversation)| {
                Some(**scope) != self.active && conversation.phase == ConversationPhase::Error
            })
            .map(|(scope, _)| *scope)
            .collect();
        reload.sort_by_key(|scope| scope.group_id().map_or(i64::MIN, |group_id| group_id.0));
        if let Some(active) = self.active {
            reload.insert(0, active);
        }
        for scope in reload {
            effects.merge(self.start_initial_load(scope));
        }
        effects
    }

    fn fail_in_flight(&mut self) -> Effects {
        let mut effects = Effects::default();
        self.pending.clear();
        self.epoch += 1;
        let active = self.active;
        let mut failed: Vec<Scope> = Vec::new();
        for (scope, conversation) in self.conversations.iter_mut() {
            let in_flight = matches!(
                conversation.phase,
                ConversationPhase::LoadingInitial | ConversationPhase::Backfilling
            );
            let active_loaded =
                Some(*scope) == active && conversation.phase == ConversationPhase::Ready;
            if in_flight || active_loaded {
                conversation.phase = ConversationPhase::Error;
                failed.push(*scope);
            }
        }
        failed.sort_by_key(|scope| scope.group_id().map_or(i64::MIN, |group_id| group_id.0));
        for scope in failed {
            effects.event(ClientEvent::ConversationPhaseChanged {
                scope,
                phase: ConversationPhase::Error,
            });
        }
        effects
    }

    /// Takes the pending request a history reply answers: the oldest one of the same
    /// kind, restricted to the reply's scope when its messages carry one.
    fn claim_pending(
        &mut self,
        kind: HistoryKind,
        reply_scope: Option<Scope>,
    ) -> Option<PendingHistory> {
        let position = self.pending.iter().position(|pending| {
            pending.kind == kind && reply_scope.map_or(true, |scope| pending.scope == scope)
        })?;
        self.pending.remove(position)
    }

    /// A server `error` frame answers the oldest pending request instead of a history
    /// page. A failed initial load moves to `Error` and retries on the next activation
    /// or reconnect; a failed backfill returns to `Ready`.
    fn reject_pending_history(&mut self) -> Effects {
        let mut effects = Effects::default();
        let Some(pending) = self.pending.pop_front() else {
            return effects;
        };
        let Some(conversation) = self.conversations.get_mut(&pending.scope) else {
            return effects;
        };
        let phase = match (pending.kind, conversation.phase) {
            (HistoryKind::Initial, ConversationPhase::LoadingInitial) => ConversationPhase::Error,
            (HistoryKind::Backfill, ConversationPhase::Backfilling) => ConversationPhase::Ready,
            _ => return effects,
        };
        conversation.phase = phase;
        debug!(scope = %pending.scope, ?phase, "sync: history request rejected by server");
        effects.event(ClientEvent::ConversationPhaseChanged {
            scope: pending.scope,
            phase,
        });
        effects
    }

    fn handle_history(
        &mut self,
        messages: Vec<MessagePayload>,
        last_update: Option<Watermark>,
        load_more: bool,
    ) -> Effects {
        let mut effects = Effects::default();
        let kind = if load_more {
            HistoryKind::Backfill
        } else {
            HistoryKind::Initial
        };
        let reply_scope = messages.iter().find_map(|message| message.scope);
        let Some(pending) = self.claim_pending(kind, reply_scope) else {
            debug!(
                scope = ?reply_scope,
                load_more,
                "sync: history reply without a matching pending request, discarding"
            );
            return effects;
        };

        let received = messages.len();
        let exhausted = received < self.page_size as usize;
        let scope = pending.scope;

        match pending.kind {
            HistoryKind::Initial => {
                let Some(conversation) = self.conversations.get_mut(&scope) else {
                    return effects;
                };
                if conversation.phase != ConversationPhase::LoadingInitial {
                    debug!(scope = %scope, "sync: initial page no longer expected, discarding");
                    return effects;
                }
                let mut messages = messages;
                messages.reverse();
                for message in validate_batch(messages, scope) {
                    if let Some(change) = conversation.store.insert(message, InsertPosition::Append)
                    {
                        effects.event(ClientEvent::Store { scope, change });
                    }
                }
                // Only the first page sets the watermark. After a reload the store may have
                // a hole below the fresh page, filled by the next poll from the older mark.
                if conversation.watermark.is_none() {
                    conversation.watermark = last_update;
                }
                conversation.has_more_older = !exhausted;
                conversation.phase = ConversationPhase::Ready;
                debug!(scope = %scope, received, "sync: initial page merged");
            }
            HistoryKind::Backfill => {
                if pending.epoch != self.epoch || self.active != Some(scope) {
                    debug!(
                        scope = %scope,
                        request_epoch = pending.epoch,
                        epoch = self.epoch,
                        "sync: discarding stale backfill page"
                    );
                    return effects;
                }
                let Some(conversation) = self.conversations.get_mut(&scope) else {
                    return effects;
                };
                if conversation.phase != ConversationPhase::Backfilling {
                    return effects;
                }
                let page = validate_batch(messages, scope);
                for change in conversation.store.prepend_page(page) {
                    effects.event(ClientEvent::Store { scope, change });
                }
                if exhausted {
                    conversation.has_more_older = false;
                }
                conversation.phase = ConversationPhase::Ready;
                debug!(scope = %scope, received, "sync: backfill page merged");
            }
        }

        effects.event(ClientEvent::ConversationPhaseChanged {
            scope,
            phase: ConversationPhase::Ready,
        });
        effects
    }

    /// Push and reconciliation deliveries. Unread counters move only for entries that
    /// were actually new.
    fn ingest_live(&mut self, messages: Vec<ChatMessage>) -> Effects {
        let mut effects = Effects::default();
        let Some(local_user) = self.session.user_id() else {
            return effects;
        };
        for message in messages {
            let scope = message.scope;
            let counts = UnreadTracker::should_count(&message, local_user, self.active);
            let conversation = self
                .conversations
                .entry(scope)
                .or_insert_with(|| Conversation::new(scope));
            let Some(change) = conversation.store.insert(message, InsertPosition::Append) else {
                continue;
            };
            effects.event(ClientEvent::Store { scope, change });
            if counts {
                effects.event(ClientEvent::Unread(self.unread.increment(scope)));
            }
        }
        effects
    }

    fn remove_message(&mut self, message_id: &MessageId) -> Effects {
        let mut effects = Effects::default();
        for (scope, conversation) in self.conversations.iter_mut() {
            if let Some(change) = conversation.store.remove_by_id(message_id) {
                effects.event(ClientEvent::Store {
                    scope: *scope,
                    change,
                });
                break;
            }
        }
        effects
    }

    fn update_group(
        &mut self,
        group_id: GroupId,
        apply: impl FnOnce(&mut GroupSummary),
    ) -> Effects {
        let mut effects = Effects::default();
        let group = self.groups.entry(group_id).or_insert_with(|| GroupSummary {
            group_id,
            name: String::new(),
            members: Vec::new(),
        });
        apply(group);
        effects.event(ClientEvent::GroupUpdated(group.clone()));
        effects
    }

    /// Destroys a group's conversation permanently (dissolved, or we were removed).
    /// Pending history entries stay queued so later replies still find their request;
    /// they are discarded once they arrive.
    fn leave_group(&mut self, group_id: GroupId) -> Effects {
        let mut effects = Effects::default();
        let scope = Scope::Group(group_id);
        if let Some(mut conversation) = self.conversations.remove(&scope) {
            if let Some(change) = conversation.store.clear() {
                effects.event(ClientEvent::Store { scope, change });
            }
        }
        if let Some(change) = self.unread.reset(scope) {
            effects.event(ClientEvent::Unread(change));
        }
        self.groups.remove(&group_id);
        if self.active == Some(scope) {
            self.active = None;
            self.epoch += 1;
            effects.event(ClientEvent::ActiveScopeChanged(None));
        }
        info!(group_id = group_id.0, "sync: left group conversation");
        effects.event(ClientEvent::GroupRemoved(group_id));
        effects
    }

    fn recall_all(&mut self, group_id: GroupId) -> Effects {
        let mut effects = Effects::default();
        let scope = Scope::Group(group_id);
        if let Some(conversation) = self.conversations.get_mut(&scope) {
            if let Some(change) = conversation.store.clear() {
                effects.event(ClientEvent::Store { scope, change });
            }
            conversation.has_more_older = false;
        }
        if let Some(change) = self.unread.reset(scope) {
            effects.event(ClientEvent::Unread(change));
        }
        effects
    }

    /// Shared teardown for logout, expiry and duplicate login: clear every store, reset
    /// unread counters, drop the session.
    fn teardown(&mut self, end: SessionEnd) -> Effects {
        let mut effects = Effects::default();
        if !self.session.is_valid() {
            return effects;
        }

        let mut scopes: Vec<Scope> = self.conversations.keys().copied().collect();
        scopes.sort_by_key(|scope| scope.group_id().map_or(i64::MIN, |group_id| group_id.0));
        for scope in scopes {
            if let Some(change) = self
                .conversations
                .get_mut(&scope)
                .and_then(|conversation| conversation.store.clear())
            {
                effects.event(ClientEvent::Store { scope, change });
            }
        }
        self.conversations.clear();
        for change in self.unread.reset_all() {
            effects.event(ClientEvent::Unread(change));
        }
        if self.active.take().is_some() {
            effects.event(ClientEvent::ActiveScopeChanged(None));
        }
        self.pending.clear();
        self.epoch += 1;
        self.groups.clear();
        self.online_users.clear();

        let reason = match &end {
            SessionEnd::LoggedOut => None,
            SessionEnd::Invalidated(reason) => Some(reason),
        };
        self.session.invalidate(reason);
        effects.event(ClientEvent::SessionEnded(end));
        effects
    }
}

fn validate_batch(messages: Vec<MessagePayload>, scope: Scope) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .filter_map(|payload| match ChatMessage::from_payload(payload, Some(scope)) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(scope = %scope, error = %err, "sync: skipping malformed message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
