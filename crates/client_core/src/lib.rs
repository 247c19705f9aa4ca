use std::sync::Arc;

use shared::domain::{ConnectionState, MessageId, Scope, UserId};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol_client;
pub mod scroll;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;
pub mod unread;

pub use config::{load_config, ClientConfig};
pub use engine::{Conversation, Effects, ReconcileTarget, SyncEngine};
pub use error::{AuthFailure, DataError, SyncError};
pub use protocol_client::{FallbackApi, HttpFallback};
pub use scroll::{ScrollAnchor, Viewport};
pub use transport::{ChannelEvent, PushChannel, ReconnectPolicy, WsChannel};
pub use types::{
    ChatMessage, ClientEvent, ConversationPhase, SessionContext, SessionEnd, StoreChange,
    UnreadChange,
};
pub use unread::badge_title;

/// Async driver around [`SyncEngine`]. Inputs from the push channel, the poll timer and
/// the caller are applied one at a time under a single lock, and the resulting requests
/// are emitted before the lock is released so their order matches the engine's
/// pending-history queue.
pub struct SyncClient {
    config: ClientConfig,
    engine: Mutex<SyncEngine>,
    push: Arc<dyn PushChannel>,
    fallback: Arc<dyn FallbackApi>,
    events: broadcast::Sender<ClientEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(
        config: ClientConfig,
        push: Arc<dyn PushChannel>,
        fallback: Arc<dyn FallbackApi>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            engine: Mutex::new(SyncEngine::new(config.page_size)),
            config,
            push,
            fallback,
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Websocket push channel plus HTTP fallback against `config.server_url`.
    pub fn connect(config: ClientConfig) -> Result<Arc<Self>, SyncError> {
        let push = WsChannel::connect(&config.server_url, config.reconnect.clone())?;
        let fallback = HttpFallback::new(config.server_url.clone());
        Ok(Self::new(config, Arc::new(push), Arc::new(fallback)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Read-only access to the current sync state.
    pub async fn with_engine<R>(&self, read: impl FnOnce(&SyncEngine) -> R) -> R {
        let engine = self.engine.lock().await;
        read(&engine)
    }

    pub async fn window_title(&self) -> String {
        let total = self.engine.lock().await.total_unread();
        badge_title(&self.config.title_base, total)
    }

    pub async fn connection_status(&self) -> &'static str {
        self.engine.lock().await.connection_state().status_text()
    }

    /// Validates a stored session with the server before using it. Returns `false` when
    /// the server no longer accepts it.
    pub async fn restore_session(
        self: &Arc<Self>,
        user_id: UserId,
        session_token: impl Into<String>,
    ) -> Result<bool, SyncError> {
        let context = SessionContext::new(user_id, session_token);
        if !self.fallback.session_check(&context).await? {
            info!(user_id = user_id.0, "client: stored session rejected");
            return Ok(false);
        }
        self.start_session(context).await;
        Ok(true)
    }

    /// Installs an authenticated session and starts the background tasks once.
    pub async fn start_session(self: &Arc<Self>, context: SessionContext) {
        self.ensure_tasks().await;
        let mut engine = self.engine.lock().await;
        let mut effects = engine.establish_session(context);
        let state = self.push.state();
        let connected = engine.handle_connection_state(state);
        effects.requests.extend(connected.requests);
        effects.events.extend(connected.events);
        self.dispatch(effects).await;
    }

    pub async fn activate(&self, scope: Scope) {
        self.drive(|engine| engine.activate(scope)).await;
    }

    pub async fn load_older(&self) {
        self.drive(SyncEngine::request_backfill).await;
    }

    pub async fn set_foreground(&self, foreground: bool) {
        self.engine.lock().await.set_foreground(foreground);
    }

    pub async fn logout(&self) {
        self.drive(SyncEngine::logout).await;
    }

    /// Sends over the push channel when it is up, otherwise over HTTP. The message
    /// itself shows up through the normal delivery path.
    pub async fn send_message(&self, content: &str) -> Result<(), SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let engine = self.engine.lock().await;
        let request = engine.send_request(content)?;
        if engine.connection_state() == ConnectionState::Connected {
            match self.push.emit(request).await {
                Ok(()) => return Ok(()),
                Err(err) => warn!(error = %err, "client: push send failed, using fallback"),
            }
        }
        let session = engine.session().cloned().ok_or(SyncError::NoSession)?;
        let scope = engine
            .active_scope()
            .ok_or(SyncError::NoActiveConversation)?;
        drop(engine);

        match self.fallback.send_message(&session, scope, content).await {
            Ok(message_id) => {
                debug!(?message_id, scope = %scope, "client: sent over fallback");
                Ok(())
            }
            Err(err) => {
                self.report_failure("Message could not be sent", &session, &err)
                    .await;
                Err(err)
            }
        }
    }

    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), SyncError> {
        let request = self.engine.lock().await.delete_request(message_id)?;
        if let Err(err) = self.push.emit(request).await {
            self.publish(ClientEvent::Notice(format!(
                "Message could not be deleted ({err})"
            )));
            return Err(err);
        }
        Ok(())
    }

    pub async fn request_online_users(&self) -> Result<(), SyncError> {
        let Some(request) = self.engine.lock().await.online_users_request() else {
            return Err(SyncError::NoSession);
        };
        self.push.emit(request).await
    }

    /// One reconciliation poll for the active conversation.
    pub async fn reconcile_now(&self) {
        let (target, session) = {
            let engine = self.engine.lock().await;
            (engine.reconcile_target(), engine.session().cloned())
        };
        let (Some(target), Some(session)) = (target, session) else {
            return;
        };

        let result = self
            .fallback
            .refresh_messages(&session, target.scope, target.last_update.as_ref())
            .await;

        let mut engine = self.engine.lock().await;
        if engine.session().map(|current| &current.session_token) != Some(&session.session_token)
        {
            debug!("client: session changed during poll, dropping result");
            return;
        }
        let effects = match result {
            Ok(response) => engine.apply_reconciliation(target.scope, response),
            Err(err) => engine.reconciliation_failed(target.scope, &err),
        };
        self.dispatch(effects).await;
    }

    pub async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(state) => {
                self.drive(|engine| engine.handle_connection_state(state))
                    .await
            }
            ChannelEvent::Server(event) => {
                self.drive(|engine| engine.handle_server_event(event)).await
            }
            ChannelEvent::Malformed(reason) => {
                debug!(%reason, "client: ignoring undecodable frame")
            }
        }
    }

    /// Stops the channel listener and the poll timer.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    async fn drive(&self, apply: impl FnOnce(&mut SyncEngine) -> Effects) {
        let mut engine = self.engine.lock().await;
        let effects = apply(&mut engine);
        self.dispatch(effects).await;
    }

    /// Emits requests in order and publishes events. Callers hold the engine lock.
    async fn dispatch(&self, effects: Effects) {
        for request in effects.requests {
            let name = request.event_name();
            if let Err(err) = self.push.emit(request).await {
                warn!(event = name, error = %err, "client: request not sent");
            }
        }
        for event in effects.events {
            self.publish(event);
        }
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn report_failure(&self, context: &str, session: &SessionContext, err: &SyncError) {
        let mut engine = self.engine.lock().await;
        if let SyncError::Auth(reason) = err {
            let still_current = engine
                .session()
                .is_some_and(|current| current.session_token == session.session_token);
            if still_current {
                let effects = engine.auth_failed(reason.clone());
                self.dispatch(effects).await;
            }
            return;
        }
        drop(engine);
        warn!(error = %err, "client: {context}");
        self.publish(ClientEvent::Notice(format!("{context} ({err})")));
    }

    async fn ensure_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(self.spawn_channel_listener());
        tasks.push(self.spawn_reconciliation());
    }

    fn spawn_channel_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.push.subscribe();
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => client.handle_channel_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client: push events dropped, polling will catch up")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fixed-interval poll. A failed tick is not retried early.
    fn spawn_reconciliation(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        let period = self.config.poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                client.reconcile_now().await;
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/fixtures.rs"]
pub(crate) mod test_fixtures;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
