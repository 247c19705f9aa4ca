//! Push channel: a websocket that reconnects on its own and reports every state change.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::ConnectionState,
    protocol::{ClientRequest, ServerEvent},
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SyncError;

pub const WS_PATH: &str = "/ws";

/// Linear reconnect backoff: `base + step * attempt`, capped at `max`. Attempts are
/// unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            step: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step
            .checked_mul(attempt)
            .and_then(|extra| self.base.checked_add(extra))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged(ConnectionState),
    Server(ServerEvent),
    /// A text frame that did not decode as a server event.
    Malformed(String),
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Sends one request. Fails while the channel is not connected; nothing is queued
    /// across reconnects.
    async fn emit(&self, request: ClientRequest) -> Result<(), SyncError>;
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
    fn state(&self) -> ConnectionState;
}

pub fn ws_url(server_url: &str) -> Result<String, SyncError> {
    let mut url = Url::parse(server_url)
        .map_err(|err| SyncError::Transport(format!("invalid server_url '{server_url}': {err}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(SyncError::Transport(format!(
                "server_url must start with http:// or https://, got '{other}://'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Transport(format!("cannot derive websocket url from '{server_url}'")))?;
    let path = format!("{}{WS_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

pub struct WsChannel {
    outgoing: mpsc::UnboundedSender<ClientRequest>,
    events: broadcast::Sender<ChannelEvent>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl WsChannel {
    /// Starts the connection loop in the background and returns immediately.
    pub fn connect(server_url: &str, policy: ReconnectPolicy) -> Result<Self, SyncError> {
        let url = ws_url(server_url)?;
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let task = tokio::spawn(run_connection(
            url,
            policy,
            outgoing_rx,
            events.clone(),
            state_tx,
        ));
        Ok(Self {
            outgoing,
            events,
            state,
            task,
        })
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn emit(&self, request: ClientRequest) -> Result<(), SyncError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(SyncError::Transport(format!(
                "cannot send '{}' while disconnected",
                request.event_name()
            )));
        }
        self.outgoing
            .send(request)
            .map_err(|_| SyncError::Transport("push channel closed".into()))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

fn publish_state(
    state_tx: &watch::Sender<ConnectionState>,
    events: &broadcast::Sender<ChannelEvent>,
    state: ConnectionState,
) {
    if state_tx.send_replace(state) != state {
        let _ = events.send(ChannelEvent::StateChanged(state));
    }
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    mut outgoing: mpsc::UnboundedReceiver<ClientRequest>,
    events: broadcast::Sender<ChannelEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut attempt: u32 = 0;
    loop {
        publish_state(&state_tx, &events, ConnectionState::Connecting);
        match connect_async(&url).await {
            Ok((stream, _)) => {
                attempt = 0;
                // Requests accepted just before the previous socket died belong to it.
                while outgoing.try_recv().is_ok() {}
                info!(%url, "transport: connected");
                publish_state(&state_tx, &events, ConnectionState::Connected);

                let (mut writer, mut reader) = stream.split();
                loop {
                    tokio::select! {
                        frame = reader.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        let _ = events.send(ChannelEvent::Server(event));
                                    }
                                    Err(err) => {
                                        warn!(error = %err, "transport: invalid server event");
                                        let _ = events.send(ChannelEvent::Malformed(err.to_string()));
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(error = %err, "transport: websocket receive failed");
                                break;
                            }
                        },
                        request = outgoing.recv() => {
                            let Some(request) = request else {
                                let _ = writer.close().await;
                                publish_state(&state_tx, &events, ConnectionState::Disconnected);
                                return;
                            };
                            let text = match serde_json::to_string(&request) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(error = %err, "transport: failed to encode request");
                                    continue;
                                }
                            };
                            debug!(event = request.event_name(), "transport: sending");
                            if let Err(err) = writer.send(Message::Text(text)).await {
                                warn!(error = %err, "transport: websocket send failed");
                                break;
                            }
                        }
                    }
                }
            }
            Err(err) => warn!(%url, attempt, error = %err, "transport: connect failed"),
        }

        publish_state(&state_tx, &events, ConnectionState::Disconnected);
        let delay = policy.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "transport: reconnecting");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
