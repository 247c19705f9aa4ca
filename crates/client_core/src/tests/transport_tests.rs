use super::*;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::domain::{UserId, UserSummary};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::net::TcpListener;

#[test]
fn reconnect_delay_grows_linearly_and_caps() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    assert_eq!(policy.delay_for(2), Duration::from_secs(3));
    assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    assert_eq!(policy.delay_for(50), Duration::from_secs(5));
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
}

#[test]
fn ws_url_follows_http_scheme() {
    assert_eq!(
        ws_url("http://127.0.0.1:3000").expect("url"),
        "ws://127.0.0.1:3000/ws"
    );
    assert_eq!(
        ws_url("https://chat.example.com/").expect("url"),
        "wss://chat.example.com/ws"
    );
    assert!(ws_url("ftp://chat.example.com").is_err());
}

async fn echo_presence(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let request: ClientRequest = match serde_json::from_str(&text) {
            Ok(request) => request,
            Err(_) => continue,
        };
        if request == ClientRequest::GetOnlineUsers {
            let _ = socket.send(WsMessage::Text("{not json".into())).await;
            let event = ServerEvent::OnlineUsers {
                users: vec![UserSummary {
                    user_id: UserId(2),
                    display_name: "bea".into(),
                    avatar_ref: None,
                }],
            };
            let text = serde_json::to_string(&event).expect("encode");
            let _ = socket.send(WsMessage::Text(text)).await;
        }
    }
}

async fn spawn_ws_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route(
        WS_PATH,
        get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(echo_presence).into_response() }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn wait_connected(channel: &WsChannel) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connect timeout");
}

#[tokio::test]
async fn emit_fails_before_connect() {
    // Nothing listens on port 9; the loop keeps retrying in the background.
    let channel =
        WsChannel::connect("http://127.0.0.1:9", ReconnectPolicy::default()).expect("channel");
    let err = channel
        .emit(ClientRequest::GetOnlineUsers)
        .await
        .expect_err("must fail");
    assert!(matches!(err, SyncError::Transport(_)));
    channel.close();
}

#[tokio::test]
async fn server_frames_are_decoded_and_bad_frames_reported() {
    let server_url = spawn_ws_server().await;
    let channel = WsChannel::connect(&server_url, ReconnectPolicy::default()).expect("channel");
    let mut rx = channel.subscribe();
    wait_connected(&channel).await;

    channel
        .emit(ClientRequest::GetOnlineUsers)
        .await
        .expect("emit");

    let (malformed, users) = tokio::time::timeout(Duration::from_secs(5), async {
        let mut malformed = false;
        loop {
            match rx.recv().await.expect("event") {
                ChannelEvent::Malformed(_) => malformed = true,
                ChannelEvent::Server(ServerEvent::OnlineUsers { users }) => {
                    break (malformed, users)
                }
                _ => {}
            }
        }
    })
    .await
    .expect("presence timeout");

    assert!(malformed);
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].display_name, "bea");
}

/// The first socket is closed right after the upgrade; later ones answer presence.
async fn spawn_flaky_ws_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        WS_PATH,
        get(move |ws: WebSocketUpgrade| {
            let accepted = accepted.clone();
            async move {
                ws.on_upgrade(move |socket| async move {
                    if accepted.fetch_add(1, Ordering::SeqCst) == 0 {
                        let _ = socket.close().await;
                    } else {
                        echo_presence(socket).await;
                    }
                })
                .into_response()
            }
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn dropped_socket_reconnects_and_accepts_requests_again() {
    let server_url = spawn_flaky_ws_server().await;
    let policy = ReconnectPolicy {
        base: Duration::from_millis(10),
        step: Duration::from_millis(10),
        max: Duration::from_millis(50),
    };
    let channel = WsChannel::connect(&server_url, policy).expect("channel");
    let mut rx = channel.subscribe();

    let states = tokio::time::timeout(Duration::from_secs(5), async {
        let mut states = Vec::new();
        let mut connected = 0;
        while connected < 2 {
            if let ChannelEvent::StateChanged(state) = rx.recv().await.expect("event") {
                states.push(state);
                if state == ConnectionState::Connected {
                    connected += 1;
                }
            }
        }
        states
    })
    .await
    .expect("reconnect timeout");

    assert!(states.ends_with(&[
        ConnectionState::Connected,
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
    ]));
    assert_eq!(channel.state(), ConnectionState::Connected);

    channel
        .emit(ClientRequest::GetOnlineUsers)
        .await
        .expect("emit after reconnect");
    let users = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ChannelEvent::Server(ServerEvent::OnlineUsers { users }) =
                rx.recv().await.expect("event")
            {
                break users;
            }
        }
    })
    .await
    .expect("presence timeout");
    assert_eq!(users.len(), 1);
    channel.close();
}
