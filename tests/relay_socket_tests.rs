//! End-to-end tests of the client socket against a mock remote service.

mod mock_remote;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tower::util::ServiceExt;

use mock_remote::{MockConnector, MockRemote, WAIT, quiet_options};
use realtime_relay::core::realtime::ClientEvent;
use realtime_relay::core::session::CONNECTED_STATUS;
use realtime_relay::handlers::relay::{ClientHub, GREETING_STATUS};
use realtime_relay::{
    AppState, CommandQueue, RelayBridge, SessionDispatcher, SessionRegistry, routes,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    addr: SocketAddr,
    hub: Arc<ClientHub>,
    registry: Arc<SessionRegistry>,
    remotes: mpsc::UnboundedReceiver<MockRemote>,
    app: Router,
}

fn build_app() -> (Router, Arc<ClientHub>, Arc<SessionRegistry>, mpsc::UnboundedReceiver<MockRemote>) {
    let registry = Arc::new(SessionRegistry::new());
    let (commands, command_rx) = CommandQueue::unbounded();
    let (connector, remotes) = MockConnector::new();
    let hub = Arc::new(ClientHub::new());

    let dispatcher = SessionDispatcher::new(command_rx, registry.clone(), connector, hub.clone())
        .with_options(quiet_options());
    tokio::spawn(dispatcher.run());

    let state = AppState::new(RelayBridge::new(registry.clone(), commands), hub.clone());
    let app = routes::api::create_api_router()
        .merge(routes::relay::create_relay_router())
        .with_state(state);
    (app, hub, registry, remotes)
}

async fn start_server() -> Server {
    let (app, hub, registry, remotes) = build_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.clone()).into_future());

    Server {
        addr,
        hub,
        registry,
        remotes,
        app,
    }
}

impl Server {
    async fn connect(&self) -> Client {
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        client
    }

    async fn next_remote(&mut self) -> MockRemote {
        timeout(WAIT, self.remotes.recv()).await.unwrap().unwrap()
    }
}

/// Next JSON message from the server, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for the server")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_health_check() {
    let (app, ..) = build_app();
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"status": "OK"}));
}

#[tokio::test]
async fn test_socket_round_trip() {
    let mut server = start_server().await;
    let mut client = server.connect().await;

    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "status_update", "message": GREETING_STATUS})
    );

    send_json(&mut client, json!({"type": "start_stream"})).await;
    let mut remote = server.next_remote().await;
    remote.skip_opening(false).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "status_update", "message": CONNECTED_STATUS})
    );

    send_json(&mut client, json!({"type": "audio_chunk", "audio": "AAEC"})).await;
    client
        .send(Message::binary(vec![0x03, 0x04]))
        .await
        .unwrap();
    assert_eq!(
        remote.next_sent().await,
        Some(ClientEvent::audio_append(&[0x00, 0x01, 0x02]))
    );
    assert_eq!(
        remote.next_sent().await,
        Some(ClientEvent::audio_append(&[0x03, 0x04]))
    );

    remote.push(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 10}));
    remote.push(json!({"type": "response.audio.delta", "delta": "UklGRg=="}));
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "interrupt_playback"})
    );
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "audio_response", "audio": "UklGRg==", "sample_rate": 24000})
    );

    send_json(&mut client, json!({"type": "stop_stream"})).await;
    remote.expect_closed().await;
}

#[tokio::test]
async fn test_bad_messages_are_reported() {
    let server = start_server().await;
    let mut client = server.connect().await;
    next_json(&mut client).await;

    client.send(Message::text("{oops")).await.unwrap();
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error_message");
    assert!(
        reply["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid message format")
    );

    send_json(&mut client, json!({"type": "audio_chunk", "audio": "not base64!!"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error_message");
    assert!(
        reply["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid audio payload")
    );
}

#[tokio::test]
async fn test_socket_close_ends_session() {
    let mut server = start_server().await;
    let mut client = server.connect().await;
    next_json(&mut client).await;

    send_json(&mut client, json!({"type": "start_stream"})).await;
    let mut remote = server.next_remote().await;
    remote.skip_opening(false).await;
    let id = remote.session_id.clone();
    assert!(server.registry.is_live(&id));

    client.close(None).await.unwrap();
    remote.expect_closed().await;

    // the handler unregisters once the socket is gone
    timeout(WAIT, async {
        while server.registry.is_registered(&id) || !server.hub.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("client state was not cleaned up");

    // the router is still usable for new clients
    let response = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
