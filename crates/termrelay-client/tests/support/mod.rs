#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use termrelay_client::{
    Frame, RelayConfig, SessionState, StateChange, TerminalRelay, Update, WireFrame,
};
use termrelay_core::codec;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

pub const PATH: &str = "/ws/v1/terminal/cluster-1/pod-a";
pub const TOKEN: &str = "secret";

pub type ServerSocket = WebSocketStream<TcpStream>;

pub struct TestServer {
    pub addr: SocketAddr,
    handshakes: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl TestServer {
    pub fn config(&self) -> RelayConfig {
        RelayConfig::new(format!("ws://{}", self.addr)).with_token(TOKEN)
    }

    pub fn relay(&self) -> TerminalRelay {
        TerminalRelay::new(self.config())
    }

    /// `(path, authorization header)` for each accepted handshake.
    pub fn handshakes(&self) -> Vec<(String, Option<String>)> {
        self.handshakes.lock().unwrap().clone()
    }
}

/// Serve WebSocket connections; `handler` gets the connection index.
pub async fn serve<F, Fut>(handler: F) -> TestServer
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let seen = handshakes.clone();
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            let handler = handler.clone();
            let n = index;
            index += 1;
            tokio::spawn(async move {
                let callback = |request: &Request, response: Response| {
                    let auth = request
                        .headers()
                        .get(AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock()
                        .unwrap()
                        .push((request.uri().path().to_string(), auth));
                    Ok::<_, ErrorResponse>(response)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    handler(n, ws).await;
                }
            });
        }
    });

    TestServer { addr, handshakes }
}

pub async fn send(ws: &mut ServerSocket, frame: Frame) {
    let text = codec::encode(&frame).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

pub async fn send_raw(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next frame from the client, or `None` once it goes away.
pub async fn recv(ws: &mut ServerSocket) -> Option<Frame> {
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => return Some(codec::decode(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

pub async fn recv_wire(ws: &mut ServerSocket) -> Option<WireFrame> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            return Some(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    None
}

/// Keep the connection open until the client leaves.
pub async fn hold(ws: &mut ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

pub async fn next(relay: &mut TerminalRelay) -> Update {
    tokio::time::timeout(Duration::from_secs(5), relay.next_update())
        .await
        .expect("timed out waiting for relay update")
        .expect("relay stream ended")
}

pub async fn next_state(relay: &mut TerminalRelay) -> StateChange {
    match next(relay).await {
        Update::State(change) => change,
        other => panic!("expected state change, got {other:?}"),
    }
}

pub async fn next_output(relay: &mut TerminalRelay) -> String {
    match next(relay).await {
        Update::Output(data) => data,
        other => panic!("expected output, got {other:?}"),
    }
}

pub async fn expect_state(relay: &mut TerminalRelay, to: SessionState) -> StateChange {
    let change = next_state(relay).await;
    assert_eq!(change.to, to, "{change:?}");
    change
}
