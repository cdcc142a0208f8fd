//! Transport ownership.
//!
//! A [`ConnectionManager`] holds at most one WebSocket at a time. Inbound
//! messages are decoded once by the reader task and republished on a
//! broadcast channel, so every subscriber sees the same frames in the same
//! order. Outbound frames go through an unbounded queue drained by the writer
//! task, which keeps [`ConnectionManager::send`] synchronous.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use termrelay_core::{Frame, Operation, WireFrame, codec};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Supplies the bearer credential for each handshake.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// Something that happened on a transport.
#[derive(Debug, Clone)]
pub struct RelayEvent {
    /// Which transport instance produced this event.
    pub epoch: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    /// Handshake completed.
    Opened { path: String },
    /// A well-formed inbound frame.
    Frame(Frame),
    /// The peer closed the transport or the stream ended.
    Closed { code: Option<u16>, reason: String },
    /// The transport failed to open or broke.
    Failed(String),
}

/// Open flag shared by a connection's tasks. Whichever task sees the
/// transport end first reports it; later reports are dropped.
struct Liveness {
    epoch: u64,
    open: AtomicBool,
    events: broadcast::Sender<RelayEvent>,
}

impl Liveness {
    fn new(epoch: u64, events: broadcast::Sender<RelayEvent>) -> Self {
        Self {
            epoch,
            open: AtomicBool::new(true),
            events,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn publish(&self, kind: EventKind) {
        let _ = self.events.send(RelayEvent {
            epoch: self.epoch,
            kind,
        });
    }

    /// Mark the transport gone without reporting it.
    fn shut(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Mark the transport gone and report `kind`, unless already gone.
    fn end(&self, kind: EventKind) -> bool {
        if self.open.swap(false, Ordering::AcqRel) {
            self.publish(kind);
            true
        } else {
            false
        }
    }
}

struct Connection {
    path: String,
    epoch: u64,
    outbound: mpsc::UnboundedSender<Message>,
    liveness: Arc<Liveness>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        self.liveness.is_open() && !self.outbound.is_closed()
    }

    fn shutdown(self) {
        self.liveness.shut();
        self.reader.abort();
        // The writer exits after flushing the close message.
        if self.outbound.send(Message::Close(None)).is_err() {
            self.writer.abort();
        }
    }
}

/// Owns the transport for one terminal widget.
pub struct ConnectionManager {
    config: RelayConfig,
    tokens: Arc<dyn TokenSource>,
    events: broadcast::Sender<RelayEvent>,
    connection: Option<Connection>,
    epoch: u64,
    session: Option<String>,
}

impl ConnectionManager {
    /// Create a manager that presents `config.token`, if any.
    pub fn new(config: RelayConfig) -> Self {
        let token = config.token.clone();
        Self::with_token_source(config, move || token.clone())
    }

    /// Create a manager that asks `tokens` for a credential on every connect.
    pub fn with_token_source(config: RelayConfig, tokens: impl TokenSource + 'static) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            tokens: Arc::new(tokens),
            events,
            connection: None,
            epoch: 0,
            session: None,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Receive every event from this manager's transports.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Epoch of the most recently opened transport.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Path of the transport currently held, open or not.
    pub fn path(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.path.as_str())
    }

    /// The session bound to the current transport.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Record the session id for the current transport.
    ///
    /// Binding the same id again is accepted; a different id is not.
    pub fn bind_session(&mut self, session_id: &str) -> Result<()> {
        match &self.session {
            Some(bound) if bound != session_id => Err(RelayError::SessionMismatch {
                bound: bound.clone(),
                got: session_id.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                debug!(session = session_id, "session bound");
                self.session = Some(session_id.to_string());
                Ok(())
            }
        }
    }

    /// Open a transport to `path` unless one is already open.
    pub async fn connect(&mut self, path: &str) -> Result<()> {
        let url = self.config.url_for(path)?;
        if let Some(connection) = &self.connection {
            if connection.is_open() {
                if connection.path != path {
                    debug!(open = %connection.path, requested = path, "transport already open");
                }
                return Ok(());
            }
        }
        self.close();

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::InvalidEndpoint(format!("{url}: {e}")))?;
        if let Some(token) = self.tokens.token() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| RelayError::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        if url.starts_with("wss://") {
            install_crypto_provider();
        }

        self.epoch += 1;
        let epoch = self.epoch;
        info!(epoch, %url, "opening terminal transport");

        let ws = match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(epoch, error = %e, "terminal transport failed to open");
                self.publish(epoch, EventKind::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let liveness = Arc::new(Liveness::new(epoch, self.events.clone()));

        self.publish(
            epoch,
            EventKind::Opened {
                path: path.to_string(),
            },
        );

        let writer = tokio::spawn(write_loop(sink, outbound_rx, liveness.clone()));
        let reader = tokio::spawn(read_loop(stream, outbound.clone(), liveness.clone()));

        self.connection = Some(Connection {
            path: path.to_string(),
            epoch,
            outbound,
            liveness,
            reader,
            writer,
        });
        Ok(())
    }

    /// Queue a frame for transmission.
    ///
    /// Frames without a session id are stamped with the bound one.
    pub fn send(&mut self, frame: Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        frame.validate()?;
        let frame = self.stamp(frame)?;
        let text = codec::encode(&frame)?;

        let connection = self.connection.as_ref().ok_or(RelayError::NotConnected)?;
        connection
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| RelayError::NotConnected)?;
        trace!(epoch = connection.epoch, op = frame.operation.code(), "frame queued");
        Ok(())
    }

    /// Validate a loosely built frame, then send it.
    pub fn send_wire(&mut self, wire: WireFrame) -> Result<()> {
        let frame = Frame::try_from(wire)?;
        self.send(frame)
    }

    /// Tear down the transport. Safe to call at any time.
    pub fn close(&mut self) {
        self.session = None;
        if let Some(connection) = self.connection.take() {
            info!(epoch = connection.epoch, path = %connection.path, "closing terminal transport");
            connection.shutdown();
        }
    }

    /// Close and drop the event source, ending every subscription.
    pub fn dispose(mut self) {
        self.close();
    }

    fn stamp(&mut self, mut frame: Frame) -> Result<Frame> {
        if let (Operation::Bind, Some(id)) = (&frame.operation, &frame.session_id) {
            let id = id.clone();
            self.bind_session(&id)?;
        }
        match (&self.session, &frame.session_id) {
            (Some(bound), None) => frame.session_id = Some(bound.clone()),
            (Some(bound), Some(id)) if bound != id => {
                return Err(RelayError::SessionMismatch {
                    bound: bound.clone(),
                    got: id.clone(),
                });
            }
            _ => {}
        }
        Ok(frame)
    }

    fn publish(&self, epoch: u64, kind: EventKind) {
        // No subscribers is fine.
        let _ = self.events.send(RelayEvent { epoch, kind });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// rustls needs a process-wide crypto provider before the first handshake.
fn install_crypto_provider() {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    outbound: mpsc::UnboundedSender<Message>,
    liveness: Arc<Liveness>,
) {
    let epoch = liveness.epoch;
    let end = loop {
        let decoded = match stream.next().await {
            Some(Ok(Message::Text(text))) => codec::decode(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => codec::decode_bytes(&bytes),
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => EventKind::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.to_string(),
                    },
                    None => EventKind::Closed {
                        code: None,
                        reason: String::new(),
                    },
                };
            }
            // Control frames are answered by tungstenite.
            Some(Ok(_)) => continue,
            Some(Err(e)) => break EventKind::Failed(e.to_string()),
            None => {
                break EventKind::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                };
            }
        };

        match decoded {
            Ok(Frame {
                session_id,
                operation: Operation::Ping,
            }) => {
                let pong = Frame {
                    session_id,
                    operation: Operation::Pong,
                };
                if let Ok(text) = codec::encode(&pong) {
                    let _ = outbound.send(Message::Text(text.into()));
                }
            }
            Ok(frame) => liveness.publish(EventKind::Frame(frame)),
            Err(e) => warn!(epoch, error = %e, "dropping malformed frame"),
        }
    };

    debug!(epoch, ?end, "terminal transport ended");
    liveness.end(end);
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    liveness: Arc<Liveness>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(epoch = liveness.epoch, error = %e, "terminal transport write failed");
            liveness.end(EventKind::Failed(format!("write failed: {e}")));
            break;
        }
        if closing {
            break;
        }
    }
    liveness.shut();
    // Subscriptions only end once every event sender is gone.
    drop(liveness);
    let _ = sink.close().await;
}
