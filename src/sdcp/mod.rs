pub mod command;
pub mod discovery;
pub mod parse;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Local};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::{
    status::{normalize, Normalized, PrinterStatus, StatusSnapshot},
    utils::preview,
};

use self::{
    command::Command,
    discovery::{DiscoveryClient, PrinterIdentity},
    parse::Message,
};

pub const WS_PORT: u16 = 3030;
pub const WS_PATH: &str = "/websocket";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt failed. Behaves like `Disconnected`.
    Failed(String),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to printer")]
    NotConnected,
    #[error("websocket error: {0}")]
    Transport(String),
    #[error("could not encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Bound on the websocket open handshake
    pub connect_timeout: Duration,
    /// Wait after a poll batch so replies can land before the status is read
    pub settle_delay: Duration,
    pub discovery_timeout: Duration,
    pub ws_port: u16,
    pub discovery_port: u16,
    /// 0 binds an ephemeral port
    pub local_discovery_port: u16,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(200),
            discovery_timeout: discovery::DEFAULT_DISCOVERY_TIMEOUT,
            ws_port: WS_PORT,
            discovery_port: discovery::DISCOVERY_PORT,
            local_discovery_port: discovery::LOCAL_DISCOVERY_PORT,
        }
    }
}

/// State shared between the client and its listener task
#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SessionState>,
    snapshot: RwLock<StatusSnapshot>,
    last_error: Mutex<Option<String>>,
    /// bumped on every connect and disconnect, so a stale listener can tell
    /// it no longer owns the session
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn store_status(&self, generation: u64, status: PrinterStatus) {
        if !self.is_current(generation) {
            return;
        }
        let snapshot = StatusSnapshot {
            status: Arc::new(status),
            last_updated: Some(Local::now()),
        };
        *self.snapshot.write() = snapshot;
    }

    fn connection_lost(&self, generation: u64, reason: String) {
        if !self.is_current(generation) {
            return;
        }
        warn!("connection lost: {}", reason);
        *self.last_error.lock() = Some(reason);
        let mut state = self.state.lock();
        if state.is_connected() {
            *state = SessionState::Disconnected;
        }
    }

    fn fail(&self, reason: String) {
        error!("{}", reason);
        *self.last_error.lock() = Some(reason.clone());
        self.set_state(SessionState::Failed(reason));
    }
}

/// One SDCP session with one printer: discovery, the websocket, the poll
/// commands, and the latest status the printer pushed back.
pub struct ElegooClient {
    timing: SessionTiming,
    discovery: DiscoveryClient,
    identity: Option<Arc<PrinterIdentity>>,
    shared: Arc<Shared>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    listener: Option<JoinHandle<()>>,
    span: tracing::Span,
}

impl ElegooClient {
    pub fn new(timing: SessionTiming) -> Self {
        let discovery = DiscoveryClient::new(timing.discovery_timeout)
            .with_ports(timing.discovery_port, timing.local_discovery_port);
        let span = tracing::info_span!("printer", session = %nanoid::nanoid!(8));
        Self {
            timing,
            discovery,
            identity: None,
            shared: Arc::new(Shared::default()),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            listener: None,
            span,
        }
    }

    /// Replaces the span the listener task and callers log under
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().is_connected()
    }

    pub fn identity(&self) -> Option<Arc<PrinterIdentity>> {
        self.identity.clone()
    }

    /// Why the last connect attempt or the last connection ended
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.snapshot.read().clone()
    }

    /// `(status, last updated, connected)`
    pub fn current_status(&self) -> (Arc<PrinterStatus>, Option<DateTime<Local>>, bool) {
        let snapshot = self.snapshot();
        (snapshot.status, snapshot.last_updated, self.is_connected())
    }

    /// Discovers the printer at `address` and opens the websocket.
    ///
    /// Returns `false` if the socket did not open within the connect timeout;
    /// the reason is kept in [`SessionState::Failed`]. An existing connection
    /// is closed first.
    pub async fn connect(&mut self, address: &str) -> bool {
        if self.is_connected() {
            info!("already connected, disconnecting first");
        }
        // also clears a socket left behind by a dropped connection
        self.disconnect().await;

        self.shared.set_state(SessionState::Connecting);
        *self.shared.last_error.lock() = None;

        let identity = match self.discovery.discover(address).await {
            Some(printer) => printer,
            None => PrinterIdentity::fallback(address),
        };
        let identity = Arc::new(identity);
        self.identity = Some(identity.clone());

        let url = match ws_url(&identity.address, self.timing.ws_port) {
            Ok(url) => url,
            Err(e) => {
                self.shared.fail(format!("bad printer address {:?}: {}", identity.address, e));
                return false;
            }
        };

        info!("connecting to {} at {}", identity.name, url);
        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let stream = match tokio::time::timeout(self.timing.connect_timeout, handshake).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.shared.fail(format!("failed to connect to {}: {}", url, e));
                return false;
            }
            Err(_) => {
                // dropping the handshake future closes the half-open socket
                self.shared.fail(format!(
                    "failed to connect to {} within {:?}",
                    url, self.timing.connect_timeout
                ));
                return false;
            }
        };

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);

        let generation = self.shared.next_generation();
        *self.shared.snapshot.write() = StatusSnapshot::default();
        self.shared.set_state(SessionState::Connected);

        let listener = ClientListener {
            source,
            shared: self.shared.clone(),
            generation,
        };
        self.listener = Some(tokio::spawn(listener.run().instrument(self.span.clone())));

        info!("connected to {}", identity.name);
        true
    }

    /// Sends one command. A transport failure drops the socket and moves the
    /// session to `Disconnected`.
    pub async fn send_command(&self, command: Command) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let identity = self.identity.as_ref().ok_or(SessionError::NotConnected)?;
        let payload = command.get_payload(identity)?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SessionError::NotConnected)?;

        debug!("sending command {} to printer", command.code());
        if let Err(e) = sink.send(WsMessage::Text(payload)).await {
            *guard = None;
            drop(guard);
            let reason = format!("send failed: {}", e);
            self.shared.connection_lost(self.shared.generation.load(Ordering::SeqCst), reason);
            return Err(SessionError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Sends the poll batch, then waits the settle delay so pushed replies can
    /// arrive before the caller reads [`current_status`](Self::current_status).
    ///
    /// Every command is attempted even if an earlier one failed; the first
    /// error is returned. Callers must not overlap calls on one client.
    pub async fn request_status(&self) -> Result<(), SessionError> {
        if !self.is_connected() {
            warn!("cannot get status: not connected to printer");
            return Err(SessionError::NotConnected);
        }

        let mut first_error = None;
        for command in Command::POLL_BATCH {
            if let Err(e) = self.send_command(command).await {
                error!("error sending command {}: {}", command.code(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        tokio::time::sleep(self.timing.settle_delay).await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes the socket and stops the listener. Safe to call at any time.
    pub async fn disconnect(&mut self) {
        // the listener must not report the close it is about to see
        self.shared.next_generation();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("error closing websocket: {}", e),
                Err(_) => debug!("timed out closing websocket"),
            }
        }

        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let was = std::mem::replace(&mut *self.shared.state.lock(), SessionState::Disconnected);
        if let Some(identity) = self.identity.take() {
            if was.is_connected() {
                info!("disconnected from {}", identity.name);
            }
        }
    }
}

impl Drop for ElegooClient {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

fn ws_url(host: &str, port: u16) -> Result<url::Url, url::ParseError> {
    url::Url::parse(&format!("ws://{}:{}{}", host, port, WS_PATH))
}

/// Receive loop for one connection, runs until the socket closes
struct ClientListener {
    source: WsSource,
    shared: Arc<Shared>,
    generation: u64,
}

impl ClientListener {
    async fn run(mut self) {
        let reason = loop {
            match self.source.next().await {
                Some(Ok(frame)) => {
                    if let Some(reason) = self.handle_frame(frame) {
                        break reason;
                    }
                }
                Some(Err(e)) => break format!("websocket error: {}", e),
                None => break "connection closed".to_string(),
            }
        };
        self.shared.connection_lost(self.generation, reason);
    }

    /// `Some(reason)` ends the loop
    fn handle_frame(&self, frame: WsMessage) -> Option<String> {
        match frame {
            WsMessage::Text(text) => self.handle_text(&text),
            WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.handle_text(&text),
                Err(_) => warn!("dropping non UTF-8 binary frame"),
            },
            WsMessage::Close(frame) => {
                return Some(match frame {
                    Some(f) => format!("closed by printer: {} {}", u16::from(f.code), f.reason),
                    None => "closed by printer".to_string(),
                });
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                trace!("control frame");
            }
        }
        None
    }

    /// Malformed input is logged and dropped, it never ends the loop
    fn handle_text(&self, text: &str) {
        match parse::parse_message(text) {
            Message::Status(body) => self.handle_status(body),
            Message::Response(body) => debug!("response: {}", preview(&body.to_string(), 200)),
            Message::Notice(body) => debug!("notice: {}", preview(&body.to_string(), 100)),
            Message::Error(body) => warn!("printer error: {}", preview(&body.to_string(), 200)),
            Message::Unknown(Some(kind)) => debug!("unknown message type {:?}", kind),
            Message::Unknown(None) => debug!("message without topic or useful data"),
            Message::Invalid(e) => error!("invalid JSON received ({}): {}", e, preview(text, 100)),
        }
    }

    fn handle_status(&self, body: Value) {
        let normalized = normalize(&body);
        for anomaly in &normalized.anomalies {
            debug!("status anomaly: {}", anomaly);
        }

        if normalized.is_empty() {
            warn!("status message carried no usable data: {}", preview(&body.to_string(), 200));
            return;
        }

        let Normalized { status, .. } = normalized;
        info!("updated status: {}", status.summary());
        self.shared.store_status(self.generation, status);
    }
}
