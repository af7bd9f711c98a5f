use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::config::ServerClientConfig;
use crate::envelope;
use crate::error::AdapterError;
use crate::model::result::{CommandResult, Params};
use crate::protocol::{
    CommandResultMessage, HealthCheckResponse, HeartbeatPayload, InboundMessage,
    OutboundMessage, RegistrationPayload,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) const NO_ADAPTER_ERROR: &str = "No adapter configured";

const RESERVED_REGISTRATION_KEYS: &[&str] = &[
    "type",
    "adapter_type",
    "adapter_id",
    "version",
    "capabilities",
    "commands",
];

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long-lived connection to the hosted command server.
///
/// This type is the only writer of [`ConnectionState`]; observers read it via
/// [`ServerClient::state`] or [`ServerClient::subscribe`]. Share it behind an
/// `Arc` to call [`ServerClient::disconnect`] while [`ServerClient::run`] is
/// in progress.
pub struct ServerClient {
    config: ServerClientConfig,
    adapter_id: String,
    adapter: Option<Arc<dyn Adapter>>,
    state: watch::Sender<ConnectionState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    reconnect_attempts: AtomicU32,
    active_jobs: AtomicU32,
    shutdown: Notify,
    socket: Mutex<Option<WsStream>>,
}

enum PumpExit {
    Stopped,
    Lost(String),
}

enum Flow {
    Continue,
    Disconnect,
}

impl ServerClient {
    /// Creates a client. A random adapter id is generated when the config has
    /// none.
    pub fn new(config: ServerClientConfig, adapter: Option<Arc<dyn Adapter>>) -> Self {
        let adapter_id = config
            .adapter_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            adapter_id,
            adapter,
            state,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            active_jobs: AtomicU32::new(0),
            shutdown: Notify::new(),
            socket: Mutex::new(None),
        }
    }

    pub fn with_adapter(config: ServerClientConfig, adapter: Arc<dyn Adapter>) -> Self {
        Self::new(config, Some(adapter))
    }

    pub fn config(&self) -> &ServerClientConfig {
        &self.config
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Consecutive failed connects since the last successful one.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Commands currently executing.
    pub fn active_jobs(&self) -> u32 {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Opens the connection and sends the registration record.
    ///
    /// No-op when already connected. On failure the state reverts to
    /// `Disconnected` and the error is returned.
    pub async fn connect(&self) -> Result<(), AdapterError> {
        if self.is_connected() {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        match self.open().await {
            Ok(socket) => {
                *self.socket.lock().await = Some(socket);
                self.set_state(ConnectionState::Connected);
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                info!(url = %self.config.server_url, adapter_id = %self.adapter_id, "connected to server");
                Ok(())
            }
            Err(err) => {
                error!(url = %self.config.server_url, error = %err, "failed to connect");
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Connects, processes inbound messages and reconnects until
    /// [`ServerClient::disconnect`] is called, the server asks to disconnect,
    /// or reconnect attempts are exhausted. Always ends `Disconnected`.
    ///
    /// Returns at once if [`ServerClient::disconnect`] was called since the
    /// last run ended; that pending stop is consumed.
    pub async fn run(&self) {
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            info!("stop requested before run; not connecting");
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            if !self.is_connected() {
                if self.connect().await.is_err() {
                    let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempts > self.config.max_reconnect_attempts {
                        error!(attempts, "max reconnection attempts reached");
                        break;
                    }
                    warn!(
                        attempt = attempts,
                        max = self.config.max_reconnect_attempts,
                        delay = ?self.config.reconnect_delay,
                        "reconnecting"
                    );
                    self.pause(self.config.reconnect_delay).await;
                    continue;
                }
            }

            let socket = self.socket.lock().await.take();
            let Some(socket) = socket else {
                warn!(error = %AdapterError::NotConnected, "connection handle missing");
                self.set_state(ConnectionState::Reconnecting);
                continue;
            };

            match self.pump(socket).await {
                PumpExit::Stopped => {}
                PumpExit::Lost(reason) => {
                    warn!(reason = %reason, "connection lost");
                    if self.running.load(Ordering::SeqCst) {
                        self.set_state(ConnectionState::Reconnecting);
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Stops the run loop, closes the connection and marks the client
    /// `Disconnected`. Safe from any state. When no run is active the stop
    /// stays pending and the next [`ServerClient::run`] returns at once.
    pub async fn disconnect(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.close().await;
    }

    /// Closes the connection and marks the client `Disconnected` without
    /// leaving a stop pending for the next run.
    pub(crate) async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let socket = self.socket.lock().await.take();
        if let Some(mut socket) = socket {
            if let Err(err) = socket.close(None).await {
                debug!(error = %err, "close handshake failed");
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected from server");
    }

    /// Synchronous variant of [`ServerClient::close`] for drop paths. An idle
    /// connection handle is dropped without a close handshake.
    pub(crate) fn mark_disconnected(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        if let Ok(mut socket) = self.socket.try_lock() {
            socket.take();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn registration_payload(&self) -> RegistrationPayload {
        let mut payload =
            RegistrationPayload::new(self.config.adapter_type.clone(), Some(self.adapter_id.clone()));
        payload.version = self.config.version.clone();
        payload.metadata = self
            .config
            .metadata
            .iter()
            .filter(|(key, _)| !RESERVED_REGISTRATION_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Params>();
        match &self.adapter {
            Some(adapter) => payload.with_manifest(adapter.manifest()),
            None => payload,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    async fn open(&self) -> Result<WsStream, AdapterError> {
        let url = self.config.server_url.as_str();
        let mut request = url
            .into_client_request()
            .map_err(|err| AdapterError::Config {
                reason: format!("invalid server_url `{url}`: {err}"),
            })?;
        if let Some(api_key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|err| {
                AdapterError::Config {
                    reason: format!("api_key is not a valid header value: {err}"),
                }
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let timeout = self.config.connect_timeout;
        let (mut socket, _) = time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| AdapterError::ConnectTimeout {
                addr: url.to_string(),
                timeout,
            })?
            .map_err(|err| AdapterError::Connection {
                addr: url.to_string(),
                reason: err.to_string(),
            })?;

        let registration = OutboundMessage::AdapterRegistration(self.registration_payload());
        send_message(&mut socket, &registration).await?;
        info!(adapter_type = %self.config.adapter_type, "registered adapter");
        Ok(socket)
    }

    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = self.shutdown.notified() => {}
        }
    }

    async fn pump(&self, mut socket: WsStream) -> PumpExit {
        let mut heartbeat = heartbeat_timer(self.config.heartbeat_interval);

        loop {
            if !self.running.load(Ordering::SeqCst) {
                close_quietly(&mut socket).await;
                return PumpExit::Stopped;
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    // A stale wakeup is ignored while still running.
                    continue;
                }
                _ = next_tick(&mut heartbeat) => {
                    let payload = HeartbeatPayload::new(self.adapter_id.clone(), self.active_jobs());
                    if let Err(err) = send_message(&mut socket, &OutboundMessage::Heartbeat(payload)).await {
                        return PumpExit::Lost(err.to_string());
                    }
                    debug!("heartbeat sent");
                }
                frame = socket.next() => {
                    let text = match frame {
                        None => return PumpExit::Lost("connection closed by server".to_string()),
                        Some(Err(err)) => return PumpExit::Lost(err.to_string()),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            debug!(frame = ?frame, "server sent close");
                            continue;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            warn!(len = bytes.len(), "ignoring binary frame");
                            continue;
                        }
                        Some(Ok(_)) => continue,
                    };

                    match self.handle_message(&mut socket, text.as_str()).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Disconnect) => {
                            self.running.store(false, Ordering::SeqCst);
                            close_quietly(&mut socket).await;
                            self.set_state(ConnectionState::Disconnected);
                            return PumpExit::Stopped;
                        }
                        Err(err) => return PumpExit::Lost(err.to_string()),
                    }
                }
            }
        }
    }

    async fn handle_message(&self, socket: &mut WsStream, raw: &str) -> Result<Flow, AdapterError> {
        let message = match InboundMessage::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "skipping malformed message");
                return Ok(Flow::Continue);
            }
        };

        match message {
            InboundMessage::ExecuteCommand {
                request_id,
                command_type,
                params,
            } => {
                debug!(command_type = %command_type, request_id = ?request_id, "execute command");
                let result = self.execute(&command_type, params).await;
                let reply = OutboundMessage::CommandResult(CommandResultMessage::new(request_id, result));
                send_message(socket, &reply).await?;
            }
            InboundMessage::HealthCheck { request_id } => {
                let adapter_healthy = self
                    .adapter
                    .as_ref()
                    .is_some_and(|adapter| adapter.health_check());
                let reply = OutboundMessage::HealthCheckResponse(HealthCheckResponse {
                    request_id,
                    adapter_healthy,
                });
                send_message(socket, &reply).await?;
            }
            InboundMessage::Disconnect => {
                info!("server requested disconnect");
                return Ok(Flow::Disconnect);
            }
            InboundMessage::Unknown { kind } => {
                warn!(kind = ?kind, "unknown message type");
            }
        }

        Ok(Flow::Continue)
    }

    async fn execute(&self, command_type: &str, params: Params) -> CommandResult {
        let Some(adapter) = &self.adapter else {
            return CommandResult::fail(NO_ADAPTER_ERROR);
        };
        let _job = JobGuard::enter(&self.active_jobs);
        adapter.execute(command_type, params).await
    }
}

impl std::fmt::Debug for ServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClient")
            .field("server_url", &self.config.server_url)
            .field("adapter_id", &self.adapter_id)
            .field("has_adapter", &self.adapter.is_some())
            .field("state", &self.state())
            .finish()
    }
}

struct JobGuard<'a>(&'a AtomicU32);

impl<'a> JobGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn send_message(socket: &mut WsStream, message: &OutboundMessage) -> Result<(), AdapterError> {
    let text = envelope::encode_text(message)?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| AdapterError::WebSocket {
            reason: err.to_string(),
        })
}

async fn close_quietly(socket: &mut WsStream) {
    if let Err(err) = socket.close(None).await {
        debug!(error = %err, "close handshake failed");
    }
}

fn heartbeat_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
