use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::OPERATION_TIMED_OUT;
use crate::config::SocketServerConfig;
use crate::dispatch::panic_message;
use crate::envelope;
use crate::error::AdapterError;
use crate::model::result::{CommandResult, Params};
use crate::protocol::{CommandEnvelope, CommandResponse};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const CONNECTION_POLL: Duration = Duration::from_millis(250);

/// A decoded command waiting for the application's execution thread.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingOperation {
    pub command_type: String,
    pub params: Params,
    pub request_id: String,
}

/// Queue entry tagged with the registration it completes.
#[derive(Debug)]
struct Queued {
    operation: PendingOperation,
    ticket: u64,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    done: SyncSender<CommandResult>,
}

type Waiters = HashMap<String, Waiter>;

#[derive(Debug)]
struct Shared {
    config: SocketServerConfig,
    running: AtomicBool,
    next_ticket: AtomicU64,
    queue_tx: mpsc::UnboundedSender<Queued>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Queued>>,
    waiters: Mutex<Waiters>,
}

/// Command server hosted inside a CAD application.
///
/// Connection threads decode frames and park on a per-request completion
/// channel; the application's own thread drains the queue through
/// [`SocketServer::process_queue`], so command execution never leaves it.
#[derive(Debug)]
pub struct SocketServer {
    shared: Arc<Shared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SocketServer {
    /// Allocates the queue and correlation map. Nothing is bound until
    /// [`SocketServer::start`].
    pub fn new(config: SocketServerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        info!(addr = %config.address(), "socket server initialized");
        Self {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                next_ticket: AtomicU64::new(0),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                waiters: Mutex::new(HashMap::new()),
            }),
            accept_thread: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SocketServerConfig {
        &self.shared.config
    }

    /// Validates the config, binds the listener and spawns the accept thread.
    /// Calling this while running logs and returns `Ok`.
    pub fn start(&self) -> Result<(), AdapterError> {
        self.shared.config.validate()?;
        let mut accept_thread = self
            .accept_thread
            .lock()
            .map_err(|_| AdapterError::InternalPoisoned)?;
        if self.shared.running.load(Ordering::SeqCst) {
            warn!("socket server already running");
            return Ok(());
        }

        let addr = self.shared.config.address();
        let listener = TcpListener::bind(&addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .map_err(|err| AdapterError::Bind {
                addr: addr.clone(),
                reason: err.to_string(),
            })?;
        let bound = listener.local_addr().map_err(|err| AdapterError::Bind {
            addr: addr.clone(),
            reason: err.to_string(),
        })?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("conjure-socket-accept".to_string())
            .spawn(move || accept_loop(listener, shared))
            .map_err(|err| {
                self.shared.running.store(false, Ordering::SeqCst);
                AdapterError::ThreadSpawn {
                    name: "conjure-socket-accept".to_string(),
                    reason: err.to_string(),
                }
            })?;

        *accept_thread = Some(handle);
        *self
            .local_addr
            .lock()
            .map_err(|_| AdapterError::InternalPoisoned)? = Some(bound);
        info!(addr = %bound, "socket server started");
        Ok(())
    }

    /// Clears the running flag and waits for the accept thread to drop the
    /// listener. Connection threads exit at their next read poll.
    pub fn stop(&self) -> Result<(), AdapterError> {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self
            .accept_thread
            .lock()
            .map_err(|_| AdapterError::InternalPoisoned)?
            .take();
        *self
            .local_addr
            .lock()
            .map_err(|_| AdapterError::InternalPoisoned)? = None;

        if let Some(handle) = handle {
            handle.join().map_err(|_| AdapterError::ThreadPanic)?;
            info!("socket server stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Operations queued and not yet taken by [`SocketServer::process_queue`].
    pub fn queue_size(&self) -> usize {
        self.shared
            .queue_rx
            .lock()
            .map(|queue| queue.len())
            .unwrap_or_default()
    }

    /// Callers currently waiting for a result.
    pub fn pending_count(&self) -> usize {
        self.shared
            .waiters
            .lock()
            .map(|waiters| waiters.len())
            .unwrap_or_default()
    }

    /// Decodes `raw`, queues it and blocks the calling thread until the
    /// execution thread completes it or `timeout` elapses.
    pub fn queue_and_wait(&self, raw: &str, timeout: Duration) -> CommandResponse {
        self.shared.queue_and_wait(raw, timeout)
    }

    /// Executes up to `max_ops` queued operations on the calling thread.
    ///
    /// Call this from the application's idle or timer callback. Executor
    /// panics become failure results. Returns `Ok(false)` once the server has
    /// stopped, telling the caller to stop polling.
    pub fn process_queue<F, R>(&self, mut executor: F, max_ops: usize) -> Result<bool, AdapterError>
    where
        F: FnMut(&str, Params) -> R,
        R: Into<CommandResult>,
    {
        if !self.is_running() {
            return Ok(false);
        }

        for _ in 0..max_ops {
            let next = self
                .shared
                .queue_rx
                .lock()
                .map_err(|_| AdapterError::InternalPoisoned)?
                .try_recv();
            let Ok(Queued { operation, ticket }) = next else {
                break;
            };

            let PendingOperation {
                command_type,
                params,
                request_id,
            } = operation;
            let result = match panic::catch_unwind(AssertUnwindSafe(|| -> CommandResult {
                executor(&command_type, params).into()
            })) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(command_type = %command_type, error = %message, "executor panicked");
                    CommandResult::fail(message)
                }
            };

            self.shared.complete(&request_id, ticket, result)?;
        }

        Ok(true)
    }

    /// [`SocketServer::process_queue`] with the configured per-call limit.
    pub fn process_pending<F, R>(&self, executor: F) -> Result<bool, AdapterError>
    where
        F: FnMut(&str, Params) -> R,
        R: Into<CommandResult>,
    {
        self.process_queue(executor, self.shared.config.max_ops_per_call)
    }
}

impl Default for SocketServer {
    fn default() -> Self {
        Self::new(SocketServerConfig::default())
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "socket server did not stop cleanly");
        }
    }
}

impl Shared {
    fn queue_and_wait(&self, raw: &str, timeout: Duration) -> CommandResponse {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "malformed command frame");
                return CommandResponse::new(CommandResult::fail(format!("Invalid JSON: {err}")), None);
            }
        };
        let command = match CommandEnvelope::from_wire(&value) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "malformed command frame");
                return CommandResponse::new(CommandResult::fail(format!("Invalid JSON: {err}")), None);
            }
        };

        let request_id = command
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let result = self.enqueue_and_wait(command.command_type, command.params, &request_id, timeout);
        CommandResponse::new(result, Some(request_id))
    }

    fn enqueue_and_wait(
        &self,
        command_type: String,
        params: Params,
        request_id: &str,
        timeout: Duration,
    ) -> CommandResult {
        let (done, done_rx) = sync_channel(1);
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        {
            let mut waiters = match self.waiters.lock() {
                Ok(waiters) => waiters,
                Err(_) => return CommandResult::fail(AdapterError::InternalPoisoned.to_string()),
            };
            if waiters.contains_key(request_id) {
                warn!(request_id, "request id reused while still pending");
                return CommandResult::fail(format!("Duplicate request id: {request_id}"));
            }
            waiters.insert(request_id.to_string(), Waiter { ticket, done });
        }

        let operation = PendingOperation {
            command_type,
            params,
            request_id: request_id.to_string(),
        };
        // Cannot fail: `self` owns the receiver.
        let _ = self.queue_tx.send(Queued { operation, ticket });

        match done_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.forget(request_id, ticket);
                // The execution thread may have completed between the timeout
                // and the removal above.
                done_rx
                    .try_recv()
                    .unwrap_or_else(|_| CommandResult::fail(OPERATION_TIMED_OUT))
            }
            Err(RecvTimeoutError::Disconnected) => CommandResult::fail("No result"),
        }
    }

    /// Removes the registration for `request_id` only if it still belongs to
    /// `ticket`.
    fn take_waiter(waiters: &mut Waiters, request_id: &str, ticket: u64) -> Option<Waiter> {
        let owned = waiters
            .get(request_id)
            .is_some_and(|waiter| waiter.ticket == ticket);
        if owned {
            waiters.remove(request_id)
        } else {
            None
        }
    }

    fn forget(&self, request_id: &str, ticket: u64) {
        if let Ok(mut waiters) = self.waiters.lock() {
            Self::take_waiter(&mut waiters, request_id, ticket);
        }
    }

    fn complete(
        &self,
        request_id: &str,
        ticket: u64,
        result: CommandResult,
    ) -> Result<(), AdapterError> {
        let waiter = {
            let mut waiters = self
                .waiters
                .lock()
                .map_err(|_| AdapterError::InternalPoisoned)?;
            Self::take_waiter(&mut waiters, request_id, ticket)
        };

        match waiter {
            Some(waiter) => {
                if waiter.done.try_send(result).is_err() {
                    debug!(request_id, "waiter left before completion");
                }
            }
            None => debug!(request_id, "dropping result for abandoned operation"),
        }
        Ok(())
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut last_error = None::<io::ErrorKind>;
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                last_error = None;
                info!(peer = %peer, "client connected");
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("conjure-socket-conn-{peer}"))
                    .spawn(move || handle_connection(stream, peer, shared));
                if let Err(err) = spawned {
                    error!(peer = %peer, error = %err, "failed to spawn connection thread");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_BACKOFF),
            Err(err) => {
                if last_error != Some(err.kind()) {
                    warn!(error = %err, "socket accept error");
                }
                last_error = Some(err.kind());
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!("accept loop exited");
}

fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    if let Err(err) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(CONNECTION_POLL)))
    {
        warn!(peer = %peer, error = %err, "failed to configure client socket");
        return;
    }

    let mut buffer = Vec::new();
    let mut chunk = vec![0_u8; shared.config.recv_buffer_size];

    'connection: while shared.running.load(Ordering::SeqCst) {
        let read = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "client read failed");
                break;
            }
        };
        buffer.extend_from_slice(&chunk[..read]);

        for line in envelope::drain_lines(&mut buffer) {
            let raw = String::from_utf8_lossy(&line);
            let response = shared.queue_and_wait(&raw, shared.config.operation_timeout);
            let written = envelope::encode_line(&response).and_then(|frame| {
                stream
                    .write_all(&frame)
                    .map_err(|err| AdapterError::TransportSend {
                        reason: err.to_string(),
                    })
            });
            if let Err(err) = written {
                warn!(peer = %peer, error = %err, "client write failed");
                break 'connection;
            }
        }
    }

    if let Err(err) = stream.shutdown(Shutdown::Both) {
        if err.kind() != io::ErrorKind::NotConnected {
            warn!(peer = %peer, error = %err, "failed to shut down client socket");
        }
    }
    debug!(peer = %peer, "client disconnected");
}
