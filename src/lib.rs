//! # Conjure Adapter
//!
//! **Rust adapter framework connecting local CAD applications to the hosted Conjure command server.**
//! Typed command dispatch, local socket transports, and a self-healing websocket connection.
//!
//! An adapter is a [`CommandRegistry`] plus health and capability declarations
//! ([`Adapter`]). The same adapter can be driven three ways:
//!
//! | Transport | Direction | Type |
//! | --- | --- | --- |
//! | Hosted server | adapter dials out over websocket | [`ServerClient`] / [`AdapterRunner`] |
//! | CAD-hosted socket | adapter dials the CAD app | [`SocketClient`] |
//! | Adapter-hosted socket | external controller dials in | [`SocketServer`] |
//!
//! ## Quickstart (async)
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! use conjure_adapter::{AdapterRunner, BasicAdapter, Capability, CommandRegistry, CommandResult};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), conjure_adapter::AdapterError> {
//!     let mut registry = CommandRegistry::new();
//!     registry.register("create_box", |_params| Ok::<_, Infallible>(CommandResult::ok()));
//!     let adapter = BasicAdapter::new(registry).with_capabilities([Capability::PRIMITIVES]);
//!
//!     let runner = AdapterRunner::builder(Arc::new(adapter))
//!         .api_key("sk_test_123")
//!         .adapter_type("freecad")
//!         .build()?;
//!     runner.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Quickstart (blocking)
//!
//! ```no_run
//! # #[cfg(feature = "blocking")]
//! # fn run() -> Result<(), conjure_adapter::AdapterError> {
//! use std::sync::Arc;
//!
//! use conjure_adapter::{BasicAdapter, BlockingDispatcher, SocketServer, SocketServerConfig};
//!
//! let dispatcher = BlockingDispatcher::new(Arc::new(BasicAdapter::default()))?;
//! let server = SocketServer::new(SocketServerConfig::default());
//! server.start()?;
//! // From the CAD application's timer callback:
//! while server.process_pending(|kind: &str, params| dispatcher.dispatch(kind, params))? {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Architecture layers:
//! - registry and dispatch
//! - envelope and protocol
//! - transports (local sockets, hosted websocket)
//! - runner

/// Adapter trait and a registry-backed implementation.
pub mod adapter;
/// Connection, socket and engine settings.
pub mod config;
mod dispatch;
/// Framing helpers for newline-delimited JSON and websocket text frames.
///
/// This is primarily an advanced/internal surface.
pub mod envelope;
/// Transport engine contract.
pub mod engine;
/// Error types returned by this crate.
pub mod error;
/// Result and capability data models.
pub mod model;
/// Wire messages for the local sockets and the hosted connection.
pub mod protocol;
/// Command-type to handler mapping.
pub mod registry;
/// Local TCP transports.
pub mod transport;

#[cfg(feature = "async")]
/// Adapter runner over the persistent connection.
pub mod runner;
#[cfg(feature = "async")]
/// Persistent websocket connection to the hosted command server.
pub mod server_client;

#[cfg(feature = "blocking")]
/// Blocking wrappers for synchronous hosts.
pub mod blocking;

pub use crate::adapter::{Adapter, AdapterManifest, BasicAdapter};
#[cfg(feature = "blocking")]
pub use crate::blocking::BlockingDispatcher;
pub use crate::config::{
    EngineConfig, ServerClientConfig, SocketClientConfig, SocketServerConfig, DEFAULT_SERVER_URL,
};
pub use crate::dispatch::DispatchFuture;
pub use crate::engine::Engine;
pub use crate::error::AdapterError;
pub use crate::model::capability::Capability;
pub use crate::model::result::{CommandResult, Params, WireResult};
pub use crate::protocol::{
    AdapterStatus, CommandEnvelope, CommandResponse, CommandResultMessage, HealthCheckResponse,
    HeartbeatPayload, InboundMessage, OutboundMessage, RegistrationPayload,
};
pub use crate::registry::{CommandHandler, CommandRegistry, HandlerFuture};
#[cfg(feature = "async")]
pub use crate::runner::{AdapterRunner, AdapterRunnerBuilder};
#[cfg(feature = "async")]
pub use crate::server_client::{ConnectionState, ServerClient};
pub use crate::transport::{PendingOperation, SocketClient, SocketServer};
