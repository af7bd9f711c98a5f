use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::config::ServerClientConfig;
use crate::error::AdapterError;
use crate::server_client::{ConnectionState, ServerClient};

/// Runs one adapter against the hosted command server.
#[derive(Debug)]
pub struct AdapterRunner {
    client: Arc<ServerClient>,
    handle_ctrl_c: bool,
}

#[derive(Clone)]
pub struct AdapterRunnerBuilder {
    adapter: Arc<dyn Adapter>,
    config: ServerClientConfig,
    handle_ctrl_c: bool,
}

impl AdapterRunnerBuilder {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            adapter,
            config: ServerClientConfig::default(),
            handle_ctrl_c: true,
        }
    }

    pub fn server_url(mut self, server_url: impl Into<String>) -> Self {
        self.config.server_url = server_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn adapter_type(mut self, adapter_type: impl Into<String>) -> Self {
        self.config.adapter_type = adapter_type.into();
        self
    }

    pub fn adapter_id(mut self, adapter_id: impl Into<String>) -> Self {
        self.config.adapter_id = Some(adapter_id.into());
        self
    }

    /// Replaces the whole connection config, including anything set above.
    pub fn config(mut self, config: ServerClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether `run` also stops on Ctrl-C. Enabled by default.
    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.handle_ctrl_c = enabled;
        self
    }

    pub fn build(self) -> Result<AdapterRunner, AdapterError> {
        self.config.validate()?;
        Ok(AdapterRunner {
            client: Arc::new(ServerClient::with_adapter(self.config, self.adapter)),
            handle_ctrl_c: self.handle_ctrl_c,
        })
    }
}

impl std::fmt::Debug for AdapterRunnerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRunnerBuilder")
            .field("config", &self.config)
            .field("handle_ctrl_c", &self.handle_ctrl_c)
            .finish()
    }
}

impl AdapterRunner {
    pub fn builder(adapter: Arc<dyn Adapter>) -> AdapterRunnerBuilder {
        AdapterRunnerBuilder::new(adapter)
    }

    /// Runner with the default server address and no credentials.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self {
            client: Arc::new(ServerClient::with_adapter(
                ServerClientConfig::default(),
                adapter,
            )),
            handle_ctrl_c: true,
        }
    }

    /// Drives the connection until it ends or Ctrl-C arrives, then disconnects.
    ///
    /// The client is also marked disconnected if this future is dropped early.
    pub async fn run(&self) {
        info!(adapter_type = %self.client.config().adapter_type, "starting adapter service");
        let _guard = DisconnectOnDrop(&self.client);

        tokio::select! {
            _ = self.client.run() => {}
            _ = interrupted(self.handle_ctrl_c) => info!("shutting down"),
        }

        self.client.close().await;
    }

    /// Requests a graceful stop of a concurrent [`AdapterRunner::run`]. Called
    /// before `run`, the next `run` returns without connecting.
    pub async fn stop(&self) {
        self.client.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.client.subscribe()
    }

    pub fn client(&self) -> &Arc<ServerClient> {
        &self.client
    }
}

struct DisconnectOnDrop<'a>(&'a ServerClient);

impl Drop for DisconnectOnDrop<'_> {
    fn drop(&mut self) {
        self.0.mark_disconnected();
    }
}

async fn interrupted(enabled: bool) {
    if enabled {
        match tokio::signal::ctrl_c().await {
            Ok(()) => return,
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
        }
    }
    std::future::pending::<()>().await
}
