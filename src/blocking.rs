use std::sync::Arc;

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::model::result::{CommandResult, Params};
use crate::runner::AdapterRunner;

/// Synchronous front end for an adapter's dispatcher.
///
/// Owns a current-thread runtime, so it must not be called from inside another
/// tokio runtime. Pass [`BlockingDispatcher::dispatch`] to
/// [`crate::transport::SocketServer::process_queue`] to run adapter commands on
/// the CAD application's own thread.
pub struct BlockingDispatcher {
    runtime: tokio::runtime::Runtime,
    adapter: Arc<dyn Adapter>,
}

impl BlockingDispatcher {
    pub fn new(adapter: Arc<dyn Adapter>) -> Result<Self, AdapterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| AdapterError::Runtime(err.to_string()))?;
        Ok(Self { runtime, adapter })
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn dispatch(&self, command_type: &str, params: Params) -> CommandResult {
        self.runtime
            .block_on(self.adapter.execute(command_type, params))
    }

    pub fn health_check(&self) -> bool {
        self.adapter.health_check()
    }
}

impl std::fmt::Debug for BlockingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDispatcher")
            .field("commands", &self.adapter.supported_commands())
            .finish()
    }
}

impl AdapterRunner {
    /// Runs [`AdapterRunner::run`] to completion on a fresh runtime.
    pub fn run_blocking(&self) -> Result<(), AdapterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AdapterError::Runtime(err.to_string()))?;
        runtime.block_on(self.run());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};

    use super::BlockingDispatcher;
    use crate::adapter::BasicAdapter;
    use crate::config::SocketServerConfig;
    use crate::model::result::{CommandResult, Params};
    use crate::registry::CommandRegistry;
    use crate::transport::SocketServer;

    fn dispatcher() -> BlockingDispatcher {
        let mut registry = CommandRegistry::new();
        registry.register_async("measure", |params: Params| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let mut data = Params::new();
            data.insert(
                "length".to_string(),
                params.get("length").cloned().unwrap_or(Value::Null),
            );
            Ok::<_, Infallible>(CommandResult::ok_with(data))
        });
        BlockingDispatcher::new(Arc::new(BasicAdapter::new(registry))).expect("runtime")
    }

    #[test]
    fn dispatch_blocks_on_async_handlers() {
        let dispatcher = dispatcher();
        let mut params = Params::new();
        params.insert("length".to_string(), json!(42));

        let result = dispatcher.dispatch("measure", params);
        assert_eq!(result.data().get("length"), Some(&json!(42)));
        assert_eq!(
            dispatcher.dispatch("spin", Params::new()).error(),
            Some("Unknown command: spin")
        );
        assert!(dispatcher.health_check());
    }

    #[test]
    fn drives_socket_server_queue_on_calling_thread() {
        let dispatcher = dispatcher();
        let server = SocketServer::new(SocketServerConfig::new("127.0.0.1", 0));
        server.start().expect("bind loopback");
        let addr = server.local_addr().expect("bound address");

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).expect("connect");
            stream
                .write_all(b"{\"type\":\"measure\",\"params\":{\"length\":7},\"request_id\":\"m1\"}\n")
                .expect("write");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read");
            serde_json::from_str::<Value>(line.trim()).expect("JSON")
        });

        let deadline = Instant::now() + Duration::from_secs(10);
        while !client.is_finished() {
            assert!(Instant::now() < deadline, "client never answered");
            server
                .process_pending(|command_type: &str, params: Params| {
                    dispatcher.dispatch(command_type, params)
                })
                .expect("poll");
            thread::sleep(Duration::from_millis(5));
        }

        let response = client.join().expect("client thread");
        assert_eq!(
            response,
            json!({"success": true, "data": {"length": 7}, "request_id": "m1"})
        );
        server.stop().expect("stop");
    }
}
