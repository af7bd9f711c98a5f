use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SocketClientConfig;
use crate::engine::Engine;
use crate::envelope;
use crate::error::AdapterError;
use crate::model::result::{CommandResult, Params};
use crate::protocol::CommandEnvelope;

/// One-shot client for a CAD application's newline-delimited JSON socket.
///
/// Every command opens a fresh connection, writes one frame, reads one frame
/// and closes. Connections are never reused.
#[derive(Clone, Debug, Default)]
pub struct SocketClient {
    config: SocketClientConfig,
}

impl SocketClient {
    pub fn new(config: SocketClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SocketClientConfig {
        &self.config
    }

    /// Validates the config and opens a connection with the configured timeout
    /// applied to connect, read and write.
    pub fn connect(&self) -> Result<TcpStream, AdapterError> {
        self.config.validate()?;
        let addr = self.config.address();
        let timeout = self.config.timeout;
        let candidates = resolve(&self.config.host, self.config.port).map_err(|err| {
            AdapterError::Connection {
                addr: addr.clone(),
                reason: err.to_string(),
            }
        })?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    configure(&stream, &self.config).map_err(|err| AdapterError::Connection {
                        addr: addr.clone(),
                        reason: err.to_string(),
                    })?;
                    debug!(addr = %addr, "connected to CAD socket");
                    return Ok(stream);
                }
                Err(err) => last_error = Some(err),
            }
        }

        let Some(err) = last_error else {
            return Err(AdapterError::Connection {
                addr,
                reason: "no resolved addresses".to_string(),
            });
        };

        Err(match err.kind() {
            io::ErrorKind::ConnectionRefused => AdapterError::ConnectionRefused { addr },
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                AdapterError::ConnectTimeout { addr, timeout }
            }
            _ => AdapterError::Connection {
                addr,
                reason: err.to_string(),
            },
        })
    }

    /// Writes `message` as a single frame.
    pub fn send<T: Serialize>(
        &self,
        stream: &mut TcpStream,
        message: &T,
    ) -> Result<(), AdapterError> {
        let frame = envelope::encode_line(message)?;
        stream
            .write_all(&frame)
            .and_then(|()| stream.flush())
            .map_err(|err| self.io_error(err, IoDirection::Send))
    }

    /// Reads until the accumulated bytes parse as one JSON document or the
    /// peer closes.
    pub fn receive(&self, stream: &mut TcpStream) -> Result<Value, AdapterError> {
        let mut buffer = Vec::new();
        let mut chunk = vec![0_u8; self.config.recv_buffer_size];

        loop {
            let read = match stream.read(&mut chunk) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.io_error(err, IoDirection::Receive)),
            };
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if let Some(value) = envelope::try_decode_frame(&buffer) {
                return Ok(value);
            }
        }

        if buffer.is_empty() {
            return Err(AdapterError::PeerClosed);
        }
        envelope::decode_frame(&buffer)
    }

    /// Connect, send, receive, close. The connection is closed on every path.
    pub fn send_command(&self, command: &CommandEnvelope) -> Result<Value, AdapterError> {
        let mut stream = self.connect()?;
        let outcome = self
            .send(&mut stream, command)
            .and_then(|()| self.receive(&mut stream));
        close(stream);
        outcome
    }

    /// Sends a command and interprets the response as a [`CommandResult`].
    pub fn execute_command(
        &self,
        command_type: &str,
        params: Params,
    ) -> Result<CommandResult, AdapterError> {
        let response = self.send_command(&CommandEnvelope::new(command_type, params))?;
        envelope::response_to_result(response)
    }

    /// True when a connection can be opened. Never returns an error.
    pub fn health_check(&self) -> bool {
        match self.connect() {
            Ok(stream) => {
                close(stream);
                true
            }
            Err(err) => {
                debug!(error = %err, "socket health check failed");
                false
            }
        }
    }

    fn io_error(&self, err: io::Error, direction: IoDirection) -> AdapterError {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => AdapterError::Timeout {
                timeout: self.config.timeout,
            },
            _ => match direction {
                IoDirection::Send => AdapterError::TransportSend {
                    reason: err.to_string(),
                },
                IoDirection::Receive => AdapterError::TransportReceive {
                    reason: err.to_string(),
                },
            },
        }
    }
}

impl Engine for SocketClient {
    fn execute(&self, command: &CommandEnvelope) -> Result<Value, AdapterError> {
        self.send_command(command)
    }

    fn health_check(&self) -> bool {
        SocketClient::health_check(self)
    }
}

#[derive(Clone, Copy)]
enum IoDirection {
    Send,
    Receive,
}

fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    Ok((host, port).to_socket_addrs()?.collect())
}

fn configure(stream: &TcpStream, config: &SocketClientConfig) -> io::Result<()> {
    stream.set_read_timeout(Some(config.timeout))?;
    stream.set_write_timeout(Some(config.timeout))?;
    stream.set_nodelay(true)
}

fn close(stream: TcpStream) {
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        if err.kind() != io::ErrorKind::NotConnected {
            warn!(error = %err, "failed to shut down CAD socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::SocketClient;
    use crate::config::SocketClientConfig;
    use crate::engine::Engine;
    use crate::error::AdapterError;
    use crate::model::result::{CommandResult, Params};
    use crate::protocol::CommandEnvelope;

    fn client_for(listener: &TcpListener) -> SocketClient {
        let port = listener.local_addr().expect("local addr").port();
        SocketClient::new(
            SocketClientConfig::new("127.0.0.1", port)
                .timeout(Duration::from_secs(5))
                .recv_buffer_size(8),
        )
    }

    /// Accepts one connection, records the request line and replies in two
    /// writes so the client must accumulate chunks.
    fn serve_once(listener: TcpListener, reply: Option<&'static str>) -> thread::JoinHandle<Value> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            if let Some(reply) = reply {
                let mut stream = stream;
                let (head, tail) = reply.split_at(reply.len() / 2);
                stream.write_all(head.as_bytes()).expect("write head");
                stream.flush().expect("flush");
                thread::sleep(Duration::from_millis(20));
                stream.write_all(tail.as_bytes()).expect("write tail");
                stream.write_all(b"\n").expect("write delimiter");
            }
            serde_json::from_str(line.trim()).expect("request is JSON")
        })
    }

    #[test]
    fn send_command_round_trips_one_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = client_for(&listener);
        let server = serve_once(
            listener,
            Some(r#"{"success": true, "data": {"object": "Box001"}}"#),
        );

        let mut params = Params::new();
        params.insert("width".to_string(), json!(10));
        let command = CommandEnvelope::new("create_box", params).with_request_id("req_1");
        let response = client.send_command(&command).expect("response");

        assert_eq!(response["data"]["object"], json!("Box001"));
        let request = server.join().expect("server thread");
        assert_eq!(
            request,
            json!({"type": "create_box", "params": {"width": 10}, "request_id": "req_1"})
        );
    }

    #[test]
    fn execute_command_maps_legacy_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = client_for(&listener);
        let server = serve_once(listener, Some(r#"{"status": "error", "error": "No active document"}"#));

        let result = client
            .execute_command("get_state", Params::new())
            .expect("response");
        assert_eq!(result, CommandResult::fail("No active document"));
        server.join().expect("server thread");
    }

    #[test]
    fn peer_close_without_reply_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = client_for(&listener);
        let server = serve_once(listener, None);

        let err = client
            .send_command(&CommandEnvelope::new("ping", Params::new()))
            .expect_err("no reply should fail");
        assert!(matches!(err, AdapterError::PeerClosed));
        server.join().expect("server thread");
    }

    #[test]
    fn refused_connection_is_distinguished() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let client = SocketClient::new(SocketClientConfig::new("127.0.0.1", port));

        let err = client.connect().expect_err("nothing is listening");
        assert!(matches!(err, AdapterError::ConnectionRefused { .. }));
        assert!(err.to_string().contains("Is the CAD application running?"));
        assert!(!client.health_check());
    }

    #[test]
    fn invalid_config_fails_before_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let client = SocketClient::new(SocketClientConfig::new("127.0.0.1", port).recv_buffer_size(0));

        let err = client
            .send_command(&CommandEnvelope::new("ping", Params::new()))
            .expect_err("zero buffer should be rejected");
        assert!(matches!(err, AdapterError::Config { .. }));
        assert!(!client.health_check());
    }

    #[test]
    fn health_check_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = client_for(&listener);
        assert!(Engine::health_check(&client));
    }
}
