use std::convert::Infallible;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use conjure_adapter::{
    Adapter, AdapterError, AdapterRunner, BasicAdapter, BlockingDispatcher, Capability,
    CommandRegistry, CommandResult, Params, ServerClientConfig, SocketClient, SocketClientConfig,
    SocketServer, SocketServerConfig,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const HOST_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct CliConfig {
    host: Option<String>,
    port: Option<u16>,
    timeout_ms: u64,
    url: Option<String>,
    api_key: Option<String>,
    adapter_type: Option<String>,
}

#[derive(Debug)]
enum Command {
    Send { command_type: String, params: Params },
    Health,
    Host,
    Serve,
    Capabilities,
    Help,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            if matches!(
                err,
                AdapterError::ConnectionRefused { .. } | AdapterError::ConnectTimeout { .. }
            ) {
                eprintln!(
                    "hint: start the CAD application's command socket, or pass --host/--port to point at it."
                );
            }
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode, AdapterError> {
    let (config, command) = parse_args()?;

    match command {
        Command::Help => print_help(),
        Command::Capabilities => {
            for capability in Capability::all() {
                println!("{capability}");
            }
        }
        Command::Send {
            command_type,
            params,
        } => {
            let client = SocketClient::new(socket_client_config(&config));
            let result = client.execute_command(&command_type, params)?;
            let rendered = serde_json::to_string_pretty(&result)
                .map_err(|err| AdapterError::JsonEncode(err.to_string()))?;
            println!("{rendered}");
            if !result.is_success() {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Health => {
            let client = SocketClient::new(socket_client_config(&config));
            if client.health_check() {
                println!("healthy: yes ({})", client.config().address());
            } else {
                println!("healthy: no ({})", client.config().address());
                return Ok(ExitCode::from(1));
            }
        }
        Command::Host => {
            let mut server_config = SocketServerConfig::default()
                .operation_timeout(Duration::from_millis(config.timeout_ms));
            if let Some(host) = &config.host {
                server_config.host = host.clone();
            }
            if let Some(port) = config.port {
                server_config.port = port;
            }
            server_config.validate()?;

            let dispatcher = BlockingDispatcher::new(echo_adapter())?;
            let server = SocketServer::new(server_config);
            server.start()?;
            if let Some(addr) = server.local_addr() {
                println!(
                    "listening on {addr}; commands: {}",
                    dispatcher.adapter().supported_commands().join(", ")
                );
            }

            while server.process_pending(|command_type: &str, params: Params| {
                dispatcher.dispatch(command_type, params)
            })? {
                std::thread::sleep(HOST_POLL_INTERVAL);
            }
        }
        Command::Serve => {
            let mut server_config = ServerClientConfig::default().with_env_overrides();
            if let Some(url) = config.url {
                server_config.server_url = url;
            }
            if let Some(api_key) = config.api_key {
                server_config.api_key = Some(api_key);
            }
            if let Some(adapter_type) = config.adapter_type {
                server_config.adapter_type = adapter_type;
            }

            let runner = AdapterRunner::builder(echo_adapter())
                .config(server_config)
                .build()?;
            println!(
                "serving adapter_id={} to {}",
                runner.client().adapter_id(),
                runner.client().config().server_url
            );
            runner.run_blocking()?;
            println!("final state: {}", runner.state());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn echo_adapter() -> Arc<dyn Adapter> {
    let mut registry = CommandRegistry::new();
    registry.register("ping", |_| {
        let mut data = Params::new();
        data.insert("message".to_string(), Value::from("pong"));
        Ok::<_, Infallible>(CommandResult::ok_with(data))
    });
    registry.register("echo", |params: Params| Ok::<_, Infallible>(CommandResult::ok_with(params)));
    registry.register("get_state", |_| {
        let mut data = Params::new();
        data.insert("objects".to_string(), Value::Array(Vec::new()));
        Ok::<_, Infallible>(data)
    });
    Arc::new(BasicAdapter::new(registry).with_capabilities([Capability::QUERIES]))
}

fn socket_client_config(config: &CliConfig) -> SocketClientConfig {
    let mut client = SocketClientConfig::default().timeout(Duration::from_millis(config.timeout_ms));
    if let Some(host) = &config.host {
        client.host = host.clone();
    }
    if let Some(port) = config.port {
        client.port = port;
    }
    client
}

fn parse_args() -> Result<(CliConfig, Command), AdapterError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() {
        return Ok((default_config(), Command::Help));
    }

    let mut config = default_config();
    let mut index = 0;

    while index < args.len() {
        let flag = args[index].as_str();
        if !matches!(
            flag,
            "--host" | "--port" | "--timeout-ms" | "--url" | "--api-key" | "--adapter-type"
        ) {
            index += 1;
            continue;
        }

        let value = args
            .get(index + 1)
            .cloned()
            .ok_or_else(|| AdapterError::Config {
                reason: format!("missing value for {flag}"),
            })?;
        match flag {
            "--host" => config.host = Some(value),
            "--port" => {
                config.port = Some(value.parse::<u16>().map_err(|err| AdapterError::Config {
                    reason: format!("invalid --port value `{value}`: {err}"),
                })?);
            }
            "--timeout-ms" => {
                config.timeout_ms = value.parse::<u64>().map_err(|err| AdapterError::Config {
                    reason: format!("invalid --timeout-ms value `{value}`: {err}"),
                })?;
            }
            "--url" => config.url = Some(value),
            "--api-key" => config.api_key = Some(value),
            _ => config.adapter_type = Some(value),
        }
        args.drain(index..=index + 1);
    }

    if args.is_empty() {
        return Ok((config, Command::Help));
    }

    let command = match args[0].as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "health" => Command::Health,
        "host" => Command::Host,
        "serve" => Command::Serve,
        "capabilities" => Command::Capabilities,
        "send" => {
            let command_type = args.get(1).cloned().ok_or_else(|| AdapterError::Config {
                reason: "send requires a command type".to_string(),
            })?;
            let params = match args.get(2) {
                Some(raw) => parse_params(raw)?,
                None => Params::new(),
            };
            Command::Send {
                command_type,
                params,
            }
        }
        other => {
            return Err(AdapterError::Config {
                reason: format!("unknown command `{other}`"),
            });
        }
    };

    Ok((config, command))
}

fn parse_params(raw: &str) -> Result<Params, AdapterError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(_) => Err(AdapterError::Config {
            reason: "send params must be a JSON object".to_string(),
        }),
        Err(err) => Err(AdapterError::Config {
            reason: format!("invalid send params `{raw}`: {err}"),
        }),
    }
}

fn default_config() -> CliConfig {
    CliConfig {
        host: None,
        port: None,
        timeout_ms: 30_000,
        url: None,
        api_key: None,
        adapter_type: None,
    }
}

fn print_help() {
    println!(
        "conjure-adapter-cli\n\nUSAGE:\n  cargo run --features blocking --bin conjure-adapter-cli -- [options] <command> [args]\n\nOPTIONS:\n  --host HOST                  Socket host (send/health default: localhost, host default: 127.0.0.1)\n  --port PORT                  Socket port (send/health default: 9876, host default: 9877)\n  --timeout-ms N               Socket / operation timeout (default: 30000)\n  --url URL                    Hosted server URL for serve (or CONJURE_SERVER_URL)\n  --api-key KEY                API key for serve (or CONJURE_API_KEY)\n  --adapter-type TYPE          Adapter type advertised by serve (default: generic)\n\nCOMMANDS:\n  send <type> [json-params]    Send one command to a CAD socket and print the result\n  health                       Check that the CAD socket accepts connections\n  host                         Host a command socket backed by a built-in echo adapter\n  serve                        Connect the built-in echo adapter to the hosted server\n  capabilities                 List the known capability identifiers\n  help                         Show help\n"
    );
}
