//! # minirpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Start a registry
//! minirpc registry -b 127.0.0.1:9999
//!
//! # Start servers that heartbeat to it
//! minirpc server -b 127.0.0.1:9001 --registry http://127.0.0.1:9999/_minirpc_/registry
//! minirpc server -b 127.0.0.1:9002 --http --registry http://127.0.0.1:9999/_minirpc_/registry
//!
//! # Call through the registry (outputs raw JSON)
//! minirpc call --registry http://127.0.0.1:9999/_minirpc_/registry Arith.Sum -a '{"num1": 1, "num2": 2}'
//!
//! # Call every server of a fixed list
//! minirpc call --addr tcp@127.0.0.1:9001 --addr http@127.0.0.1:9002 --broadcast Arith.Sum -a '{"num1": 1, "num2": 2}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use minirpc_client::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient};
use minirpc_common::{Options, DEFAULT_REGISTRY_PATH};
use minirpc_registry::{Heartbeat, Registry, RegistryServer};
use minirpc_server::Server;
use tokio::net::TcpListener;

/// Validates that a URL string starts with http://
fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http://",
            description,
            url
        ))
    }
}

#[derive(FromArgs)]
/// minirpc - a small multiplexed RPC framework
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Server(ServerArgs),
    Registry(RegistryArgs),
    Call(CallArgs),
}

/// Arguments for serving the demo `Arith` service.
///
/// # Example
///
/// ```bash
/// minirpc server -b 0.0.0.0:9001 --advertise 10.0.0.5:9001 --registry http://127.0.0.1:9999/_minirpc_/registry
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
/// serve the demo Arith service
struct ServerArgs {
    /// address to bind to
    ///
    /// Defaults to "0.0.0.0:0" which assigns a random available port.
    #[argh(option, short = 'b', default = "\"0.0.0.0:0\".into()")]
    bind: String,

    /// serve HTTP and accept RPC connections via CONNECT
    #[argh(switch)]
    http: bool,

    /// registry URL to send heartbeats to
    #[argh(option)]
    registry: Option<String>,

    /// address announced to the registry, without protocol prefix
    ///
    /// Defaults to the bound address; required when binding a wildcard address.
    #[argh(option)]
    advertise: Option<String>,

    /// seconds between heartbeats (0 = registry default timeout minus one minute)
    #[argh(option, long = "heartbeat-interval", default = "0")]
    heartbeat_interval: u64,
}

/// Arguments for running a registry.
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
/// run a heartbeat registry
struct RegistryArgs {
    /// address to bind the registry's HTTP server to
    #[argh(option, short = 'b', default = "\"0.0.0.0:9999\".into()")]
    bind: String,

    /// seconds a server stays alive after its last heartbeat (0 = forever)
    #[argh(option, default = "300")]
    timeout: u64,

    /// HTTP path to serve the registry on
    #[argh(option, default = "DEFAULT_REGISTRY_PATH.to_string()")]
    path: String,
}

/// Arguments for a single call.
///
/// Servers come from repeated `--addr` options or from `--registry`.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method and print the reply as JSON
struct CallArgs {
    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON-encoded arguments
    #[argh(option, short = 'a', default = "\"null\".into()")]
    args: String,

    /// server address as protocol@host:port; may be repeated
    #[argh(option, long = "addr")]
    addrs: Vec<String>,

    /// registry URL to discover servers from
    #[argh(option)]
    registry: Option<String>,

    /// call every server and print the first successful reply
    #[argh(switch)]
    broadcast: bool,

    /// server selection: random or round-robin
    #[argh(option, default = "\"random\".into()")]
    mode: String,

    /// call deadline in milliseconds (0 = none)
    #[argh(option, long = "timeout-ms", default = "0")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Registry(args) => run_registry(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", args.bind, e))?;
    let local_addr = listener.local_addr()?;

    let mut server = Server::new();
    server.register(minirpc_cli::arith_service())?;
    let server = Arc::new(server);

    if let Some(registry) = &args.registry {
        validate_http_url(registry, "registry address")?;
        let protocol = if args.http { "http" } else { "tcp" };
        let announced = announced_addr(protocol, args.advertise.as_deref(), local_addr)?;

        tracing::info!("Sending heartbeats for {} to {}", announced, registry);
        Heartbeat::new(
            registry.clone(),
            announced,
            Duration::from_secs(args.heartbeat_interval),
        )
        .start()
        .await?;
    }

    if args.http {
        server.serve_http(listener).await?;
    } else {
        server.accept(listener).await?;
    }
    Ok(())
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let addr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    tracing::info!("Registry timeout: {}s", args.timeout);
    let registry = Arc::new(Registry::new(Duration::from_secs(args.timeout)));
    RegistryServer::new(registry)
        .with_path(args.path)
        .run(addr)
        .await?;
    Ok(())
}

/// Executes the `call` subcommand.
///
/// No tracing is initialized for this command so stdout carries only the reply.
async fn run_call(args: CallArgs) -> Result<()> {
    let discovery: Arc<dyn Discovery> = match &args.registry {
        Some(registry) => {
            validate_http_url(registry, "registry address")?;
            Arc::new(RegistryDiscovery::new(registry.clone(), Duration::ZERO))
        }
        None if !args.addrs.is_empty() => Arc::new(MultiServersDiscovery::new(args.addrs.clone())),
        None => anyhow::bail!("Either --addr or --registry is required"),
    };

    let mode: SelectMode = args.mode.parse()?;
    let call_args: serde_json::Value = serde_json::from_str(&args.args)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let xclient = XClient::new(discovery, mode, Options::default());
    let result = call(&xclient, &args, &call_args, timeout).await;
    xclient.close().await?;

    println!("{}", serde_json::to_string(&result?)?);
    Ok(())
}

/// The `protocol@addr` a server announces to the registry.
///
/// A wildcard bind address is not dialable, so it needs an explicit `--advertise`.
fn announced_addr(protocol: &str, advertise: Option<&str>, local_addr: SocketAddr) -> Result<String> {
    let addr = match advertise {
        Some(addr) => addr.to_string(),
        None if local_addr.ip().is_unspecified() => anyhow::bail!(
            "bound to wildcard address {}; pass --advertise with a dialable address",
            local_addr
        ),
        None => local_addr.to_string(),
    };
    Ok(format!("{}@{}", protocol, addr))
}

async fn call(
    xclient: &XClient,
    args: &CallArgs,
    call_args: &serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let reply = match (args.broadcast, timeout.is_zero()) {
        (true, true) => {
            let mut reply = serde_json::Value::Null;
            xclient.broadcast(&args.method, call_args, &mut reply).await?;
            reply
        }
        (true, false) => {
            let mut reply = serde_json::Value::Null;
            xclient
                .broadcast_timeout(timeout, &args.method, call_args, &mut reply)
                .await?;
            reply
        }
        (false, true) => xclient.call(&args.method, call_args).await?,
        (false, false) => xclient.call_timeout(timeout, &args.method, call_args).await?,
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_server_defaults() {
        let args: Cli = Cli::from_args(&["minirpc"], &["server"]).unwrap();
        match args.command {
            Commands::Server(ServerArgs { bind, http, registry, advertise, heartbeat_interval }) => {
                assert_eq!(bind, "0.0.0.0:0");
                assert!(!http);
                assert!(registry.is_none());
                assert!(advertise.is_none());
                assert_eq!(heartbeat_interval, 0);
            }
            _ => panic!("Expected Server command"),
        }
    }

    #[test]
    fn test_cli_parse_server_with_registry() {
        let args: Cli = Cli::from_args(&["minirpc"], &[
            "server",
            "-b", "127.0.0.1:9001",
            "--http",
            "--registry", "http://127.0.0.1:9999/_minirpc_/registry",
            "--heartbeat-interval", "30",
        ]).unwrap();
        match args.command {
            Commands::Server(ServerArgs { bind, http, registry, heartbeat_interval, .. }) => {
                assert_eq!(bind, "127.0.0.1:9001");
                assert!(http);
                assert_eq!(registry.as_deref(), Some("http://127.0.0.1:9999/_minirpc_/registry"));
                assert_eq!(heartbeat_interval, 30);
            }
            _ => panic!("Expected Server command"),
        }
    }

    #[test]
    fn test_announced_addr() {
        let local: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert_eq!(announced_addr("tcp", None, local).unwrap(), "tcp@127.0.0.1:9001");

        let wildcard: SocketAddr = "0.0.0.0:9001".parse().unwrap();
        assert!(announced_addr("tcp", None, wildcard).is_err());
        assert_eq!(
            announced_addr("http", Some("10.0.0.5:9001"), wildcard).unwrap(),
            "http@10.0.0.5:9001"
        );

        let wildcard_v6: SocketAddr = "[::]:9001".parse().unwrap();
        assert!(announced_addr("tcp", None, wildcard_v6).is_err());
    }

    #[test]
    fn test_cli_parse_registry() {
        let args: Cli = Cli::from_args(&["minirpc"], &["registry", "--timeout", "0"]).unwrap();
        match args.command {
            Commands::Registry(RegistryArgs { bind, timeout, path }) => {
                assert_eq!(bind, "0.0.0.0:9999");
                assert_eq!(timeout, 0);
                assert_eq!(path, DEFAULT_REGISTRY_PATH);
            }
            _ => panic!("Expected Registry command"),
        }
    }

    #[test]
    fn test_cli_parse_call_multiple_addrs() {
        let args: Cli = Cli::from_args(&["minirpc"], &[
            "call",
            "--addr", "tcp@127.0.0.1:9001",
            "--addr", "http@127.0.0.1:9002",
            "--broadcast",
            "--mode", "round-robin",
            "Arith.Sum",
            "-a", r#"{"num1": 1, "num2": 2}"#,
        ]).unwrap();
        match args.command {
            Commands::Call(CallArgs { method, args, addrs, registry, broadcast, mode, timeout_ms }) => {
                assert_eq!(method, "Arith.Sum");
                assert_eq!(args, r#"{"num1": 1, "num2": 2}"#);
                assert_eq!(addrs, vec!["tcp@127.0.0.1:9001".to_string(), "http@127.0.0.1:9002".to_string()]);
                assert!(registry.is_none());
                assert!(broadcast);
                assert_eq!(mode, "round-robin");
                assert_eq!(timeout_ms, 0);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_requires_method() {
        assert!(Cli::from_args(&["minirpc"], &["call", "--addr", "tcp@127.0.0.1:1"]).is_err());
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("http://127.0.0.1:9999/_minirpc_/registry", "registry").is_ok());
        assert!(validate_http_url("127.0.0.1:9999", "registry").is_err());
    }

    #[tokio::test]
    async fn test_call_without_servers_fails() {
        let args: Cli = Cli::from_args(&["minirpc"], &["call", "Arith.Sum"]).unwrap();
        match args.command {
            Commands::Call(call_args) => assert!(run_call(call_args).await.is_err()),
            _ => panic!("Expected Call command"),
        }
    }
}
