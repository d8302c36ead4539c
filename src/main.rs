mod auth;
mod config;
mod dispatch;
mod error;
mod format;
mod logging;
mod models;
mod regions;
mod server;
mod stats;
mod streaming;
mod truncate;
mod upstream;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::CredentialBridge;
use config::Config;
use dispatch::ProxyState;
use stats::get_stats;
use upstream::VertexClient;

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args: Vec<String> = env::args().collect();

    let mut port: Option<u16> = None;
    let mut host: Option<String> = None;
    let mut project: Option<String> = None;
    let mut debug = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                match args.get(i).and_then(|p| p.parse::<u16>().ok()) {
                    Some(p) if p > 0 => port = Some(p),
                    _ => {
                        eprintln!("Invalid or missing value for --port");
                        std::process::exit(1);
                    }
                }
            }
            "--host" => {
                i += 1;
                match args.get(i) {
                    Some(h) => host = Some(h.clone()),
                    None => {
                        eprintln!("Missing value for --host");
                        std::process::exit(1);
                    }
                }
            }
            "--project" => {
                i += 1;
                match args.get(i) {
                    Some(p) => project = Some(p.clone()),
                    None => {
                        eprintln!("Missing value for --project");
                        std::process::exit(1);
                    }
                }
            }
            "--config" | "-c" => {
                i += 1;
                match args.get(i) {
                    Some(path) => unsafe { env::set_var("VERTEX_PROXY_CONFIG", path) },
                    None => {
                        eprintln!("Missing value for --config");
                        std::process::exit(1);
                    }
                }
            }
            "--debug" | "-d" => debug = true,
            "-h" | "--help" => {
                print_help();
                return;
            }
            "-V" | "--version" => {
                println!("vproxy {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            arg => {
                eprintln!("Unknown option: {arg}");
                eprintln!();
                eprintln!("Run 'vproxy --help' for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    init_logging(debug);

    let mut config = match Config::load() {
        Ok(config) => config.with_overrides(port, host),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(project) = project {
        config.project_id = project;
    }

    if let Err(e) = config.require_project() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    run_server(config).await;
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vproxy=debug,warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vproxy=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

async fn run_server(config: Config) {
    let discovery = regions::load_discovery();
    if discovery.is_some() {
        info!("Loaded region discovery cache");
    }

    get_stats().set_port(config.port);
    get_stats().save();

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "Invalid listen address");
            std::process::exit(1);
        }
    };

    let state = Arc::new(ProxyState::new(
        config,
        VertexClient::new(),
        CredentialBridge::new(),
        discovery,
    ));

    info!(
        address = %addr,
        project = %state.config.project_id,
        "Starting vproxy"
    );

    if let Err(e) = accept_loop(addr, state).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }

    get_stats().save();
}

async fn accept_loop(addr: SocketAddr, state: Arc<ProxyState>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal, stopping server");
                break;
            }
            result = listener.accept() => {
                let (stream, remote_addr) = result?;
                let state = state.clone();

                tokio::spawn(async move {
                    if let Err(e) = server::handle_connection(stream, remote_addr, state).await {
                        tracing::warn!(error = %e, remote = %remote_addr, "Connection error");
                    }
                });
            }
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_help() {
    println!(
        r#"vproxy {} — OpenAI-compatible proxy for Google Vertex AI

USAGE:  vproxy [OPTIONS]

OPTIONS:
  -p, --port <PORT>       Listen port (default: 8000)
      --host <HOST>       Bind address (default: 127.0.0.1)
      --project <ID>      Google Cloud project id
  -c, --config <PATH>     Config file path (default: ~/.vertex_proxy/config.toml)
  -d, --debug             Enable debug logging
  -h, --help              Show this help message
  -V, --version           Show version information

ENVIRONMENT:
  VERTEX_PROXY_PROJECT / GOOGLE_CLOUD_PROJECT   project id
  VERTEX_PROXY_PORT                             listen port
  VERTEX_PROXY_REGION                           default Anthropic region
  VERTEX_PROXY_GOOGLE_REGION                    default Google region
  GOOGLE_ACCESS_TOKEN                           bearer token override

Config: ~/.vertex_proxy/config.toml
Logs:   ~/.vertex_proxy/proxy.log"#,
        env!("CARGO_PKG_VERSION")
    );
}
