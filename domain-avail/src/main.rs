//! Domain Avail Server
//!
//! A WebSocket server answering domain availability queries.
//! Each text message is one query; each reply is `<query>:<STATUS>`.

mod session;
mod tls;

use axum::serve::ListenerExt;
use clap::Parser;
use domain_avail_lib::{
    load_env_config, AvailabilityChecker, ConfigManager, EnvConfig, LoadedConfig, Settings,
    TlsFiles,
};
use session::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI arguments for domain-avail
#[derive(Parser, Debug)]
#[command(name = "domain-avail")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSocket server answering domain availability queries via DNS with WHOIS fallback")]
pub struct Args {
    /// Use a specific config file instead of discovered ones
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<String>,

    /// Address to listen on
    #[arg(short = 'b', long = "bind", value_name = "ADDR")]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Allowed Origin header value (repeatable, replaces configured origins)
    #[arg(long = "allow-origin", value_name = "ORIGIN", action = clap::ArgAction::Append)]
    pub allow_origins: Vec<String>,

    /// PEM certificate chain; serves wss:// together with --tls-key
    #[arg(long = "tls-cert", value_name = "FILE")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for --tls-cert
    #[arg(long = "tls-key", value_name = "FILE")]
    pub tls_key: Option<PathBuf>,

    /// Log every cascade step
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let env_config = load_env_config();
    let loaded = load_config_files(&args, &env_config)?;
    let settings = resolve_settings(&args, &env_config, loaded.config.clone())?;

    init_logging(settings.debug);

    for source in &loaded.sources {
        info!(path = %source.display(), "loaded configuration");
    }
    for warning in &env_config.warnings {
        warn!("{}", warning);
    }
    if settings.server.allowed_origins.is_empty() {
        warn!("no allowed origins configured, every connection will be rejected");
    }

    let checker = AvailabilityChecker::with_config(&settings.check)?;
    info!(
        cache = checker.cache().backend_name(),
        ttl = ?settings.check.cache_ttl,
        "result cache ready"
    );

    let state = AppState {
        checker: Arc::new(checker),
        allowed_origins: Arc::new(settings.server.allowed_origins.clone()),
        protocol: settings.server.protocol.clone(),
    };

    // Load TLS material before binding so a bad key never opens the port
    let acceptor = settings.server.tls.as_ref().map(tls::load_acceptor).transpose()?;

    let addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    let app = session::router(state).into_make_service_with_connect_info::<SocketAddr>();

    match acceptor {
        Some(acceptor) => {
            info!(address = %addr, scheme = "wss", protocol = %settings.server.protocol, "listening");
            axum::serve(tls::TlsListener::new(listener, acceptor)?.tap_io(|_| {}), app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => {
            info!(address = %addr, scheme = "ws", protocol = %settings.server.protocol, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}

/// An explicit file replaces discovery; otherwise the standard locations merge.
fn load_config_files(
    args: &Args,
    env_config: &EnvConfig,
) -> Result<LoadedConfig, domain_avail_lib::DomainAvailError> {
    let manager = ConfigManager::new();

    match args.config.as_ref().or(env_config.config.as_ref()) {
        Some(path) => Ok(LoadedConfig {
            config: manager.load_file(path)?,
            sources: vec![path.into()],
        }),
        None => manager.discover_and_load(),
    }
}

/// Command line beats everything else.
fn resolve_settings(
    args: &Args,
    env_config: &EnvConfig,
    file: domain_avail_lib::FileConfig,
) -> Result<Settings, domain_avail_lib::DomainAvailError> {
    let mut settings = Settings::resolve(file, env_config)?;

    if let Some(bind) = &args.bind {
        settings.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        if port == 0 {
            return Err(domain_avail_lib::DomainAvailError::config(
                "Port must be between 1 and 65535",
            ));
        }
        settings.server.port = port;
    }
    if !args.allow_origins.is_empty() {
        settings.server.allowed_origins = args.allow_origins.clone();
    }
    if args.tls_cert.is_some() || args.tls_key.is_some() {
        // Flags replace the configured pair as a whole
        settings.server.tls = TlsFiles::pair(args.tls_cert.clone(), args.tls_key.clone())?;
    }
    if args.debug {
        settings.debug = true;
    }

    Ok(settings)
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown requested");
}
