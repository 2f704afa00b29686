use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_relay::config::{AppConfig, ConfigStore};
use stream_relay::events::EventBus;
use stream_relay::media::{LocalMediaEngine, MediaEngine};
use stream_relay::session::{SessionRegistry, SessionSettings};
use stream_relay::state::AppState;
use stream_relay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// stream-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "stream-relay")]
#[command(version, about = "WebRTC signaling server relaying one video source to browsers", long_about = None)]
struct CliArgs {
    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// HTTPS port (overrides config file)
    #[arg(long, value_name = "PORT")]
    https_port: Option<u16>,

    /// Enable HTTPS (overrides config file)
    #[arg(long)]
    enable_https: bool,

    /// Path to SSL certificate file (generates self-signed if not provided)
    #[arg(long, value_name = "FILE", requires = "ssl_key")]
    ssl_cert: Option<PathBuf>,

    /// Path to SSL private key file
    #[arg(long, value_name = "FILE", requires = "ssl_cert")]
    ssl_key: Option<PathBuf>,

    /// Data directory path (default: /etc/stream-relay)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Install default crypto provider (required by rustls 0.23+)
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing::info!("Starting stream-relay v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("stream-relay.json")).await?;
    let mut config = (*config_store.get()).clone();
    apply_cli_overrides(&mut config, args);

    // Media router and the single source it relays
    let engine = Arc::new(LocalMediaEngine::new(&config.media.codecs)?);
    let source_params = config.media.source.rtp_parameters(&config.media.codecs)?;
    let source = engine
        .produce(config.media.source.kind, source_params)
        .await?;
    tracing::info!(
        "Media source {} ready ({} ssrc {})",
        source.id,
        config.media.source.mime_type,
        config.media.source.ssrc
    );

    let events = Arc::new(EventBus::new());
    let registry = Arc::new(SessionRegistry::new(
        engine,
        events.clone(),
        SessionSettings::from_config(&config)?,
    ));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = AppState::new(
        config_store,
        source,
        registry,
        events,
        shutdown_tx.clone(),
    );

    let app = web::create_router(state.clone());

    let bind_ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let bind_port = if config.web.https_enabled {
        config.web.https_port
    } else {
        config.web.http_port
    };
    let addr = SocketAddr::new(bind_ip, bind_port);

    // Setup graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    if config.web.https_enabled {
        let tls_config = if let (Some(cert_path), Some(key_path)) =
            (&config.web.ssl_cert_path, &config.web.ssl_key_path)
        {
            RustlsConfig::from_pem_file(cert_path, key_path).await?
        } else {
            let cert_dir = data_dir.join("certs");
            let cert_path = cert_dir.join("server.crt");
            let key_path = cert_dir.join("server.key");

            // Only generate if missing
            if !cert_path.exists() || !key_path.exists() {
                tracing::info!("Generating new self-signed TLS certificate");
                let cert = generate_self_signed_cert()?;
                tokio::fs::create_dir_all(&cert_dir).await?;
                tokio::fs::write(&cert_path, cert.cert.pem()).await?;
                tokio::fs::write(&key_path, cert.key_pair.serialize_pem()).await?;
            } else {
                tracing::info!("Using existing TLS certificate from {}", cert_dir.display());
            }

            RustlsConfig::from_pem_file(&cert_path, &key_path).await?
        };

        tracing::info!("Starting HTTPS server on {}", addr);
        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTPS server error: {}", e);
                }
            }
        }
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Starting HTTP server on {}", listener.local_addr()?);
        let server = async move { axum::serve(listener, app).await };

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
        }
    }

    cleanup(&state).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Apply CLI argument overrides to config (only if explicitly specified)
fn apply_cli_overrides(config: &mut AppConfig, args: CliArgs) {
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(port) = args.https_port {
        config.web.https_port = port;
    }
    if args.enable_https {
        config.web.https_enabled = true;
    }
    if let Some(cert_path) = args.ssl_cert {
        config.web.ssl_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = args.ssl_key {
        config.web.ssl_key_path = Some(key_path.to_string_lossy().to_string());
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "stream_relay=error,tower_http=error",
        LogLevel::Warn => "stream_relay=warn,tower_http=warn",
        LogLevel::Info => "stream_relay=info,tower_http=info",
        LogLevel::Verbose => "stream_relay=debug,tower_http=info",
        LogLevel::Debug => "stream_relay=debug,tower_http=debug",
        LogLevel::Trace => "stream_relay=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("STREAM_RELAY_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/stream-relay")
}

/// Generate a self-signed TLS certificate
fn generate_self_signed_cert() -> anyhow::Result<rcgen::CertifiedKey> {
    let subject_alt_names = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];

    Ok(rcgen::generate_simple_self_signed(subject_alt_names)?)
}

/// Release every session on shutdown
async fn cleanup(state: &Arc<AppState>) {
    let sessions = state.registry.session_count().await;
    state.registry.close_all().await;
    tracing::info!("Closed {} signaling sessions", sessions);
}
