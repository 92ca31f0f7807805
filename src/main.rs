//! herakles-pal - version 0.1.0
//!
//! Runs the platform abstraction layer enumerations with their sampling
//! threads and serves them over HTTP. Also handles the subcommands.

mod cli;
mod commands;
mod handlers;
mod metrics;
mod startup_checks;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use herakles_pal::config::{
    render_config, validate_effective_config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use herakles_pal::{Config, PalContext};
use prometheus::{Gauge, Registry};
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, warn, Level};

use cli::{resolve_config, Args, Commands, LogLevel};
use commands::{command_check, command_config, command_dump};
use handlers::{dump_handler, health_handler, metrics_handler, root_handler};
use metrics::PalMetrics;
use state::{AppState, Enumerations, SharedState};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        print!("{}", render_config(&config, args.config_format)?);
        return Ok(());
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        if let Commands::Config { output, format } = command {
            return command_config(output.clone(), *format);
        }

        let config = load_validated_config(&args)?;
        setup_logging(&args);

        return match command {
            Commands::Check { all } => command_check(*all, &config),
            Commands::Dump {
                resource,
                properties,
                updates,
            } => command_dump(*resource, *properties, *updates, &config),
            Commands::Config { .. } => unreachable!("Config handled above"),
        };
    }

    let config = load_validated_config(&args)?;
    setup_logging(&args);

    info!("Starting herakles-pal");

    if let Err(e) = startup_checks::validate_requirements() {
        error!("Startup validation failed: {}", e);
        error!("   The server will start but enumerations may be incomplete!");
    }

    let bind_ip_str = config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Configure parallel process scanning
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
            debug!("Rayon thread pool configured with {} threads", threads);
        }
    }

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let metrics = PalMetrics::new(&registry)?;
    let scrape_duration = Gauge::new(
        "herakles_pal_scrape_duration_seconds",
        "Time spent serving /metrics request",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;
    debug!("All metrics registered successfully");

    let ctx = PalContext::new(config);
    let enumerations = Enumerations::build(&ctx, None)?;

    // Discovery reads /proc synchronously and starts the sampling threads.
    let enumerations = tokio::task::spawn_blocking(move || {
        let failures = enumerations.init_all();
        if failures > 0 {
            warn!("{} enumeration(s) failed to initialize", failures);
        }
        enumerations
    })
    .await?;

    let state: SharedState = Arc::new(AppState {
        ctx,
        enumerations,
        registry,
        metrics,
        scrape_duration,
        http_requests: AtomicU64::new(0),
        start_time: Instant::now(),
    });

    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/dump", get(dump_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("herakles-pal listening on http://{}:{}", bind_ip_str, port);

    let server = axum::serve(listener, app);

    let result = tokio::select! {
        result = server => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
            Ok(())
        }
    };

    // Sampling threads are cancelled and joined before exit.
    let stopper = state.clone();
    tokio::task::spawn_blocking(move || stopper.enumerations.clean_up_all()).await?;

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("herakles-pal stopped gracefully");
    Ok(())
}
