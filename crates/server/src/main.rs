use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curator_core::{
    create_authenticator, load_config, validate_config, Authenticator, CredentialCipher,
    MediaWikiClient, PublishClient, SourceRegistry, SqliteUploadStore, UploadStore,
};
use curator_server::{create_router, AppState, Services};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("CURATOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Credentials of queued uploads are encrypted at rest
    let cipher = match &config.credentials.key {
        Some(key) => CredentialCipher::from_base64(key).context("Invalid credentials.key")?,
        None => {
            warn!("No credentials.key configured, queued uploads will not survive a restart");
            CredentialCipher::ephemeral()
        }
    };

    // Create SQLite upload store
    let store: Arc<dyn UploadStore> = Arc::new(
        SqliteUploadStore::new(&config.database.path)
            .context("Failed to create upload store")?
            .with_cipher(cipher),
    );
    info!("Upload store initialized");

    // Source providers
    let sources = Arc::new(
        SourceRegistry::from_config(&config.sources)
            .context("Failed to initialize source providers")?,
    );
    if sources.kinds().is_empty() {
        info!("No source provider configured, uploads will be rejected");
    } else {
        info!("Source providers: {:?}", sources.kinds());
    }

    // Remote repository client
    let publisher: Arc<dyn PublishClient> = Arc::new(
        MediaWikiClient::new(config.remote.clone())
            .context("Failed to create remote repository client")?,
    );
    info!("Remote repository at {}", config.remote.api_url);

    let services = Services::build(&config, store, sources, publisher)?;
    let workers = Arc::clone(&services.workers);

    if config.workers.enabled {
        workers.start().await;
        info!("Upload workers started");
    } else {
        info!("Upload workers disabled in config");
    }

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), authenticator, services));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if config.workers.enabled {
        info!("Stopping upload workers...");
        workers.stop().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
