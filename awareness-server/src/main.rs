use anyhow::{Context, Result};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use awareness_server::config::{Config, ConfigHandle, ModerationConfig};
use awareness_server::moderation::{ModerationEngine, ReportWorkflow, UserId};
use awareness_server::status::status_router;
use awareness_server::sync::sync_loop;
use awareness_server::{AppState, MatrixClient, RecordingLogger, SqliteWarningStore};

/// Reload the moderation config whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_sighup(handle: ConfigHandle, path: PathBuf) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups =
        signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading {}", path.display());
            if let Err(e) = handle.reload_from(&path).await {
                error!("Config reload failed, keeping previous config: {:#}", e);
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_handle: ConfigHandle, _path: PathBuf) -> Result<()> {
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting awareness moderation bot ({})",
        awareness_server::get_bot_version()
    );

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    // Initialize recording logger if enabled
    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let matrix = Arc::new(
        MatrixClient::new_with_recording(
            &config.homeserver_url,
            config.access_token.clone(),
            recording_logger.clone(),
        )
        .context("Failed to create Matrix client")?,
    );

    let bot_user = match &config.user_id {
        Some(user_id) => UserId::from(user_id.as_str()),
        None => matrix
            .whoami()
            .await
            .context("Failed to resolve bot user id via /account/whoami")?,
    };
    info!("Running as {}", bot_user);

    let moderation_config = ModerationConfig::load(&config.moderation_config_path)?;
    if moderation_config.keywords.is_empty() {
        warn!("No keywords configured; only reports will be handled");
    }
    let config_handle = ConfigHandle::new(moderation_config);
    spawn_reload_on_sighup(config_handle.clone(), config.moderation_config_path.clone())?;

    let db_path = config.state_dir.join("awareness.db");
    info!("Using warning database: {}", db_path.display());
    let store = Arc::new(
        SqliteWarningStore::new(&db_path).context("Failed to initialize SQLite database")?,
    );

    let engine = Arc::new(ModerationEngine::new(
        store.clone(),
        matrix.clone(),
        matrix.clone(),
        bot_user.clone(),
    ));
    let reports = Arc::new(ReportWorkflow::new(
        matrix.clone(),
        matrix.clone(),
        matrix.clone(),
        bot_user,
    ));

    let app_state = Arc::new(AppState {
        matrix,
        engine,
        reports,
        store,
        moderation_config: config_handle,
        auto_join: config.auto_join,
        status_auth_token: config.status_auth_token.clone(),
        recording_logger,
    });

    let app = Router::new()
        .merge(status_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start the sync loop
    let sync_state = app_state.clone();
    tokio::spawn(async move {
        sync_loop(sync_state).await;
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
