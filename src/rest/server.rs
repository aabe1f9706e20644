use anyhow::Result;
use std::fs;
use std::process;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::docker::{ContainerEngine, DockerClient, DockerEngine, EngineConfig};
use crate::exec::CommandRunner;
use crate::files::FileService;
use crate::pool::ContainerPool;
use crate::reaper::spawn_reaper;
use crate::rest::routes::create_router;
use crate::rest::AppState;
use crate::session::SessionManager;
use crate::status::spawn_status_broadcaster;
use crate::storage::{ContainerStore, InMemoryContainerStore, InMemorySessionStore, SessionStore};

const PID_FILE: &str = "/tmp/codepod.pid";
const STATUS_FEED_CAPACITY: usize = 16;

pub async fn run_server(config: Config) -> Result<()> {
    let pid = process::id();
    if let Err(err) = fs::write(PID_FILE, pid.to_string()) {
        warn!("Could not write PID file: {}", err);
    }

    info!(
        r#"
                _                      _
  ___ ___   __| | ___ _ __   ___   __| |
 / __/ _ \ / _` |/ _ \ '_ \ / _ \ / _` |
| (_| (_) | (_| |  __/ |_) | (_) | (_| |
 \___\___/ \__,_|\___| .__/ \___/ \__,_|
                     |_|
Starting codepod execution host...
PID: {}
"#,
        pid
    );

    info!("Connecting to container engine...");
    let client = match DockerClient::connect(config.docker_socket.as_deref()).await {
        Ok(client) => client,
        Err(err) => {
            error!("Failed to connect to container engine: {}", err);
            error!("Ensure the Docker daemon is running and the socket is reachable");
            return Err(err);
        }
    };

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::new(
        client,
        EngineConfig {
            image: config.image.clone(),
            label_prefix: config.label_prefix.clone(),
        },
    ));

    let container_store: Arc<dyn ContainerStore> = InMemoryContainerStore::new();
    let session_store: Arc<dyn SessionStore> = InMemorySessionStore::new();

    let (pool_events, pool_events_rx) = mpsc::unbounded_channel();
    let pool = Arc::new(ContainerPool::new(
        engine.clone(),
        container_store.clone(),
        config.clone(),
        pool_events,
    ));
    let sessions = Arc::new(SessionManager::new(
        session_store.clone(),
        pool.clone(),
        config.clone(),
    ));
    let runner = CommandRunner::new(engine.clone(), sessions.clone(), config.work_dir.clone());
    let files = FileService::new(engine.clone(), sessions.clone());

    let (status_feed, _) = broadcast::channel(STATUS_FEED_CAPACITY);
    spawn_status_broadcaster(
        pool_events_rx,
        status_feed.clone(),
        config.clone(),
        container_store.clone(),
        session_store.clone(),
    );

    let shutdown = CancellationToken::new();
    let reaper = spawn_reaper(sessions.clone(), shutdown.child_token());

    // Fill the warm reserve without delaying readiness.
    {
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(err) = pool.ensure_prewarmed().await {
                error!("pre-warm failed: {}", err);
            }
        });
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        pool: pool.clone(),
        sessions,
        runner,
        files,
        container_store,
        session_store,
        status_feed,
        shutdown: shutdown.clone(),
    });

    info!("Building REST API routes...");
    let app = create_router(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Server started successfully!");
    info!("REST API Endpoint: http://{}/api", bind_addr);
    info!("Swagger UI: http://{}/swagger-ui/", bind_addr);
    info!("Ready to accept requests...");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work, cut off in-flight commands, then make sure no
    // managed container survives the process.
    info!("Shutting down...");
    shutdown.cancel();
    let _ = reaper.await;
    pool.delete_all().await;

    let _ = fs::remove_file(PID_FILE);
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
