//! Aggregated system status and the broadcast fan-out fed by pool events.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::models::{PoolEvent, SessionStatus, SystemStatus};
use crate::storage::{ContainerStore, SessionStore};

/// Snapshot of pool and session state for external publication.
pub fn system_status(
    config: &Config,
    containers: &Arc<dyn ContainerStore>,
    sessions: &Arc<dyn SessionStore>,
) -> SystemStatus {
    let counts = containers.count_by_status();
    let all_sessions = sessions.get_all();
    let active_sessions = all_sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Active)
        .count();
    let queued_sessions = all_sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Queued)
        .count();

    SystemStatus {
        image: config.image.clone(),
        max_containers: config.max_containers,
        prewarm_count: config.prewarm_count,
        idle: counts.idle,
        busy: counts.busy,
        warming: counts.warming,
        destroying: counts.destroying,
        active_sessions,
        queued_sessions,
        total_containers: containers.count(),
        containers: containers.get_all(),
    }
}

/// Consumes pool transitions, logs them, and pushes a fresh snapshot to
/// broadcast subscribers after each one.
pub fn spawn_status_broadcaster(
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
    publisher: broadcast::Sender<SystemStatus>,
    config: Config,
    containers: Arc<dyn ContainerStore>,
    sessions: Arc<dyn SessionStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                PoolEvent::WarmingStarted { container_id } => {
                    debug!("warming container {}", container_id);
                }
                PoolEvent::ContainerReady { container_id } => {
                    info!("container ready: {}", container_id);
                }
                PoolEvent::ContainerAssigned {
                    container_id,
                    session_id,
                } => {
                    info!("container {} assigned to session {}", container_id, session_id);
                }
                PoolEvent::ContainerDestroying { container_id } => {
                    debug!("destroying container {}", container_id);
                }
                PoolEvent::ContainerRemoved { container_id } => {
                    info!("container removed: {}", container_id);
                }
                PoolEvent::WarmingFailed {
                    container_id,
                    reason,
                } => {
                    error!("warm-up of {} failed: {}", container_id, reason);
                }
            }

            // Lagging or absent subscribers are fine.
            let _ = publisher.send(system_status(&config, &containers, &sessions));
        }
    })
}
