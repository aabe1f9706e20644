pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod server;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::exec::CommandRunner;
use crate::files::FileService;
use crate::models::SystemStatus;
use crate::pool::ContainerPool;
use crate::session::SessionManager;
use crate::storage::{ContainerStore, SessionStore};

/// Shared handler state, wired once at startup.
pub struct AppState {
    pub config: Config,
    pub pool: Arc<ContainerPool>,
    pub sessions: Arc<SessionManager>,
    pub runner: CommandRunner,
    pub files: FileService,
    pub container_store: Arc<dyn ContainerStore>,
    pub session_store: Arc<dyn SessionStore>,
    /// Fresh `SystemStatus` snapshot after every pool transition.
    pub status_feed: broadcast::Sender<SystemStatus>,
    /// Cancelled on process shutdown; in-flight commands derive from it.
    pub shutdown: CancellationToken,
}
