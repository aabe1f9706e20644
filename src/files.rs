//! File exchange with a session's container, over the engine's tar
//! interface. Same pre-flight checks as command execution; every
//! successful call counts as session activity.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::docker::ContainerEngine;
use crate::error::{Error, Result};
use crate::models::{CommandInput, FileEntry};
use crate::session::SessionManager;

const DELETE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FileService {
    engine: Arc<dyn ContainerEngine>,
    sessions: Arc<SessionManager>,
}

impl FileService {
    pub fn new(engine: Arc<dyn ContainerEngine>, sessions: Arc<SessionManager>) -> Self {
        Self { engine, sessions }
    }

    pub async fn upload(&self, session_id: &str, target_path: &str, bytes: Vec<u8>) -> Result<()> {
        let container_id = self.preflight(session_id, target_path)?;
        debug!(
            "uploading {} bytes to {} for session {}",
            bytes.len(),
            target_path,
            session_id
        );
        self.engine
            .upload_file(&container_id, target_path, bytes)
            .await?;
        self.sessions.update_activity(session_id);
        Ok(())
    }

    pub async fn list(&self, session_id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let container_id = self.preflight(session_id, path)?;
        let entries = self.engine.list_directory(&container_id, path).await?;
        self.sessions.update_activity(session_id);
        Ok(entries)
    }

    pub async fn download(&self, session_id: &str, file_path: &str) -> Result<Vec<u8>> {
        let container_id = self.preflight(session_id, file_path)?;
        let bytes = self.engine.download_file(&container_id, file_path).await?;
        self.sessions.update_activity(session_id);
        Ok(bytes)
    }

    pub async fn delete(&self, session_id: &str, path: &str) -> Result<()> {
        let container_id = self.preflight(session_id, path)?;
        let command = CommandInput::argv(&["rm", "-rf", path]);
        let result = self
            .engine
            .exec_command(
                &container_id,
                &command,
                "",
                DELETE_TIMEOUT,
                &CancellationToken::new(),
            )
            .await?;
        if result.exit_code != 0 {
            return Err(Error::Engine(format!(
                "rm -rf {} exited with {}: {}",
                path,
                result.exit_code,
                result.stderr.trim()
            )));
        }
        self.sessions.update_activity(session_id);
        Ok(())
    }

    fn preflight(&self, session_id: &str, path: &str) -> Result<String> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "path must be absolute, got '{path}'"
            )));
        }
        self.sessions.container_for(session_id)
    }
}
