//! Command execution against a session's container.
//!
//! Thin layer over the engine driver: pre-flight session checks, the
//! executing latch, and activity bookkeeping. The latch is held by an RAII
//! guard so no exit path (error, deadline, client disconnect) can leave a
//! session looking busy forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::docker::ContainerEngine;
use crate::error::Result;
use crate::models::{CommandInput, CommandResult, ExecEvent};
use crate::session::SessionManager;

/// Deadline applied when the request does not carry its own.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Relay buffer between the engine stream and the consumer.
const RELAY_BUFFER: usize = 256;

pub struct CommandRunner {
    engine: Arc<dyn ContainerEngine>,
    sessions: Arc<SessionManager>,
    default_work_dir: String,
}

struct ExecutingGuard {
    sessions: Arc<SessionManager>,
    session_id: String,
}

impl ExecutingGuard {
    fn engage(sessions: &Arc<SessionManager>, session_id: &str) -> Self {
        sessions.set_executing(session_id, true);
        Self {
            sessions: sessions.clone(),
            session_id: session_id.to_string(),
        }
    }
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.sessions.set_executing(&self.session_id, false);
    }
}

impl CommandRunner {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        sessions: Arc<SessionManager>,
        default_work_dir: String,
    ) -> Self {
        Self {
            engine,
            sessions,
            default_work_dir,
        }
    }

    /// Runs a command to completion and returns the collected output.
    pub async fn run(
        &self,
        session_id: &str,
        input: CommandInput,
        working_dir: Option<String>,
        timeout_seconds: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<CommandResult> {
        let container_id = self.sessions.container_for(session_id)?;
        let _guard = ExecutingGuard::engage(&self.sessions, session_id);

        debug!(
            "running command in session {}: {}",
            session_id,
            input.display()
        );
        let timeout =
            Duration::from_secs(timeout_seconds.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));
        let work_dir = working_dir.unwrap_or_else(|| self.default_work_dir.clone());

        let result = self
            .engine
            .exec_command(&container_id, &input, &work_dir, timeout, &cancel)
            .await?;

        self.sessions.increment_command_count(session_id);
        Ok(result)
    }

    /// Runs a command and yields its output as it arrives. The returned
    /// receiver ends with exactly one `Exit` event; bookkeeping happens in
    /// the relay task so it also runs when the consumer disconnects early.
    pub async fn run_stream(
        &self,
        session_id: &str,
        input: CommandInput,
        working_dir: Option<String>,
        timeout_seconds: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ExecEvent>> {
        let container_id = self.sessions.container_for(session_id)?;
        let guard = ExecutingGuard::engage(&self.sessions, session_id);

        debug!(
            "streaming command in session {}: {}",
            session_id,
            input.display()
        );
        let timeout =
            Duration::from_secs(timeout_seconds.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));
        let work_dir = working_dir.unwrap_or_else(|| self.default_work_dir.clone());

        let mut inner = match self
            .engine
            .exec_command_stream(&container_id, &input, &work_dir, timeout, cancel)
            .await
        {
            Ok(receiver) => receiver,
            Err(err) => {
                drop(guard);
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let sessions = self.sessions.clone();
        let session = session_id.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            while let Some(event) = inner.recv().await {
                let is_exit = matches!(event, ExecEvent::Exit { .. });
                if is_exit {
                    sessions.increment_command_count(&session);
                }
                if tx.send(event).await.is_err() {
                    break;
                }
                if is_exit {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
