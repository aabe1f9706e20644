use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Pool-side lifecycle of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ContainerStatus {
    Warming,
    Idle,
    Busy,
    Destroying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SessionStatus {
    Queued,
    Active,
    Destroyed,
}

/// A container owned by the pool. `container_id` is the engine-assigned
/// identifier and never changes once set; placeholder records created while
/// a warm-up is in flight use a synthetic id until the real one exists.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub container_id: String,
    pub name: String,
    pub image: String,
    /// Lifecycle string as reported by the engine (`created`, `running`, ...).
    pub engine_status: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff `status == Busy`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerRecord {
    /// Capacity reservation inserted before the engine container exists.
    pub fn placeholder(temp_id: String, image: &str) -> Self {
        Self {
            container_id: temp_id.clone(),
            name: temp_id,
            image: image.to_string(),
            engine_status: "creating".to_string(),
            status: ContainerStatus::Warming,
            created_at: Utc::now(),
            started_at: None,
            session_id: None,
            labels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set iff `status == Active`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub status: SessionStatus,
    /// 1-based position among queued sessions, 0 otherwise.
    pub queue_position: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub command_count: u64,
    pub is_executing_command: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl SessionRecord {
    pub fn new(session_id: String, name: Option<String>, timeout_seconds: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            name,
            container_id: None,
            status: SessionStatus::Queued,
            queue_position: 0,
            created_at: now,
            last_activity_at: now,
            command_count: 0,
            is_executing_command: false,
            timeout_seconds,
        }
    }
}

/// Command input as accepted on the wire: a plain string runs under
/// `/bin/sh -c`, an argv list execs directly without shell expansion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum CommandInput {
    Shell(String),
    Argv(Vec<String>),
}

impl CommandInput {
    pub fn argv(parts: &[&str]) -> Self {
        CommandInput::Argv(parts.iter().map(|s| s.to_string()).collect())
    }

    /// The argv actually handed to the engine's exec endpoint.
    pub fn to_exec_argv(&self) -> Vec<String> {
        match self {
            CommandInput::Shell(cmd) => {
                vec!["/bin/sh".to_string(), "-c".to_string(), cmd.clone()]
            }
            CommandInput::Argv(argv) => argv.clone(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            CommandInput::Shell(cmd) => cmd.clone(),
            CommandInput::Argv(argv) => argv.join(" "),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the command was cut off by deadline or cancellation.
    pub exit_code: i64,
    pub execution_time_ms: u64,
}

/// One element of a streamed command's output. Every stream terminates with
/// exactly one `Exit`, whatever ended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit { exit_code: i64, execution_time_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Container counts bucketed by pool status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCounts {
    pub idle: usize,
    pub busy: usize,
    pub warming: usize,
    pub destroying: usize,
}

impl StatusCounts {
    /// Containers counting against the capacity cap.
    pub fn active(&self) -> usize {
        self.idle + self.busy + self.warming
    }
}

/// Pool transition notifications consumed by the status broadcaster.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    WarmingStarted { container_id: String },
    ContainerReady { container_id: String },
    ContainerAssigned { container_id: String, session_id: String },
    ContainerDestroying { container_id: String },
    ContainerRemoved { container_id: String },
    WarmingFailed { container_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub image: String,
    pub max_containers: usize,
    pub prewarm_count: usize,
    pub idle: usize,
    pub busy: usize,
    pub warming: usize,
    pub destroying: usize,
    pub active_sessions: usize,
    pub queued_sessions: usize,
    pub total_containers: usize,
    pub containers: Vec<ContainerRecord>,
}
