//! Shared test support: an in-memory container engine with scriptable
//! command streams and failure injection, plus harness wiring helpers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use codepod::config::Config;
use codepod::docker::ContainerEngine;
use codepod::error::{Error, Result};
use codepod::exec::CommandRunner;
use codepod::files::FileService;
use codepod::models::{
    CommandInput, CommandResult, ContainerRecord, ContainerStatus, ExecEvent, FileEntry,
};
use codepod::pool::ContainerPool;
use codepod::session::SessionManager;
use codepod::storage::{
    ContainerStore, InMemoryContainerStore, InMemorySessionStore, SessionStore,
};

/// One step of a scripted streamed command.
#[allow(dead_code)]
pub enum ScriptStep {
    Chunk(ExecEvent),
    Delay(Duration),
}

/// In-memory stand-in for the container engine. Containers are rows in a
/// map, exec streams replay scripts, and files live in a per-container
/// virtual filesystem.
pub struct FakeEngine {
    containers: Mutex<HashMap<String, ContainerRecord>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    commands: Mutex<Vec<Vec<String>>>,
    stream_scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    counter: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    fail_next_create: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            containers: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            stream_scripts: Mutex::new(VecDeque::new()),
            counter: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            peak_live: AtomicUsize::new(0),
            fail_next_create: AtomicBool::new(false),
        })
    }

    /// Queues the event script the next streamed command will replay.
    #[allow(dead_code)]
    pub fn push_stream_script(&self, steps: Vec<ScriptStep>) {
        self.stream_scripts.lock().unwrap().push_back(steps);
    }

    #[allow(dead_code)]
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Highest number of simultaneously existing containers ever observed.
    #[allow(dead_code)]
    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Every argv handed to `exec_command`, in submission order.
    #[allow(dead_code)]
    pub fn recorded_commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn put_file(&self, container_id: &str, path: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((container_id.to_string(), path.to_string()), bytes.to_vec());
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ensure_image(&self, _image: &str, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn create_managed_container(
        &self,
        session_id: Option<&str>,
    ) -> Result<ContainerRecord> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(Error::Engine("injected create failure".to_string()));
        }

        let id = format!("fake-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let record = ContainerRecord {
            container_id: id.clone(),
            name: id.clone(),
            image: "fake:latest".to_string(),
            engine_status: "running".to_string(),
            status: ContainerStatus::Warming,
            created_at: Utc::now(),
            started_at: None,
            session_id: session_id.map(str::to_string),
            labels: HashMap::new(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), record.clone());

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(record)
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.containers.lock().unwrap().values().cloned().collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>> {
        Ok(self.containers.lock().unwrap().get(container_id).cloned())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        if self
            .containers
            .lock()
            .unwrap()
            .remove(container_id)
            .is_some()
        {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn assign_session(&self, container_id: &str, _session_id: &str) -> Result<()> {
        if self.containers.lock().unwrap().contains_key(container_id) {
            Ok(())
        } else {
            Err(Error::ContainerNotFound(container_id.to_string()))
        }
    }

    async fn exec_command(
        &self,
        container_id: &str,
        input: &CommandInput,
        _working_dir: &str,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        if !self.containers.lock().unwrap().contains_key(container_id) {
            return Err(Error::ContainerNotFound(container_id.to_string()));
        }
        let argv = input.to_exec_argv();
        self.commands.lock().unwrap().push(argv.clone());

        let stdout = if argv == ["echo", "ready"] {
            "ready\n".to_string()
        } else {
            String::new()
        };
        Ok(CommandResult {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            execution_time_ms: 1,
        })
    }

    async fn exec_command_stream(
        &self,
        container_id: &str,
        input: &CommandInput,
        _working_dir: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ExecEvent>> {
        if !self.containers.lock().unwrap().contains_key(container_id) {
            return Err(Error::ContainerNotFound(container_id.to_string()));
        }
        self.commands.lock().unwrap().push(input.to_exec_argv());

        let script = self
            .stream_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                vec![
                    ScriptStep::Chunk(ExecEvent::Stdout {
                        data: "ok\n".to_string(),
                    }),
                    ScriptStep::Chunk(ExecEvent::Exit {
                        exit_code: 0,
                        execution_time_ms: 1,
                    }),
                ]
            });

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let submitted = tokio::time::Instant::now();
            let deadline = submitted + timeout;
            let elapsed_ms =
                |now: tokio::time::Instant| now.duration_since(submitted).as_millis() as u64;
            let mut exited = false;

            for step in script {
                match step {
                    ScriptStep::Delay(delay) => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = tokio::time::sleep_until(deadline) => {
                                let _ = tx
                                    .send(ExecEvent::Exit {
                                        exit_code: -1,
                                        execution_time_ms: elapsed_ms(tokio::time::Instant::now()),
                                    })
                                    .await;
                                return;
                            }
                            _ = cancel.cancelled() => {
                                let _ = tx
                                    .send(ExecEvent::Exit {
                                        exit_code: -1,
                                        execution_time_ms: elapsed_ms(tokio::time::Instant::now()),
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                    ScriptStep::Chunk(event) => {
                        exited = matches!(event, ExecEvent::Exit { .. });
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        if exited {
                            return;
                        }
                    }
                }
            }
            if !exited {
                let _ = tx
                    .send(ExecEvent::Exit {
                        exit_code: 0,
                        execution_time_ms: elapsed_ms(tokio::time::Instant::now()),
                    })
                    .await;
            }
        });

        Ok(rx)
    }

    async fn upload_file(&self, container_id: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        if !self.containers.lock().unwrap().contains_key(container_id) {
            return Err(Error::ContainerNotFound(container_id.to_string()));
        }
        // mirror the driver's parent-directory bookkeeping
        let parent = std::path::Path::new(path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("/")
            .to_string();
        self.commands
            .lock()
            .unwrap()
            .push(vec!["mkdir".to_string(), "-p".to_string(), parent]);
        self.files
            .lock()
            .unwrap()
            .insert((container_id.to_string(), path.to_string()), bytes);
        Ok(())
    }

    async fn download_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(container_id.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::FileNotFound(path.to_string()))
    }

    async fn list_directory(&self, container_id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let entries: Vec<FileEntry> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|((container, file_path), _)| {
                container == container_id && file_path.starts_with(&prefix)
            })
            .map(|((_, file_path), bytes)| FileEntry {
                name: file_path.rsplit('/').next().unwrap_or_default().to_string(),
                path: file_path.clone(),
                is_directory: false,
                size: bytes.len() as u64,
                last_modified: Some(Utc::now()),
            })
            .collect();
        if entries.is_empty() {
            return Err(Error::FileNotFound(path.to_string()));
        }
        Ok(entries)
    }
}

/// Everything a test needs, wired the way the server wires it.
#[allow(dead_code)]
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub pool: Arc<ContainerPool>,
    pub sessions: Arc<SessionManager>,
    pub runner: CommandRunner,
    pub files: FileService,
    pub container_store: Arc<dyn ContainerStore>,
    pub session_store: Arc<dyn SessionStore>,
}

#[allow(dead_code)]
pub fn test_config(prewarm: usize, max: usize) -> Config {
    Config {
        prewarm_count: prewarm,
        max_containers: max,
        session_timeout_seconds: 1800,
        ..Config::default()
    }
}

#[allow(dead_code)]
pub fn harness(config: Config) -> Harness {
    let engine = FakeEngine::new();
    let container_store: Arc<dyn ContainerStore> = InMemoryContainerStore::new();
    let session_store: Arc<dyn SessionStore> = InMemorySessionStore::new();
    let (events, mut events_rx) = mpsc::unbounded_channel();
    // keep the channel drained so publishes never pile up
    tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

    let pool = Arc::new(ContainerPool::new(
        engine.clone(),
        container_store.clone(),
        config.clone(),
        events,
    ));
    let sessions = Arc::new(SessionManager::new(
        session_store.clone(),
        pool.clone(),
        config.clone(),
    ));
    let runner = CommandRunner::new(engine.clone(), sessions.clone(), config.work_dir.clone());
    let files = FileService::new(engine.clone(), sessions.clone());

    Harness {
        engine,
        pool,
        sessions,
        runner,
        files,
        container_store,
        session_store,
    }
}

/// Polls `predicate` on a short cadence until it holds or `limit` elapses.
#[allow(dead_code)]
pub async fn wait_until(limit: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
