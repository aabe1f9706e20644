//! Engine driver: everything the orchestrator asks of the container engine.
//!
//! The `ContainerEngine` trait is the seam between the pool/session layers
//! and bollard; `DockerEngine` is the production implementation. Engine
//! errors are classified here and never leak further up.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::DockerClient;
use crate::error::{Error, Result};
use crate::models::{
    CommandInput, CommandResult, ContainerRecord, ContainerStatus, ExecEvent, FileEntry,
};

/// Buffered chunks between the engine reader and a stream consumer. Bounded
/// so a slow consumer applies backpressure instead of growing memory.
const EXEC_STREAM_BUFFER: usize = 256;

const MKDIR_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability set the orchestrator needs from the container engine.
///
/// All operations are safe to call concurrently; the implementation holds no
/// state besides the engine client itself.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Makes sure the configured image is present, pulling it if necessary.
    async fn ensure_image(&self, image: &str, cancel: &CancellationToken) -> Result<()>;

    /// Creates and starts a managed container running a keep-alive command.
    async fn create_managed_container(&self, session_id: Option<&str>)
        -> Result<ContainerRecord>;

    /// All containers carrying the managed label, regardless of state.
    async fn list_managed_containers(&self) -> Result<Vec<ContainerRecord>>;

    /// `Ok(None)` when the engine no longer knows the container.
    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>>;

    /// Best-effort stop with a short grace period, then force remove.
    /// Removing an already-gone container succeeds.
    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Binds a session to an existing container.
    async fn assign_session(&self, container_id: &str, session_id: &str) -> Result<()>;

    /// Runs a command and collects its complete output. On deadline or
    /// cancellation the result carries `exit_code = -1` and whatever output
    /// arrived before the cutoff.
    async fn exec_command(
        &self,
        container_id: &str,
        input: &CommandInput,
        working_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandResult>;

    /// Runs a command and yields output chunks as they arrive from the
    /// engine. The receiver sees exactly one `Exit` event as the final
    /// element, on every path. Dropping the receiver detaches from the
    /// engine.
    async fn exec_command_stream(
        &self,
        container_id: &str,
        input: &CommandInput,
        working_dir: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ExecEvent>>;

    /// Places `bytes` at the absolute `path`, creating parent directories.
    async fn upload_file(&self, container_id: &str, path: &str, bytes: Vec<u8>) -> Result<()>;

    async fn download_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>>;

    async fn list_directory(&self, container_id: &str, path: &str) -> Result<Vec<FileEntry>>;
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub image: String,
    pub label_prefix: String,
}

pub struct DockerEngine {
    docker: Docker,
    config: EngineConfig,
}

impl DockerEngine {
    pub fn new(client: DockerClient, config: EngineConfig) -> Self {
        Self {
            docker: client.into_inner(),
            config,
        }
    }

    fn managed_label(&self) -> String {
        format!("{}.managed", self.config.label_prefix)
    }

    fn session_label(&self) -> String {
        format!("{}.session", self.config.label_prefix)
    }

    fn owner_label(&self) -> String {
        format!("{}.owner", self.config.label_prefix)
    }

    fn record_from_inspect(
        &self,
        response: ContainerInspectResponse,
        fallback_id: &str,
    ) -> ContainerRecord {
        let labels = response
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();
        let engine_status = response
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let started_at = response
            .state
            .as_ref()
            .and_then(|s| s.started_at.as_deref())
            .and_then(parse_engine_time);

        ContainerRecord {
            session_id: labels.get(&self.session_label()).cloned(),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: response
                .config
                .and_then(|c| c.image)
                .unwrap_or_else(|| self.config.image.clone()),
            engine_status,
            status: ContainerStatus::Warming,
            created_at: response
                .created
                .as_deref()
                .and_then(parse_engine_time)
                .unwrap_or_else(Utc::now),
            started_at,
            container_id: response.id.unwrap_or_else(|| fallback_id.to_string()),
            labels,
        }
    }

    fn record_from_summary(&self, summary: ContainerSummary) -> ContainerRecord {
        let labels = summary.labels.unwrap_or_default();
        ContainerRecord {
            session_id: labels.get(&self.session_label()).cloned(),
            container_id: summary.id.unwrap_or_default(),
            name: summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: summary.image.unwrap_or_else(|| self.config.image.clone()),
            engine_status: summary.state.unwrap_or_else(|| "unknown".to_string()),
            status: ContainerStatus::Warming,
            created_at: summary
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now),
            started_at: None,
            labels,
        }
    }

    async fn pull_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(container_id, Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                if is_not_found(&err) {
                    Error::FileNotFound(path.to_string())
                } else {
                    engine_error(err)
                }
            })?;
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ensure_image(&self, image: &str, cancel: &CancellationToken) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("image {} already present", image);
                return Ok(());
            }
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(engine_error(err)),
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Engine(format!("pull of {image} cancelled")));
                }
                progress = stream.next() => match progress {
                    Some(Ok(info)) => {
                        if let Some(status) = info.status {
                            debug!("Pull status: {}", status);
                        }
                    }
                    Some(Err(err)) => {
                        error!("Error pulling image: {}", err);
                        return Err(engine_error(err));
                    }
                    None => break,
                }
            }
        }
        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create_managed_container(
        &self,
        session_id: Option<&str>,
    ) -> Result<ContainerRecord> {
        let name = format!("{}-{}", self.config.label_prefix, short_suffix());

        let mut labels = HashMap::new();
        labels.insert(self.managed_label(), "true".to_string());
        labels.insert(
            self.owner_label(),
            std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        );
        if let Some(session) = session_id {
            labels.insert(self.session_label(), session.to_string());
        }

        // The container must stay alive until we remove it.
        let config = Config {
            image: Some(self.config.image.clone()),
            labels: Some(labels),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "sleep infinity".to_string(),
            ]),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(engine_error)?;
        self.docker
            .start_container::<String>(&response.id, None)
            .await
            .map_err(engine_error)?;

        info!("Created container {} with ID: {}", name, response.id);

        match self
            .docker
            .inspect_container(&response.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspected) => Ok(self.record_from_inspect(inspected, &response.id)),
            Err(err) => {
                debug!("inspect after create failed for {}: {}", response.id, err);
                Ok(ContainerRecord {
                    container_id: response.id,
                    name,
                    image: self.config.image.clone(),
                    engine_status: "created".to_string(),
                    status: ContainerStatus::Warming,
                    created_at: Utc::now(),
                    started_at: None,
                    session_id: session_id.map(str::to_string),
                    labels: HashMap::new(),
                })
            }
        }
    }

    async fn list_managed_containers(&self) -> Result<Vec<ContainerRecord>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", self.managed_label())],
        );
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(engine_error)?;
        Ok(summaries
            .into_iter()
            .map(|summary| self.record_from_summary(summary))
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> Result<Option<ContainerRecord>> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(Some(self.record_from_inspect(response, container_id))),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(engine_error(err)),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        if let Err(err) = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 2 }))
            .await
        {
            if !is_not_found(&err) {
                debug!("stop before remove failed for {}: {}", container_id, err);
            }
        }

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => {
                info!("Removed container: {}", container_id);
                Ok(())
            }
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(engine_error(err)),
        }
    }

    async fn assign_session(&self, container_id: &str, session_id: &str) -> Result<()> {
        // The engine API cannot relabel a live container; the authoritative
        // binding lives in the pool's records. Verify the target still
        // exists so a vanished container surfaces here.
        if self.inspect(container_id).await?.is_none() {
            return Err(Error::ContainerNotFound(container_id.to_string()));
        }
        debug!("bound session {} to container {}", session_id, container_id);
        Ok(())
    }

    async fn exec_command(
        &self,
        container_id: &str,
        input: &CommandInput,
        working_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        let submitted = Instant::now();
        let exec = self
            .docker
            .create_exec(container_id, exec_options(input, working_dir))
            .await
            .map_err(engine_error)?;
        let attached = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(engine_error)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut completed = false;

        if let StartExecResults::Attached { mut output, .. } = attached {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(
                            "command deadline of {:?} hit in container {}",
                            timeout, container_id
                        );
                        break;
                    }
                    _ = cancel.cancelled() => {
                        debug!("command cancelled in container {}", container_id);
                        break;
                    }
                    chunk = output.next() => match chunk {
                        Some(Ok(LogOutput::StdOut { message })) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Some(Ok(LogOutput::StdErr { message })) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("error reading exec output: {}", err);
                            break;
                        }
                        None => {
                            completed = true;
                            break;
                        }
                    }
                }
            }
        } else {
            completed = true;
        }

        let exit_code = if completed {
            self.docker
                .inspect_exec(&exec.id)
                .await
                .ok()
                .and_then(|inspect| inspect.exit_code)
                .unwrap_or(-1)
        } else {
            -1
        };

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
            execution_time_ms: submitted.elapsed().as_millis() as u64,
        })
    }

    async fn exec_command_stream(
        &self,
        container_id: &str,
        input: &CommandInput,
        working_dir: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ExecEvent>> {
        let submitted = Instant::now();
        let exec = self
            .docker
            .create_exec(container_id, exec_options(input, working_dir))
            .await
            .map_err(engine_error)?;
        let attached = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(engine_error)?;

        let (tx, rx) = mpsc::channel(EXEC_STREAM_BUFFER);
        let docker = self.docker.clone();
        let exec_id = exec.id.clone();
        let container = container_id.to_string();

        tokio::spawn(async move {
            let mut exit_code = -1i64;

            if let StartExecResults::Attached { mut output, .. } = attached {
                let deadline = tokio::time::Instant::now() + timeout;
                let mut completed = false;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {
                            warn!(
                                "streamed command deadline of {:?} hit in container {}",
                                timeout, container
                            );
                            break;
                        }
                        _ = cancel.cancelled() => {
                            debug!("streamed command cancelled in container {}", container);
                            break;
                        }
                        chunk = output.next() => match chunk {
                            Some(Ok(LogOutput::StdOut { message })) => {
                                let data = String::from_utf8_lossy(&message).into_owned();
                                if tx.send(ExecEvent::Stdout { data }).await.is_err() {
                                    // consumer went away, detach
                                    break;
                                }
                            }
                            Some(Ok(LogOutput::StdErr { message })) => {
                                let data = String::from_utf8_lossy(&message).into_owned();
                                if tx.send(ExecEvent::Stderr { data }).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!("error reading exec output: {}", err);
                                break;
                            }
                            None => {
                                completed = true;
                                break;
                            }
                        }
                    }
                }
                if completed {
                    exit_code = docker
                        .inspect_exec(&exec_id)
                        .await
                        .ok()
                        .and_then(|inspect| inspect.exit_code)
                        .unwrap_or(-1);
                }
            }

            let _ = tx
                .send(ExecEvent::Exit {
                    exit_code,
                    execution_time_ms: submitted.elapsed().as_millis() as u64,
                })
                .await;
        });

        Ok(rx)
    }

    async fn upload_file(&self, container_id: &str, path: &str, bytes: Vec<u8>) -> Result<()> {
        let parent = Path::new(path)
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");
        let mkdir = CommandInput::argv(&["mkdir", "-p", parent]);
        let result = self
            .exec_command(container_id, &mkdir, "", MKDIR_TIMEOUT, &CancellationToken::new())
            .await?;
        if result.exit_code != 0 {
            return Err(Error::Engine(format!(
                "mkdir -p {} failed: {}",
                parent,
                result.stderr.trim()
            )));
        }

        let archive = build_file_archive(path, &bytes)
            .map_err(|err| Error::Engine(format!("failed to build archive: {err}")))?;
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(engine_error)?;

        debug!("uploaded {} bytes to {}:{}", bytes.len(), container_id, path);
        Ok(())
    }

    async fn download_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        let archive = self.pull_archive(container_id, path).await?;
        read_first_file(&archive)
            .map_err(|err| Error::Engine(format!("failed to read archive: {err}")))?
            .ok_or_else(|| Error::FileNotFound(path.to_string()))
    }

    async fn list_directory(&self, container_id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let archive = self.pull_archive(container_id, path).await?;
        list_archive_entries(&archive, path)
            .map_err(|err| Error::Engine(format!("failed to read archive: {err}")))
    }
}

fn exec_options(input: &CommandInput, working_dir: &str) -> CreateExecOptions<String> {
    CreateExecOptions {
        cmd: Some(input.to_exec_argv()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        working_dir: if working_dir.is_empty() {
            None
        } else {
            Some(working_dir.to_string())
        },
        ..Default::default()
    }
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn parse_engine_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn engine_error(err: bollard::errors::Error) -> Error {
    use bollard::errors::Error as EngineErr;
    match err {
        EngineErr::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::ContainerNotFound(message),
        EngineErr::DockerResponseServerError {
            status_code,
            message,
        } => Error::Engine(format!("engine returned {status_code}: {message}")),
        EngineErr::RequestTimeoutError => {
            Error::EngineUnreachable("engine request timed out".to_string())
        }
        err @ (EngineErr::HyperResponseError { .. }
        | EngineErr::HyperLegacyError { .. }
        | EngineErr::IOError { .. }) => Error::EngineUnreachable(err.to_string()),
        other => Error::Engine(other.to_string()),
    }
}

/// Single-entry archive whose member name is the path relative to `/`, so
/// extraction at the filesystem root lands the file at `path`.
fn build_file_archive(path: &str, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let relative = path.trim_start_matches('/');
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp() as u64);
    builder.append_data(&mut header, relative, bytes)?;
    builder.into_inner()
}

fn read_first_file(archive: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    let mut tar = tar::Archive::new(Cursor::new(archive));
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        return Ok(Some(contents));
    }
    Ok(None)
}

/// Enumerates a directory archive, skipping the self-entry the engine puts
/// at the archive root.
fn list_archive_entries(archive: &[u8], directory: &str) -> std::io::Result<Vec<FileEntry>> {
    let base = directory.trim_end_matches('/');
    let mut tar = tar::Archive::new(Cursor::new(archive));
    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        let header = entry.header();
        let raw = entry.path()?.to_string_lossy().into_owned();
        let trimmed = raw.trim_end_matches('/');
        let Some((_, relative)) = trimmed.split_once('/') else {
            // archive root, i.e. the directory itself
            continue;
        };
        let name = relative.rsplit('/').next().unwrap_or(relative).to_string();
        entries.push(FileEntry {
            name,
            path: format!("{base}/{relative}"),
            is_directory: header.entry_type().is_dir(),
            size: entry.size(),
            last_modified: header
                .mtime()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_archive_is_rooted_at_slash() {
        let archive = build_file_archive("/app/x/y.txt", b"hello").unwrap();
        let mut tar = tar::Archive::new(Cursor::new(&archive));
        let entry = tar.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), "app/x/y.txt");
        assert_eq!(entry.size(), 5);
    }

    #[test]
    fn first_file_skips_directories() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "x/", &[][..]).unwrap();
        let mut file = tar::Header::new_gnu();
        file.set_size(5);
        file.set_mode(0o644);
        builder.append_data(&mut file, "x/y.txt", &b"hello"[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let contents = read_first_file(&archive).unwrap().unwrap();
        assert_eq!(contents, b"hello");
    }

    #[test]
    fn directory_only_archive_has_no_file() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "empty/", &[][..]).unwrap();
        let archive = builder.into_inner().unwrap();

        assert!(read_first_file(&archive).unwrap().is_none());
    }

    #[test]
    fn listing_skips_self_entry_and_resolves_paths() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "x/", &[][..]).unwrap();
        let mut file = tar::Header::new_gnu();
        file.set_size(5);
        file.set_mode(0o644);
        file.set_mtime(1_700_000_000);
        builder.append_data(&mut file, "x/y.txt", &b"hello"[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let entries = list_archive_entries(&archive, "/app/x").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "y.txt");
        assert_eq!(entries[0].path, "/app/x/y.txt");
        assert!(!entries[0].is_directory);
        assert_eq!(entries[0].size, 5);
        assert!(entries[0].last_modified.is_some());
    }
}
