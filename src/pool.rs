//! Container pool: owns every managed container, keeps a warm reserve of
//! idle ones, and enforces the capacity cap.
//!
//! A single decision mutex serializes reads/writes of the record set and
//! capacity reservations. Engine calls never run under the mutex: a warm-up
//! first inserts a `Warming` placeholder inside the critical section (so it
//! counts against capacity from time zero) and does the slow work after
//! release.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::docker::ContainerEngine;
use crate::error::{Error, Result};
use crate::models::{CommandInput, ContainerRecord, ContainerStatus, PoolEvent, StatusCounts};
use crate::storage::ContainerStore;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READY_DEADLINE: Duration = Duration::from_secs(30);
const SANITY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ContainerPool {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<dyn ContainerStore>,
    config: Config,
    /// Serializes dispositions over the record set. Never held across an
    /// engine call.
    lock: Mutex<()>,
    events: mpsc::UnboundedSender<PoolEvent>,
    prewarmed: OnceCell<()>,
}

impl ContainerPool {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn ContainerStore>,
        config: Config,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            lock: Mutex::new(()),
            events,
            prewarmed: OnceCell::new(),
        }
    }

    /// One-time pool initialization: make the image available, sweep stale
    /// managed containers left over from a previous run, and fill the warm
    /// reserve. Idempotent; subsequent calls after a success are no-ops.
    pub async fn ensure_prewarmed(self: &Arc<Self>) -> Result<()> {
        self.prewarmed
            .get_or_try_init(|| async {
                self.engine
                    .ensure_image(&self.config.image, &CancellationToken::new())
                    .await?;

                // Stale managed containers must never be reused.
                let stale = self.engine.list_managed_containers().await?;
                if !stale.is_empty() {
                    info!(
                        "removing {} stale managed containers from a previous run",
                        stale.len()
                    );
                    let removals = stale
                        .iter()
                        .map(|record| self.engine.remove_container(&record.container_id));
                    for (record, result) in stale.iter().zip(join_all(removals).await) {
                        if let Err(err) = result {
                            warn!(
                                "failed to remove stale container {}: {}",
                                record.container_id, err
                            );
                        }
                    }
                }

                let target = self.config.prewarm_count.min(self.config.max_containers);
                let placeholders = {
                    let _guard = self.lock.lock().await;
                    self.insert_placeholders(target)
                };
                info!("pre-warming {} containers", placeholders.len());
                let warmups = placeholders
                    .into_iter()
                    .map(|temp_id| self.warm_container(temp_id, None));
                for result in join_all(warmups).await {
                    if let Err(err) = result {
                        warn!("pre-warm failed: {}", err);
                    }
                }
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Hands an idle container to `session_id`, creating one below capacity
    /// if the reserve is empty. `None` means the caller has to queue.
    pub async fn acquire(self: &Arc<Self>, session_id: &str) -> Result<Option<ContainerRecord>> {
        let hit = {
            let _guard = self.lock.lock().await;
            match self.store.first_idle() {
                Some(mut container) => {
                    container.status = ContainerStatus::Busy;
                    container.session_id = Some(session_id.to_string());
                    self.store.save(container.clone());
                    Some(container)
                }
                None => None,
            }
        };
        if let Some(container) = hit {
            self.bind_and_replenish(&container, session_id).await;
            return Ok(Some(container));
        }

        // Reserve capacity for an on-demand warm-up; the placeholder counts
        // against the cap immediately.
        let reserved = {
            let _guard = self.lock.lock().await;
            self.insert_placeholders(1).pop()
        };
        let Some(temp_id) = reserved else {
            debug!("pool at capacity, session {} has to wait", session_id);
            return Ok(None);
        };

        // The warmed container is adopted directly as Busy, in the same
        // critical section that swaps out the placeholder, so no concurrent
        // idle-hit can claim it first.
        let container = self.warm_container(temp_id, Some(session_id)).await?;
        self.bind_and_replenish(&container, session_id).await;
        Ok(Some(container))
    }

    /// Tears a container down and schedules a reserve refill. Engine
    /// failures are logged; the record is dropped either way so capacity is
    /// never pinned by a dead container.
    pub async fn release(self: &Arc<Self>, container_id: &str) {
        let known = {
            let _guard = self.lock.lock().await;
            match self.store.get(container_id) {
                Some(mut container) => {
                    container.status = ContainerStatus::Destroying;
                    container.session_id = None;
                    self.store.save(container);
                    true
                }
                None => false,
            }
        };
        if !known {
            debug!("release for unknown container {}", container_id);
            return;
        }
        self.publish(PoolEvent::ContainerDestroying {
            container_id: container_id.to_string(),
        });

        if let Err(err) = self.engine.remove_container(container_id).await {
            warn!("failed to remove container {}: {}", container_id, err);
        }
        self.store.delete(container_id);
        self.publish(PoolEvent::ContainerRemoved {
            container_id: container_id.to_string(),
        });

        self.schedule_replenish();
    }

    pub async fn force_delete(self: &Arc<Self>, container_id: &str) {
        self.release(container_id).await;
    }

    /// Admin operation: warm a fresh container and leave it idle, unbound.
    pub async fn create_on_demand(self: &Arc<Self>) -> Result<ContainerRecord> {
        let reserved = {
            let _guard = self.lock.lock().await;
            self.insert_placeholders(1).pop()
        };
        let Some(temp_id) = reserved else {
            return Err(Error::MaxContainersReached);
        };
        self.warm_container(temp_id, None).await
    }

    /// Removes every managed container and clears the record set.
    pub async fn delete_all(self: &Arc<Self>) {
        let ids: Vec<String> = {
            let _guard = self.lock.lock().await;
            let all = self.store.get_all();
            for mut container in all.iter().cloned() {
                container.status = ContainerStatus::Destroying;
                container.session_id = None;
                self.store.save(container);
            }
            all.into_iter().map(|c| c.container_id).collect()
        };
        if ids.is_empty() {
            return;
        }
        info!("removing all {} managed containers", ids.len());
        for id in &ids {
            self.publish(PoolEvent::ContainerDestroying {
                container_id: id.clone(),
            });
        }

        let removals = ids.iter().map(|id| self.engine.remove_container(id));
        for (id, result) in ids.iter().zip(join_all(removals).await) {
            if let Err(err) = result {
                warn!("failed to remove container {}: {}", id, err);
            }
        }

        self.store.clear();
        for id in ids {
            self.publish(PoolEvent::ContainerRemoved { container_id: id });
        }
    }

    pub fn get_all(&self) -> Vec<ContainerRecord> {
        self.store.get_all()
    }

    pub fn counts(&self) -> StatusCounts {
        self.store.count_by_status()
    }

    /// Kicks off a reserve refill without blocking the caller.
    pub fn schedule_replenish(self: &Arc<Self>) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.replenish().await;
        });
    }

    /// Tops the warm reserve back up to the configured target, bounded by
    /// remaining capacity. Needed slots are reserved in the same critical
    /// section that computes them, so overlapping passes cannot overshoot.
    async fn replenish(self: &Arc<Self>) {
        let placeholders = {
            let _guard = self.lock.lock().await;
            let counts = self.store.count_by_status();
            let deficit = self
                .config
                .prewarm_count
                .saturating_sub(counts.idle + counts.warming);
            let headroom = self.config.max_containers.saturating_sub(counts.active());
            let needed = deficit.min(headroom);
            if needed == 0 {
                return;
            }
            self.insert_placeholders(needed)
        };

        debug!("replenishing warm reserve with {} containers", placeholders.len());
        let warmups = placeholders
            .into_iter()
            .map(|temp_id| self.warm_container(temp_id, None));
        for result in join_all(warmups).await {
            if let Err(err) = result {
                warn!("warm-up failed during replenish: {}", err);
            }
        }
    }

    /// Caller must hold the decision lock. Inserts up to `want` warming
    /// placeholders bounded by remaining capacity and returns their ids.
    fn insert_placeholders(&self, want: usize) -> Vec<String> {
        let counts = self.store.count_by_status();
        let headroom = self.config.max_containers.saturating_sub(counts.active());
        (0..want.min(headroom))
            .map(|_| {
                let temp_id = format!("warming-{}", Uuid::new_v4());
                self.store
                    .save(ContainerRecord::placeholder(temp_id.clone(), &self.config.image));
                temp_id
            })
            .collect()
    }

    /// Turns a reserved placeholder into a ready container: engine create,
    /// wait for `running`, prove exec works, then swap the records. When a
    /// session is given, the record is adopted straight to `Busy` for it in
    /// the same critical section, so the container is never visible as
    /// claimable idle inventory. Any failure rolls the reservation back and
    /// removes the container if it got as far as existing.
    async fn warm_container(
        &self,
        temp_id: String,
        session_id: Option<&str>,
    ) -> Result<ContainerRecord> {
        self.publish(PoolEvent::WarmingStarted {
            container_id: temp_id.clone(),
        });
        match self.warm_inner().await {
            Ok(mut record) => {
                // Adopt the result only if the reservation still stands; a
                // delete-all may have torn it down while the engine worked.
                let adopted = {
                    let _guard = self.lock.lock().await;
                    if self.store.get(&temp_id).is_some() {
                        self.store.delete(&temp_id);
                        if let Some(session) = session_id {
                            record.status = ContainerStatus::Busy;
                            record.session_id = Some(session.to_string());
                        }
                        self.store.save(record.clone());
                        true
                    } else {
                        false
                    }
                };
                if !adopted {
                    self.cleanup_failed_warmup(&record.container_id).await;
                    return Err(Error::Engine(format!(
                        "warm-up of {} abandoned, reservation gone",
                        record.container_id
                    )));
                }
                self.publish(PoolEvent::ContainerReady {
                    container_id: record.container_id.clone(),
                });
                match session_id {
                    Some(session) => {
                        info!(
                            "container {} warmed for session {}",
                            record.container_id, session
                        );
                    }
                    None => info!("container {} is warm and idle", record.container_id),
                }
                Ok(record)
            }
            Err(err) => {
                {
                    let _guard = self.lock.lock().await;
                    self.store.delete(&temp_id);
                }
                self.publish(PoolEvent::WarmingFailed {
                    container_id: temp_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn warm_inner(&self) -> Result<ContainerRecord> {
        let mut record = self.engine.create_managed_container(None).await?;
        let container_id = record.container_id.clone();

        if let Err(err) = self.wait_until_running(&container_id).await {
            self.cleanup_failed_warmup(&container_id).await;
            return Err(err);
        }

        let sanity = CommandInput::argv(&["echo", "ready"]);
        match self
            .engine
            .exec_command(
                &container_id,
                &sanity,
                "",
                SANITY_TIMEOUT,
                &CancellationToken::new(),
            )
            .await
        {
            Ok(result) if result.exit_code == 0 => {}
            Ok(result) => {
                self.cleanup_failed_warmup(&container_id).await;
                return Err(Error::Engine(format!(
                    "sanity command exited with {} in container {}",
                    result.exit_code, container_id
                )));
            }
            Err(err) => {
                self.cleanup_failed_warmup(&container_id).await;
                return Err(err);
            }
        }

        record.status = ContainerStatus::Idle;
        record.started_at = Some(Utc::now());
        Ok(record)
    }

    async fn wait_until_running(&self, container_id: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_DEADLINE;
        loop {
            match self.engine.inspect(container_id).await? {
                Some(record) if record.engine_status == "running" => return Ok(()),
                Some(record) => {
                    debug!(
                        "container {} not ready yet (engine status {})",
                        container_id, record.engine_status
                    );
                }
                None => {
                    return Err(Error::ContainerNotFound(container_id.to_string()));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::OperationTimeout(READY_DEADLINE));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn cleanup_failed_warmup(&self, container_id: &str) {
        if let Err(err) = self.engine.remove_container(container_id).await {
            warn!(
                "failed to remove container {} after failed warm-up: {}",
                container_id, err
            );
        }
    }

    async fn bind_and_replenish(self: &Arc<Self>, container: &ContainerRecord, session_id: &str) {
        // Best effort: the record already carries the binding.
        if let Err(err) = self
            .engine
            .assign_session(&container.container_id, session_id)
            .await
        {
            warn!(
                "failed to tag container {} with session {}: {}",
                container.container_id, session_id, err
            );
        }
        self.publish(PoolEvent::ContainerAssigned {
            container_id: container.container_id.clone(),
            session_id: session_id.to_string(),
        });
        info!(
            "container {} assigned to session {}",
            container.container_id, session_id
        );
        self.schedule_replenish();
    }

    fn publish(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }
}
