//! Session lifecycle: creation, the FIFO wait queue, promotion when
//! capacity frees up, activity bookkeeping, and teardown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{SessionRecord, SessionStatus};
use crate::pool::ContainerPool;
use crate::storage::SessionStore;

/// How many times promotion retries while released capacity works its way
/// through teardown and re-warming.
const PROMOTION_ATTEMPTS: usize = 10;
const PROMOTION_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    pool: Arc<ContainerPool>,
    config: Config,
    /// FIFO of session ids waiting for a container. Never held across a
    /// pool call.
    queue: Mutex<VecDeque<String>>,
    /// At most one promotion loop runs at a time, preserving FIFO order.
    promoting: AtomicBool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, pool: Arc<ContainerPool>, config: Config) -> Self {
        Self {
            store,
            pool,
            config,
            queue: Mutex::new(VecDeque::new()),
            promoting: AtomicBool::new(false),
        }
    }

    /// Creates a session and binds it to a container right away when the
    /// pool can supply one; otherwise the session joins the queue tail.
    pub async fn create_session(
        self: &Arc<Self>,
        name: Option<String>,
        timeout_seconds: Option<u64>,
    ) -> Result<SessionRecord> {
        if let Some(timeout) = timeout_seconds {
            if timeout == 0 || timeout > self.config.max_session_timeout_seconds {
                return Err(Error::InvalidTimeout(self.config.max_session_timeout_seconds));
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let mut session = SessionRecord::new(session_id.clone(), name, timeout_seconds);
        self.store.save(session.clone());

        match self.pool.acquire(&session_id).await {
            Ok(Some(container)) => {
                session.container_id = Some(container.container_id.clone());
                session.status = SessionStatus::Active;
                session.queue_position = 0;
                self.store.save(session.clone());
                info!(
                    "session {} active on container {}",
                    session_id, container.container_id
                );
            }
            Ok(None) => {
                {
                    let mut queue = self.queue.lock().await;
                    queue.push_back(session_id.clone());
                    session.queue_position = queue.len();
                    self.store.save(session.clone());
                }
                info!(
                    "session {} queued at position {}",
                    session_id, session.queue_position
                );
                // capacity may already be freeing up behind a teardown
                self.spawn_promotion();
            }
            Err(err) => {
                self.store.delete(&session_id);
                return Err(err);
            }
        }

        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        match self.store.get(session_id) {
            Some(session) if session.status != SessionStatus::Destroyed => Ok(session),
            _ => Err(Error::SessionNotFound(session_id.to_string())),
        }
    }

    /// Non-destroyed sessions, oldest first.
    pub fn get_all(&self) -> Vec<SessionRecord> {
        self.store.get_all()
    }

    pub fn get_all_active(&self) -> Vec<SessionRecord> {
        self.store.get_all_active()
    }

    /// Pre-flight shared by command execution and file transfer: the
    /// session must exist, be active, and have a container bound.
    pub fn container_for(&self, session_id: &str) -> Result<String> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Active {
            return Err(Error::SessionNotActive(session_id.to_string()));
        }
        session
            .container_id
            .ok_or_else(|| Error::SessionNotReady(session_id.to_string()))
    }

    /// Destroys a session and releases its container. Destroying an unknown
    /// or already-destroyed session is a no-op.
    pub async fn destroy_session(self: &Arc<Self>, session_id: &str) -> Result<()> {
        let Some(mut session) = self.store.get(session_id) else {
            debug!("destroy for unknown session {}", session_id);
            return Ok(());
        };
        if session.status == SessionStatus::Destroyed {
            return Ok(());
        }

        let container_id = session.container_id.take();
        let was_queued = session.status == SessionStatus::Queued;
        session.status = SessionStatus::Destroyed;
        session.queue_position = 0;
        session.is_executing_command = false;
        self.store.save(session);
        info!("session {} destroyed", session_id);

        if was_queued {
            let mut queue = self.queue.lock().await;
            queue.retain(|queued| queued != session_id);
            self.renumber_locked(&queue);
        }

        if let Some(container_id) = container_id {
            self.pool.release(&container_id).await;
        }

        if !self.queue.lock().await.is_empty() {
            self.spawn_promotion();
        }
        Ok(())
    }

    /// Signal from the host that the engine lost a container out from under
    /// us. The bound session, if any, becomes terminal.
    pub fn on_container_removed_externally(&self, container_id: &str) {
        if let Some(mut session) = self.store.get_by_container_id(container_id) {
            warn!(
                "container {} removed externally, destroying session {}",
                container_id, session.session_id
            );
            session.status = SessionStatus::Destroyed;
            session.container_id = None;
            session.is_executing_command = false;
            self.store.save(session);
        }
    }

    pub fn update_activity(&self, session_id: &str) {
        if let Some(mut session) = self.store.get(session_id) {
            session.last_activity_at = Utc::now();
            self.store.save(session);
        }
    }

    pub fn increment_command_count(&self, session_id: &str) {
        if let Some(mut session) = self.store.get(session_id) {
            session.command_count += 1;
            session.last_activity_at = Utc::now();
            self.store.save(session);
        }
    }

    /// Cooperative latch around command execution; while set, the reaper
    /// leaves the session alone.
    pub fn set_executing(&self, session_id: &str, executing: bool) {
        if let Some(mut session) = self.store.get(session_id) {
            session.is_executing_command = executing;
            if executing {
                session.last_activity_at = Utc::now();
            }
            self.store.save(session);
        }
    }

    /// Destroys active sessions whose idle time exceeds their effective
    /// timeout. Sessions mid-command are never touched. Returns how many
    /// were reaped.
    pub async fn expire_idle_sessions(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let mut reaped = 0;
        for session in self.store.get_all_active() {
            if session.is_executing_command {
                continue;
            }
            let timeout = self.effective_timeout(&session);
            let idle = now.signed_duration_since(session.last_activity_at);
            if idle > chrono::Duration::seconds(timeout as i64) {
                info!(
                    "session {} idle for {}s (timeout {}s), destroying",
                    session.session_id,
                    idle.num_seconds(),
                    timeout
                );
                if let Err(err) = self.destroy_session(&session.session_id).await {
                    warn!(
                        "failed to destroy idle session {}: {}",
                        session.session_id, err
                    );
                } else {
                    reaped += 1;
                }
            }
        }
        reaped
    }

    pub fn effective_timeout(&self, session: &SessionRecord) -> u64 {
        session
            .timeout_seconds
            .unwrap_or(self.config.session_timeout_seconds)
    }

    fn spawn_promotion(self: &Arc<Self>) {
        if self
            .promoting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // the running loop re-reads the queue on every attempt
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.clone().promote_queued().await;
            manager.promoting.store(false, Ordering::SeqCst);
        });
    }

    /// Moves queued sessions onto freed capacity. A released container goes
    /// through teardown and a fresh warm-up before it is acquirable again,
    /// so promotion retries on a short delay instead of giving up on the
    /// first empty-handed pass.
    async fn promote_queued(self: Arc<Self>) {
        for attempt in 0..PROMOTION_ATTEMPTS {
            loop {
                let next = {
                    let mut queue = self.queue.lock().await;
                    queue.pop_front()
                };
                let Some(session_id) = next else {
                    return;
                };

                let candidate = self.store.get(&session_id);
                let still_queued = candidate
                    .as_ref()
                    .map(|s| s.status == SessionStatus::Queued)
                    .unwrap_or(false);
                if !still_queued {
                    // destroyed while waiting, drop it
                    self.renumber().await;
                    continue;
                }

                match self.pool.acquire(&session_id).await {
                    Ok(Some(container)) => {
                        // Re-check: the session may have been destroyed
                        // while the acquire was in flight.
                        match self.store.get(&session_id) {
                            Some(mut session) if session.status == SessionStatus::Queued => {
                                session.status = SessionStatus::Active;
                                session.container_id = Some(container.container_id.clone());
                                session.queue_position = 0;
                                session.last_activity_at = Utc::now();
                                self.store.save(session);
                                info!(
                                    "session {} promoted to container {}",
                                    session_id, container.container_id
                                );
                            }
                            _ => {
                                debug!(
                                    "session {} vanished during promotion, returning container {}",
                                    session_id, container.container_id
                                );
                                self.pool.release(&container.container_id).await;
                            }
                        }
                        self.renumber().await;
                        continue;
                    }
                    Ok(None) => {
                        let mut queue = self.queue.lock().await;
                        queue.push_front(session_id);
                        self.renumber_locked(&queue);
                        break;
                    }
                    Err(err) => {
                        warn!("promotion acquire for session {} failed: {}", session_id, err);
                        let mut queue = self.queue.lock().await;
                        queue.push_front(session_id);
                        self.renumber_locked(&queue);
                        break;
                    }
                }
            }

            if attempt + 1 < PROMOTION_ATTEMPTS {
                tokio::time::sleep(PROMOTION_RETRY_DELAY).await;
            }
        }

        let remaining = self.queue.lock().await.len();
        if remaining > 0 {
            warn!(
                "{} sessions still queued after {} promotion attempts",
                remaining, PROMOTION_ATTEMPTS
            );
        }
    }

    async fn renumber(&self) {
        let queue = self.queue.lock().await;
        self.renumber_locked(&queue);
    }

    /// Re-derives the contiguous 1..k positions from queue order. Caller
    /// holds the queue lock.
    fn renumber_locked(&self, queue: &VecDeque<String>) {
        for (index, session_id) in queue.iter().enumerate() {
            if let Some(mut session) = self.store.get(session_id) {
                if session.status == SessionStatus::Queued
                    && session.queue_position != index + 1
                {
                    session.queue_position = index + 1;
                    self.store.save(session);
                }
            }
        }
    }
}
