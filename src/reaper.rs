//! Background sweep that destroys idle sessions once their effective
//! timeout elapses. Sessions mid-command are skipped; the executing latch
//! is the contract between this task and the command runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub fn spawn_reaper(
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("session reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("session reaper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let reaped = sessions.expire_idle_sessions().await;
                    if reaped > 0 {
                        debug!("reaped {} idle sessions", reaped);
                    }
                }
            }
        }
    })
}
