//! Autosave timer and ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use super::persist::{CommitOutcome, SaveMode};
use super::{Workspace, WorkspaceInner};
use crate::autosave::{AutosaveHandle, AutosaveState, TickOutcome, TickReport};

/// Resets the tick flag when a tick ends, including on cancellation.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Workspace {
    /// Change the tick interval; values `<= 0` disable autosave. A running
    /// timer picks up the change immediately.
    pub fn set_auto_save_interval(&self, interval_ms: i64) {
        let interval = u64::try_from(interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        self.inner.interval.send_replace(interval);
        debug!(?interval, "Autosave interval changed");
    }

    /// Current interval, `None` when disabled
    pub fn auto_save_interval(&self) -> Option<Duration> {
        *self.inner.interval.borrow()
    }

    /// Flush every due node once. Returns [`TickOutcome::Skipped`] if a tick
    /// is already running.
    pub async fn run_autosave_tick(&self) -> TickOutcome {
        if self.inner.tick_running.swap(true, Ordering::SeqCst) {
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard(&self.inner.tick_running);
        TickOutcome::Ran(self.inner.autosave_tick().await)
    }

    /// Spawn the background timer. Must be called within a tokio runtime.
    pub fn start_autosave(&self) -> AutosaveHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let weak = Arc::downgrade(&self.inner);
        let mut interval_rx = self.inner.interval.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let interval = *interval_rx.borrow_and_update();
                match interval {
                    Some(period) => {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            changed = interval_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(period) => {
                                let Some(inner) = weak.upgrade() else {
                                    break;
                                };
                                Workspace { inner }.run_autosave_tick().await;
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            changed = interval_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            debug!("Autosave timer stopped");
        });

        AutosaveHandle::new(shutdown_tx, task)
    }
}

impl WorkspaceInner {
    async fn autosave_tick(&self) -> TickReport {
        let due = self.state.lock().autosave.due(Instant::now());
        let mut report = TickReport::default();
        if due.is_empty() {
            return report;
        }

        let mut jobs = Vec::new();
        for id in due {
            let Ok(guard) = self.save_lock(&id).try_lock_owned() else {
                debug!(%id, "Explicit save in progress, skipping");
                continue;
            };
            {
                let mut state = self.state.lock();
                if state.saving.contains(&id) || !state.autosave.begin_save(&id) {
                    continue;
                }
            }
            let prepared = match self.prepare_save(&id, None, None, SaveMode::Auto) {
                Ok(prepared) => prepared,
                Err(e) => {
                    debug!(%id, error = %e, "Node vanished before autosave");
                    self.state.lock().autosave.unregister(&id);
                    continue;
                }
            };
            jobs.push(async move {
                let result = self.execute(&prepared).await;
                let outcome = self.finish(prepared, result).await;
                drop(guard);
                outcome
            });
        }

        report.attempted = jobs.len();
        for outcome in join_all(jobs).await {
            match outcome {
                CommitOutcome::Saved(_) => report.saved += 1,
                CommitOutcome::Failed {
                    autosave: Some(AutosaveState::Failed),
                    ..
                } => report.failed += 1,
                CommitOutcome::Failed {
                    autosave: Some(_), ..
                } => report.retrying += 1,
                CommitOutcome::Failed { autosave: None, .. } | CommitOutcome::Dropped { .. } => {}
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                saved = report.saved,
                retrying = report.retrying,
                failed = report.failed,
                "Autosave tick"
            );
        }
        report
    }
}
