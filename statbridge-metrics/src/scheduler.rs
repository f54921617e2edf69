//!
//! Fixed-delay probe scheduling
//!
//! Every [`Probe`] handed to the [`Scheduler`] gets its own task. A task runs its probe, waits
//! the configured delay measured from the end of that run, and repeats, so a slow poll can never
//! overlap the next one. Each run is spawned separately so that even a panic inside a probe only
//! costs that one cycle.
//!
use crate::probe::Probe;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::*;

pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct Scheduler {
    ct: CancellationToken,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Token cancelled by [`stop()`](Scheduler::stop)
    ///
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ct.clone()
    }

    ///
    /// Run `probe` after `initial_delay`, then again `delay` after each run completes, until the
    /// scheduler is stopped
    ///
    pub fn schedule(&mut self, probe: Arc<Probe>, initial_delay: Duration, delay: Duration) {
        let ct = self.ct.clone();
        let family = probe.family().name;
        debug!(
            family,
            "Scheduling probe with initial delay {:?} and fixed delay {:?}", initial_delay, delay
        );

        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = ct.cancelled() => return,
                _ = time::sleep(initial_delay) => (),
            }

            loop {
                let mut run = tokio::spawn({
                    let probe = probe.clone();
                    async move { probe.run().await }
                });

                tokio::select! {
                    biased;
                    _ = ct.cancelled() => {
                        run.abort();
                        break;
                    }
                    res = &mut run => match res {
                        Ok(report) => trace!(family, "Probe run finished: {}", report),
                        Err(e) if e.is_panic() => error!(family, "Probe run panicked: {}", e),
                        Err(e) => warn!(family, "Probe run did not complete: {}", e),
                    },
                }

                tokio::select! {
                    biased;
                    _ = ct.cancelled() => break,
                    _ = time::sleep(delay) => (),
                }
            }
            debug!(family, "Probe schedule stopped");
        });
    }

    ///
    /// Stop scheduling; in-flight runs are abandoned
    ///
    pub fn stop(&self) {
        self.ct.cancel();
    }

    ///
    /// Wait for every scheduled task to finish. Only returns once [`stop()`](Scheduler::stop)
    /// has been called.
    ///
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!("Probe task failed to join: {}", e);
            }
        }
    }
}
