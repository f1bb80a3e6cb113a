use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::{self, MissedTickBehavior}};
use tracing::{debug, error, info};

use crate::registry::{Liveness, Registry};

/// Callback fired by the monitor-mode scheduler. Runs on the blocking pool,
/// failures are its own business.
pub trait Hook: Send + Sync + 'static {
    fn dispatch(&self);
}

impl<F> Hook for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn dispatch(&self) {
        self()
    }
}

/// Default hook: logs how many hosts are alive.
pub struct LivenessReport {
    registry: Arc<Registry>,
}

impl LivenessReport {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

impl Hook for LivenessReport {
    fn dispatch(&self) {
        let (active, inactive) = self.registry.count_by_status();
        info!(active, inactive, "[event] liveness");
        for (ip, record) in self.registry.snapshot() {
            if record.status == Liveness::Inactive {
                debug!(hostname = %record.report.hostname, "[event] {} inactive", ip);
            }
        }
    }
}

/// Fixed-interval trigger for a [`Hook`].
///
/// Ticks never overlap: a dispatch that outlives the interval swallows the
/// ticks it covered and the next one fires on the regular schedule.
pub struct Scheduler {
    every: Duration,
    hook: Arc<dyn Hook>,
}

impl Scheduler {
    pub fn new(every: Duration, hook: Arc<dyn Hook>) -> Self {
        Self { every, hook }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick is immediate, the first event fires one interval in
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!("-------event begin------------");
                let hook = self.hook.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || hook.dispatch()).await {
                    error!("[event] hook failed: {}", e);
                }
                info!("-------event end------------");
            }
        })
    }
}
