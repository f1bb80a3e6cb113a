use std::{sync::Arc, time::{Duration, Instant}};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

use crate::protocol::report::Report;

/// How long a host may stay silent before the sweep marks it inactive:
/// one and a half heartbeat intervals, so a single late heartbeat is tolerated
/// but a missed one is not.
pub fn missed_threshold(heartbeat: Duration) -> Duration {
    heartbeat + heartbeat / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct HostRecord {
    pub report: Report,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub status: Liveness,
}

/// Last known state of every host that ever reported, keyed by source IP.
///
/// Written by every session consumer and by the sweep task at once, so all
/// mutation goes through the per-key locking of `DashMap`. Records are never
/// removed, only flipped between active and inactive.
#[derive(Debug, Default)]
pub struct Registry {
    hosts: DashMap<String, HostRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, ip: &str, report: Report, now: Instant) {
        match self.hosts.entry(ip.to_owned()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.status == Liveness::Inactive {
                    info!("[registry] host {} is back", ip);
                }
                record.report = report;
                record.last_seen = now;
                record.status = Liveness::Active;
            }
            Entry::Vacant(entry) => {
                info!("[registry] new host {}", ip);
                entry.insert(HostRecord {
                    report,
                    first_seen: now,
                    last_seen: now,
                    status: Liveness::Active,
                });
            }
        }
    }

    /// Mark every host silent for longer than `missed` as inactive.
    /// Returns how many records changed state.
    pub fn sweep(&self, now: Instant, missed: Duration) -> usize {
        let mut flipped = 0;
        for mut entry in self.hosts.iter_mut() {
            let (ip, record) = entry.pair_mut();
            if record.status == Liveness::Inactive {
                continue;
            }
            let silent = now.saturating_duration_since(record.last_seen);
            if silent > missed {
                record.status = Liveness::Inactive;
                flipped += 1;
                warn!(silent_ms = silent.as_millis() as u64, "[registry] host {} went inactive", ip);
            }
        }
        flipped
    }

    pub fn get(&self, ip: &str) -> Option<HostRecord> {
        self.hosts.get(ip).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(String, HostRecord)> {
        self.hosts
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// `(active, inactive)`
    pub fn count_by_status(&self) -> (usize, usize) {
        self.hosts.iter().fold((0, 0), |(active, inactive), r| match r.status {
            Liveness::Active => (active + 1, inactive),
            Liveness::Inactive => (active, inactive + 1),
        })
    }

    /// Run [`Registry::sweep`] every `every` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, missed: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(every_ms = every.as_millis() as u64, missed_ms = missed.as_millis() as u64, "[sweep] start");
            let mut ticker = time::interval(every);
            // the first tick of an interval fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let flipped = self.sweep(Instant::now(), missed);
                if flipped > 0 {
                    debug!(flipped, "[sweep] done");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use tokio::join;

    use super::*;

    fn report(load: f64) -> Report {
        let mut metrics = BTreeMap::new();
        metrics.insert("load1".to_owned(), load);
        Report { metrics, ..Default::default() }
    }

    #[test]
    fn upsert_refreshes_the_same_record() {
        let registry = Registry::new();
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(3);

        registry.upsert("10.0.0.5", report(1.0), t1);
        registry.upsert("10.0.0.5", report(2.0), t2);

        assert_eq!(registry.len(), 1);
        let record = registry.get("10.0.0.5").unwrap();
        assert_eq!(record.last_seen, t2);
        assert_eq!(record.first_seen, t1);
        assert_eq!(record.report.metric("load1"), Some(2.0));
        assert_eq!(record.status, Liveness::Active);
    }

    #[test]
    fn sweep_flips_only_after_threshold() {
        let registry = Registry::new();
        let t0 = Instant::now();
        let missed = Duration::from_secs(10);
        registry.upsert("10.0.0.5", report(0.0), t0);

        assert_eq!(registry.sweep(t0, missed), 0);
        assert_eq!(registry.sweep(t0 + missed, missed), 0);
        assert_eq!(registry.get("10.0.0.5").unwrap().status, Liveness::Active);

        assert_eq!(registry.sweep(t0 + missed + Duration::from_millis(1), missed), 1);
        assert_eq!(registry.get("10.0.0.5").unwrap().status, Liveness::Inactive);

        // already inactive, nothing to flip and nothing removed
        assert_eq!(registry.sweep(t0 + missed * 2, missed), 0);
        assert_eq!(registry.len(), 1);

        registry.upsert("10.0.0.5", report(0.0), t0 + missed * 5);
        assert_eq!(registry.get("10.0.0.5").unwrap().status, Liveness::Active);
    }

    #[test]
    fn heartbeat_every_five_seconds() {
        let registry = Registry::new();
        let t0 = Instant::now();
        let at = |s: u64| t0 + Duration::from_secs(s);
        let missed = missed_threshold(Duration::from_secs(5));

        registry.upsert("10.0.0.5", report(0.1), at(0));
        registry.upsert("10.0.0.5", report(0.2), at(3));

        registry.sweep(at(9), missed);
        assert_eq!(registry.get("10.0.0.5").unwrap().status, Liveness::Active);

        registry.sweep(at(11), missed);
        assert_eq!(registry.get("10.0.0.5").unwrap().status, Liveness::Inactive);
    }

    #[test]
    fn threshold_is_one_and_a_half_heartbeats() {
        assert_eq!(missed_threshold(Duration::from_secs(5)), Duration::from_millis(7500));
        assert_eq!(missed_threshold(Duration::from_secs(2)), Duration::from_secs(3));
    }

    #[test]
    fn counts_and_snapshot() {
        let registry = Registry::new();
        let t0 = Instant::now();
        registry.upsert("10.0.0.1", report(0.0), t0);
        registry.upsert("10.0.0.2", report(0.0), t0 + Duration::from_secs(20));
        registry.sweep(t0 + Duration::from_secs(21), Duration::from_secs(10));

        assert_eq!(registry.count_by_status(), (1, 1));
        let mut ips: Vec<String> = registry.snapshot().into_iter().map(|(ip, _)| ip).collect();
        ips.sort();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn concurrent_upsert_and_sweep() {
        let registry = Arc::new(Registry::new());
        async fn writer(registry: Arc<Registry>, id: u8) {
            for i in 0..200u32 {
                let ip = format!("10.{}.0.{}", id, i % 20);
                registry.upsert(&ip, report(i as f64), Instant::now());
            }
        }
        async fn sweeper(registry: Arc<Registry>) {
            for _ in 0..200 {
                registry.sweep(Instant::now(), Duration::from_secs(60));
                tokio::task::yield_now().await;
            }
        }

        let t1 = tokio::spawn(writer(registry.clone(), 1));
        let t2 = tokio::spawn(writer(registry.clone(), 2));
        let t3 = tokio::spawn(writer(registry.clone(), 3));
        let t4 = tokio::spawn(sweeper(registry.clone()));
        let _ = join!(t1, t2, t3, t4);

        assert_eq!(registry.len(), 60);
        assert_eq!(registry.count_by_status(), (60, 0));
        assert_eq!(registry.get("10.1.0.19").unwrap().report.metric("load1"), Some(199.0));
    }

    #[tokio::test]
    async fn sweeper_task_marks_silent_hosts() {
        let registry = Arc::new(Registry::new());
        registry.upsert("10.0.0.9", report(0.0), Instant::now());
        let task = registry.clone().spawn_sweeper(Duration::from_millis(20), Duration::from_millis(50));

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.get("10.0.0.9").unwrap().status, Liveness::Inactive);
        task.abort();
    }
}
