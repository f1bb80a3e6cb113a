use std::{collections::BTreeMap, fs, time::{SystemTime, UNIX_EPOCH}};

use crate::{error::Result, protocol::report::Report};

/// Source of the report pushed on every heartbeat. The returned string is the
/// frame payload as is.
pub trait Telemetry: Send + Sync {
    fn collect(&self) -> Result<String>;
}

impl<F> Telemetry for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn collect(&self) -> Result<String> {
        self()
    }
}

/// Host probe backed by procfs. Metrics that cannot be read on the current
/// platform are left out of the report rather than failing it.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    run_mode: String,
    cluster: String,
    domain: String,
}

impl SystemProbe {
    pub fn new(run_mode: impl Into<String>, cluster: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            run_mode: run_mode.into(),
            cluster: cluster.into(),
            domain: domain.into(),
        }
    }

    pub fn report(&self) -> Report {
        let mut metrics = BTreeMap::new();
        if let Some((l1, l5, l15)) = fs::read_to_string("/proc/loadavg").ok().as_deref().and_then(parse_loadavg) {
            metrics.insert("load1".to_owned(), l1);
            metrics.insert("load5".to_owned(), l5);
            metrics.insert("load15".to_owned(), l15);
        }
        if let Ok(raw) = fs::read_to_string("/proc/meminfo") {
            metrics.extend(parse_meminfo(&raw));
        }

        Report {
            ip: String::new(),
            hostname: host_name(),
            cluster: self.cluster.clone(),
            domain: self.domain.clone(),
            run_mode: self.run_mode.clone(),
            timestamp: sys_now(),
            metrics,
        }
    }
}

impl Telemetry for SystemProbe {
    fn collect(&self) -> Result<String> {
        Ok(self.report().encode()?)
    }
}

/// Unix time in seconds.
fn sys_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

fn parse_loadavg(raw: &str) -> Option<(f64, f64, f64)> {
    let mut fields = raw.split_whitespace().map(|f| f.parse::<f64>().ok());
    Some((fields.next()??, fields.next()??, fields.next()??))
}

fn parse_meminfo(raw: &str) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else { continue };
        let kb = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
        match (key, kb) {
            ("MemTotal", Some(kb)) => { values.insert("mem_total_kb".to_owned(), kb); }
            ("MemAvailable", Some(kb)) => { values.insert("mem_available_kb".to_owned(), kb); }
            _ => (),
        }
    }

    if let (Some(total), Some(avail)) = (values.get("mem_total_kb"), values.get("mem_available_kb")) {
        if *total > 0.0 {
            let used = (total - avail) / total * 100.0;
            values.insert("mem_used_percent".to_owned(), used);
        }
    }
    values
}
