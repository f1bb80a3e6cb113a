//! Client and server configuration.
//!
//! Both sides read a JSON file once at startup. The result is an immutable
//! value handed to constructors; nothing reads configuration after that.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    protocol::DEFAULT_MAX_FRAME_SIZE,
    registry::missed_threshold,
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
pub const DISPATCH_INTERVAL: Duration = Duration::from_secs(5);
pub const ROUTER_INFO_INTERVAL: Duration = Duration::from_secs(5);
pub const QUEUE_CAPACITY: usize = 1024;
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Timing of one outbound heartbeat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub heartbeat_interval: Duration,
    pub dial_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            dial_timeout: DIAL_TIMEOUT,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Buffering limits of one inbound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub read_chunk_size: usize,
    pub max_frame_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: QUEUE_CAPACITY,
            read_chunk_size: READ_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub domain: String,
    pub cluster: String,
    pub router_list: Vec<String>,
    pub lifecycle: LifecycleSettings,
}

#[derive(Deserialize)]
struct ClientFile {
    domain: String,
    cluster: String,
    router_list: Vec<String>,
    heartbeat_interval_secs: Option<u64>,
    dial_timeout_secs: Option<u64>,
    retry_delay_secs: Option<u64>,
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = read(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ClientFile = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("client config: {}", e)))?;

        let router_list: Vec<String> = file.router_list
            .into_iter()
            .map(|addr| addr.trim().to_owned())
            .filter(|addr| !addr.is_empty())
            .collect();
        if router_list.is_empty() {
            return Err(Error::Config("client config: router_list is empty".into()));
        }

        let defaults = LifecycleSettings::default();
        let lifecycle = LifecycleSettings {
            heartbeat_interval: secs(file.heartbeat_interval_secs, "heartbeat_interval_secs")?
                .unwrap_or(defaults.heartbeat_interval),
            dial_timeout: secs(file.dial_timeout_secs, "dial_timeout_secs")?
                .unwrap_or(defaults.dial_timeout),
            retry_delay: secs(file.retry_delay_secs, "retry_delay_secs")?
                .unwrap_or(defaults.retry_delay),
        };

        Ok(Self {
            domain: file.domain,
            cluster: file.cluster,
            router_list,
            lifecycle,
        })
    }

    /// Router addresses joined with `|`, the form used in logs.
    pub fn server_list(&self) -> String {
        self.router_list.join("|")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// Collect heartbeats and run the periodic hook.
    Monitor,
    /// Collect heartbeats only. Holds the configured label.
    Collect(String),
}

impl ServerMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            // older deployments spell it this way
            "monitor" | "moniter" => Self::Monitor,
            other => Self::Collect(other.to_owned()),
        }
    }

    pub fn is_monitor(&self) -> bool {
        matches!(self, Self::Monitor)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: ServerMode,
    /// Carried for deployments that front the collector with an HTTP view;
    /// the collector itself does not serve HTTP.
    pub http_host: String,
    pub http_port: String,
    pub session: SessionSettings,
    pub sweep_interval: Duration,
    pub liveness_threshold: Duration,
    pub dispatch_interval: Duration,
    pub router_info_interval: Duration,
}

#[derive(Deserialize)]
struct ServerFile {
    host: String,
    port: String,
    srvmode: String,
    httphost: String,
    httpport: String,
    sweep_interval_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    liveness_threshold_ms: Option<u64>,
    dispatch_interval_secs: Option<u64>,
    router_info_interval_secs: Option<u64>,
    queue_capacity: Option<usize>,
    read_chunk_size: Option<usize>,
    max_frame_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "*".into(),
            port: 0,
            mode: ServerMode::Collect(String::new()),
            http_host: String::new(),
            http_port: String::new(),
            session: SessionSettings::default(),
            sweep_interval: SWEEP_INTERVAL,
            liveness_threshold: missed_threshold(HEARTBEAT_INTERVAL),
            dispatch_interval: DISPATCH_INTERVAL,
            router_info_interval: ROUTER_INFO_INTERVAL,
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = read(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ServerFile = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("server config: {}", e)))?;

        let port = file.port.trim().parse::<u16>()
            .map_err(|_| Error::Config(format!("server config: invalid port {:?}", file.port)))?;

        let defaults = ServerConfig::default();
        let heartbeat = secs(file.heartbeat_interval_secs, "heartbeat_interval_secs")?
            .unwrap_or(HEARTBEAT_INTERVAL);
        let liveness_threshold = match file.liveness_threshold_ms {
            Some(0) => return Err(Error::Config("server config: liveness_threshold_ms must be positive".into())),
            Some(ms) => Duration::from_millis(ms),
            None => missed_threshold(heartbeat),
        };

        let session = SessionSettings {
            queue_capacity: positive(file.queue_capacity, "queue_capacity")?
                .unwrap_or(defaults.session.queue_capacity),
            read_chunk_size: positive(file.read_chunk_size, "read_chunk_size")?
                .unwrap_or(defaults.session.read_chunk_size),
            max_frame_size: positive(file.max_frame_size, "max_frame_size")?
                .unwrap_or(defaults.session.max_frame_size),
        };

        Ok(Self {
            host: file.host,
            port,
            mode: ServerMode::parse(&file.srvmode),
            http_host: file.httphost,
            http_port: file.httpport,
            session,
            sweep_interval: secs(file.sweep_interval_secs, "sweep_interval_secs")?
                .unwrap_or(defaults.sweep_interval),
            liveness_threshold,
            dispatch_interval: secs(file.dispatch_interval_secs, "dispatch_interval_secs")?
                .unwrap_or(defaults.dispatch_interval),
            router_info_interval: secs(file.router_info_interval_secs, "router_info_interval_secs")?
                .unwrap_or(defaults.router_info_interval),
        })
    }

    pub fn listen_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// `*` stands for every interface.
pub fn join_host_port(host: &str, port: u16) -> String {
    let host = match host.trim() {
        "" | "*" => "0.0.0.0",
        h => h,
    };
    if host.contains(':') && !host.starts_with('[') {
        return format!("[{}]:{}", host, port);
    }
    format!("{}:{}", host, port)
}

/// Expand a `*:port` router entry into something dialable.
pub fn dial_addr(addr: &str) -> String {
    match addr.trim().strip_prefix("*:") {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.trim().to_owned(),
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))
}

fn secs(value: Option<u64>, name: &str) -> Result<Option<Duration>> {
    match value {
        Some(0) => Err(Error::Config(format!("{} must be positive", name))),
        Some(v) => Ok(Some(Duration::from_secs(v))),
        None => Ok(None),
    }
}

fn positive(value: Option<usize>, name: &str) -> Result<Option<usize>> {
    match value {
        Some(0) => Err(Error::Config(format!("{} must be positive", name))),
        v => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn client_config_with_defaults() {
        let config = ClientConfig::from_json(r#"{
            "domain": "example.org",
            "cluster": "edge",
            "router_list": ["10.0.0.1:8080", " 10.0.0.2:8080 ", ""]
        }"#).unwrap();

        assert_eq!(config.domain, "example.org");
        assert_eq!(config.cluster, "edge");
        assert_eq!(config.server_list(), "10.0.0.1:8080|10.0.0.2:8080");
        assert_eq!(config.lifecycle, LifecycleSettings::default());
    }

    #[test]
    fn client_config_overrides() {
        let config = ClientConfig::from_json(r#"{
            "domain": "", "cluster": "", "router_list": ["r:1"],
            "heartbeat_interval_secs": 1, "retry_delay_secs": 3
        }"#).unwrap();
        assert_eq!(config.lifecycle.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.lifecycle.retry_delay, Duration::from_secs(3));
        assert_eq!(config.lifecycle.dial_timeout, DIAL_TIMEOUT);
    }

    #[test]
    fn client_config_errors_are_fatal() {
        assert!(matches!(ClientConfig::from_json("{"), Err(Error::Config(_))));
        assert!(matches!(
            ClientConfig::from_json(r#"{"domain":"d","cluster":"c","router_list":[]}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"domain":"d","router_list":["a:1"]}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"domain":"d","cluster":"c","router_list":["a:1"],"retry_delay_secs":0}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn server_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{
            "host": "*", "port": "8800", "srvmode": "moniter",
            "httphost": "127.0.0.1", "httpport": "8080",
            "queue_capacity": 16
        }}"#).unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:8800");
        assert!(config.mode.is_monitor());
        assert_eq!(config.http_port, "8080");
        assert_eq!(config.session.queue_capacity, 16);
        assert_eq!(config.session.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.liveness_threshold, Duration::from_millis(7500));
    }

    #[test]
    fn server_config_errors_are_fatal() {
        let base = |port: &str| format!(
            r#"{{"host":"h","port":"{}","srvmode":"","httphost":"","httpport":""}}"#,
            port
        );
        assert!(ServerConfig::from_json(&base("80")).is_ok());
        assert!(matches!(ServerConfig::from_json(&base("eighty")), Err(Error::Config(_))));
        assert!(matches!(ServerConfig::from_json(&base("70000")), Err(Error::Config(_))));
        assert!(matches!(ServerConfig::from_json(r#"{"host":"h"}"#), Err(Error::Config(_))));
        assert!(matches!(ServerConfig::load("/nonexistent/server.json"), Err(Error::Config(_))));
    }

    #[test]
    fn server_modes() {
        assert_eq!(ServerMode::parse("monitor"), ServerMode::Monitor);
        assert_eq!(ServerMode::parse(" moniter "), ServerMode::Monitor);
        assert_eq!(ServerMode::parse("router"), ServerMode::Collect("router".into()));
        assert!(!ServerMode::parse("").is_monitor());
    }

    #[test]
    fn addresses() {
        assert_eq!(join_host_port("*", 80), "0.0.0.0:80");
        assert_eq!(join_host_port("10.1.1.1", 80), "10.1.1.1:80");
        assert_eq!(join_host_port("::1", 80), "[::1]:80");
        assert_eq!(dial_addr("*:9000"), "0.0.0.0:9000");
        assert_eq!(dial_addr(" host:9000 "), "host:9000");
    }
}
