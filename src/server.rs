use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
    time,
};
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    connection::handler::Proxy,
    protocol::report::Report,
    registry::Registry,
    scheduler::{Hook, LivenessReport, Scheduler},
    telemetry::{SystemProbe, Telemetry},
};

/// Pause after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub trait Wire {
    fn connect(&self, stream: TcpStream, addr: SocketAddr) -> impl std::future::Future<Output = ()> + Send;
}

/// The collector: accepts agent sessions and keeps the host registry fresh.
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    hook: Arc<dyn Hook>,
    telemetry: Arc<dyn Telemetry>,
}

impl Server {
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let hook: Arc<dyn Hook> = Arc::new(LivenessReport::new(registry.clone()));
        let telemetry: Arc<dyn Telemetry> = Arc::new(SystemProbe::new("server", "router", ""));
        Self { config, registry, hook, telemetry }
    }

    /// Hook run by the scheduler in monitor mode.
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hook = hook;
        self
    }

    /// Source of the collector's own status report.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Bind the listener and start every background task.
    pub async fn bind(self) -> io::Result<RunningServer> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("[server] listening on {} ({:?} mode)", local_addr, self.config.mode);

        let router_info = Arc::new(RwLock::new(None));
        let handler = Proxy::new(self.registry.clone(), self.config.session);

        let mut tasks = vec![
            tokio::spawn(accept_loop(listener, handler)),
            self.registry.clone().spawn_sweeper(self.config.sweep_interval, self.config.liveness_threshold),
            tokio::spawn(refresh_router_info(
                self.telemetry.clone(),
                router_info.clone(),
                self.config.router_info_interval,
            )),
        ];

        if self.config.mode.is_monitor() {
            let scheduler = Scheduler::new(self.config.dispatch_interval, self.hook.clone());
            tasks.push(scheduler.spawn());
        }

        Ok(RunningServer {
            local_addr,
            registry: self.registry,
            router_info,
            tasks,
        })
    }
}

pub struct RunningServer {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    router_info: Arc<RwLock<Option<Report>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Latest status report of the collector host itself.
    pub async fn router_info(&self) -> Option<Report> {
        self.router_info.read().await.clone()
    }

    /// Stop accepting and stop the periodic tasks. Sessions already running
    /// end when their peers disconnect.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        info!("[server] stopped");
    }
}

async fn accept_loop<W>(listener: TcpListener, wire: W)
where
    W: Wire + Send + Sync,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => wire.connect(stream, peer_addr).await,
            Err(e) => {
                warn!("[server] accept failed: {}", e);
                time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn refresh_router_info(
    telemetry: Arc<dyn Telemetry>,
    slot: Arc<RwLock<Option<Report>>>,
    every: Duration,
) {
    let mut ticker = time::interval(every);
    loop {
        ticker.tick().await;
        let report = telemetry.collect().and_then(|raw| Ok(Report::decode(raw.as_bytes())?));
        match report {
            Ok(report) => *slot.write().await = Some(report),
            Err(e) => warn!("[server] router info unavailable: {}", e),
        }
    }
}
