//! Agent side of a heartbeat session.
//!
//! One task owns the socket for the whole life of a [`Client`]: it dials
//! until a router answers, then pushes a telemetry frame on every heartbeat
//! tick. A failed write drops the socket and redials right away while the
//! heartbeat timer keeps running. [`Client::disconnect`] stops that task and
//! waits for it, so no frame is written once it returns.

use std::{
    future::Future,
    io,
    sync::{atomic::{AtomicU64, Ordering}, Arc},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    select,
    sync::{broadcast, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use super::Status;
use crate::{
    config::LifecycleSettings,
    error::Result,
    protocol::FrameCodec,
    telemetry::Telemetry,
};

pub struct Client {
    addr: String,
    settings: LifecycleSettings,
    telemetry: Arc<dyn Telemetry>,
    codec: FrameCodec,
    status: Arc<watch::Sender<Status>>,
    sent: Arc<AtomicU64>,
    tx_sigkill: Option<broadcast::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Client {
    pub fn new(addr: impl Into<String>, settings: LifecycleSettings, telemetry: Arc<dyn Telemetry>) -> Self {
        let (status, _) = watch::channel(Status::Disconnected);
        Self {
            addr: addr.into(),
            settings,
            telemetry,
            codec: FrameCodec::default(),
            status: Arc::new(status),
            sent: Arc::new(AtomicU64::new(0)),
            tx_sigkill: None,
            task: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Heartbeat frames written so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Resolve once the session reaches `want`, or right away with the
    /// current status when it can never get there: the client was closed, or
    /// was never started.
    pub async fn wait_for(&self, want: Status) -> Status {
        if self.task.is_none() && self.status() != want {
            return self.status();
        }
        let mut rx = self.status.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let reached = rx.wait_for(|s| *s == want || *s == Status::Closed).await;
        reached.map(|s| *s).unwrap_or(Status::Closed)
    }

    /// Start the session in the background. Does nothing if it is already
    /// running or was shut down.
    pub fn run(&mut self) {
        if self.task.is_some() || self.status() == Status::Closed {
            return;
        }
        info!("[client] connecting to router {}", self.addr);

        let (tx_sigkill, rx_sigkill) = broadcast::channel::<bool>(1);
        let session = Session {
            addr: self.addr.clone(),
            settings: self.settings,
            telemetry: self.telemetry.clone(),
            codec: self.codec,
            status: self.status.clone(),
            sent: self.sent.clone(),
        };
        self.tx_sigkill = Some(tx_sigkill);
        self.task = Some(tokio::spawn(session.run(rx_sigkill)));
    }

    /// Close the session and wait until its task is gone.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.tx_sigkill.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("[client] {} session task failed: {}", self.addr, e);
            }
        }
        self.status.send_replace(Status::Closed);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Session {
    addr: String,
    settings: LifecycleSettings,
    telemetry: Arc<dyn Telemetry>,
    codec: FrameCodec,
    status: Arc<watch::Sender<Status>>,
    sent: Arc<AtomicU64>,
}

impl Session {
    async fn run(self, mut rx_sigkill: broadcast::Receiver<bool>) {
        // the socket lives inside `heartbeat`, cancelling it closes the socket
        select! {
            _ = rx_sigkill.recv() => (),
            _ = self.heartbeat() => (),
        }
        self.status.send_replace(Status::Closed);
        info!("[client] session to {} closed", self.addr);
    }

    async fn heartbeat(&self) {
        let stream = self.connect().await;
        let mut socket = Some(stream);

        let mut ticker = time::interval(self.settings.heartbeat_interval);
        loop {
            ticker.tick().await;

            if socket.is_none() {
                socket = self.redial().await;
            }
            let Some(stream) = socket.as_mut() else { continue };

            let frame = match self.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[client] telemetry unavailable: {}", e);
                    continue;
                }
            };

            match stream.write_all(&frame).await {
                Ok(()) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(bytes = frame.len(), "[client] heartbeat to {}", self.addr);
                }
                Err(e) => {
                    warn!("[client] write to {} failed: {}", self.addr, e);
                    drop(socket.take());
                    socket = self.redial().await;
                }
            }
        }
    }

    /// Dial until it works, pausing `retry_delay` between attempts.
    async fn connect(&self) -> TcpStream {
        loop {
            self.status.send_replace(Status::Connecting);
            match dial(&self.addr, self.settings.dial_timeout).await {
                Ok(stream) => {
                    self.status.send_replace(Status::Active);
                    info!("[client] connected to router {}", self.addr);
                    return stream;
                }
                Err(e) => {
                    warn!("[client] connect to router {} failed: {}", self.addr, e);
                    time::sleep(self.settings.retry_delay).await;
                    info!("[client] attempt connecting {}", self.addr);
                }
            }
        }
    }

    /// Single attempt used from inside the heartbeat loop.
    async fn redial(&self) -> Option<TcpStream> {
        self.status.send_replace(Status::Connecting);
        match dial(&self.addr, self.settings.dial_timeout).await {
            Ok(stream) => {
                self.status.send_replace(Status::Active);
                info!("[client] reconnected to router {}", self.addr);
                Some(stream)
            }
            Err(e) => {
                warn!("[client] reconnect to router {} failed: {}", self.addr, e);
                None
            }
        }
    }

    fn frame(&self) -> Result<Bytes> {
        let payload = self.telemetry.collect()?;
        Ok(self.codec.encode(payload.as_bytes())?)
    }
}

async fn dial(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    bounded(timeout, TcpStream::connect(addr)).await
}

async fn bounded<T, F>(timeout: Duration, dialing: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match time::timeout(timeout, dialing).await {
        Ok(dialed) => dialed,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
    }
}
