use std::{
    net::SocketAddr,
    sync::{atomic::{AtomicU32, Ordering}, Arc},
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use tokio::{io::AsyncReadExt, net::TcpStream, select, sync::mpsc};
use tracing::{debug, info, warn};

use super::{ConnectionID, SessionError, Streamer};
use crate::{
    config::SessionSettings,
    protocol::{report::Report, FrameCodec},
    registry::Registry,
    server::Wire,
};

/// Collector side of every inbound session.
///
/// Each accepted socket gets a reader task and a dispatch task joined by a
/// bounded queue of raw payloads. The reader only frames bytes; the
/// dispatcher decodes reports and writes the registry.
pub struct Proxy {
    registry: Arc<Registry>,
    settings: SessionSettings,
    codec: FrameCodec,
    access_total: AtomicU32,
}

impl Proxy {
    pub fn new(registry: Arc<Registry>, settings: SessionSettings) -> Self {
        let codec = FrameCodec::new(settings.max_frame_size);
        Self { registry, settings, codec, access_total: AtomicU32::new(1) }
    }

    fn request_id(&self) -> ConnectionID {
        let fetch = self.access_total.fetch_add(1, Ordering::Relaxed);
        ConnectionID(fetch)
    }
}

impl Wire for Proxy {
    async fn connect(&self, stream: TcpStream, addr: SocketAddr) {
        let id = self.request_id();
        let ip = peer_ip(&addr);
        info!(
            remainder_bound = self.codec.remainder_bound(),
            "[session] {} accepted from {}", id, addr
        );

        let registry = self.registry.clone();
        let settings = self.settings;
        let codec = self.codec;
        tokio::spawn(async move {
            let (tx, rx) = mpsc::channel(settings.queue_capacity);
            let dispatcher = tokio::spawn(dispatch_loop(ip.clone(), rx, registry));

            let mut stream = stream;
            let read_result = read_loop(&mut stream, tx, codec, settings.read_chunk_size).await;
            drop(stream);

            match read_result {
                Err(e) if e.is_disconnect() => info!("[session] {} {} disconnected", id, ip),
                Err(SessionError::QueueClosed) => debug!("[session] {} reader stopped by dispatcher", id),
                Err(e) => warn!("[session] {} {} closed: {}", id, ip, e),
                Ok(()) => (),
            }

            match dispatcher.await {
                Ok(Ok(received)) => debug!(received, "[session] {} dispatcher drained", id),
                Ok(Err(e)) => warn!("[session] {} {} dropped: {}", id, ip, e),
                Err(e) => warn!("[session] {} dispatcher aborted: {}", id, e),
            }
        });
    }
}

/// Host part of a peer address. IPv4-mapped IPv6 peers are reported as IPv4.
pub fn peer_ip(addr: &SocketAddr) -> String {
    addr.ip().to_canonical().to_string()
}

/// Read from `stream` until it fails, handing every complete payload to `tx`.
///
/// A full queue suspends the loop before its next read, so a slow
/// dispatcher throttles the sender through TCP flow control. When the
/// dispatcher goes away the queue closes and the loop stops even if it was
/// parked on a read.
pub async fn read_loop<S: Streamer>(
    stream: &mut S,
    tx: mpsc::Sender<Bytes>,
    codec: FrameCodec,
    chunk_size: usize,
) -> Result<(), SessionError> {
    let mut pending = BytesMut::with_capacity(chunk_size);
    loop {
        pending.reserve(chunk_size);
        let read = select! {
            read = stream.read_buf(&mut pending) => read?,
            _ = tx.closed() => return Err(SessionError::QueueClosed),
        };
        if read == 0 {
            return Err(SessionError::Closed);
        }

        // frames ahead of a bad header are delivered before the session fails
        while let Some(payload) = codec.next_frame(&mut pending)? {
            tx.send(payload).await.map_err(|_| SessionError::QueueClosed)?;
        }
    }
}

/// Decode queued payloads in order and upsert them under `ip`. Returns the
/// number of reports applied once the reader side hangs up. The first
/// undecodable payload ends the session without touching the registry.
pub async fn dispatch_loop(
    ip: String,
    mut rx: mpsc::Receiver<Bytes>,
    registry: Arc<Registry>,
) -> Result<usize, SessionError> {
    let mut received = 0;
    while let Some(payload) = rx.recv().await {
        let mut report = Report::decode(&payload)?;
        report.ip = ip.clone();
        registry.upsert(&ip, report, Instant::now());
        received += 1;
    }
    Ok(received)
}
