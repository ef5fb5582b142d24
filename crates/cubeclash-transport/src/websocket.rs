//! WebSocket transport binding using `tokio-tungstenite`.
//!
//! Every link runs in its own Tokio task that owns the socket. The binding
//! keeps one outbound channel per link, so `send` is a non-blocking enqueue
//! and the processing task is never held up by the network.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{EventSender, LinkId, TransportBinding, TransportError, TransportEvent};

/// Tuning knobs for [`WebSocketBinding`].
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Pause between failed connection attempts.
    pub retry_interval: Duration,
    /// Upper bound of the random delay added to each retry.
    pub max_retry_jitter: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retry_jitter: Duration::from_millis(250),
        }
    }
}

enum Outbound {
    Data(Vec<u8>),
    Close,
}

type LinkTable = Arc<Mutex<HashMap<LinkId, mpsc::UnboundedSender<Outbound>>>>;

fn lock(links: &LinkTable) -> MutexGuard<'_, HashMap<LinkId, mpsc::UnboundedSender<Outbound>>> {
    links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A [`TransportBinding`] over WebSockets.
pub struct WebSocketBinding {
    config: WebSocketConfig,
    links: LinkTable,
    /// The accept loop or the connect/retry loop, whichever is running.
    driver: Option<JoinHandle<()>>,
}

impl WebSocketBinding {
    /// Creates an idle binding.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            links: Arc::new(Mutex::new(HashMap::new())),
            driver: None,
        }
    }

    /// Number of links currently open.
    pub fn link_count(&self) -> usize {
        lock(&self.links).len()
    }
}

impl Default for WebSocketBinding {
    fn default() -> Self {
        Self::new(WebSocketConfig::default())
    }
}

impl TransportBinding for WebSocketBinding {
    async fn listen(
        &mut self,
        port: u16,
        events: EventSender,
    ) -> Result<SocketAddr, TransportError> {
        if self.driver.is_some() {
            return Err(TransportError::AlreadyActive);
        }

        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        tracing::info!(%bound, "WebSocket binding listening");

        let links = Arc::clone(&self.links);
        self.driver = Some(tokio::spawn(accept_loop(listener, links, events)));
        Ok(bound)
    }

    async fn connect(
        &mut self,
        addr: SocketAddrV4,
        events: EventSender,
    ) -> Result<(), TransportError> {
        if self.driver.is_some() {
            return Err(TransportError::AlreadyActive);
        }

        let links = Arc::clone(&self.links);
        let config = self.config.clone();
        self.driver = Some(tokio::spawn(connect_loop(addr, config, links, events)));
        Ok(())
    }

    fn send(&self, link: LinkId, data: Vec<u8>) -> Result<(), TransportError> {
        let links = lock(&self.links);
        let tx = links.get(&link).ok_or(TransportError::UnknownLink(link))?;
        tx.send(Outbound::Data(data))
            .map_err(|_| TransportError::SendFailed(format!("{link} writer is gone")))
    }

    fn close_link(&self, link: LinkId) {
        if let Some(tx) = lock(&self.links).remove(&link) {
            let _ = tx.send(Outbound::Close);
        }
    }

    async fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let drained: Vec<_> = lock(&self.links).drain().collect();
        for (link, tx) in drained {
            tracing::debug!(%link, "closing link");
            let _ = tx.send(Outbound::Close);
        }
    }
}

async fn accept_loop(listener: TcpListener, links: LinkTable, events: EventSender) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "WebSocket upgrade failed");
                continue;
            }
        };

        let link = LinkId::next();
        tracing::debug!(%link, %peer, "accepted WebSocket link");
        let links = Arc::clone(&links);
        let events = events.clone();
        tokio::spawn(drive_link(ws, link, Some(peer), links, events));
    }
}

async fn connect_loop(
    addr: SocketAddrV4,
    config: WebSocketConfig,
    links: LinkTable,
    events: EventSender,
) {
    let url = format!("ws://{addr}");
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                let link = LinkId::next();
                tracing::info!(%link, %addr, attempt, "connected to host");
                // The link outlives this loop so that `close` can still
                // flush it after aborting the driver.
                tokio::spawn(drive_link(ws, link, Some(SocketAddr::V4(addr)), links, events));
                return;
            }
            Err(e) => {
                if events.is_closed() {
                    return;
                }
                tracing::debug!(%addr, attempt, error = %e, "connect attempt failed, retrying");
                let jitter_ms = config.max_retry_jitter.as_millis() as u64;
                let jitter = if jitter_ms > 0 {
                    Duration::from_millis(rand::rng().random_range(0..jitter_ms))
                } else {
                    Duration::ZERO
                };
                tokio::time::sleep(config.retry_interval + jitter).await;
            }
        }
    }
}

/// Pumps one link until either side closes it, then reports the loss.
async fn drive_link<S>(
    ws: WebSocketStream<S>,
    link: LinkId,
    peer: Option<SocketAddr>,
    links: LinkTable,
    events: EventSender,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    lock(&links).insert(link, out_tx);
    if events.send(TransportEvent::Connected { link, peer }).is_err() {
        lock(&links).remove(&link);
        return;
    }

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Data(data)) => {
                    if let Err(e) = sink.send(Message::Binary(data.into())).await {
                        tracing::debug!(%link, error = %e, "write failed");
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message { link, data: data.to_vec() });
                }
                Some(Ok(Message::Text(text))) => {
                    let data = text.as_bytes().to_vec();
                    let _ = events.send(TransportEvent::Message { link, data });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    tracing::debug!(%link, error = %e, "read failed");
                    break;
                }
            },
        }
    }

    lock(&links).remove(&link);
    let _ = events.send(TransportEvent::Disconnected { link });
    tracing::debug!(%link, "link closed");
}
