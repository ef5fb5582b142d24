//! In-process transport for tests and local simulation.
//!
//! A [`MemoryNetwork`] plays the role of the LAN: bindings created from the
//! same network can reach each other's listeners on `127.0.0.1:<port>`.
//! Connecting to any other address never succeeds, which mimics an
//! unreachable host.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{EventSender, LinkId, TransportBinding, TransportError, TransportEvent};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

const FIRST_EPHEMERAL_PORT: u16 = 49152;

struct LinkEnd {
    peer: LinkId,
    events: EventSender,
    owner: u64,
}

#[derive(Default)]
struct State {
    listeners: HashMap<u16, (u64, EventSender)>,
    links: HashMap<LinkId, LinkEnd>,
    connect_attempts: Vec<SocketAddrV4>,
    next_ephemeral: u16,
}

/// A shared in-memory "network" that [`MemoryBinding`]s attach to.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<State>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a binding attached to this network.
    pub fn binding(&self) -> MemoryBinding {
        MemoryBinding {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            network: self.clone(),
            active: false,
        }
    }

    /// Every address a binding tried to connect to, in order.
    pub fn connect_attempts(&self) -> Vec<SocketAddrV4> {
        self.lock().connect_attempts.clone()
    }

    /// Whether something is listening on `port`.
    pub fn is_listening(&self, port: u16) -> bool {
        self.lock().listeners.contains_key(&port)
    }

    /// Number of open link ends (two per connection).
    pub fn open_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Drops the connection `link` belongs to as if the cable was pulled.
    /// Both ends are told.
    pub fn sever(&self, link: LinkId) {
        let mut state = self.lock();
        let Some(end) = state.links.remove(&link) else {
            return;
        };
        let Some(peer_end) = state.links.remove(&end.peer) else {
            return;
        };
        let _ = peer_end.events.send(TransportEvent::Disconnected { link: end.peer });
        let _ = end.events.send(TransportEvent::Disconnected { link });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A [`TransportBinding`] that lives on a [`MemoryNetwork`].
pub struct MemoryBinding {
    id: u64,
    network: MemoryNetwork,
    active: bool,
}

impl MemoryBinding {
    /// The network this binding is attached to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl TransportBinding for MemoryBinding {
    async fn listen(
        &mut self,
        port: u16,
        events: EventSender,
    ) -> Result<SocketAddr, TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActive);
        }

        let mut state = self.network.lock();
        let port = if port == 0 {
            if state.next_ephemeral < FIRST_EPHEMERAL_PORT {
                state.next_ephemeral = FIRST_EPHEMERAL_PORT;
            }
            while state.listeners.contains_key(&state.next_ephemeral) {
                state.next_ephemeral = state.next_ephemeral.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
            }
            state.next_ephemeral
        } else {
            port
        };

        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        if state.listeners.contains_key(&port) {
            return Err(TransportError::Bind {
                addr,
                source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
            });
        }

        state.listeners.insert(port, (self.id, events));
        self.active = true;
        tracing::debug!(port, "memory binding listening");
        Ok(addr)
    }

    async fn connect(
        &mut self,
        addr: SocketAddrV4,
        events: EventSender,
    ) -> Result<(), TransportError> {
        if self.active {
            return Err(TransportError::AlreadyActive);
        }
        self.active = true;

        let mut state = self.network.lock();
        state.connect_attempts.push(addr);

        if !addr.ip().is_loopback() {
            tracing::debug!(%addr, "memory host unreachable");
            return Ok(());
        }
        let Some((host_id, host_events)) = state.listeners.get(&addr.port()).cloned() else {
            tracing::debug!(%addr, "nothing listening");
            return Ok(());
        };

        let host_link = LinkId::next();
        let client_link = LinkId::next();
        state.links.insert(
            host_link,
            LinkEnd {
                peer: client_link,
                events: host_events.clone(),
                owner: host_id,
            },
        );
        state.links.insert(
            client_link,
            LinkEnd {
                peer: host_link,
                events: events.clone(),
                owner: self.id,
            },
        );

        let client_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        let _ = host_events.send(TransportEvent::Connected {
            link: host_link,
            peer: Some(client_addr),
        });
        let _ = events.send(TransportEvent::Connected {
            link: client_link,
            peer: Some(SocketAddr::V4(addr)),
        });
        Ok(())
    }

    fn send(&self, link: LinkId, data: Vec<u8>) -> Result<(), TransportError> {
        let state = self.network.lock();
        let end = state
            .links
            .get(&link)
            .filter(|end| end.owner == self.id)
            .ok_or(TransportError::UnknownLink(link))?;
        let peer = state
            .links
            .get(&end.peer)
            .ok_or(TransportError::UnknownLink(link))?;
        peer.events
            .send(TransportEvent::Message {
                link: end.peer,
                data,
            })
            .map_err(|_| TransportError::SendFailed(format!("{link} peer is gone")))
    }

    fn close_link(&self, link: LinkId) {
        let mut state = self.network.lock();
        let owned = state.links.get(&link).is_some_and(|end| end.owner == self.id);
        if !owned {
            return;
        }
        if let Some(end) = state.links.remove(&link) {
            if let Some(peer_end) = state.links.remove(&end.peer) {
                let _ = peer_end
                    .events
                    .send(TransportEvent::Disconnected { link: end.peer });
            }
        }
    }

    async fn close(&mut self) {
        let mut state = self.network.lock();
        let id = self.id;
        state.listeners.retain(|_, (owner, _)| *owner != id);

        let mine: Vec<LinkId> = state
            .links
            .iter()
            .filter(|(_, end)| end.owner == id)
            .map(|(link, _)| *link)
            .collect();
        for link in mine {
            if let Some(end) = state.links.remove(&link) {
                if let Some(peer_end) = state.links.remove(&end.peer) {
                    let _ = peer_end
                        .events
                        .send(TransportEvent::Disconnected { link: end.peer });
                }
            }
        }
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue;

    fn loopback(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[tokio::test]
    async fn test_listen_port_in_use_fails() {
        let net = MemoryNetwork::new();
        let mut a = net.binding();
        let mut b = net.binding();
        let (tx, _rx) = event_queue();

        a.listen(7777, tx.clone()).await.unwrap();
        let err = b.listen(7777, tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_listen_port_zero_picks_free_port() {
        let net = MemoryNetwork::new();
        let mut a = net.binding();
        let (tx, _rx) = event_queue();

        let addr = a.listen(0, tx).await.unwrap();
        assert!(addr.port() >= FIRST_EPHEMERAL_PORT);
        assert!(net.is_listening(addr.port()));
    }

    #[tokio::test]
    async fn test_connect_to_listener_notifies_both_sides() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let mut client = net.binding();
        let (host_tx, mut host_rx) = event_queue();
        let (client_tx, mut client_rx) = event_queue();

        host.listen(7777, host_tx).await.unwrap();
        client.connect(loopback(7777), client_tx).await.unwrap();

        assert!(matches!(
            host_rx.recv().await,
            Some(TransportEvent::Connected { .. })
        ));
        assert!(matches!(
            client_rx.recv().await,
            Some(TransportEvent::Connected { .. })
        ));
        assert_eq!(net.open_links(), 2);
    }

    #[tokio::test]
    async fn test_send_delivers_to_peer_link() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let mut client = net.binding();
        let (host_tx, mut host_rx) = event_queue();
        let (client_tx, mut client_rx) = event_queue();

        host.listen(7777, host_tx).await.unwrap();
        client.connect(loopback(7777), client_tx).await.unwrap();

        let Some(TransportEvent::Connected { link: host_link, .. }) = host_rx.recv().await else {
            panic!("expected host Connected");
        };
        let Some(TransportEvent::Connected { link: client_link, .. }) = client_rx.recv().await
        else {
            panic!("expected client Connected");
        };

        client.send(client_link, b"hello".to_vec()).unwrap();
        assert_eq!(
            host_rx.recv().await,
            Some(TransportEvent::Message {
                link: host_link,
                data: b"hello".to_vec()
            })
        );
    }

    #[tokio::test]
    async fn test_send_on_foreign_link_fails() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let mut client = net.binding();
        let (host_tx, mut host_rx) = event_queue();
        let (client_tx, _client_rx) = event_queue();

        host.listen(7777, host_tx).await.unwrap();
        client.connect(loopback(7777), client_tx).await.unwrap();
        let Some(TransportEvent::Connected { link: host_link, .. }) = host_rx.recv().await else {
            panic!("expected host Connected");
        };

        let err = client.send(host_link, vec![1]).unwrap_err();
        assert!(matches!(err, TransportError::UnknownLink(_)));
    }

    #[tokio::test]
    async fn test_connect_unreachable_never_connects() {
        let net = MemoryNetwork::new();
        let mut client = net.binding();
        let (tx, mut rx) = event_queue();

        let target = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 99), 7777);
        client.connect(target, tx).await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(net.connect_attempts(), vec![target]);
    }

    #[tokio::test]
    async fn test_close_notifies_peer_and_frees_port() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let mut client = net.binding();
        let (host_tx, _host_rx) = event_queue();
        let (client_tx, mut client_rx) = event_queue();

        host.listen(7777, host_tx).await.unwrap();
        client.connect(loopback(7777), client_tx).await.unwrap();
        let _ = client_rx.recv().await;

        host.close().await;

        assert!(matches!(
            client_rx.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert!(!net.is_listening(7777));
        assert_eq!(net.open_links(), 0);
    }

    #[tokio::test]
    async fn test_binding_reusable_after_close() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let (tx, _rx) = event_queue();

        host.listen(7777, tx.clone()).await.unwrap();
        assert!(matches!(
            host.listen(7778, tx.clone()).await,
            Err(TransportError::AlreadyActive)
        ));
        host.close().await;
        host.listen(7777, tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_sever_notifies_both_ends() {
        let net = MemoryNetwork::new();
        let mut host = net.binding();
        let mut client = net.binding();
        let (host_tx, mut host_rx) = event_queue();
        let (client_tx, mut client_rx) = event_queue();

        host.listen(7777, host_tx).await.unwrap();
        client.connect(loopback(7777), client_tx).await.unwrap();
        let Some(TransportEvent::Connected { link, .. }) = host_rx.recv().await else {
            panic!("expected host Connected");
        };
        let _ = client_rx.recv().await;

        net.sever(link);

        assert_eq!(
            host_rx.recv().await,
            Some(TransportEvent::Disconnected { link })
        );
        assert!(matches!(
            client_rx.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
    }
}
