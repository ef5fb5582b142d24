//! Host/client handshake and message routing over the in-memory transport.

use cubeclash_protocol::{ConnectionId, GameEvent, Recipient, WireMessage};
use cubeclash_session::{SessionConfig, SessionEvent, SessionManager, SessionRole};
use cubeclash_transport::{MemoryBinding, MemoryNetwork};

// =========================================================================
// Helpers
// =========================================================================

fn manager(net: &MemoryNetwork, config: SessionConfig) -> SessionManager<MemoryBinding> {
    SessionManager::new(net.binding(), config)
}

/// Starts a host and drains its start-up events.
async fn started_host(net: &MemoryNetwork) -> SessionManager<MemoryBinding> {
    let mut host = manager(net, SessionConfig::default());
    host.start_host().await.unwrap();
    assert!(matches!(host.next_event().await, SessionEvent::ServerStarted(_)));
    assert!(matches!(
        host.next_event().await,
        SessionEvent::ConnectionEstablished { is_local: true, .. }
    ));
    host
}

/// Lets host and client exchange handshake traffic until the client is in.
async fn joined_pair(
    net: &MemoryNetwork,
) -> (SessionManager<MemoryBinding>, SessionManager<MemoryBinding>) {
    let mut host = started_host(net).await;
    let mut client = manager(net, SessionConfig::default());
    client.start_client("127.0.0.1").await.unwrap();

    // Both sides must run for the request/ack exchange to complete.
    let (on_host, on_client) = tokio::join!(host.next_event(), client.next_event());
    assert_eq!(
        on_host,
        SessionEvent::ConnectionEstablished {
            connection: ConnectionId(1),
            is_local: false
        }
    );
    assert_eq!(
        on_client,
        SessionEvent::ConnectionEstablished {
            connection: ConnectionId(1),
            is_local: true
        }
    );
    (host, client)
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_assigns_first_client_id_one() {
    let net = MemoryNetwork::new();
    let (host, client) = joined_pair(&net).await;

    assert_eq!(client.local_connection(), Some(ConnectionId(1)));
    assert_eq!(client.role(), Some(SessionRole::Client));

    let host_view: Vec<_> = host.connections().map(|c| (c.id, c.is_local)).collect();
    assert_eq!(
        host_view,
        vec![(ConnectionId::SERVER, true), (ConnectionId(1), false)]
    );

    let server = client.connection(ConnectionId::SERVER).unwrap();
    assert!(server.is_authority());
    assert!(!server.is_local);
}

#[tokio::test]
async fn test_handshake_second_client_is_refused() {
    let net = MemoryNetwork::new();
    let (mut host, _client) = joined_pair(&net).await;

    let mut late = manager(&net, SessionConfig::default());
    late.start_client("127.0.0.1").await.unwrap();
    assert!(late.try_next_event().is_none());
    assert!(host.try_next_event().is_none());

    assert_eq!(
        late.next_event().await,
        SessionEvent::ConnectionRefused {
            reason: "match is full".to_owned()
        }
    );
    assert_eq!(host.remote_connections().count(), 1);
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_refused() {
    let net = MemoryNetwork::new();
    let mut host = started_host(&net).await;

    let mut client = manager(
        &net,
        SessionConfig {
            protocol_version: 99,
            ..SessionConfig::default()
        },
    );
    client.start_client("127.0.0.1").await.unwrap();
    assert!(client.try_next_event().is_none());
    assert!(host.try_next_event().is_none());

    let event = client.next_event().await;
    assert!(
        matches!(&event, SessionEvent::ConnectionRefused { reason } if reason.contains("99")),
        "unexpected event {event:?}"
    );
    assert!(host.try_next_event().is_none());
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_send_client_to_host_arrives_with_sender_id() {
    let net = MemoryNetwork::new();
    let (mut host, client) = joined_pair(&net).await;

    let msg = WireMessage::Event {
        event: GameEvent::GameStarted,
    };
    client.send(ConnectionId::SERVER, &msg).unwrap();

    assert_eq!(
        host.next_event().await,
        SessionEvent::Message {
            from: ConnectionId(1),
            message: msg
        }
    );
}

#[tokio::test]
async fn test_send_to_all_skips_local_connection() {
    let net = MemoryNetwork::new();
    let (host, mut client) = joined_pair(&net).await;

    let msg = WireMessage::Countdown { remaining: 5 };
    assert_eq!(host.send_to(Recipient::All, &msg).unwrap(), 1);
    assert_eq!(
        host.send_to(Recipient::AllExcept(ConnectionId(1)), &msg)
            .unwrap(),
        0
    );

    assert_eq!(
        client.next_event().await,
        SessionEvent::Message {
            from: ConnectionId::SERVER,
            message: msg
        }
    );
}

#[tokio::test]
async fn test_send_unknown_connection_fails() {
    let net = MemoryNetwork::new();
    let host = started_host(&net).await;

    let err = host
        .send(ConnectionId(5), &WireMessage::Countdown { remaining: 1 })
        .unwrap_err();
    assert!(matches!(
        err,
        cubeclash_session::NetworkError::UnknownConnection(ConnectionId(5))
    ));
}

// =========================================================================
// Disconnects
// =========================================================================

#[tokio::test]
async fn test_client_shutdown_is_remote_loss_on_host() {
    let net = MemoryNetwork::new();
    let (mut host, mut client) = joined_pair(&net).await;

    client.shutdown().await;

    // The goodbye message arrives first, then the link drops.
    assert!(matches!(
        host.next_event().await,
        SessionEvent::Message {
            message: WireMessage::Disconnect { .. },
            ..
        }
    ));
    assert_eq!(
        host.next_event().await,
        SessionEvent::ConnectionLost {
            connection: ConnectionId(1),
            is_local: false
        }
    );
    assert_eq!(host.remote_connections().count(), 0);
}

#[tokio::test]
async fn test_host_shutdown_is_local_loss_on_client() {
    let net = MemoryNetwork::new();
    let (mut host, mut client) = joined_pair(&net).await;

    host.shutdown().await;

    assert!(matches!(
        client.next_event().await,
        SessionEvent::Message {
            message: WireMessage::Disconnect { .. },
            ..
        }
    ));
    assert_eq!(
        client.next_event().await,
        SessionEvent::ConnectionLost {
            connection: ConnectionId(1),
            is_local: true
        }
    );
    assert_eq!(client.local_connection(), None);
}

#[tokio::test]
async fn test_host_shutdown_after_client_vanished_still_completes() {
    let net = MemoryNetwork::new();
    let (mut host, mut client) = joined_pair(&net).await;

    // The host has not seen the loss yet, so its goodbye has nowhere to go.
    client.shutdown().await;
    host.shutdown().await;

    assert_eq!(host.next_event().await, SessionEvent::ServerStopped);
    assert_eq!(host.role(), None);
    assert_eq!(host.remote_connections().count(), 0);
}

#[tokio::test]
async fn test_rejoin_after_leave_gets_fresh_id() {
    let net = MemoryNetwork::new();
    let (mut host, mut client) = joined_pair(&net).await;

    client.shutdown().await;
    let _ = host.next_event().await;
    let _ = host.next_event().await;

    client.start_client("127.0.0.1").await.unwrap();
    let (on_host, _) = tokio::join!(host.next_event(), client.next_event());
    assert_eq!(
        on_host,
        SessionEvent::ConnectionEstablished {
            connection: ConnectionId(2),
            is_local: false
        }
    );
}
