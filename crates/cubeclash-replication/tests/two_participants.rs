//! Host and client channels wired back to back, delivering each other's
//! outbox by hand.

use cubeclash_protocol::{
    ConnectionId, EntityId, GameEvent, Recipient, ReplicatedField, Vec3, WireMessage,
};
use cubeclash_replication::{
    ApplyOutcome, Outgoing, ReplicatedVariable, ReplicationChannel, ReplicationConfig,
};

const CLIENT: ConnectionId = ConnectionId(1);
const HOST_AVATAR: EntityId = EntityId(1);
const CLIENT_AVATAR: EntityId = EntityId(2);

struct Pair {
    host: ReplicationChannel,
    client: ReplicationChannel,
    host_pos: ReplicatedVariable<Vec3>,
    client_pos: ReplicatedVariable<Vec3>,
}

fn pair() -> Pair {
    let mut host = ReplicationChannel::new(ConnectionId::SERVER, ReplicationConfig::default());
    let mut client = ReplicationChannel::new(CLIENT, ReplicationConfig::default());

    let host_start = Vec3::new(-3.0, 1.0, 0.0);
    let client_start = Vec3::new(3.0, 1.0, 0.0);
    let mut host_pos = None;
    let mut client_pos = None;
    for ch in [&mut host, &mut client] {
        host_pos = Some(ch.declare(
            HOST_AVATAR,
            ReplicatedField::Position,
            ConnectionId::SERVER,
            host_start,
        ));
        client_pos = Some(ch.declare(CLIENT_AVATAR, ReplicatedField::Position, CLIENT, client_start));
        ch.set_writes_enabled(true);
    }

    Pair {
        host,
        client,
        host_pos: host_pos.unwrap(),
        client_pos: client_pos.unwrap(),
    }
}

/// Delivers `from`'s outbox to `to`, returning the outcomes of any
/// replicated updates.
fn deliver(
    from_id: ConnectionId,
    from: &mut ReplicationChannel,
    to: &mut ReplicationChannel,
) -> Vec<ApplyOutcome> {
    let mut outcomes = Vec::new();
    for Outgoing { to: recipient, message } in from.drain_outgoing() {
        if !to.local().is_some_and(|id| recipient.includes(id)) {
            continue;
        }
        match message {
            WireMessage::ReplicatedUpdate {
                entity_id,
                field,
                seq,
                value,
            } => outcomes.push(
                to.apply_update(from_id, entity_id, field, seq, value)
                    .unwrap(),
            ),
            WireMessage::Event { event } => to.receive_event(from_id, event).unwrap(),
            other => panic!("unexpected message {other:?}"),
        }
    }
    outcomes
}

#[test]
fn test_owner_writes_reach_the_other_side() {
    let mut p = pair();

    p.client
        .set(p.client_pos, Vec3::new(2.5, 1.0, 0.0))
        .unwrap();
    let outcomes = deliver(CLIENT, &mut p.client, &mut p.host);

    assert_eq!(outcomes, vec![ApplyOutcome::Applied]);
    assert_eq!(p.host.get(p.client_pos), Some(Vec3::new(2.5, 1.0, 0.0)));
    assert!(p.host.drain_outgoing().is_empty(), "no echo back to the writer");
}

#[test]
fn test_reordered_updates_keep_the_newest() {
    let mut p = pair();

    p.client.set(p.client_pos, Vec3::new(1.0, 1.0, 0.0)).unwrap();
    p.client.set(p.client_pos, Vec3::new(2.0, 1.0, 0.0)).unwrap();
    let mut sent = p.client.drain_outgoing();
    sent.reverse();

    let mut outcomes = Vec::new();
    for out in sent {
        let WireMessage::ReplicatedUpdate {
            entity_id,
            field,
            seq,
            value,
        } = out.message
        else {
            panic!("expected an update");
        };
        outcomes.push(
            p.host
                .apply_update(CLIENT, entity_id, field, seq, value)
                .unwrap(),
        );
    }

    assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::Stale]);
    assert_eq!(p.host.get(p.client_pos), Some(Vec3::new(2.0, 1.0, 0.0)));
}

#[test]
fn test_authority_reset_then_owner_continues() {
    let mut p = pair();
    for x in [4.0, 5.0, 6.0] {
        p.client.set(p.client_pos, Vec3::new(x, 1.0, 0.0)).unwrap();
    }
    deliver(CLIENT, &mut p.client, &mut p.host);

    p.host.force(p.client_pos, Vec3::new(3.0, 1.0, 0.0)).unwrap();
    p.host.force(p.host_pos, Vec3::new(-3.0, 1.0, 0.0)).unwrap();
    let outcomes = deliver(ConnectionId::SERVER, &mut p.host, &mut p.client);
    assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::Applied]);
    assert_eq!(p.client.get(p.client_pos), Some(Vec3::new(3.0, 1.0, 0.0)));

    p.client.set(p.client_pos, Vec3::new(3.5, 1.0, 0.0)).unwrap();
    let outcomes = deliver(CLIENT, &mut p.client, &mut p.host);
    assert_eq!(outcomes, vec![ApplyOutcome::Applied]);
    assert_eq!(p.host.get(p.client_pos), Some(Vec3::new(3.5, 1.0, 0.0)));
}

#[test]
fn test_reordered_resets_keep_the_latest() {
    let mut p = pair();
    p.host.force(p.client_pos, Vec3::new(3.0, 1.0, 0.0)).unwrap();
    p.host.force(p.client_pos, Vec3::new(-99.0, 1.0, 0.0)).unwrap();
    p.host.force(p.client_pos, Vec3::new(4.0, 1.0, 0.0)).unwrap();
    let mut sent = p.host.drain_outgoing();
    sent.swap(0, 2);

    let mut outcomes = Vec::new();
    for out in sent {
        let WireMessage::ReplicatedUpdate {
            entity_id,
            field,
            seq,
            value,
        } = out.message
        else {
            panic!("expected an update");
        };
        outcomes.push(
            p.client
                .apply_update(ConnectionId::SERVER, entity_id, field, seq, value)
                .unwrap(),
        );
    }

    assert_eq!(
        outcomes,
        vec![ApplyOutcome::Applied, ApplyOutcome::Stale, ApplyOutcome::Stale]
    );
    assert_eq!(p.client.get(p.client_pos), Some(Vec3::new(4.0, 1.0, 0.0)));
}

#[test]
fn test_client_push_round_trip_applies_same_impulse_everywhere() {
    let mut p = pair();
    let request = GameEvent::PushImpulse {
        source: CLIENT_AVATAR,
        target: HOST_AVATAR,
        impulse: Vec3::new(-10.0, 0.0, 0.0),
    };

    p.client.send_event(request).unwrap();
    assert!(p.client.take_applied_events().is_empty());

    deliver(CLIENT, &mut p.client, &mut p.host);
    let on_host = p.host.take_applied_events();

    deliver(ConnectionId::SERVER, &mut p.host, &mut p.client);
    let on_client = p.client.take_applied_events();

    assert_eq!(on_host.len(), 1);
    assert_eq!(on_host, on_client);
}

#[test]
fn test_client_cannot_broadcast_restart() {
    let mut p = pair();
    assert!(p.client.send_event(GameEvent::GameRestarted).is_err());
    assert!(
        p.client
            .drain_outgoing()
            .iter()
            .all(|out| out.to != Recipient::All)
    );
}
