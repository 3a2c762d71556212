use glam::{Quat, Vec3};

use transync::{
    ApplyOutcome, BasicTransform, ClientId, Delivery, DispatcherConfig, LinkConditions,
    LocalSession, LoopbackLink, NetworkContext, ObjectId, Outgoing, ReplicatedTransform,
    ReplicationConfig, ReplicationEngine, Role, TickDispatcher,
};

type Entry = ReplicatedTransform<BasicTransform>;

const OBJECT: ObjectId = ObjectId(7);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Peer {
    id: ClientId,
    net: LocalSession,
    dispatcher: TickDispatcher<Entry>,
    outgoing: LoopbackLink,
}

/// Every peer runs its own dispatcher and has a link to every other peer.
struct Mesh {
    tick_rate: u32,
    conditions: LinkConditions,
    seed: u64,
    peers: Vec<Peer>,
}

impl Mesh {
    fn new(tick_rate: u32, peers: u32, conditions: LinkConditions, seed: u64) -> Self {
        let mut mesh = Self {
            tick_rate,
            conditions,
            seed,
            peers: Vec::new(),
        };
        for _ in 0..peers {
            mesh.join(0);
        }
        mesh
    }

    fn join(&mut self, tick: i32) -> ClientId {
        let id = self.peers.len() as ClientId + 1;
        let mut outgoing = LoopbackLink::new(self.conditions.clone(), self.seed ^ id as u64);
        for peer in &mut self.peers {
            peer.outgoing.connect(id);
            outgoing.connect(peer.id);
        }
        let mut net = LocalSession::new(self.tick_rate);
        net.set_tick(tick);
        self.peers.push(Peer {
            id,
            net,
            dispatcher: TickDispatcher::new(DispatcherConfig {
                tick_rate: self.tick_rate,
                ..Default::default()
            }),
            outgoing,
        });
        id
    }

    fn peer(&self, id: ClientId) -> &Peer {
        &self.peers[id as usize - 1]
    }

    fn peer_mut(&mut self, id: ClientId) -> &mut Peer {
        &mut self.peers[id as usize - 1]
    }

    fn spawn_on(&mut self, id: ClientId, owner: ClientId, config: &ReplicationConfig, at: Vec3) {
        let peer = self.peer_mut(id);
        if id == owner {
            peer.net.grant_authority(OBJECT);
        }
        let entry = ReplicatedTransform::new(OBJECT, config.clone(), BasicTransform::at(at), &peer.net);
        peer.dispatcher.register(entry);
    }

    fn spawn(&mut self, owner: ClientId, config: &ReplicationConfig, at: Vec3) {
        for id in 1..=self.peers.len() as ClientId {
            self.spawn_on(id, owner, config, at);
        }
    }

    fn transfer(&mut self, to: ClientId) {
        for peer in &mut self.peers {
            if peer.id == to {
                peer.net.grant_authority(OBJECT);
            } else {
                peer.net.revoke_authority(OBJECT);
            }
        }
    }

    fn host(&self, id: ClientId) -> &BasicTransform {
        &self.peer(id).dispatcher.get(OBJECT).unwrap().host
    }

    fn host_mut(&mut self, id: ClientId) -> &mut BasicTransform {
        &mut self.peer_mut(id).dispatcher.get_mut(OBJECT).unwrap().host
    }

    fn entry(&self, id: ClientId) -> &Entry {
        self.peer(id).dispatcher.get(OBJECT).unwrap()
    }

    fn tick(&mut self, tick: i32) {
        for peer in &mut self.peers {
            peer.net.set_tick(tick);
            peer.dispatcher.dispatch_network_tick(&mut (), &mut peer.net);
        }
        self.flush(tick);
    }

    /// Pushes every outbox onto its link and delivers whatever is due.
    fn flush(&mut self, tick: i32) {
        for peer in &mut self.peers {
            for out in peer.net.take_outbox() {
                peer.outgoing.transmit(&out, tick).unwrap();
            }
        }
        let ids: Vec<ClientId> = self.peers.iter().map(|p| p.id).collect();
        for &from in &ids {
            for &to in &ids {
                if from == to {
                    continue;
                }
                let envelopes = self.peer_mut(from).outgoing.deliver(to, tick);
                let receiver = self.peer_mut(to);
                for envelope in envelopes {
                    receiver
                        .dispatcher
                        .dispatch_incoming(&mut (), envelope.object(), &envelope.payload, &receiver.net)
                        .unwrap();
                }
            }
        }
    }

    fn render(&mut self, time: f64) {
        for peer in &mut self.peers {
            peer.net.set_time(time);
            peer.dispatcher.dispatch_render_step(&mut (), &peer.net);
        }
    }
}

#[test]
fn observer_converges_behind_linear_motion() {
    init_logging();
    let rate = 30;
    let mut mesh = Mesh::new(rate, 2, LinkConditions::default(), 1);
    mesh.spawn(1, &ReplicationConfig::default(), Vec3::ZERO);

    let mut previous_z = 0.0f32;
    for tick in 1..=32 {
        let z = tick.min(30) as f32 * 5.0 / 30.0;
        mesh.host_mut(1).position = Vec3::new(0.0, 0.0, z);
        mesh.tick(tick);

        for frame in 0..4 {
            mesh.render((tick as f64 + frame as f64 / 4.0) / rate as f64);
            let observed = mesh.host(2).position.z;
            assert!(
                observed >= previous_z - 1e-5,
                "went backwards at tick {tick}: {observed} < {previous_z}"
            );
            previous_z = observed;
        }
    }

    mesh.render(32.0 / rate as f64);
    let observed = mesh.host(2).position;
    assert!((observed.z - 5.0).abs() < 1e-3, "{observed}");
    assert_eq!(observed.x, 0.0);
    assert_eq!(observed.y, 0.0);
}

#[test]
fn lossy_unreliable_stream_settles_after_frame_sync() {
    init_logging();
    let rate = 30;
    let conditions = LinkConditions {
        enabled: true,
        loss_percent: 25.0,
        min_latency_ticks: 1,
        max_latency_ticks: 3,
        jitter_ticks: 1,
    };
    let mut mesh = Mesh::new(rate, 2, conditions, 42);
    let config = ReplicationConfig {
        use_unreliable_deltas: true,
        ..Default::default()
    };
    mesh.spawn(1, &config, Vec3::new(5.0, 0.0, 0.0));

    let mut final_position = Vec3::ZERO;
    for tick in 1..=200 {
        if tick <= 90 {
            let angle = tick as f32 * 0.05;
            final_position = Vec3::new(angle.cos() * 5.0, 1.0, angle.sin() * 5.0);
            mesh.host_mut(1).position = final_position;
        }
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }

    let authority = mesh.entry(1);
    assert!(authority.engine.stats().unreliable_sent > 0);
    assert!(authority.engine.stats().frame_syncs_sent > 0);
    assert!(mesh.peer(1).outgoing.stats().frames_dropped > 0);

    let observed = mesh.host(2).position;
    assert!(observed.distance(final_position) < 1e-3, "{observed} vs {final_position}");
}

#[test]
fn half_precision_unreliable_stream_recovers_base_over_jittery_link() {
    init_logging();
    let rate = 30;
    let conditions = LinkConditions {
        enabled: true,
        loss_percent: 20.0,
        min_latency_ticks: 1,
        max_latency_ticks: 4,
        jitter_ticks: 2,
    };
    let mut mesh = Mesh::new(rate, 2, conditions, 77);
    let config = ReplicationConfig {
        use_half_precision: true,
        use_unreliable_deltas: true,
        max_delta_before_adjustment: 1.0,
        ..Default::default()
    };
    mesh.spawn(1, &config, Vec3::new(5.0, 0.0, 0.0));

    let mut final_position = Vec3::ZERO;
    for tick in 1..=200 {
        if tick <= 90 {
            let angle = tick as f32 * 0.05;
            final_position = Vec3::new(angle.cos() * 5.0, 1.0, angle.sin() * 5.0);
            mesh.host_mut(1).position = final_position;
        }
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }

    let stats = mesh.entry(1).engine.stats();
    assert!(stats.base_collapses > 0);
    assert!(stats.unreliable_sent > 0);
    assert!(stats.frame_syncs_sent > 0);
    assert!(mesh.peer(1).outgoing.stats().frames_dropped > 0);

    let observed = mesh.host(2).position;
    assert!(observed.distance(final_position) < 2e-3, "{observed} vs {final_position}");
}

#[test]
fn frame_sync_repairs_base_collapse_delivered_out_of_order() {
    init_logging();
    let config = ReplicationConfig {
        use_half_precision: true,
        use_unreliable_deltas: true,
        interpolate: false,
        max_delta_before_adjustment: 1.0,
        ..Default::default()
    };
    let mut server = LocalSession::new(30);
    server.grant_authority(OBJECT);
    let client = LocalSession::new(30);
    let mut source = BasicTransform::default();
    let mut replica = BasicTransform::default();
    let mut authority =
        ReplicationEngine::new(OBJECT, Role::Authority, config.clone(), &source, &server);
    authority.set_frame_sync_slot(10);
    let mut observer = ReplicationEngine::new(OBJECT, Role::Observer, config, &replica, &client);

    let mut step = |tick: i32, z: f32| -> Vec<Outgoing> {
        source.position.z = z;
        server.set_tick(tick);
        authority.on_network_tick(&source, &mut server);
        server.take_outbox()
    };
    let mut apply = |sent: Vec<Outgoing>, replica: &mut BasicTransform| -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        for out in sent {
            outcomes.push(observer.apply_incoming(&out.payload, replica, &client).unwrap());
        }
        outcomes
    };

    apply(step(0, 0.0), &mut replica);
    apply(step(1, 0.5), &mut replica);
    let collapse = step(2, 1.5);
    assert_eq!(collapse[0].delivery, Delivery::Reliable);
    // The unreliable delta for tick 3 overtakes the collapse.
    apply(step(3, 1.6), &mut replica);
    assert_eq!(apply(collapse, &mut replica), vec![ApplyOutcome::Stale]);
    assert!((replica.position.z - 1.6).abs() > 1.0);

    for tick in 4..=40 {
        let z = 1.6 + (tick - 3) as f32 * 0.01;
        apply(step(tick, z), &mut replica);
    }
    assert!(authority.stats().frame_syncs_sent >= 1);
    let (observed, expected) = (replica.position.z, source.position.z);
    assert!((observed - expected).abs() < 1e-3, "{observed} vs {expected}");
}

#[test]
fn late_joiner_is_synchronized() {
    init_logging();
    let rate = 30;
    let mut mesh = Mesh::new(rate, 2, LinkConditions::default(), 3);
    let config = ReplicationConfig {
        use_half_precision: true,
        ..Default::default()
    };
    mesh.spawn(1, &config, Vec3::new(100.0, 0.0, 0.0));

    let position_at = |tick: i32| Vec3::new(100.0 + tick as f32 * 0.37, 2.0, -1.0);
    for tick in 1..=20 {
        mesh.host_mut(1).position = position_at(tick);
        mesh.tick(tick);
    }

    let late = mesh.join(20);
    mesh.spawn_on(late, 1, &config, Vec3::ZERO);
    {
        let server = mesh.peer_mut(1);
        let entry = server.dispatcher.get_mut(OBJECT).unwrap();
        entry.engine.synchronize_observer(&entry.host, &mut server.net, late);
    }
    mesh.flush(20);

    let synced = mesh.entry(late).engine.received_state().position;
    assert_eq!(synced, position_at(20));
    assert_eq!(mesh.host(late).position, position_at(20));
    // Only the late joiner was addressed.
    assert_eq!(mesh.entry(2).engine.last_applied_tick(), Some(20));
    assert_eq!(mesh.entry(1).engine.stats().synchronizations_sent, 1);

    for tick in 21..=30 {
        mesh.host_mut(1).position = position_at(tick);
        mesh.tick(tick);
        let received = mesh.entry(late).engine.received_state().position;
        assert!(
            received.distance(position_at(tick)) < 0.02,
            "tick {tick}: {received} vs {}",
            position_at(tick)
        );
    }
}

#[test]
fn ownership_moves_between_peers() {
    init_logging();
    let rate = 30;
    let mut mesh = Mesh::new(rate, 2, LinkConditions::default(), 9);
    mesh.spawn(1, &ReplicationConfig::default(), Vec3::ZERO);

    for tick in 1..=20 {
        mesh.host_mut(1).position.x = tick as f32 * 0.1;
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }
    assert!(mesh.entry(1).engine.is_authority());
    assert!(!mesh.entry(2).engine.is_authority());

    mesh.transfer(2);
    mesh.tick(21);
    assert!(!mesh.entry(1).engine.is_authority());
    assert!(mesh.entry(2).engine.is_authority());
    assert_eq!(mesh.entry(2).engine.stats().teleports_sent, 1);
    assert_eq!(mesh.host(1).position, mesh.host(2).position);

    let start = mesh.host(2).position.x;
    for tick in 22..=40 {
        mesh.host_mut(2).position.x = start + (tick - 21) as f32 * 0.2;
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }
    for tick in 41..=44 {
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }

    let expected = mesh.host(2).position;
    let observed = mesh.host(1).position;
    assert!(observed.distance(expected) < 1e-3, "{observed} vs {expected}");
}

#[test]
fn compressed_rotation_follows_authority() {
    init_logging();
    let rate = 30;
    let mut mesh = Mesh::new(rate, 2, LinkConditions::default(), 5);
    let config = ReplicationConfig {
        use_quaternion_sync: true,
        use_quaternion_compression: true,
        ..Default::default()
    };
    mesh.spawn(1, &config, Vec3::ZERO);

    let rotation_at = |tick: i32| Quat::from_rotation_y((tick.min(30) as f32 * 2.0).to_radians());
    for tick in 1..=34 {
        mesh.host_mut(1).rotation = rotation_at(tick);
        mesh.tick(tick);
        mesh.render(tick as f64 / rate as f64);
    }

    let observed = mesh.host(2).rotation;
    let angle = observed.angle_between(rotation_at(30));
    assert!(angle < 0.01, "off by {angle} rad");
    assert!(mesh.entry(1).engine.last_serialized_size() <= 8);
}

#[test]
fn deregistered_object_stops_receiving() {
    init_logging();
    let mut mesh = Mesh::new(30, 2, LinkConditions::default(), 11);
    mesh.spawn(1, &ReplicationConfig::default(), Vec3::ZERO);
    mesh.tick(1);
    assert_eq!(mesh.entry(2).engine.last_applied_tick(), Some(1));

    let removed = mesh.peer_mut(2).dispatcher.deregister(OBJECT);
    assert!(removed.is_some());

    mesh.host_mut(1).position = Vec3::new(1.0, 0.0, 0.0);
    mesh.tick(2);
    assert!(mesh.peer(2).dispatcher.get(OBJECT).is_none());
    assert!(mesh.peer(1).net.is_authority_for(OBJECT));
}
