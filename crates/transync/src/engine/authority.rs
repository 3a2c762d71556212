use glam::{Quat, Vec3};

use super::{ReplicationEngine, delta_angle, quat_to_euler_degrees};
use crate::codec::normalize_for_compression;
use crate::host::{ClientId, Delivery, NetworkContext, Target, TransformHost};
use crate::state::{Channel, StateFlags, TransformState};

/// A zero difference never counts, so a zero threshold still skips idle
/// ticks.
#[inline]
fn exceeds(difference: f32, threshold: f32) -> bool {
    difference != 0.0 && difference.abs() >= threshold
}

impl ReplicationEngine {
    /// Authority entry point, called once per network tick.
    pub fn on_network_tick(&mut self, host: &dyn TransformHost, net: &mut dyn NetworkContext) {
        if !self.is_authority() {
            self.role_violation("on_network_tick");
            return;
        }
        let tick = net.current_tick();
        let tick_rate = net.tick_rate().max(1);

        if let Some(state) = self.check_for_state_change(host, tick, tick_rate) {
            self.send_state(state, Target::AllObservers, net, true);
        }
    }

    /// Moves the host immediately; the next network tick ships a teleport.
    pub fn teleport(
        &mut self,
        host: &mut dyn TransformHost,
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
    ) {
        self.set_state(host, Some(position), Some(rotation), Some(scale), true);
    }

    /// Writes any subset of the transform. With `teleport` unset the change is
    /// picked up by the regular dirty check and interpolated on observers.
    pub fn set_state(
        &mut self,
        host: &mut dyn TransformHost,
        position: Option<Vec3>,
        rotation: Option<Quat>,
        scale: Option<Vec3>,
        teleport: bool,
    ) {
        if !self.is_authority() {
            self.role_violation(if teleport { "teleport" } else { "set_state" });
            return;
        }
        if let Some(position) = position {
            self.write_position(host, position);
        }
        if let Some(rotation) = rotation {
            self.write_rotation(host, rotation);
        }
        if let Some(scale) = scale {
            host.set_local_scale(scale);
        }
        self.pending_teleport |= teleport;
    }

    /// Sends the full current transform to one observer that is joining late.
    /// Does not touch what other observers have been sent.
    pub fn synchronize_observer(
        &mut self,
        host: &dyn TransformHost,
        net: &mut dyn NetworkContext,
        client: ClientId,
    ) {
        if !self.is_authority() {
            self.role_violation("synchronize_observer");
            return;
        }
        let mut state = self.snapshot(host, net.current_tick());
        let sync = self.config.sync_axes;
        state.flags |= StateFlags::TELEPORTING | StateFlags::SYNCHRONIZING;
        state.flags.set_axes(Channel::Position, sync.position);
        state.flags.set_axes(Channel::Rotation, sync.rotation);
        state.flags.set_axes(Channel::Scale, sync.scale);
        if self.config.use_quaternion_sync && sync.rotation.any() {
            state.flags |= StateFlags::ROTATION_AXES;
        }
        if self.config.use_half_precision {
            state.flags |= StateFlags::SYNCHRONIZE_BASE;
            state.position_base = self.delta_tracker.base_position();
        }
        self.stats.synchronizations_sent += 1;
        self.send_state(state, Target::Client(client), net, false);
    }

    /// Per-axis thresholds for this tick. Bodies moving fast get coarser
    /// thresholds, scaled by their velocity over one tick.
    fn thresholds(&self, host: &dyn TransformHost, tick_rate: u32) -> (Vec3, Vec3) {
        let position = Vec3::splat(self.config.position_threshold);
        let rotation = Vec3::splat(self.config.rotation_threshold_deg);
        let Some(body) = host.motion_body() else {
            return (position, rotation);
        };
        let rate = tick_rate as f32;

        let per_tick = body.linear_velocity().abs() / rate;
        let position = per_tick.clamp(position * 0.1, position * rate);

        let angular = body.angular_velocity().abs();
        let per_tick = Vec3::new(
            angular.x.to_degrees(),
            angular.y.to_degrees(),
            angular.z.to_degrees(),
        ) / rate;
        let rotation = per_tick.clamp(rotation / rate, rotation * rate);
        (position, rotation)
    }

    /// Decides whether this tick is this object's frame-sync slot. Consumes
    /// the slot even when a teleport preempts it.
    fn frame_sync_due(&mut self, tick: i32, tick_rate: u32, teleport: bool) -> bool {
        if !self.config.use_unreliable_deltas {
            return false;
        }
        let slot = self.frame_sync_slot(tick_rate);
        let next = *self.next_frame_sync_tick.get_or_insert(tick + slot);
        if !self.delta_sent_since_frame_sync || next > tick {
            return false;
        }

        let mut next = next;
        while next <= tick {
            next += tick_rate as i32;
        }
        self.next_frame_sync_tick = Some(next);
        self.delta_sent_since_frame_sync = false;
        !teleport
    }

    /// Compares the host against the last sent state and builds the update
    /// to send, if any.
    pub(super) fn check_for_state_change(
        &mut self,
        host: &dyn TransformHost,
        tick: i32,
        tick_rate: u32,
    ) -> Option<TransformState> {
        let (position, rotation) = self.read_motion(host);
        let rotation = normalize_for_compression(rotation);
        let euler = quat_to_euler_degrees(rotation);
        let scale = host.local_scale();

        let persistent = self.config.persistent_flags();
        let mut teleport = std::mem::take(&mut self.pending_teleport);
        if persistent != self.last_sent.flags.persistent() {
            log::debug!(
                "{:?}: persistent flags changed {:?} -> {:?}, teleporting",
                self.object_id,
                self.last_sent.flags.persistent(),
                persistent
            );
            teleport = true;
        }

        let frame_sync = self.frame_sync_due(tick, tick_rate, teleport);
        let all_axes = teleport || frame_sync;
        let (position_threshold, rotation_threshold) = self.thresholds(host, tick_rate);
        let scale_threshold = self.config.scale_threshold;
        let sync = self.config.sync_axes;
        let last = &self.last_sent;

        let mut flags = persistent;
        for axis in 0..3 {
            flags.set_axis(
                Channel::Position,
                axis,
                sync.position.test(axis)
                    && (all_axes
                        || exceeds(position[axis] - last.position[axis], position_threshold[axis])),
            );
            flags.set_axis(
                Channel::Rotation,
                axis,
                sync.rotation.test(axis)
                    && (all_axes
                        || exceeds(
                            delta_angle(last.euler_angles[axis], euler[axis]),
                            rotation_threshold[axis],
                        )),
            );
            flags.set_axis(
                Channel::Scale,
                axis,
                sync.scale.test(axis)
                    && (all_axes || exceeds(scale[axis] - last.scale[axis], scale_threshold)),
            );
        }

        let half = self.config.use_half_precision;
        if half && flags.has_changes(Channel::Position) {
            flags.set_axes(Channel::Position, sync.position);
        }
        if self.config.use_quaternion_sync && flags.has_changes(Channel::Rotation) {
            flags |= StateFlags::ROTATION_AXES;
        }
        if half && flags.has_changes(Channel::Scale) {
            flags.set_axes(Channel::Scale, sync.scale);
        }

        let has_changes = flags.has_changes(Channel::Position)
            || flags.has_changes(Channel::Rotation)
            || flags.has_changes(Channel::Scale);
        if !has_changes && !teleport {
            return None;
        }
        flags.set(StateFlags::TELEPORTING, teleport);
        flags.set(StateFlags::FRAME_SYNC, frame_sync);

        let mut state = self.last_sent.clone();
        state.tick = tick;
        state.flags = flags;
        for axis in 0..3 {
            if flags.axis(Channel::Position, axis) {
                state.position[axis] = position[axis];
            }
            if flags.axis(Channel::Rotation, axis) {
                state.euler_angles[axis] = euler[axis];
            }
            if flags.axis(Channel::Scale, axis) {
                state.scale[axis] = scale[axis];
            }
        }
        if flags.has_changes(Channel::Rotation) {
            state.rotation = rotation;
        }

        if half && flags.has_changes(Channel::Position) {
            if teleport {
                self.delta_tracker.reset(position, tick);
            } else if self.delta_tracker.update(position, tick) {
                log::debug!(
                    "{:?}: delta base collapsed at tick {tick}, sending base reliably",
                    self.object_id
                );
                state.flags |= StateFlags::SYNCHRONIZE_BASE;
                self.stats.base_collapses += 1;
            }
            // A collapse can arrive behind a newer unreliable delta and be
            // dropped as stale, so every frame sync restates the base.
            if frame_sync {
                state.flags |= StateFlags::SYNCHRONIZE_BASE;
            }
            state.position_base = self.delta_tracker.base_position();
            state.position_delta = self.delta_tracker.delta();
        }

        Some(state)
    }

    /// Serializes and sends `state`. With `commit`, it becomes the baseline
    /// for the next dirty check.
    fn send_state(
        &mut self,
        mut state: TransformState,
        target: Target,
        net: &mut dyn NetworkContext,
        commit: bool,
    ) {
        let reliable = state.flags.requires_reliable();
        state.flags.set(StateFlags::RELIABLE, reliable);

        let bytes = match state.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("{:?}: dropping update for tick {}: {err}", self.object_id, state.tick);
                return;
            }
        };
        let delivery = if reliable {
            Delivery::Reliable
        } else {
            Delivery::Unreliable
        };
        net.send(self.object_id, &bytes, delivery, target);
        log::trace!(
            "{:?}: sent tick {} ({} bytes, {delivery:?}, flags {:?})",
            self.object_id,
            state.tick,
            bytes.len(),
            state.flags
        );

        self.last_serialized_size = bytes.len();
        self.stats.bytes_sent += bytes.len() as u64;
        if reliable {
            self.stats.reliable_sent += 1;
        } else {
            self.stats.unreliable_sent += 1;
        }
        if state.flags.is_frame_sync() {
            self.stats.frame_syncs_sent += 1;
        }
        if state.flags.is_teleporting() && !state.flags.is_synchronizing() {
            self.stats.teleports_sent += 1;
        }

        if commit {
            if !reliable {
                self.delta_sent_since_frame_sync = true;
            }
            state.clear_transient_for_next_tick();
            self.last_sent = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::engine::Role;
    use crate::host::{BasicTransform, MotionBody, ObjectId};

    #[derive(Default)]
    struct Recorder {
        tick: i32,
        sent: Vec<(Vec<u8>, Delivery, Target)>,
    }

    impl NetworkContext for Recorder {
        fn current_tick(&self) -> i32 {
            self.tick
        }
        fn tick_rate(&self) -> u32 {
            60
        }
        fn server_time(&self) -> f64 {
            self.tick as f64 / 60.0
        }
        fn is_authority_for(&self, _object: ObjectId) -> bool {
            true
        }
        fn send(&mut self, _object: ObjectId, payload: &[u8], delivery: Delivery, target: Target) {
            self.sent.push((payload.to_vec(), delivery, target));
        }
    }

    impl Recorder {
        fn last_state(&self) -> TransformState {
            TransformState::from_bytes(&self.sent.last().unwrap().0).unwrap()
        }
    }

    fn authority(
        config: ReplicationConfig,
        host: &BasicTransform,
        net: &Recorder,
    ) -> ReplicationEngine {
        ReplicationEngine::new(ObjectId(1), Role::Authority, config, host, net)
    }

    /// Runs the initial teleport tick so later ticks start clean.
    fn settle(engine: &mut ReplicationEngine, host: &BasicTransform, net: &mut Recorder) {
        engine.on_network_tick(host, net);
        net.sent.clear();
        net.tick += 1;
    }

    #[test]
    fn first_tick_is_a_teleport() {
        let host = BasicTransform::at(Vec3::new(1.0, 2.0, 3.0));
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        engine.on_network_tick(&host, &mut net);

        assert_eq!(net.sent.len(), 1);
        assert_eq!(net.sent[0].1, Delivery::Reliable);
        let state = net.last_state();
        assert!(state.flags.is_teleporting());
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn threshold_gating() {
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        settle(&mut engine, &host, &mut net);

        host.position.x = 0.0005;
        engine.on_network_tick(&host, &mut net);
        assert!(net.sent.is_empty());

        net.tick += 1;
        host.position.x = 0.002;
        engine.on_network_tick(&host, &mut net);
        assert_eq!(net.sent.len(), 1);
        let state = net.last_state();
        assert!(state.flags.contains(StateFlags::POSITION_X));
        assert!(!state.flags.contains(StateFlags::POSITION_Y));
        assert_eq!(state.position.x, 0.002);
    }

    #[test]
    fn idle_ticks_send_nothing() {
        let host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        settle(&mut engine, &host, &mut net);
        for _ in 0..10 {
            engine.on_network_tick(&host, &mut net);
            net.tick += 1;
        }
        assert!(net.sent.is_empty());
    }

    #[test]
    fn rotation_wraparound_uses_shortest_angle() {
        let mut host = BasicTransform::default();
        host.rotation = Quat::from_rotation_y(359.999f32.to_radians());
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        settle(&mut engine, &host, &mut net);

        host.rotation = Quat::from_rotation_y(0.0005f32.to_radians());
        engine.on_network_tick(&host, &mut net);
        assert!(net.sent.is_empty());
    }

    #[test]
    fn delta_collapse_goes_reliable() {
        let config = ReplicationConfig {
            use_half_precision: true,
            use_unreliable_deltas: true,
            max_delta_before_adjustment: 1.0,
            ..Default::default()
        };
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        engine.set_frame_sync_slot(30);
        settle(&mut engine, &host, &mut net);

        host.position.z = 0.5;
        engine.on_network_tick(&host, &mut net);
        assert_eq!(net.sent[0].1, Delivery::Unreliable);

        net.tick += 1;
        host.position.z = 1.5;
        engine.on_network_tick(&host, &mut net);
        assert_eq!(net.sent[1].1, Delivery::Reliable);
        let state = net.last_state();
        assert!(state.flags.contains(StateFlags::SYNCHRONIZE_BASE));
        assert_eq!(state.position_base.z, 1.5);
        assert_eq!(engine.delta_tracker().base_position().z, 1.5);
        assert_eq!(engine.stats().base_collapses, 1);
    }

    #[test]
    fn half_precision_resends_all_synced_axes() {
        let config = ReplicationConfig {
            use_half_precision: true,
            ..Default::default()
        };
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        settle(&mut engine, &host, &mut net);

        host.position.y = 0.25;
        host.scale.x = 2.0;
        engine.on_network_tick(&host, &mut net);
        let state = net.last_state();
        assert!(state.flags.contains(StateFlags::POSITION_AXES));
        assert!(state.flags.contains(StateFlags::SCALE_AXES));
    }

    #[test]
    fn quaternion_mode_marks_every_rotation_axis() {
        let config = ReplicationConfig {
            use_quaternion_sync: true,
            ..Default::default()
        };
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        settle(&mut engine, &host, &mut net);

        host.rotation = Quat::from_rotation_x(0.2);
        engine.on_network_tick(&host, &mut net);
        assert!(net.last_state().flags.contains(StateFlags::ROTATION_AXES));
    }

    #[test]
    fn persistent_change_forces_teleport() {
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        settle(&mut engine, &host, &mut net);

        let config = ReplicationConfig {
            use_quaternion_sync: true,
            ..Default::default()
        };
        engine.set_config(config, &host);
        host.position.x = 0.0001;
        engine.on_network_tick(&host, &mut net);
        let state = net.last_state();
        assert!(state.flags.is_teleporting());
        assert!(state.flags.is_quaternion_sync());
    }

    #[test]
    fn explicit_teleport() {
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(ReplicationConfig::default(), &host, &net);
        settle(&mut engine, &host, &mut net);

        engine.teleport(&mut host, Vec3::splat(10.0), Quat::IDENTITY, Vec3::ONE);
        assert_eq!(host.position, Vec3::splat(10.0));
        engine.on_network_tick(&host, &mut net);
        let state = net.last_state();
        assert!(state.flags.is_teleporting());
        assert_eq!(net.sent[0].1, Delivery::Reliable);
        assert_eq!(engine.stats().teleports_sent, 2);
    }

    #[test]
    fn frame_sync_follows_unreliable_deltas() {
        let config = ReplicationConfig {
            use_unreliable_deltas: true,
            ..Default::default()
        };
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        engine.set_frame_sync_slot(0);
        settle(&mut engine, &host, &mut net);

        let mut frame_syncs = 0;
        for i in 0..130 {
            host.position.x = i as f32 * 0.01;
            engine.on_network_tick(&host, &mut net);
            net.tick += 1;
        }
        for (bytes, delivery, _) in &net.sent {
            let state = TransformState::from_bytes(bytes).unwrap();
            if state.flags.is_frame_sync() {
                assert_eq!(*delivery, Delivery::Reliable);
                assert!(state.flags.contains(StateFlags::POSITION_AXES | StateFlags::SCALE_AXES));
                frame_syncs += 1;
            }
        }
        // Slot 0 is already due on the first delta, then every 60 ticks.
        assert_eq!(frame_syncs, 3);
        assert_eq!(engine.stats().frame_syncs_sent, 3);
    }

    #[test]
    fn half_precision_frame_sync_restates_base() {
        let config = ReplicationConfig {
            use_half_precision: true,
            use_unreliable_deltas: true,
            max_delta_before_adjustment: 1.0,
            ..Default::default()
        };
        let mut host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        engine.set_frame_sync_slot(5);
        settle(&mut engine, &host, &mut net);

        for z in [0.5, 1.5, 1.6, 1.7] {
            host.position.z = z;
            engine.on_network_tick(&host, &mut net);
            net.tick += 1;
        }
        assert!(!net.last_state().flags.is_frame_sync());
        assert!(!net.last_state().flags.contains(StateFlags::SYNCHRONIZE_BASE));

        // Tick 5 is the frame-sync slot.
        host.position.z = 1.8;
        engine.on_network_tick(&host, &mut net);
        let (_, delivery, _) = net.sent.last().unwrap();
        assert_eq!(*delivery, Delivery::Reliable);
        let state = net.last_state();
        assert!(state.flags.is_frame_sync());
        assert!(state.flags.contains(StateFlags::SYNCHRONIZE_BASE));
        assert_eq!(state.position_base.z, 1.5);
        assert_eq!(engine.stats().base_collapses, 1);
    }

    #[test]
    fn no_frame_sync_without_deltas() {
        let config = ReplicationConfig {
            use_unreliable_deltas: true,
            ..Default::default()
        };
        let host = BasicTransform::default();
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        engine.set_frame_sync_slot(0);
        settle(&mut engine, &host, &mut net);
        for _ in 0..200 {
            engine.on_network_tick(&host, &mut net);
            net.tick += 1;
        }
        assert!(net.sent.is_empty());
    }

    #[test]
    fn synchronize_targets_one_client() {
        let config = ReplicationConfig {
            use_half_precision: true,
            ..Default::default()
        };
        let mut host = BasicTransform::at(Vec3::new(3.0, 0.0, 0.0));
        let mut net = Recorder::default();
        let mut engine = authority(config, &host, &net);
        settle(&mut engine, &host, &mut net);
        host.position.x = 3.5;
        engine.on_network_tick(&host, &mut net);
        let before = engine.last_sent_state().clone();
        net.sent.clear();

        engine.synchronize_observer(&host, &mut net, 7);
        assert_eq!(net.sent.len(), 1);
        assert_eq!(net.sent[0].2, Target::Client(7));
        let state = net.last_state();
        assert!(state.flags.is_synchronizing());
        assert!(state.flags.contains(StateFlags::SYNCHRONIZE_BASE));
        assert_eq!(state.position_base.x, 3.0);
        assert_eq!(state.position.x, 3.5);
        assert_eq!(engine.last_sent_state(), &before);
    }

    struct Spinning {
        transform: BasicTransform,
        velocity: Vec3,
    }

    impl MotionBody for Spinning {
        fn position(&self) -> Vec3 {
            self.transform.position
        }
        fn set_position(&mut self, position: Vec3) {
            self.transform.position = position;
        }
        fn rotation(&self) -> Quat {
            self.transform.rotation
        }
        fn set_rotation(&mut self, rotation: Quat) {
            self.transform.rotation = rotation;
        }
        fn linear_velocity(&self) -> Vec3 {
            self.velocity
        }
        fn angular_velocity(&self) -> Vec3 {
            Vec3::ZERO
        }
        fn is_kinematic(&self) -> bool {
            false
        }
    }

    impl TransformHost for Spinning {
        fn position(&self, space: crate::host::Space) -> Vec3 {
            self.transform.position(space)
        }
        fn set_position(&mut self, space: crate::host::Space, position: Vec3) {
            self.transform.set_position(space, position);
        }
        fn rotation(&self, space: crate::host::Space) -> Quat {
            self.transform.rotation(space)
        }
        fn set_rotation(&mut self, space: crate::host::Space, rotation: Quat) {
            self.transform.set_rotation(space, rotation);
        }
        fn local_scale(&self) -> Vec3 {
            self.transform.scale
        }
        fn set_local_scale(&mut self, scale: Vec3) {
            self.transform.scale = scale;
        }
        fn motion_body(&self) -> Option<&dyn MotionBody> {
            Some(self)
        }
        fn motion_body_mut(&mut self) -> Option<&mut dyn MotionBody> {
            Some(self)
        }
    }

    #[test]
    fn fast_bodies_get_coarser_thresholds() {
        let net = Recorder::default();
        let fast = Spinning {
            transform: BasicTransform::default(),
            velocity: Vec3::new(6.0, 0.0, 0.0),
        };
        let engine = ReplicationEngine::new(
            ObjectId(2),
            Role::Authority,
            ReplicationConfig::default(),
            &fast,
            &net,
        );
        let (position, _) = engine.thresholds(&fast, 60);
        // 6 m/s over a 60 Hz tick is 0.1 m, clamped to 60x the base threshold.
        assert!((position.x - 0.06).abs() < 1e-6);
        // Idle axes fall to a tenth of the base threshold.
        assert!((position.y - 0.0001).abs() < 1e-7);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "requires authority")]
    fn observer_cannot_teleport() {
        let mut host = BasicTransform::default();
        let net = Recorder::default();
        let mut engine = ReplicationEngine::new(
            ObjectId(3),
            Role::Observer,
            ReplicationConfig::default(),
            &host,
            &net,
        );
        engine.teleport(&mut host, Vec3::ONE, Quat::IDENTITY, Vec3::ONE);
    }
}
