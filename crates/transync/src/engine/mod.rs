//! Per-object replication: authority-side dirty checking and sending,
//! observer-side reconstruction and interpolation.

mod authority;
mod observer;

use glam::{BVec3, EulerRot, Quat, Vec3};

use crate::codec::normalize_for_compression;
use crate::config::ReplicationConfig;
use crate::delta::DeltaPositionTracker;
use crate::host::{NetworkContext, ObjectId, Space, TransformHost};
use crate::interpolation::{InterpolationBuffer, InterpolationMode};
use crate::state::{StateFlags, TransformState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Written straight to the host and interpolators reset.
    Teleported,
    /// Queued in the interpolation buffers.
    Buffered,
    /// Written straight to the host, interpolation disabled.
    Applied,
    Stale,
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    pub reliable_sent: u64,
    pub unreliable_sent: u64,
    pub bytes_sent: u64,
    pub teleports_sent: u64,
    pub frame_syncs_sent: u64,
    pub synchronizations_sent: u64,
    pub base_collapses: u64,
    pub updates_applied: u64,
    pub stale_dropped: u64,
    pub decode_failures: u64,
}

pub fn quat_to_euler_degrees(q: Quat) -> Vec3 {
    let (y, x, z) = q.to_euler(EulerRot::YXZ);
    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

pub fn euler_degrees_to_quat(euler: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        euler.y.to_radians(),
        euler.x.to_radians(),
        euler.z.to_radians(),
    )
}

/// Shortest signed difference from `from` to `to`, in degrees.
pub fn delta_angle(from: f32, to: f32) -> f32 {
    let d = (to - from).rem_euclid(360.0);
    if d > 180.0 { d - 360.0 } else { d }
}

/// Stable per-object offset in `[0, tick_rate)`.
pub fn hashed_frame_sync_slot(object: ObjectId, tick_rate: u32) -> i32 {
    let mut z = object.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z % tick_rate.max(1) as u64) as i32
}

fn position_mode(flags: StateFlags) -> InterpolationMode {
    if flags.contains(StateFlags::POSITION_SLERP) {
        InterpolationMode::Spherical
    } else {
        InterpolationMode::Linear
    }
}

fn rotation_mode(flags: StateFlags) -> InterpolationMode {
    if flags.is_half_precision() {
        InterpolationMode::Linear
    } else {
        InterpolationMode::Spherical
    }
}

#[derive(Debug)]
pub struct ReplicationEngine {
    object_id: ObjectId,
    role: Role,
    config: ReplicationConfig,

    last_sent: TransformState,
    pending_teleport: bool,
    delta_tracker: DeltaPositionTracker,
    frame_sync_slot: Option<i32>,
    next_frame_sync_tick: Option<i32>,
    delta_sent_since_frame_sync: bool,
    last_serialized_size: usize,

    received: TransformState,
    last_applied_tick: Option<i32>,
    position_buffer: InterpolationBuffer<Vec3>,
    rotation_buffer: InterpolationBuffer<Quat>,
    scale_buffer: InterpolationBuffer<Vec3>,

    stats: ReplicationStats,
}

impl ReplicationEngine {
    /// Creates an engine and snapshots the host's current transform as the
    /// starting point on both sides.
    pub fn new(
        object_id: ObjectId,
        role: Role,
        config: ReplicationConfig,
        host: &dyn TransformHost,
        net: &dyn NetworkContext,
    ) -> Self {
        let config = config.sanitized();
        let flags = config.persistent_flags();
        let mut engine = Self {
            object_id,
            role,
            delta_tracker: DeltaPositionTracker::new(
                Vec3::ZERO,
                0,
                config.sync_axes.position,
                config.max_delta_before_adjustment,
            ),
            last_sent: TransformState::new(flags),
            pending_teleport: false,
            frame_sync_slot: None,
            next_frame_sync_tick: None,
            delta_sent_since_frame_sync: false,
            last_serialized_size: 0,
            received: TransformState::new(flags),
            last_applied_tick: None,
            position_buffer: InterpolationBuffer::new(Vec3::ZERO, position_mode(flags)),
            rotation_buffer: InterpolationBuffer::new(Quat::IDENTITY, rotation_mode(flags)),
            scale_buffer: InterpolationBuffer::new(Vec3::ONE, InterpolationMode::Linear),
            stats: ReplicationStats::default(),
            config,
        };
        engine.reinitialize(role, host, net);
        engine
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    /// Size in bytes of the most recent state this engine serialized.
    pub fn last_serialized_size(&self) -> usize {
        self.last_serialized_size
    }

    pub fn last_sent_state(&self) -> &TransformState {
        &self.last_sent
    }

    pub fn last_applied_tick(&self) -> Option<i32> {
        self.last_applied_tick
    }

    pub fn delta_tracker(&self) -> &DeltaPositionTracker {
        &self.delta_tracker
    }

    pub fn next_frame_sync_tick(&self) -> Option<i32> {
        self.next_frame_sync_tick
    }

    pub fn set_frame_sync_slot(&mut self, slot: i32) {
        self.frame_sync_slot = Some(slot);
        self.next_frame_sync_tick = None;
    }

    fn frame_sync_slot(&self, tick_rate: u32) -> i32 {
        self.frame_sync_slot
            .unwrap_or_else(|| hashed_frame_sync_slot(self.object_id, tick_rate))
    }

    fn space(&self) -> Space {
        if self.config.in_local_space {
            Space::Local
        } else {
            Space::World
        }
    }

    fn read_motion(&self, host: &dyn TransformHost) -> (Vec3, Quat) {
        match host.motion_body() {
            Some(body) => (body.position(), body.rotation()),
            None => (host.position(self.space()), host.rotation(self.space())),
        }
    }

    fn write_position(&self, host: &mut dyn TransformHost, position: Vec3) {
        let space = self.space();
        match host.motion_body_mut() {
            Some(body) => body.set_position(position),
            None => host.set_position(space, position),
        }
    }

    fn write_rotation(&self, host: &mut dyn TransformHost, rotation: Quat) {
        let space = self.space();
        match host.motion_body_mut() {
            Some(body) => body.set_rotation(rotation),
            None => host.set_rotation(space, rotation),
        }
    }

    /// Writes the masked axes of each channel to `host`, leaving the others
    /// as they are.
    fn write_masked(
        &self,
        host: &mut dyn TransformHost,
        position_mask: BVec3,
        rotation_mask: BVec3,
        scale_mask: BVec3,
        value: (Vec3, Quat, Vec3),
    ) {
        let (position, rotation, scale) = value;
        let (current_position, current_rotation) = self.read_motion(host);

        if position_mask.any() {
            self.write_position(host, Vec3::select(position_mask, position, current_position));
        }
        if rotation_mask.all() {
            self.write_rotation(host, rotation);
        } else if rotation_mask.any() {
            let merged = Vec3::select(
                rotation_mask,
                quat_to_euler_degrees(rotation),
                quat_to_euler_degrees(current_rotation),
            );
            self.write_rotation(host, euler_degrees_to_quat(merged));
        }
        if scale_mask.any() {
            let current = host.local_scale();
            host.set_local_scale(Vec3::select(scale_mask, scale, current));
        }
    }

    fn snapshot(&self, host: &dyn TransformHost, tick: i32) -> TransformState {
        let (position, rotation) = self.read_motion(host);
        let rotation = normalize_for_compression(rotation);
        let mut state = TransformState::new(self.config.persistent_flags());
        state.tick = tick;
        state.position = position;
        state.rotation = rotation;
        state.euler_angles = quat_to_euler_degrees(rotation);
        state.scale = host.local_scale();
        state
    }

    fn set_interpolation_bound(&mut self, bound: f32) {
        self.position_buffer.set_max_interpolation_bound(bound);
        self.rotation_buffer.set_max_interpolation_bound(bound);
        self.scale_buffer.set_max_interpolation_bound(bound);
    }

    fn reset_buffers(&mut self, state: &TransformState, time: f64) {
        self.position_buffer.set_mode(position_mode(state.flags));
        self.rotation_buffer.set_mode(rotation_mode(state.flags));
        self.set_interpolation_bound(self.config.max_interpolation_bound);
        self.position_buffer.reset_to(state.position, time);
        self.rotation_buffer.reset_to(state.rotation, time);
        self.scale_buffer.reset_to(state.scale, time);
    }

    /// Re-snapshots the host and starts over in `role`. Used at spawn and
    /// whenever ownership moves. A new authority teleports on its next tick.
    pub fn reinitialize(&mut self, role: Role, host: &dyn TransformHost, net: &dyn NetworkContext) {
        let tick = net.current_tick();
        let state = self.snapshot(host, tick);

        log::debug!("{:?}: initialized as {role:?} at tick {tick}", self.object_id);
        self.role = role;
        self.delta_tracker = DeltaPositionTracker::new(
            state.position,
            tick,
            self.config.sync_axes.position,
            self.config.max_delta_before_adjustment,
        );
        self.reset_buffers(&state, net.server_time());
        self.last_sent = state.clone();
        self.received = state;
        self.last_applied_tick = None;
        self.pending_teleport = role == Role::Authority;
        self.delta_sent_since_frame_sync = false;
        self.next_frame_sync_tick = None;
    }

    /// Replaces the configuration. On the authority, a change of any
    /// persistent setting turns the next update into a teleport.
    pub fn set_config(&mut self, config: ReplicationConfig, host: &dyn TransformHost) {
        let config = config.sanitized();
        let (position, _) = self.read_motion(host);

        self.delta_tracker
            .set_max_delta(config.max_delta_before_adjustment);
        if self.delta_tracker.set_axis_mask(config.sync_axes.position, position)
            && self.is_authority()
            && config.use_half_precision
        {
            log::debug!(
                "{:?}: re-enabled position axis drifted past the delta limit",
                self.object_id
            );
            self.pending_teleport = true;
        }

        self.set_interpolation_bound(config.max_interpolation_bound);
        self.config = config;
    }

    fn role_violation(&self, operation: &str) {
        log::error!(
            "{:?}: {operation} called on a {:?}, ignoring",
            self.object_id,
            self.role
        );
        debug_assert!(false, "{operation} requires authority");
    }
}
