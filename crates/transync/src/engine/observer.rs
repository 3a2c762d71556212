use glam::Vec3;

use super::{
    ApplyOutcome, ReplicationEngine, euler_degrees_to_quat, position_mode, rotation_mode,
};
use crate::codec::{normalize_for_compression, quantize_half};
use crate::error::ReplicationError;
use crate::host::{NetworkContext, TransformHost};
use crate::state::{Channel, StateFlags, TransformState};

impl ReplicationEngine {
    /// Decodes and applies one update received from the authority. Nothing is
    /// applied when decoding fails.
    pub fn apply_incoming(
        &mut self,
        payload: &[u8],
        host: &mut dyn TransformHost,
        net: &dyn NetworkContext,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let state = match TransformState::from_bytes(payload) {
            Ok(state) => state,
            Err(err) => {
                self.stats.decode_failures += 1;
                log::debug!("{:?}: dropping malformed update: {err}", self.object_id);
                return Err(err.into());
            }
        };
        Ok(self.apply_state(state, host, net))
    }

    pub fn apply_state(
        &mut self,
        state: TransformState,
        host: &mut dyn TransformHost,
        net: &dyn NetworkContext,
    ) -> ApplyOutcome {
        if self.is_authority() {
            log::warn!(
                "{:?}: authority received a state update for tick {}, ignoring",
                self.object_id,
                state.tick
            );
            return ApplyOutcome::Ignored;
        }

        let flags = state.flags;
        let teleport = flags.is_teleporting();
        if let Some(last) = self.last_applied_tick {
            if state.tick < last && !teleport && !flags.is_frame_sync() {
                log::trace!(
                    "{:?}: stale update for tick {} (last applied {last})",
                    self.object_id,
                    state.tick
                );
                self.stats.stale_dropped += 1;
                return ApplyOutcome::Stale;
            }
        }
        self.last_applied_tick = Some(
            self.last_applied_tick
                .map_or(state.tick, |last| last.max(state.tick)),
        );
        self.stats.updates_applied += 1;

        if flags.persistent() != self.received.flags.persistent() {
            self.position_buffer.set_mode(position_mode(flags));
            self.rotation_buffer.set_mode(rotation_mode(flags));
        }
        self.merge_received(&state);

        let sent_time = state.tick as f64 / net.tick_rate().max(1) as f64;
        let received = &self.received;
        let value = (received.position, received.rotation, received.scale);

        if teleport {
            log::debug!("{:?}: teleport at tick {}", self.object_id, state.tick);
            let sync = self.config.sync_axes;
            self.write_masked(
                host,
                flags.axes(Channel::Position) & sync.position,
                flags.axes(Channel::Rotation) & sync.rotation,
                flags.axes(Channel::Scale) & sync.scale,
                value,
            );
            let received = self.received.clone();
            self.reset_buffers(&received, sent_time);
            return ApplyOutcome::Teleported;
        }

        if flags.is_interpolating() {
            if flags.has_changes(Channel::Position) {
                self.position_buffer.add_measurement(value.0, sent_time);
            }
            if flags.has_changes(Channel::Rotation) {
                self.rotation_buffer.add_measurement(value.1, sent_time);
            }
            if flags.has_changes(Channel::Scale) {
                self.scale_buffer.add_measurement(value.2, sent_time);
            }
            return ApplyOutcome::Buffered;
        }

        self.write_masked(
            host,
            flags.axes(Channel::Position),
            flags.axes(Channel::Rotation),
            flags.axes(Channel::Scale),
            value,
        );
        ApplyOutcome::Applied
    }

    /// Folds the axes present in `state` into the accumulated received state.
    fn merge_received(&mut self, state: &TransformState) {
        let flags = state.flags;
        let tick = state.tick;

        if flags.has_changes(Channel::Position) {
            let mask = flags.axes(Channel::Position);
            let incoming = if !flags.is_half_precision() {
                state.position
            } else if flags.is_teleporting() {
                if flags.contains(StateFlags::SYNCHRONIZE_BASE) {
                    self.delta_tracker.set_base(state.position_base, tick);
                    for axis in 0..3 {
                        let delta = state.position[axis] - state.position_base[axis];
                        self.delta_tracker.set_delta_axis(axis, quantize_half(delta));
                    }
                } else {
                    self.delta_tracker.reset(state.position, tick);
                }
                state.position
            } else {
                if flags.contains(StateFlags::SYNCHRONIZE_BASE) {
                    self.delta_tracker.set_base(state.position_base, tick);
                }
                for axis in 0..3 {
                    if mask.test(axis) {
                        self.delta_tracker
                            .set_delta_axis(axis, state.position_delta.axis(axis));
                    }
                }
                self.delta_tracker.full_position(tick)
            };
            self.received.position = Vec3::select(mask, incoming, self.received.position);
        }

        if flags.has_changes(Channel::Rotation) {
            if flags.is_quaternion_sync() {
                self.received.rotation = normalize_for_compression(state.rotation);
            } else {
                let mask = flags.axes(Channel::Rotation);
                self.received.euler_angles =
                    Vec3::select(mask, state.euler_angles, self.received.euler_angles);
                self.received.rotation = euler_degrees_to_quat(self.received.euler_angles);
            }
        }

        if flags.has_changes(Channel::Scale) {
            let mask = flags.axes(Channel::Scale);
            self.received.scale = Vec3::select(mask, state.scale, self.received.scale);
        }

        self.received.tick = tick;
        self.received.flags = flags;
    }

    /// Observer entry point, called once per rendered frame. Samples the
    /// interpolation buffers `render_ticks_behind` ticks in the past.
    pub fn on_render_step(&mut self, host: &mut dyn TransformHost, net: &dyn NetworkContext) {
        if self.is_authority() || !self.received.flags.is_interpolating() {
            return;
        }
        let tick_rate = net.tick_rate().max(1) as f64;
        let render_time = net.server_time() - self.config.render_ticks_behind as f64 / tick_rate;

        let position = self.position_buffer.update(render_time);
        let rotation = self.rotation_buffer.update(render_time);
        let scale = self.scale_buffer.update(render_time);

        let sync = self.config.sync_axes;
        self.write_masked(
            host,
            sync.position,
            sync.rotation,
            sync.scale,
            (position, rotation, scale),
        );
    }

    /// Most recent values received, before interpolation.
    pub fn received_state(&self) -> &TransformState {
        &self.received
    }
}
