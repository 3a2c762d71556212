use glam::{BVec3, Vec3};

use crate::codec::HalfVec3;

pub const DEFAULT_MAX_DELTA_BEFORE_ADJUSTMENT: f32 = 64.0;

/// Half-precision position relative to a full-precision base.
///
/// The authority calls [`update`](Self::update) each tick. When any
/// synchronized axis drifts further than `max_delta` from the base, that axis
/// collapses: its base moves to the current value and its delta resets to
/// zero. The caller must then ship the new base reliably.
#[derive(Debug, Clone)]
pub struct DeltaPositionTracker {
    base_position: Vec3,
    base_tick: i32,
    previous_base: Vec3,
    delta: HalfVec3,
    axis_mask: BVec3,
    max_delta: f32,
}

impl Default for DeltaPositionTracker {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0, BVec3::TRUE, DEFAULT_MAX_DELTA_BEFORE_ADJUSTMENT)
    }
}

impl DeltaPositionTracker {
    pub fn new(base_position: Vec3, base_tick: i32, axis_mask: BVec3, max_delta: f32) -> Self {
        Self {
            base_position,
            base_tick,
            previous_base: base_position,
            delta: HalfVec3::ZERO,
            axis_mask,
            max_delta,
        }
    }

    pub fn base_position(&self) -> Vec3 {
        self.base_position
    }

    pub fn base_tick(&self) -> i32 {
        self.base_tick
    }

    pub fn delta(&self) -> HalfVec3 {
        self.delta
    }

    pub fn axis_mask(&self) -> BVec3 {
        self.axis_mask
    }

    pub fn max_delta(&self) -> f32 {
        self.max_delta
    }

    pub fn set_max_delta(&mut self, max_delta: f32) {
        self.max_delta = max_delta;
    }

    /// Rebases at `position` with a zero delta.
    pub fn reset(&mut self, position: Vec3, tick: i32) {
        self.base_position = position;
        self.previous_base = position;
        self.base_tick = tick;
        self.delta = HalfVec3::ZERO;
    }

    /// Quantizes `current - base` on every synchronized axis. Returns true when
    /// at least one axis collapsed onto a new base.
    pub fn update(&mut self, current: Vec3, tick: i32) -> bool {
        let mut collapsed = false;
        let mut new_base = self.base_position;

        for axis in 0..3 {
            if !self.axis_mask.test(axis) {
                continue;
            }
            let delta = current[axis] - self.base_position[axis];
            if delta.abs() > self.max_delta {
                new_base[axis] = current[axis];
                self.delta.set_axis(axis, 0);
                collapsed = true;
            } else {
                self.delta.set_axis(axis, crate::codec::quantize_half(delta));
            }
        }

        if collapsed {
            log::trace!(
                "delta tracker collapsed at tick {tick}: base {} -> {new_base}",
                self.base_position
            );
            self.previous_base = self.base_position;
            self.base_position = new_base;
            self.base_tick = tick;
        }
        collapsed
    }

    /// Position reconstructed against the base that was valid at `tick`.
    pub fn full_position(&self, tick: i32) -> Vec3 {
        let base = if tick < self.base_tick {
            self.previous_base
        } else {
            self.base_position
        };
        base + self.delta.to_vec3()
    }

    pub fn current_full_position(&self) -> Vec3 {
        self.base_position + self.delta.to_vec3()
    }

    /// Observer side: adopts a base that arrived from the authority.
    pub fn set_base(&mut self, base: Vec3, tick: i32) {
        if base != self.base_position {
            self.previous_base = self.base_position;
        }
        self.base_position = base;
        self.base_tick = tick;
    }

    /// Observer side: applies one received half-precision delta axis.
    pub fn set_delta_axis(&mut self, axis: usize, bits: u16) {
        self.delta.set_axis(axis, bits);
    }

    /// Changes the synchronized axes. Returns true when a newly enabled axis
    /// has drifted further than `max_delta` from what this tracker last
    /// represented, in which case a full teleport is required.
    pub fn set_axis_mask(&mut self, mask: BVec3, current: Vec3) -> bool {
        let known = self.current_full_position();
        let mut needs_teleport = false;
        for axis in 0..3 {
            let enabled = mask.test(axis) && !self.axis_mask.test(axis);
            if enabled && (current[axis] - known[axis]).abs() >= self.max_delta {
                needs_teleport = true;
            }
        }
        self.axis_mask = mask;
        needs_teleport
    }
}
