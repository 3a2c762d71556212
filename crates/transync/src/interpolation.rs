use std::collections::VecDeque;
use std::fmt::Debug;

use glam::{Quat, Vec3};

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    Linear,
    Spherical,
}

pub trait Interpolate: Copy + Debug {
    fn interpolate(from: Self, to: Self, t: f32, mode: InterpolationMode) -> Self;
}

impl Interpolate for Vec3 {
    fn interpolate(from: Self, to: Self, t: f32, mode: InterpolationMode) -> Self {
        match mode {
            InterpolationMode::Linear => from.lerp(to, t),
            InterpolationMode::Spherical => slerp_vec3(from, to, t),
        }
    }
}

impl Interpolate for Quat {
    fn interpolate(from: Self, to: Self, t: f32, mode: InterpolationMode) -> Self {
        let to = if from.dot(to) < 0.0 { -to } else { to };
        match mode {
            InterpolationMode::Linear => from.lerp(to, t),
            InterpolationMode::Spherical => from.slerp(to, t),
        }
    }
}

/// Rotates direction and lerps magnitude, like sweeping along an arc around
/// the origin.
fn slerp_vec3(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    let from_len = from.length();
    let to_len = to.length();
    if from_len <= f32::EPSILON || to_len <= f32::EPSILON {
        return from.lerp(to, t);
    }
    let from_dir = from / from_len;
    let arc = Quat::from_rotation_arc(from_dir, to / to_len);
    let dir = Quat::IDENTITY.slerp(arc, t) * from_dir;
    dir * (from_len + (to_len - from_len) * t)
}

#[derive(Debug, Clone, Copy)]
struct Sample<T> {
    value: T,
    time: f64,
}

/// Time-ordered samples of one transform channel, sampled behind real time.
#[derive(Debug, Clone)]
pub struct InterpolationBuffer<T> {
    samples: VecDeque<Sample<T>>,
    current: T,
    mode: InterpolationMode,
    capacity: usize,
    max_bound: f32,
    received_since_update: usize,
}

impl<T: Interpolate> InterpolationBuffer<T> {
    pub fn new(initial: T, mode: InterpolationMode) -> Self {
        Self {
            samples: VecDeque::with_capacity(DEFAULT_BUFFER_CAPACITY),
            current: initial,
            mode,
            capacity: DEFAULT_BUFFER_CAPACITY,
            max_bound: 1.0,
            received_since_update: 0,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(2);
        self
    }

    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InterpolationMode) {
        self.mode = mode;
    }

    /// Caps the interpolation factor. Values above 1 let the buffer run past
    /// its newest sample by that fraction of the last interval.
    pub fn set_max_interpolation_bound(&mut self, bound: f32) {
        self.max_bound = bound.max(0.0);
    }

    pub fn max_interpolation_bound(&self) -> f32 {
        self.max_bound
    }

    pub fn current(&self) -> T {
        self.current
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.received_since_update = 0;
    }

    /// Drops all history and pins the buffer to `value` as of `time`.
    pub fn reset_to(&mut self, value: T, time: f64) {
        self.clear();
        self.current = value;
        self.samples.push_back(Sample { value, time });
    }

    pub fn add_measurement(&mut self, value: T, time: f64) {
        self.received_since_update += 1;
        if self.received_since_update > self.capacity {
            log::debug!("interpolation buffer burst, resetting to newest value");
            self.reset_to(value, time);
            return;
        }

        let insert_at = self
            .samples
            .iter()
            .rposition(|s| s.time <= time)
            .map_or(0, |i| i + 1);
        if insert_at > 0 && self.samples[insert_at - 1].time == time {
            self.samples[insert_at - 1].value = value;
        } else {
            self.samples.insert(insert_at, Sample { value, time });
        }

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Samples the buffer at `render_time` and returns the new current value.
    pub fn update(&mut self, render_time: f64) -> T {
        self.received_since_update = 0;

        while self.samples.len() > 2 && self.samples[1].time <= render_time {
            self.samples.pop_front();
        }

        match (self.samples.front(), self.samples.get(1)) {
            (None, _) => {}
            (Some(only), None) => {
                if render_time >= only.time {
                    self.current = only.value;
                }
            }
            (Some(from), Some(to)) => {
                if render_time >= from.time {
                    let duration = to.time - from.time;
                    let t = if duration > 0.0 {
                        ((render_time - from.time) / duration) as f32
                    } else {
                        1.0
                    };
                    let t = t.clamp(0.0, self.max_bound);
                    self.current = T::interpolate(from.value, to.value, t, self.mode);
                }
            }
        }
        self.current
    }
}
