use glam::BVec3;
use serde::{Deserialize, Serialize};

use crate::codec::HALF_MAX;
use crate::delta::DEFAULT_MAX_DELTA_BEFORE_ADJUSTMENT;
use crate::state::StateFlags;

pub const DEFAULT_POSITION_THRESHOLD: f32 = 0.001;
pub const DEFAULT_ROTATION_THRESHOLD_DEG: f32 = 0.01;
pub const DEFAULT_SCALE_THRESHOLD: f32 = 0.01;
pub const DEFAULT_RENDER_TICKS_BEHIND: u32 = 2;

/// Which axes of each channel are replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAxes {
    pub position: BVec3,
    pub rotation: BVec3,
    pub scale: BVec3,
}

impl Default for SyncAxes {
    fn default() -> Self {
        Self {
            position: BVec3::TRUE,
            rotation: BVec3::TRUE,
            scale: BVec3::TRUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub position_threshold: f32,
    pub rotation_threshold_deg: f32,
    pub scale_threshold: f32,
    pub use_half_precision: bool,
    pub use_quaternion_sync: bool,
    pub use_quaternion_compression: bool,
    pub interpolate: bool,
    pub use_unreliable_deltas: bool,
    pub in_local_space: bool,
    pub slerp_position: bool,
    pub render_ticks_behind: u32,
    pub max_delta_before_adjustment: f32,
    pub max_interpolation_bound: f32,
    pub sync_axes: SyncAxes,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            position_threshold: DEFAULT_POSITION_THRESHOLD,
            rotation_threshold_deg: DEFAULT_ROTATION_THRESHOLD_DEG,
            scale_threshold: DEFAULT_SCALE_THRESHOLD,
            use_half_precision: false,
            use_quaternion_sync: false,
            use_quaternion_compression: false,
            interpolate: true,
            use_unreliable_deltas: false,
            in_local_space: false,
            slerp_position: false,
            render_ticks_behind: DEFAULT_RENDER_TICKS_BEHIND,
            max_delta_before_adjustment: DEFAULT_MAX_DELTA_BEFORE_ADJUSTMENT,
            max_interpolation_bound: 1.0,
            sync_axes: SyncAxes::default(),
        }
    }
}

fn clamp_threshold(name: &str, value: f32, default: f32) -> f32 {
    if !value.is_finite() {
        log::warn!("{name} is not finite, using {default}");
        default
    } else if value < 0.0 {
        log::warn!("{name} {value} is negative, clamping to 0");
        0.0
    } else {
        value
    }
}

impl ReplicationConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        config.position_threshold = clamp_threshold(
            "position_threshold",
            self.position_threshold,
            DEFAULT_POSITION_THRESHOLD,
        );
        config.rotation_threshold_deg = clamp_threshold(
            "rotation_threshold_deg",
            self.rotation_threshold_deg,
            DEFAULT_ROTATION_THRESHOLD_DEG,
        );
        config.scale_threshold =
            clamp_threshold("scale_threshold", self.scale_threshold, DEFAULT_SCALE_THRESHOLD);

        let max_delta = self.max_delta_before_adjustment;
        if !max_delta.is_finite() || max_delta <= 0.0 || max_delta > HALF_MAX {
            let clamped = if max_delta.is_finite() && max_delta > 0.0 {
                HALF_MAX
            } else {
                DEFAULT_MAX_DELTA_BEFORE_ADJUSTMENT
            };
            log::warn!("max_delta_before_adjustment {max_delta} out of range, using {clamped}");
            config.max_delta_before_adjustment = clamped;
        }

        if !self.max_interpolation_bound.is_finite() || self.max_interpolation_bound < 0.0 {
            log::warn!(
                "max_interpolation_bound {} out of range, using 1.0",
                self.max_interpolation_bound
            );
            config.max_interpolation_bound = 1.0;
        }

        if self.use_quaternion_compression && !self.use_quaternion_sync {
            log::warn!("quaternion compression has no effect without quaternion sync");
        }
        config
    }

    /// Flags that travel with every update from an instance using this config.
    pub fn persistent_flags(&self) -> StateFlags {
        let mut flags = StateFlags::empty();
        flags.set(StateFlags::IN_LOCAL_SPACE, self.in_local_space);
        flags.set(StateFlags::INTERPOLATE, self.interpolate);
        flags.set(StateFlags::QUATERNION_SYNC, self.use_quaternion_sync);
        flags.set(
            StateFlags::QUATERNION_COMPRESSION,
            self.use_quaternion_sync && self.use_quaternion_compression,
        );
        flags.set(StateFlags::HALF_PRECISION, self.use_half_precision);
        flags.set(StateFlags::POSITION_SLERP, self.slerp_position);
        flags.set(StateFlags::UNRELIABLE_DELTAS, self.use_unreliable_deltas);
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_thresholds_clamp_to_zero() {
        let config = ReplicationConfig {
            position_threshold: -1.0,
            rotation_threshold_deg: -0.5,
            scale_threshold: f32::NAN,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.position_threshold, 0.0);
        assert_eq!(config.rotation_threshold_deg, 0.0);
        assert_eq!(config.scale_threshold, DEFAULT_SCALE_THRESHOLD);
    }

    #[test]
    fn max_delta_stays_in_half_range() {
        let config = ReplicationConfig {
            max_delta_before_adjustment: 1.0e6,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.max_delta_before_adjustment, HALF_MAX);
    }

    #[test]
    fn compression_requires_quaternion_sync() {
        let config = ReplicationConfig {
            use_quaternion_compression: true,
            ..Default::default()
        };
        assert!(!config.persistent_flags().contains(StateFlags::QUATERNION_COMPRESSION));

        let config = ReplicationConfig {
            use_quaternion_sync: true,
            use_quaternion_compression: true,
            ..Default::default()
        };
        assert!(config.persistent_flags().contains(StateFlags::QUATERNION_COMPRESSION));
    }

    #[test]
    fn persistent_flags_only_use_persistent_bits() {
        let config = ReplicationConfig {
            use_half_precision: true,
            use_unreliable_deltas: true,
            in_local_space: true,
            slerp_position: true,
            use_quaternion_sync: true,
            ..Default::default()
        };
        let flags = config.persistent_flags();
        assert_eq!(flags, flags & StateFlags::PERSISTENT);
        assert!(flags.contains(StateFlags::INTERPOLATE));
    }
}
