use glam::{Quat, Vec3};
use half::f16;

/// Largest finite binary16 value.
pub const HALF_MAX: f32 = 65504.0;

#[inline]
pub fn quantize_half(value: f32) -> u16 {
    f16::from_f32(value).to_bits()
}

#[inline]
pub fn dequantize_half(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// Rounds `value` through binary16 and back.
#[inline]
pub fn round_trip_half(value: f32) -> f32 {
    dequantize_half(quantize_half(value))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HalfVec3 {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl HalfVec3 {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub fn from_vec3(v: Vec3) -> Self {
        Self {
            x: quantize_half(v.x),
            y: quantize_half(v.y),
            z: quantize_half(v.z),
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(
            dequantize_half(self.x),
            dequantize_half(self.y),
            dequantize_half(self.z),
        )
    }

    pub fn axis(&self, index: usize) -> u16 {
        match index {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn set_axis(&mut self, index: usize, bits: u16) {
        match index {
            0 => self.x = bits,
            1 => self.y = bits,
            _ => self.z = bits,
        }
    }
}

/// Quaternion stored as four binary16 components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HalfVec4 {
    pub x: u16,
    pub y: u16,
    pub z: u16,
    pub w: u16,
}

impl HalfVec4 {
    pub fn from_quat(q: Quat) -> Self {
        Self {
            x: quantize_half(q.x),
            y: quantize_half(q.y),
            z: quantize_half(q.z),
            w: quantize_half(q.w),
        }
    }

    pub fn to_quat(self) -> Quat {
        Quat::from_xyzw(
            dequantize_half(self.x),
            dequantize_half(self.y),
            dequantize_half(self.z),
            dequantize_half(self.w),
        )
    }
}
