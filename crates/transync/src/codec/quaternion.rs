//! Smallest-three quaternion compression into 32 bits.
//!
//! Layout: bits 30..32 hold the index of the dropped (largest) component,
//! the remaining three components follow in ascending index order at bit
//! offsets 20, 10 and 0. Each is a sign bit followed by a 9-bit magnitude
//! scaled to `[0, 1/sqrt(2)]`.

use glam::Quat;

const COMPONENT_BITS: u32 = 10;
const MAGNITUDE_BITS: u32 = 9;
const MAGNITUDE_MAX: f32 = ((1 << MAGNITUDE_BITS) - 1) as f32;
const MAGNITUDE_MASK: u32 = (1 << MAGNITUDE_BITS) - 1;
const SIGN_BIT: u32 = 1 << MAGNITUDE_BITS;
const COMPONENT_RANGE: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Normalizes `q`, falling back to identity for degenerate input.
pub fn normalize_for_compression(q: Quat) -> Quat {
    let len_sq = q.length_squared();
    if !len_sq.is_finite() || len_sq <= f32::EPSILON {
        Quat::IDENTITY
    } else {
        q.normalize()
    }
}

/// Expects a normalized quaternion.
pub fn compress_quaternion(q: Quat) -> u32 {
    let mut components = q.to_array();

    let mut largest = 0;
    for i in 1..4 {
        if components[i].abs() > components[largest].abs() {
            largest = i;
        }
    }

    // q and -q are the same rotation; store the one whose dropped component
    // is positive so the decoder can rebuild it from the unit constraint.
    if components[largest] < 0.0 {
        for c in &mut components {
            *c = -*c;
        }
    }

    let mut packed = (largest as u32) << 30;
    let mut shift = 2 * COMPONENT_BITS;
    for (i, c) in components.iter().enumerate() {
        if i == largest {
            continue;
        }
        let magnitude = ((c.abs() / COMPONENT_RANGE) * MAGNITUDE_MAX)
            .round()
            .min(MAGNITUDE_MAX) as u32;
        let sign = if *c < 0.0 { SIGN_BIT } else { 0 };
        packed |= (sign | magnitude) << shift;
        shift = shift.saturating_sub(COMPONENT_BITS);
    }
    packed
}

pub fn decompress_quaternion(packed: u32) -> Quat {
    let largest = (packed >> 30) as usize;
    let mut components = [0.0f32; 4];
    let mut sum_sq = 0.0;

    let mut shift = 2 * COMPONENT_BITS;
    for (i, c) in components.iter_mut().enumerate() {
        if i == largest {
            continue;
        }
        let field = (packed >> shift) & (SIGN_BIT | MAGNITUDE_MASK);
        let magnitude = (field & MAGNITUDE_MASK) as f32 / MAGNITUDE_MAX * COMPONENT_RANGE;
        *c = if field & SIGN_BIT != 0 {
            -magnitude
        } else {
            magnitude
        };
        sum_sq += *c * *c;
        shift = shift.saturating_sub(COMPONENT_BITS);
    }

    components[largest] = (1.0 - sum_sq).max(0.0).sqrt();
    Quat::from_array(components)
}
