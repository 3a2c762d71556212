use glam::{Quat, Vec3};

use super::flags::{Channel, StateFlags};
use crate::codec::{
    DecodeError, EncodeError, HalfVec3, HalfVec4, NetReader, NetWriter, compress_quaternion,
    decompress_quaternion, dequantize_half, quantize_half,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEncoding {
    /// One f32 per changed axis.
    FullAxes,
    /// All three components as f32, used for half-precision teleports.
    FullVector,
    /// Full vector followed by the authority's delta base, sent to observers
    /// joining mid-stream.
    FullVectorWithBase,
    /// One half-float delta per changed axis.
    HalfDelta,
    /// Full-precision base followed by half-float deltas.
    HalfDeltaWithBase,
}

impl PositionEncoding {
    pub fn for_flags(flags: StateFlags) -> Self {
        match (
            flags.is_half_precision(),
            flags.is_teleporting(),
            flags.contains(StateFlags::SYNCHRONIZE_BASE),
        ) {
            (false, _, _) => Self::FullAxes,
            (true, true, false) => Self::FullVector,
            (true, true, true) => Self::FullVectorWithBase,
            (true, false, true) => Self::HalfDeltaWithBase,
            (true, false, false) => Self::HalfDelta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationEncoding {
    FullQuaternion,
    HalfQuaternion,
    CompressedQuaternion,
    HalfEuler,
    FullEuler,
}

impl RotationEncoding {
    pub fn for_flags(flags: StateFlags) -> Self {
        match (
            flags.is_quaternion_sync(),
            flags.is_teleporting(),
            flags.is_quaternion_compressed(),
            flags.is_half_precision(),
        ) {
            (true, true, _, _) => Self::FullQuaternion,
            (true, false, true, _) => Self::CompressedQuaternion,
            (true, false, false, true) => Self::HalfQuaternion,
            (true, false, false, false) => Self::FullQuaternion,
            (false, false, _, true) => Self::HalfEuler,
            (false, _, _, _) => Self::FullEuler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleEncoding {
    FullAxes,
    HalfAxes,
}

impl ScaleEncoding {
    pub fn for_flags(flags: StateFlags) -> Self {
        if flags.is_half_precision() && !flags.is_teleporting() {
            Self::HalfAxes
        } else {
            Self::FullAxes
        }
    }
}

/// One replicated transform update.
///
/// Only the axes flagged in `flags` are meaningful on the receiving side;
/// the remaining fields hold whatever the sender last knew.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    pub tick: i32,
    pub flags: StateFlags,
    pub position: Vec3,
    pub position_base: Vec3,
    pub position_delta: HalfVec3,
    pub rotation: Quat,
    /// Euler angles in degrees, used when quaternion sync is off.
    pub euler_angles: Vec3,
    pub scale: Vec3,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            tick: 0,
            flags: StateFlags::empty(),
            position: Vec3::ZERO,
            position_base: Vec3::ZERO,
            position_delta: HalfVec3::ZERO,
            rotation: Quat::IDENTITY,
            euler_angles: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl TransformState {
    pub fn new(flags: StateFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }

    pub fn has_position_change(&self) -> bool {
        self.flags.has_changes(Channel::Position)
    }

    pub fn has_rotation_change(&self) -> bool {
        self.flags.has_changes(Channel::Rotation)
    }

    pub fn has_scale_change(&self) -> bool {
        self.flags.has_changes(Channel::Scale)
    }

    pub fn has_any_change(&self) -> bool {
        self.flags
            .intersects(StateFlags::POSITION_AXES | StateFlags::ROTATION_AXES | StateFlags::SCALE_AXES)
    }

    /// Drops every per-update bit in one step.
    pub fn clear_transient_for_next_tick(&mut self) {
        self.flags &= StateFlags::PERSISTENT;
    }

    /// Axis bits whose values differ between `self` and `other`, by exact
    /// comparison.
    pub fn diff(&self, other: &TransformState) -> StateFlags {
        let mut changed = StateFlags::empty();
        for axis in 0..3 {
            changed.set_axis(
                Channel::Position,
                axis,
                self.position[axis] != other.position[axis],
            );
            changed.set_axis(Channel::Scale, axis, self.scale[axis] != other.scale[axis]);
        }
        if self.flags.is_quaternion_sync() {
            if self.rotation != other.rotation {
                changed |= StateFlags::ROTATION_AXES;
            }
        } else {
            for axis in 0..3 {
                changed.set_axis(
                    Channel::Rotation,
                    axis,
                    self.euler_angles[axis] != other.euler_angles[axis],
                );
            }
        }
        changed
    }

    pub fn is_dirty(&self, other: &TransformState) -> bool {
        self.flags.persistent() != other.flags.persistent() || !self.diff(other).is_empty()
    }

    pub fn write(&self, w: &mut NetWriter) -> Result<(), EncodeError> {
        w.write_packed_u32(self.flags.bits())?;
        w.write_packed_i32(self.tick)?;

        if self.has_position_change() {
            self.write_position(w);
        }
        if self.has_rotation_change() {
            self.write_rotation(w);
        }
        if self.has_scale_change() {
            self.write_scale(w);
        }
        Ok(())
    }

    fn write_position(&self, w: &mut NetWriter) {
        let flagged = self.flags.axes(Channel::Position);
        match PositionEncoding::for_flags(self.flags) {
            PositionEncoding::FullAxes => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        w.write_f32(self.position[axis]);
                    }
                }
            }
            PositionEncoding::FullVector => w.write_vec3(self.position),
            PositionEncoding::FullVectorWithBase => {
                w.write_vec3(self.position);
                w.write_vec3(self.position_base);
            }
            PositionEncoding::HalfDeltaWithBase => {
                w.write_vec3(self.position_base);
                self.write_position_deltas(w);
            }
            PositionEncoding::HalfDelta => self.write_position_deltas(w),
        }
    }

    fn write_position_deltas(&self, w: &mut NetWriter) {
        let flagged = self.flags.axes(Channel::Position);
        for axis in 0..3 {
            if flagged.test(axis) {
                w.write_u16(self.position_delta.axis(axis));
            }
        }
    }

    fn write_rotation(&self, w: &mut NetWriter) {
        let flagged = self.flags.axes(Channel::Rotation);
        match RotationEncoding::for_flags(self.flags) {
            RotationEncoding::FullQuaternion => w.write_quat(self.rotation),
            RotationEncoding::CompressedQuaternion => {
                w.write_u32(compress_quaternion(self.rotation));
            }
            RotationEncoding::HalfQuaternion => {
                let half = HalfVec4::from_quat(self.rotation);
                for bits in [half.x, half.y, half.z, half.w] {
                    w.write_u16(bits);
                }
            }
            RotationEncoding::HalfEuler => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        w.write_u16(quantize_half(self.euler_angles[axis]));
                    }
                }
            }
            RotationEncoding::FullEuler => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        w.write_f32(self.euler_angles[axis]);
                    }
                }
            }
        }
    }

    fn write_scale(&self, w: &mut NetWriter) {
        let flagged = self.flags.axes(Channel::Scale);
        let encoding = ScaleEncoding::for_flags(self.flags);
        for axis in 0..3 {
            if !flagged.test(axis) {
                continue;
            }
            match encoding {
                ScaleEncoding::HalfAxes => w.write_u16(quantize_half(self.scale[axis])),
                ScaleEncoding::FullAxes => w.write_f32(self.scale[axis]),
            }
        }
    }

    /// Reads one state. Axes not present on the wire keep their defaults.
    pub fn read(r: &mut NetReader<'_>) -> Result<Self, DecodeError> {
        let raw = r.read_packed_u32()?;
        let flags = StateFlags::from_bits(raw).ok_or(DecodeError::UnknownFlags(raw))?;
        let mut state = TransformState::new(flags);
        state.tick = r.read_packed_i32()?;

        if state.has_position_change() {
            state.read_position(r)?;
        }
        if state.has_rotation_change() {
            state.read_rotation(r)?;
        }
        if state.has_scale_change() {
            state.read_scale(r)?;
        }
        Ok(state)
    }

    fn read_position(&mut self, r: &mut NetReader<'_>) -> Result<(), DecodeError> {
        let flagged = self.flags.axes(Channel::Position);
        match PositionEncoding::for_flags(self.flags) {
            PositionEncoding::FullAxes => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        self.position[axis] = r.read_f32()?;
                    }
                }
            }
            PositionEncoding::FullVector => self.position = r.read_vec3()?,
            PositionEncoding::FullVectorWithBase => {
                self.position = r.read_vec3()?;
                self.position_base = r.read_vec3()?;
            }
            PositionEncoding::HalfDeltaWithBase => {
                self.position_base = r.read_vec3()?;
                self.read_position_deltas(r)?;
            }
            PositionEncoding::HalfDelta => self.read_position_deltas(r)?,
        }
        Ok(())
    }

    fn read_position_deltas(&mut self, r: &mut NetReader<'_>) -> Result<(), DecodeError> {
        let flagged = self.flags.axes(Channel::Position);
        for axis in 0..3 {
            if flagged.test(axis) {
                self.position_delta.set_axis(axis, r.read_u16()?);
            }
        }
        Ok(())
    }

    fn read_rotation(&mut self, r: &mut NetReader<'_>) -> Result<(), DecodeError> {
        let flagged = self.flags.axes(Channel::Rotation);
        match RotationEncoding::for_flags(self.flags) {
            RotationEncoding::FullQuaternion => self.rotation = r.read_quat()?,
            RotationEncoding::CompressedQuaternion => {
                self.rotation = decompress_quaternion(r.read_u32()?);
            }
            RotationEncoding::HalfQuaternion => {
                let half = HalfVec4 {
                    x: r.read_u16()?,
                    y: r.read_u16()?,
                    z: r.read_u16()?,
                    w: r.read_u16()?,
                };
                self.rotation = half.to_quat();
            }
            RotationEncoding::HalfEuler => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        self.euler_angles[axis] = dequantize_half(r.read_u16()?);
                    }
                }
            }
            RotationEncoding::FullEuler => {
                for axis in 0..3 {
                    if flagged.test(axis) {
                        self.euler_angles[axis] = r.read_f32()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_scale(&mut self, r: &mut NetReader<'_>) -> Result<(), DecodeError> {
        let flagged = self.flags.axes(Channel::Scale);
        let encoding = ScaleEncoding::for_flags(self.flags);
        for axis in 0..3 {
            if !flagged.test(axis) {
                continue;
            }
            self.scale[axis] = match encoding {
                ScaleEncoding::HalfAxes => dequantize_half(r.read_u16()?),
                ScaleEncoding::FullAxes => r.read_f32()?,
            };
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = NetWriter::with_capacity(48);
        self.write(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Decodes a complete buffer; trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = NetReader::new(bytes);
        let state = Self::read(&mut r)?;
        match r.remaining() {
            0 => Ok(state),
            extra => Err(DecodeError::TrailingBytes(extra)),
        }
    }
}
