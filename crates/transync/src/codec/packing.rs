use glam::{Quat, Vec3};

/// Largest value the packed encoding can carry (30 bits).
pub const PACKED_MAX: u32 = (1 << 30) - 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer ended early: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    #[error("unknown state flag bits: {0:#x}")]
    UnknownFlags(u32),
    #[error("{0} trailing bytes after state")]
    TrailingBytes(usize),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {0} exceeds the 30-bit packed range")]
    ValueTooLarge(u32),
}

#[inline]
fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[derive(Debug, Default, Clone)]
pub struct NetWriter {
    buf: Vec<u8>,
}

impl NetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Writes `value` in 1 to 4 bytes. The low two bits of the first byte hold
    /// the byte count minus one.
    pub fn write_packed_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        if value > PACKED_MAX {
            return Err(EncodeError::ValueTooLarge(value));
        }
        let shifted = value << 2;
        let bytes = match shifted {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        };
        let encoded = shifted | (bytes as u32 - 1);
        self.buf.extend_from_slice(&encoded.to_le_bytes()[..bytes]);
        Ok(())
    }

    pub fn write_packed_i32(&mut self, value: i32) -> Result<(), EncodeError> {
        self.write_packed_u32(zigzag_encode(value))
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn write_quat(&mut self, q: Quat) {
        self.write_f32(q.x);
        self.write_f32(q.y);
        self.write_f32(q.z);
        self.write_f32(q.w);
    }
}

#[derive(Debug, Clone)]
pub struct NetReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NetReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let remaining = self.remaining();
        if remaining < N {
            return Err(DecodeError::UnexpectedEnd {
                needed: N,
                remaining,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn read_packed_u32(&mut self) -> Result<u32, DecodeError> {
        let remaining = self.remaining();
        let Some(&first) = self.data.get(self.pos) else {
            return Err(DecodeError::UnexpectedEnd {
                needed: 1,
                remaining,
            });
        };
        let bytes = (first & 0b11) as usize + 1;
        if remaining < bytes {
            return Err(DecodeError::UnexpectedEnd {
                needed: bytes,
                remaining,
            });
        }
        let mut raw = [0u8; 4];
        raw[..bytes].copy_from_slice(&self.data[self.pos..self.pos + bytes]);
        self.pos += bytes;
        Ok(u32::from_le_bytes(raw) >> 2)
    }

    pub fn read_packed_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_packed_u32().map(zigzag_decode)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, DecodeError> {
        Ok(Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }
}
