//! Framing that carries a serialized [`TransformState`](crate::state::TransformState)
//! across a transport together with the object it belongs to.

use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::host::{Delivery, ObjectId};

pub const ENVELOPE_MAGIC: u32 = 0x5452_5359;
pub const ENVELOPE_VERSION: u16 = 1;
pub const MAX_ENVELOPE_SIZE: usize = 1200;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad envelope header (magic {magic:#x}, version {version})")]
    BadHeader { magic: u32, version: u16 },
    #[error("envelope of {0} bytes exceeds the {MAX_ENVELOPE_SIZE} byte limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct Envelope {
    pub magic: u32,
    pub version: u16,
    pub object_id: u64,
    pub tick: i32,
    pub reliable: bool,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(object: ObjectId, tick: i32, delivery: Delivery, payload: Vec<u8>) -> Self {
        Self {
            magic: ENVELOPE_MAGIC,
            version: ENVELOPE_VERSION,
            object_id: object.0,
            tick,
            reliable: delivery == Delivery::Reliable,
            payload,
        }
    }

    pub fn object(&self) -> ObjectId {
        ObjectId(self.object_id)
    }

    pub fn delivery(&self) -> Delivery {
        if self.reliable {
            Delivery::Reliable
        } else {
            Delivery::Unreliable
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == ENVELOPE_MAGIC && self.version == ENVELOPE_VERSION
    }

    pub fn serialize(&self) -> Result<Vec<u8>, EnvelopeError> {
        let bytes = rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(EnvelopeError::Serialize)?;
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decodes and validates an envelope. The input does not need to be
    /// aligned.
    pub fn deserialize(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        let envelope = rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(EnvelopeError::Deserialize)?;
        if !envelope.is_valid() {
            return Err(EnvelopeError::BadHeader {
                magic: envelope.magic,
                version: envelope.version,
            });
        }
        Ok(envelope)
    }
}
