use crate::codec::{DecodeError, EncodeError};
use crate::envelope::EnvelopeError;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("failed to decode transform state: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode transform state: {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}
