mod flags;
mod transform_state;

pub use flags::{Channel, StateFlags};
pub use transform_state::{PositionEncoding, RotationEncoding, ScaleEncoding, TransformState};
