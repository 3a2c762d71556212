mod float16;
mod packing;
mod quaternion;

pub use float16::{HALF_MAX, HalfVec3, HalfVec4, dequantize_half, quantize_half, round_trip_half};
pub use packing::{DecodeError, EncodeError, NetReader, NetWriter, PACKED_MAX};
pub use quaternion::{compress_quaternion, decompress_quaternion, normalize_for_compression};
