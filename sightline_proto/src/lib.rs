mod frame;
mod message;

pub use frame::{
    FrameConfig, FrameError, FrameTransport, LengthOrder, DEFAULT_MAX_FRAME_LEN, HEADER_LEN,
};
pub use message::{BoundingBox, DecodeError, Detection, DetectionResult, SCHEMA_VERSION};
