//! Live preview streaming

pub mod mjpeg;

pub use mjpeg::{content_type, encode_jpeg, live_stream, multipart_chunk, MJPEG_BOUNDARY};
