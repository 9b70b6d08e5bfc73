//! Live MJPEG preview
//!
//! A lazy stream of `multipart/x-mixed-replace` parts, one JPEG per frame.
//! The HTTP layer pulls it; when the client goes away the stream is dropped
//! and with it the camera lease.

use crate::capture::{Frame, FrameSource};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::io;
use tokio_util::sync::CancellationToken;

/// Boundary token separating parts
pub const MJPEG_BOUNDARY: &str = "frame";

/// Content type of the whole response
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
}

/// Encode one RGB24 frame as JPEG
pub fn encode_jpeg(frame: &Frame, quality: u8) -> io::Result<Vec<u8>> {
    // The encoder panics on a short buffer
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame has {} bytes, expected {}", frame.data.len(), expected),
        ));
    }

    let mut jpeg = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(jpeg)
}

/// Wrap an encoded image as one multipart part
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Turn a frame source into a body stream.
///
/// Ends when the camera stops or `shutdown` fires. A frame that fails to
/// encode is skipped rather than ending the preview.
pub fn live_stream(
    source: FrameSource,
    quality: u8,
    shutdown: CancellationToken,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let parts = stream::unfold(source, move |mut source| async move {
        loop {
            let frame = source.next_frame().await?;
            let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality)).await;

            match encoded {
                Ok(Ok(jpeg)) => return Some((Ok(multipart_chunk(&jpeg)), source)),
                Ok(Err(e)) => tracing::warn!("Dropping preview frame: {}", e),
                Err(e) => tracing::warn!("Preview encoder task failed: {}", e),
            }
        }
    });

    parts.take_until(shutdown.cancelled_owned())
}
