//! Clip encoders
//!
//! Frames arrive as packed RGB24 and are piped into an FFmpeg child process
//! that writes H.264 into an MP4 container.

use super::state::{RecordingError, RecordingResult};
use crate::capture::{CaptureFormat, Frame};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// An open output file accepting frames
#[async_trait]
pub trait ClipEncoder: Send {
    async fn write_frame(&mut self, frame: &Frame) -> RecordingResult<()>;

    /// Flush and close the container. Returns the number of frames written.
    async fn finish(self: Box<Self>) -> RecordingResult<u64>;
}

/// Opens encoders for new clips
#[async_trait]
pub trait EncoderFactory: Send + Sync {
    async fn create(
        &self,
        output: &Path,
        format: CaptureFormat,
    ) -> RecordingResult<Box<dyn ClipEncoder>>;
}

/// Encoder settings for FFmpeg
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    binary: String,
    preset: String,
    crf: u8,
}

impl FfmpegEncoderFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            preset: "veryfast".to_string(),
            crf: 23,
        }
    }

    pub fn with_quality(mut self, preset: impl Into<String>, crf: u8) -> Self {
        self.preset = preset.into();
        self.crf = crf;
        self
    }

    fn args(&self, output: &Path, format: CaptureFormat) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pixel_format".to_string(),
            "rgb24".to_string(),
            "-video_size".to_string(),
            format!("{}x{}", format.width, format.height),
            "-framerate".to_string(),
            format.fps.max(1).to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.preset.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-g".to_string(),
            (format.fps.max(1) * 2).to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            // The output carries a temporary suffix, so name the muxer
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl EncoderFactory for FfmpegEncoderFactory {
    async fn create(
        &self,
        output: &Path,
        format: CaptureFormat,
    ) -> RecordingResult<Box<dyn ClipEncoder>> {
        let args = self.args(output, format);

        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RecordingError::EncoderStart(format!("failed to run {}: {e}", self.binary))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| {
                RecordingError::EncoderStart("failed to capture FFmpeg stdin".to_string())
            })?;

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps, output: {:?}",
            format.width,
            format.height,
            format.fps,
            output
        );

        Ok(Box::new(FfmpegEncoder {
            process,
            stdin: Some(stdin),
            output: output.to_path_buf(),
            frame_count: 0,
        }))
    }
}

struct FfmpegEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frame_count: u64,
}

#[async_trait]
impl ClipEncoder for FfmpegEncoder {
    async fn write_frame(&mut self, frame: &Frame) -> RecordingResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| {
                RecordingError::EncodingWriteFailed("encoder already closed".to_string())
            })?;

        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| RecordingError::EncodingWriteFailed(format!("FFmpeg stdin: {e}")))?;
        self.frame_count += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> RecordingResult<u64> {
        // Closing stdin signals EOF
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        let FfmpegEncoder {
            process,
            output,
            frame_count,
            ..
        } = *self;

        let result = process
            .wait_with_output()
            .await
            .map_err(|e| RecordingError::EncodingWriteFailed(format!("waiting for FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            tracing::warn!("FFmpeg exited with status {}: {}", result.status, stderr.trim());
            return Err(RecordingError::EncodingWriteFailed(format!(
                "FFmpeg exited with {}",
                result.status
            )));
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => {
                return Err(RecordingError::EncodingWriteFailed(format!(
                    "no output written to {output:?}"
                )))
            }
        }

        tracing::info!("FFmpeg finished: {} frames, output: {:?}", frame_count, output);
        Ok(frame_count)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Encoders that avoid FFmpeg: raw frames are appended to the output file.

    use super::*;
    use tokio::fs::File;

    pub struct RawFileEncoderFactory;

    #[async_trait]
    impl EncoderFactory for RawFileEncoderFactory {
        async fn create(
            &self,
            output: &Path,
            _format: CaptureFormat,
        ) -> RecordingResult<Box<dyn ClipEncoder>> {
            let file = File::create(output)
                .await
                .map_err(|e| RecordingError::EncoderStart(e.to_string()))?;
            Ok(Box::new(RawFileEncoder { file, frames: 0 }))
        }
    }

    struct RawFileEncoder {
        file: File,
        frames: u64,
    }

    #[async_trait]
    impl ClipEncoder for RawFileEncoder {
        async fn write_frame(&mut self, frame: &Frame) -> RecordingResult<()> {
            self.file.write_all(&frame.data).await?;
            self.frames += 1;
            Ok(())
        }

        async fn finish(mut self: Box<Self>) -> RecordingResult<u64> {
            self.file.flush().await?;
            Ok(self.frames)
        }
    }

    /// Cannot open its output at all
    pub struct UnwritableFactory;

    #[async_trait]
    impl EncoderFactory for UnwritableFactory {
        async fn create(
            &self,
            output: &Path,
            _format: CaptureFormat,
        ) -> RecordingResult<Box<dyn ClipEncoder>> {
            Err(RecordingError::EncoderStart(format!("permission denied: {output:?}")))
        }
    }

    /// Opens fine, then refuses to finalize
    pub struct BrokenFinishFactory;

    #[async_trait]
    impl EncoderFactory for BrokenFinishFactory {
        async fn create(
            &self,
            output: &Path,
            format: CaptureFormat,
        ) -> RecordingResult<Box<dyn ClipEncoder>> {
            let inner = RawFileEncoderFactory.create(output, format).await?;
            Ok(Box::new(BrokenFinish { inner }))
        }
    }

    struct BrokenFinish {
        inner: Box<dyn ClipEncoder>,
    }

    #[async_trait]
    impl ClipEncoder for BrokenFinish {
        async fn write_frame(&mut self, frame: &Frame) -> RecordingResult<()> {
            self.inner.write_frame(frame).await
        }

        async fn finish(self: Box<Self>) -> RecordingResult<u64> {
            Err(RecordingError::EncodingWriteFailed("disk full".to_string()))
        }
    }
}
