//! FrameCapture - Single-frame grabs from a V4L2 camera
//!
//! ## Responsibilities
//!
//! - Open the capture device by index (`/dev/video<N>`)
//! - Grab one frame per call via ffmpeg, already scaled and cropped to the
//!   model's input size
//! - Pack pixels into classifier features

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Model input geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    /// 3 = RGB, 1 = grayscale
    pub channels: u32,
}

impl InputSpec {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    fn pixel_format(&self) -> &'static str {
        if self.channels == 1 {
            "gray"
        } else {
            "rgb24"
        }
    }
}

/// Raw frame at model resolution
#[derive(Debug, Clone)]
pub struct Frame {
    pub spec: InputSpec,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// One feature per pixel: `0xRRGGBB` as a float (gray is replicated).
    pub fn to_features(&self) -> Vec<f32> {
        match self.spec.channels {
            1 => self
                .pixels
                .iter()
                .map(|&v| pack_rgb(v, v, v))
                .collect(),
            _ => self
                .pixels
                .chunks_exact(3)
                .map(|px| pack_rgb(px[0], px[1], px[2]))
                .collect(),
        }
    }
}

fn pack_rgb(r: u8, g: u8, b: u8) -> f32 {
    (((r as u32) << 16) | ((g as u32) << 8) | b as u32) as f32
}

/// Something that can hand over one frame per call
#[async_trait]
pub trait FrameGrabber: Send {
    /// Grab a single frame. Failures are `Error::Capture` (recoverable).
    async fn grab(&mut self, spec: &InputSpec) -> Result<Frame>;

    /// Release the device. Idempotent.
    fn release(&mut self);
}

/// V4L2 camera read through ffmpeg
pub struct V4l2Camera {
    device: PathBuf,
    timeout: Duration,
    open: bool,
}

impl V4l2Camera {
    /// Open `/dev/video<index>`
    pub fn open(index: u32, timeout: Duration) -> Result<Self> {
        Self::open_path(PathBuf::from(format!("/dev/video{}", index)), timeout)
    }

    /// Open an explicit device node
    pub fn open_path(device: PathBuf, timeout: Duration) -> Result<Self> {
        if !device.exists() {
            return Err(Error::DeviceUnavailable(format!(
                "cannot open camera device {}",
                device.display()
            )));
        }
        tracing::info!(device = %device.display(), "Camera device opened");
        Ok(Self {
            device,
            timeout,
            open: true,
        })
    }

    fn ffmpeg_args(&self, spec: &InputSpec) -> Vec<String> {
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}",
            w = spec.width,
            h = spec.height
        );
        vec![
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "v4l2".into(),
            "-i".into(),
            self.device.display().to_string(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            filter,
            "-pix_fmt".into(),
            spec.pixel_format().into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]
    }
}

#[async_trait]
impl FrameGrabber for V4l2Camera {
    async fn grab(&mut self, spec: &InputSpec) -> Result<Frame> {
        if !self.open {
            return Err(Error::Capture("camera released".to_string()));
        }

        // kill_on_drop: a timed-out ffmpeg is killed when the future is dropped.
        // Own process group: a terminal Ctrl-C must not abort an in-flight grab.
        let child = Command::new("ffmpeg")
            .args(self.ffmpeg_args(spec))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::Capture(format!("ffmpeg execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    device = %self.device.display(),
                    timeout_sec = self.timeout.as_secs(),
                    "ffmpeg timeout, process killed"
                );
                return Err(Error::Capture(format!(
                    "ffmpeg timeout ({}s)",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Capture(format!("ffmpeg failed: {}", stderr.trim())));
        }

        if output.stdout.len() != spec.frame_len() {
            return Err(Error::Capture(format!(
                "short frame: got {} bytes, expected {}",
                output.stdout.len(),
                spec.frame_len()
            )));
        }

        Ok(Frame {
            spec: *spec,
            pixels: output.stdout,
        })
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            tracing::info!(device = %self.device.display(), "Camera device released");
        }
    }
}
