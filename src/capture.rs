// THEORY:
// Capture is the producer side of the sorter. A `FrameSource` yields frames,
// `run_sampling` turns each one into a label with the `FrameSampler` and offers
// it to the controller.
//
// Key architectural principles:
// 1.  **Blocking by nature**: Camera reads block, so the sampling loop is plain
//     synchronous code meant to run on a blocking thread, not on the async
//     executor.
// 2.  **Never stall on the consumer**: Labels are offered with a non-blocking
//     send. A busy controller costs a dropped sample, never a late frame.
// 3.  **Sources are swappable**: A directory of still images replays a recorded
//     run without hardware. A live camera or stream is available through OpenCV
//     behind the `opencv` feature.

use crate::controller::SorterHandle;
use crate::core_modules::frame_sampler::FrameSampler;
use crate::error::CaptureError;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, trace, warn};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "ppm"];

pub trait FrameSource: Send {
    /// Returns the next frame, or `None` at the end of the stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

/// Replays still images from disk in file-name order.
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    next: usize,
    looping: bool,
    interval: Option<Duration>,
}

impl ImageSequenceSource {
    /// Opens a directory of frames, or a single image file.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let frames = if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            let entries = std::fs::read_dir(path)
                .map_err(|err| CaptureError::Unavailable(format!("{}: {err}", path.display())))?;
            let mut frames: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|candidate| candidate.is_file() && is_frame_file(candidate))
                .collect();
            frames.sort();
            frames
        };

        if frames.is_empty() {
            return Err(CaptureError::Unavailable(format!(
                "no image frames in {}",
                path.display()
            )));
        }
        info!(path = %path.display(), frames = frames.len(), "image sequence opened");

        Ok(Self {
            frames,
            next: 0,
            looping: false,
            interval: None,
        })
    }

    /// Start over from the first frame instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Pace playback, e.g. `Duration::from_millis(33)` for roughly 30 fps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        if self.next >= self.frames.len() {
            if !self.looping {
                return Ok(None);
            }
            self.next = 0;
        }
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }

        let path = &self.frames[self.next];
        self.next += 1;
        let frame = image::open(path).map_err(|source| CaptureError::Decode {
            path: path.clone(),
            source,
        })?;
        Ok(Some(frame.to_rgb8()))
    }
}

#[cfg(feature = "opencv")]
pub mod camera {
    //! Live capture from a camera index, video file or stream URL.

    use super::FrameSource;
    use crate::error::CaptureError;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use tracing::info;

    pub struct OpenCvSource {
        capture: VideoCapture,
        frame: Mat,
    }

    impl OpenCvSource {
        /// `source` is a camera index such as `0`, or anything OpenCV can open
        /// by name (a file path, an `rtsp://` URL).
        pub fn open(source: &str) -> Result<Self, CaptureError> {
            let capture = match source.parse::<i32>() {
                Ok(index) => VideoCapture::new(index, videoio::CAP_ANY),
                Err(_) => VideoCapture::from_file(source, videoio::CAP_ANY),
            }
            .map_err(|err| CaptureError::Unavailable(format!("{source}: {err}")))?;

            let opened = capture
                .is_opened()
                .map_err(|err| CaptureError::Unavailable(format!("{source}: {err}")))?;
            if !opened {
                return Err(CaptureError::Unavailable(format!("could not open {source}")));
            }
            info!(%source, "camera opened");

            Ok(Self {
                capture,
                frame: Mat::default(),
            })
        }
    }

    impl FrameSource for OpenCvSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, CaptureError> {
            let grabbed = self
                .capture
                .read(&mut self.frame)
                .map_err(|err| CaptureError::Read(err.to_string()))?;
            if !grabbed || self.frame.empty() {
                return Ok(None);
            }

            // OpenCV delivers BGR.
            let mut rgb = Mat::default();
            imgproc::cvt_color(&self.frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
                .map_err(|err| CaptureError::Read(err.to_string()))?;
            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let buffer = rgb
                .data_bytes()
                .map_err(|err| CaptureError::Read(err.to_string()))?
                .to_vec();

            RgbImage::from_raw(width, height, buffer)
                .map(Some)
                .ok_or_else(|| CaptureError::Read(format!("unexpected buffer size for {width}x{height} frame")))
        }
    }
}

/// Counters for one sampling run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplingStats {
    pub frames: u64,
    pub submitted: u64,
    /// Offered while the controller inbox was full.
    pub dropped: u64,
    /// Frames too small to hold the region of interest.
    pub skipped: u64,
}

/// Pulls frames until the source ends, fails, or the controller goes away.
///
/// Blocks the calling thread. The reason the loop ended is reported to the
/// controller before returning.
pub fn run_sampling(source: &mut dyn FrameSource, sampler: &FrameSampler, handle: &SorterHandle) -> SamplingStats {
    let mut stats = SamplingStats::default();

    let reason = loop {
        if handle.is_closed() {
            break "controller stopped".to_string();
        }

        // --- 1. Grab ---
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break "end of stream".to_string(),
            Err(err) => {
                error!(error = %err, "frame capture failed");
                break err.to_string();
            }
        };
        stats.frames += 1;

        // --- 2. Sample ---
        let Some(sample) = sampler.sample(&frame) else {
            stats.skipped += 1;
            warn!(
                width = frame.width(),
                height = frame.height(),
                "frame too small for the region of interest, skipped"
            );
            continue;
        };
        trace!(
            label = %sample.label,
            h = sample.sample.h,
            s = sample.sample.s,
            v = sample.sample.v,
            "frame sampled"
        );

        // --- 3. Offer ---
        if handle.try_submit_sample(sample.label) {
            stats.submitted += 1;
        } else {
            stats.dropped += 1;
        }
    };

    info!(?stats, %reason, "sampling finished");
    handle.report_sampling_stopped(reason);
    stats
}
