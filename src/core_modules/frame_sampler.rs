// THEORY:
// The `FrameSampler` bridges raw frames and the color pipeline. For every frame
// it produces exactly one `ColorLabel`, describing what sits in the inspection
// region.
//
// Key architectural principles:
// 1.  **Two-stage geometry**: The frame is first cropped symmetrically to cut
//     away the conveyor edges, then the region of interest is placed as a
//     fraction of the *cropped* frame. Pixel offsets are truncated toward zero
//     at each stage.
// 2.  **Spatial pooling**: The whole region is reduced to a
//     single average. Averaging cancels single-pixel sensor noise before any
//     decision is made.
// 3.  **Validated once**: The fractions are checked when the sampler is built.
//     At sample time the only remaining failure is a frame too small to hold a
//     region, which yields `None` for the caller to skip.

use crate::config::{CropConfig, RoiConfig};
use crate::core_modules::color_classifier::{ColorLabel, ColorRangeTable};
use crate::core_modules::hsv_pixel::hsv_pixel::{ColorSample, HsvPixel};
use crate::error::ConfigError;
use image::{GenericImageView, RgbImage, imageops};

/// Absolute pixel rectangle, half-open: `[x1, x2) x [y1, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionOfInterest {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl RegionOfInterest {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Result of sampling one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    pub label: ColorLabel,
    pub sample: ColorSample,
    /// Where the region sits in the original, uncropped frame.
    pub region: RegionOfInterest,
}

pub struct FrameSampler {
    crop: CropConfig,
    roi: RoiConfig,
    table: ColorRangeTable,
}

impl FrameSampler {
    pub fn new(crop: CropConfig, roi: RoiConfig, table: ColorRangeTable) -> Result<Self, ConfigError> {
        crop.validate()?;
        roi.validate()?;
        table.validate().map_err(ConfigError::Invalid)?;
        Ok(Self { crop, roi, table })
    }

    /// Computes the crop rectangle `(left, top, width, height)` for a frame size.
    pub fn crop_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let left = (width as f64 * self.crop.left_right) as u32;
        let top = (height as f64 * self.crop.top_bottom) as u32;
        let cropped_width = width.saturating_sub(left * 2);
        let cropped_height = height.saturating_sub(top * 2);
        (left, top, cropped_width, cropped_height)
    }

    /// Places the region inside a cropped frame of the given size.
    pub fn define_roi(&self, width: u32, height: u32) -> RegionOfInterest {
        RegionOfInterest {
            x1: (width as f64 * self.roi.x1) as u32,
            y1: (height as f64 * self.roi.y1) as u32,
            x2: (width as f64 * self.roi.x2) as u32,
            y2: (height as f64 * self.roi.y2) as u32,
        }
    }

    /// Samples one frame. Returns `None` when the frame is too small for the
    /// configured geometry to contain any pixel.
    pub fn sample(&self, frame: &RgbImage) -> Option<FrameSample> {
        let (width, height) = frame.dimensions();

        // --- 1. Crop ---
        let (left, top, cropped_width, cropped_height) = self.crop_rect(width, height);
        if cropped_width == 0 || cropped_height == 0 {
            return None;
        }
        let cropped = imageops::crop_imm(frame, left, top, cropped_width, cropped_height);

        // --- 2. Region of interest (relative to the crop) ---
        let roi = self.define_roi(cropped_width, cropped_height);
        if roi.is_empty() {
            return None;
        }
        let region = cropped.view(roi.x1, roi.y1, roi.width(), roi.height());

        // --- 3. Average in HSV ---
        let sample = ColorSample::mean_of(region.pixels().map(|(_, _, pixel)| HsvPixel::from(pixel)))?;

        // --- 4. Classify ---
        Some(FrameSample {
            label: self.table.classify(&sample),
            sample,
            region: RegionOfInterest {
                x1: left + roi.x1,
                y1: top + roi.y1,
                x2: left + roi.x2,
                y2: top + roi.y2,
            },
        })
    }
}
