// THEORY:
// The `HsvPixel` module is the most fundamental unit of the sorter's color
// pipeline. Cameras deliver RGB, but the color table is written in HSV because
// hue separates "which color" from "how bright" far better than raw channels.
//
// Key architectural principles:
// 1.  **8-bit HSV convention**: Hue is stored as degrees / 2 so it fits a byte
//     (0..180), saturation and value are scaled to 0..255. This is the
//     convention the color table bounds are expressed in, so conversion must
//     match it exactly, including rounding.
// 2.  **Per-pixel conversion, then averaging**: The region color is the mean of
//     the per-pixel HSV values, not the HSV of the mean RGB. The two differ for
//     mixed regions and the table was tuned against the former.
// 3.  **Dumb data**: `HsvPixel` and `ColorSample` know how to build themselves
//     and nothing else. Deciding what a sample *means* belongs to the classifier.

pub mod hsv_pixel {
    use image::Rgb;

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;

    /// Number of hue steps in the 8-bit convention; hues lie in 0..180.
    pub const HUE_RANGE: f32 = 180.0;

    /// A single pixel in 8-bit HSV.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HsvPixel {
        /// Hue in half-degrees (0..180).
        pub hue: Hue,
        /// Saturation (0..255).
        pub saturation: Saturation,
        /// Value, the brightest channel (0..255).
        pub value: Value,
    }

    impl HsvPixel {
        pub fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
            let maximum_channel = red.max(green).max(blue);
            let minimum_channel = red.min(green).min(blue);
            let chroma = (maximum_channel - minimum_channel) as f32;

            let saturation = if maximum_channel == 0 {
                0.0
            } else {
                chroma * 255.0 / maximum_channel as f32
            };

            if chroma <= 0.0 {
                return Self {
                    hue: 0,
                    saturation: saturation.round() as Saturation,
                    value: maximum_channel,
                };
            }

            let (red, green, blue) = (red as f32, green as f32, blue as f32);
            let maximum = maximum_channel as f32;

            // Red wins ties, then green, as in OpenCV.
            let degrees = if maximum == red {
                (green - blue) * 60.0 / chroma
            } else if maximum == green {
                120.0 + (blue - red) * 60.0 / chroma
            } else {
                240.0 + (red - green) * 60.0 / chroma
            };

            // Half steps round up, as OpenCV's fixed-point division does,
            // so -0.5 lands on 0 rather than wrapping to 179.
            let mut hue = (degrees / 2.0 + 0.5).floor();
            if hue < 0.0 {
                hue += HUE_RANGE;
            }
            if hue >= HUE_RANGE {
                hue -= HUE_RANGE;
            }

            Self {
                hue: hue as Hue,
                saturation: saturation.round() as Saturation,
                value: maximum_channel,
            }
        }
    }

    impl From<Rgb<u8>> for HsvPixel {
        fn from(pixel: Rgb<u8>) -> Self {
            let [red, green, blue] = pixel.0;
            Self::from_rgb(red, green, blue)
        }
    }

    impl From<&Rgb<u8>> for HsvPixel {
        fn from(pixel: &Rgb<u8>) -> Self {
            Self::from(*pixel)
        }
    }

    /// The averaged color of a region: per-channel arithmetic mean of `HsvPixel`s.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct ColorSample {
        pub h: f64,
        pub s: f64,
        pub v: f64,
    }

    impl ColorSample {
        pub fn new(h: f64, s: f64, v: f64) -> Self {
            Self { h, s, v }
        }

        /// Averages a set of pixels. Returns `None` for an empty set, since the
        /// mean of nothing is undefined.
        pub fn mean_of<I>(pixels: I) -> Option<Self>
        where
            I: IntoIterator<Item = HsvPixel>,
        {
            let mut count = 0u64;
            let mut sum_h = 0u64;
            let mut sum_s = 0u64;
            let mut sum_v = 0u64;

            for pixel in pixels {
                sum_h += pixel.hue as u64;
                sum_s += pixel.saturation as u64;
                sum_v += pixel.value as u64;
                count += 1;
            }

            if count == 0 {
                return None;
            }

            let count = count as f64;
            Some(Self {
                h: sum_h as f64 / count,
                s: sum_s as f64 / count,
                v: sum_v as f64 / count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::hsv_pixel::*;

    #[test]
    fn primaries_map_to_half_degree_hues() {
        assert_eq!(HsvPixel::from_rgb(255, 0, 0), HsvPixel { hue: 0, saturation: 255, value: 255 });
        assert_eq!(HsvPixel::from_rgb(0, 255, 0), HsvPixel { hue: 60, saturation: 255, value: 255 });
        assert_eq!(HsvPixel::from_rgb(0, 0, 255), HsvPixel { hue: 120, saturation: 255, value: 255 });
    }

    #[test]
    fn greys_have_no_hue_or_saturation() {
        let grey = HsvPixel::from_rgb(128, 128, 128);
        assert_eq!(grey.hue, 0);
        assert_eq!(grey.saturation, 0);
        assert_eq!(grey.value, 128);
        assert_eq!(HsvPixel::from_rgb(0, 0, 0), HsvPixel::default());
    }

    #[test]
    fn magenta_side_of_red_wraps_high() {
        // Red with a touch of blue sits just below 180, not negative.
        let pixel = HsvPixel::from_rgb(255, 0, 20);
        assert!(pixel.hue > 170 && pixel.hue < 180, "hue was {}", pixel.hue);
    }

    #[test]
    fn negative_half_step_rounds_up_to_zero() {
        assert_eq!(HsvPixel::from_rgb(120, 0, 2).hue, 0);
        assert_eq!(HsvPixel::from_rgb(60, 0, 1).hue, 0);
        // Positive half steps round up as well: 1 degree is half a step.
        assert_eq!(HsvPixel::from_rgb(60, 1, 0).hue, 1);
    }

    #[test]
    fn mean_of_empty_region_is_undefined() {
        assert_eq!(ColorSample::mean_of(Vec::<HsvPixel>::new()), None);
    }

    #[test]
    fn mean_is_per_channel() {
        let pixels = vec![
            HsvPixel { hue: 10, saturation: 100, value: 200 },
            HsvPixel { hue: 20, saturation: 200, value: 100 },
        ];
        let sample = ColorSample::mean_of(pixels).unwrap();
        assert_eq!(sample, ColorSample::new(15.0, 150.0, 150.0));
    }
}
