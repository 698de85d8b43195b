// THEORY:
// The `color_classifier` turns an averaged `ColorSample` into one of a small,
// fixed set of `ColorLabel`s. It is the only place where "numbers" become
// "colors".
//
// Key architectural principles:
// 1.  **Ordered, first-match table**: The table is an explicit `Vec` of range
//     rules, searched front to back. Ranges may overlap; the earlier rule wins.
//     The order is part of the behavior and is tested as such.
// 2.  **Totality**: Every possible sample yields exactly one label. Anything no
//     rule claims is `Unknown`. There is no error path.
// 3.  **Linear hue**: Hue is not treated as circular. Red straddles the wrap
//     point, so it is split into two rules (`Red` low, `Red2` high) that remain
//     distinct labels downstream.

use crate::core_modules::hsv_pixel::hsv_pixel::ColorSample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The discrete colors the sorter can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorLabel {
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "RED2")]
    Red2,
    #[serde(rename = "ORANGE")]
    Orange,
    #[serde(rename = "YELLOW")]
    Yellow,
    #[serde(rename = "GREEN")]
    Green,
    #[serde(rename = "BLUE")]
    Blue,
    #[serde(rename = "PINK")]
    Pink,
    #[serde(rename = "WHITE")]
    White,
    #[serde(rename = "BLACK")]
    Black,
    #[serde(rename = "UNKNOWN")]
    Unknown,
    /// Not produced by classification. Reported when a settled color matches
    /// the learned background.
    #[serde(rename = "BACKGROUND")]
    Background,
}

impl ColorLabel {
    pub const ALL: [ColorLabel; 11] = [
        ColorLabel::Red,
        ColorLabel::Red2,
        ColorLabel::Orange,
        ColorLabel::Yellow,
        ColorLabel::Green,
        ColorLabel::Blue,
        ColorLabel::Pink,
        ColorLabel::White,
        ColorLabel::Black,
        ColorLabel::Unknown,
        ColorLabel::Background,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorLabel::Red => "RED",
            ColorLabel::Red2 => "RED2",
            ColorLabel::Orange => "ORANGE",
            ColorLabel::Yellow => "YELLOW",
            ColorLabel::Green => "GREEN",
            ColorLabel::Blue => "BLUE",
            ColorLabel::Pink => "PINK",
            ColorLabel::White => "WHITE",
            ColorLabel::Black => "BLACK",
            ColorLabel::Unknown => "UNKNOWN",
            ColorLabel::Background => "BACKGROUND",
        }
    }
}

impl fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorLabel::ALL
            .iter()
            .copied()
            .find(|label| label.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown color label: {s}"))
    }
}

/// One inclusive HSV box mapped to a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub label: ColorLabel,
    /// Lower (h, s, v) bound, inclusive.
    pub lower: [u8; 3],
    /// Upper (h, s, v) bound, inclusive.
    pub upper: [u8; 3],
}

impl ColorRange {
    pub fn new(label: ColorLabel, lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { label, lower, upper }
    }

    pub fn contains(&self, sample: &ColorSample) -> bool {
        let components = [sample.h, sample.s, sample.v];
        components
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(value, (lower, upper))| *lower as f64 <= *value && *value <= *upper as f64)
    }
}

/// The ordered rule list. Order is significant: first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorRangeTable {
    ranges: Vec<ColorRange>,
}

impl ColorRangeTable {
    pub fn new(ranges: Vec<ColorRange>) -> Self {
        Self { ranges }
    }

    pub fn ranges(&self) -> &[ColorRange] {
        &self.ranges
    }

    /// Returns the label of the first range containing `sample`, or `Unknown`.
    pub fn classify(&self, sample: &ColorSample) -> ColorLabel {
        self.ranges
            .iter()
            .find(|range| range.contains(sample))
            .map(|range| range.label)
            .unwrap_or(ColorLabel::Unknown)
    }

    /// Checks that every rule is a non-empty box over a real color label.
    pub fn validate(&self) -> Result<(), String> {
        for (index, range) in self.ranges.iter().enumerate() {
            if matches!(range.label, ColorLabel::Unknown | ColorLabel::Background) {
                return Err(format!(
                    "color range #{index} uses reserved label {}",
                    range.label
                ));
            }
            let inverted = range
                .lower
                .iter()
                .zip(range.upper.iter())
                .any(|(lower, upper)| lower > upper);
            if inverted {
                return Err(format!(
                    "color range #{index} ({}) has a lower bound above its upper bound",
                    range.label
                ));
            }
        }
        Ok(())
    }
}

impl Default for ColorRangeTable {
    fn default() -> Self {
        use ColorLabel::*;
        Self::new(vec![
            ColorRange::new(Red, [0, 100, 100], [10, 255, 255]),
            ColorRange::new(Red2, [160, 100, 100], [180, 255, 255]),
            ColorRange::new(Orange, [11, 100, 100], [25, 255, 255]),
            ColorRange::new(Yellow, [26, 100, 100], [35, 255, 255]),
            ColorRange::new(Green, [36, 50, 50], [85, 255, 255]),
            ColorRange::new(Blue, [86, 50, 50], [130, 255, 255]),
            ColorRange::new(Pink, [140, 50, 50], [160, 255, 255]),
            ColorRange::new(White, [0, 0, 200], [180, 30, 255]),
            ColorRange::new(Black, [0, 0, 0], [180, 255, 50]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(h: f64, s: f64, v: f64) -> ColorSample {
        ColorSample::new(h, s, v)
    }

    #[test]
    fn green_sample_classifies_as_green() {
        let table = ColorRangeTable::default();
        assert_eq!(table.classify(&sample(50.0, 100.0, 100.0)), ColorLabel::Green);
    }

    #[test]
    fn bounds_are_inclusive() {
        let table = ColorRangeTable::default();
        assert_eq!(table.classify(&sample(36.0, 50.0, 50.0)), ColorLabel::Green);
        assert_eq!(table.classify(&sample(85.0, 255.0, 255.0)), ColorLabel::Green);
        assert_eq!(table.classify(&sample(85.5, 255.0, 255.0)), ColorLabel::Unknown);
    }

    #[test]
    fn unmatched_samples_are_unknown() {
        let table = ColorRangeTable::default();
        // Hue 135 falls in the gap between BLUE and PINK; mid grey is neither white nor black.
        assert_eq!(table.classify(&sample(135.0, 200.0, 200.0)), ColorLabel::Unknown);
        assert_eq!(table.classify(&sample(0.0, 0.0, 128.0)), ColorLabel::Unknown);
    }

    #[test]
    fn earlier_rule_wins_on_overlap() {
        let table = ColorRangeTable::default();
        // (160, 100, 100) is both RED2 and PINK; RED2 is declared first.
        assert_eq!(table.classify(&sample(160.0, 100.0, 100.0)), ColorLabel::Red2);
        // Too dark for RED, so it falls through to BLACK.
        assert_eq!(table.classify(&sample(5.0, 200.0, 40.0)), ColorLabel::Black);
        assert_eq!(table.classify(&sample(5.0, 200.0, 100.0)), ColorLabel::Red);

        let reordered = ColorRangeTable::new(vec![
            ColorRange::new(ColorLabel::Pink, [140, 50, 50], [160, 255, 255]),
            ColorRange::new(ColorLabel::Red2, [160, 100, 100], [180, 255, 255]),
        ]);
        assert_eq!(reordered.classify(&sample(160.0, 100.0, 100.0)), ColorLabel::Pink);
    }

    #[test]
    fn classifier_is_total_over_the_hsv_domain() {
        let table = ColorRangeTable::default();
        for h in (0..=180).step_by(6) {
            for s in (0..=255).step_by(15) {
                for v in (0..=255).step_by(15) {
                    let label = table.classify(&sample(h as f64, s as f64, v as f64));
                    assert_ne!(label, ColorLabel::Background);
                }
            }
        }
    }

    #[test]
    fn empty_table_classifies_everything_unknown() {
        let table = ColorRangeTable::new(Vec::new());
        assert_eq!(table.classify(&sample(50.0, 100.0, 100.0)), ColorLabel::Unknown);
    }

    #[test]
    fn validation_rejects_inverted_and_reserved_rules() {
        let inverted = ColorRangeTable::new(vec![ColorRange::new(ColorLabel::Green, [90, 0, 0], [80, 255, 255])]);
        assert!(inverted.validate().is_err());

        let reserved = ColorRangeTable::new(vec![ColorRange::new(ColorLabel::Background, [0, 0, 0], [180, 255, 255])]);
        assert!(reserved.validate().is_err());

        assert!(ColorRangeTable::default().validate().is_ok());
    }

    #[test]
    fn labels_round_trip_through_their_names() {
        for label in ColorLabel::ALL {
            assert_eq!(label.name().parse::<ColorLabel>(), Ok(label));
        }
        assert_eq!("green".parse::<ColorLabel>(), Ok(ColorLabel::Green));
        assert!("purple".parse::<ColorLabel>().is_err());
    }
}
