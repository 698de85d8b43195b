// THEORY:
// Calibration learns what the empty conveyor looks like so that it can be
// ignored. The operator clears the belt, starts calibration, and for a fixed
// window every classified frame is collected instead of being acted upon.
//
// Key architectural principles:
// 1.  **Bounded memory**: The collector keeps at most `sample_target` labels,
//     dropping the oldest. Only the most recent window is judged.
// 2.  **Unanimity**: A background is only learned if the buffer is full and
//     every label in it agrees. Anything else is a designed failure, not an
//     error, and leaves the previous background in place.
// 3.  **No clock**: The collector never decides *when* to stop. An external
//     timer calls `finish`, which must cope with any number of samples,
//     including none.

use crate::core_modules::color_classifier::ColorLabel;
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_SAMPLE_TARGET: usize = 50;

/// Why a calibration run did not produce a background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFailure {
    InsufficientSamples { collected: usize, required: usize },
    InconsistentColors,
}

impl fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationFailure::InsufficientSamples { collected, required } => {
                write!(f, "insufficient samples ({collected} of {required})")
            }
            CalibrationFailure::InconsistentColors => f.write_str("inconsistent colors"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    Passed(ColorLabel),
    Failed(CalibrationFailure),
}

impl CalibrationOutcome {
    /// "PASSED" or "FAILED".
    pub fn status(&self) -> &'static str {
        match self {
            CalibrationOutcome::Passed(_) => "PASSED",
            CalibrationOutcome::Failed(_) => "FAILED",
        }
    }

    /// The learned color, or a human-readable reason.
    pub fn detail(&self) -> String {
        match self {
            CalibrationOutcome::Passed(color) => color.to_string(),
            CalibrationOutcome::Failed(reason) => reason.to_string(),
        }
    }
}

pub struct CalibrationController {
    buffer: VecDeque<ColorLabel>,
    sample_target: usize,
    active: bool,
}

impl CalibrationController {
    pub fn new(sample_target: usize) -> Self {
        let sample_target = sample_target.max(1);
        Self {
            buffer: VecDeque::with_capacity(sample_target + 1),
            sample_target,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn collected(&self) -> usize {
        self.buffer.len()
    }

    pub fn sample_target(&self) -> usize {
        self.sample_target
    }

    pub fn start(&mut self) {
        self.buffer.clear();
        self.active = true;
    }

    /// Records a label. Ignored unless a run is in progress.
    pub fn on_sample(&mut self, label: ColorLabel) {
        if !self.active {
            return;
        }
        self.buffer.push_back(label);
        if self.buffer.len() > self.sample_target {
            self.buffer.pop_front();
        }
    }

    /// Ends the run and judges it. Returns `None` if no run was in progress.
    pub fn finish(&mut self) -> Option<CalibrationOutcome> {
        if !self.active {
            return None;
        }
        self.active = false;

        if self.buffer.len() < self.sample_target {
            return Some(CalibrationOutcome::Failed(CalibrationFailure::InsufficientSamples {
                collected: self.buffer.len(),
                required: self.sample_target,
            }));
        }

        let first = self.buffer[0];
        if self.buffer.iter().all(|label| *label == first) {
            Some(CalibrationOutcome::Passed(first))
        } else {
            Some(CalibrationOutcome::Failed(CalibrationFailure::InconsistentColors))
        }
    }
}

impl Default for CalibrationController {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_TARGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ColorLabel::*;

    fn run(labels: impl IntoIterator<Item = ColorLabel>) -> Option<CalibrationOutcome> {
        let mut calibration = CalibrationController::default();
        calibration.start();
        for label in labels {
            calibration.on_sample(label);
        }
        calibration.finish()
    }

    #[test]
    fn fifty_identical_samples_pass() {
        let outcome = run(std::iter::repeat(White).take(50));
        assert_eq!(outcome, Some(CalibrationOutcome::Passed(White)));
        assert_eq!(outcome.unwrap().status(), "PASSED");
        assert_eq!(outcome.unwrap().detail(), "WHITE");
    }

    #[test]
    fn unknown_can_be_learned_as_background() {
        let outcome = run(std::iter::repeat(Unknown).take(50));
        assert_eq!(outcome, Some(CalibrationOutcome::Passed(Unknown)));
    }

    #[test]
    fn one_differing_sample_fails() {
        for position in [0, 25, 49] {
            let labels = (0..50).map(|i| if i == position { Green } else { White });
            assert_eq!(
                run(labels),
                Some(CalibrationOutcome::Failed(CalibrationFailure::InconsistentColors))
            );
        }
    }

    #[test]
    fn too_few_samples_fail() {
        let outcome = run(std::iter::repeat(White).take(49)).unwrap();
        assert_eq!(
            outcome,
            CalibrationOutcome::Failed(CalibrationFailure::InsufficientSamples { collected: 49, required: 50 })
        );
        assert_eq!(outcome.status(), "FAILED");
        assert!(outcome.detail().starts_with("insufficient samples"));
    }

    #[test]
    fn finishing_with_no_samples_fails_cleanly() {
        let outcome = run(std::iter::empty()).unwrap();
        assert!(matches!(
            outcome,
            CalibrationOutcome::Failed(CalibrationFailure::InsufficientSamples { collected: 0, .. })
        ));
    }

    #[test]
    fn only_the_latest_window_is_judged() {
        // A stray early sample is pushed out by 50 later identical ones.
        let labels = std::iter::once(Green).chain(std::iter::repeat(White).take(50));
        assert_eq!(run(labels), Some(CalibrationOutcome::Passed(White)));
    }

    #[test]
    fn finish_without_start_is_a_no_op() {
        let mut calibration = CalibrationController::default();
        assert_eq!(calibration.finish(), None);
        calibration.start();
        calibration.finish();
        assert_eq!(calibration.finish(), None);
    }

    #[test]
    fn samples_outside_a_run_are_ignored() {
        let mut calibration = CalibrationController::default();
        calibration.on_sample(White);
        assert_eq!(calibration.collected(), 0);
        calibration.start();
        for _ in 0..80 {
            calibration.on_sample(White);
        }
        assert_eq!(calibration.collected(), 50);
    }
}
