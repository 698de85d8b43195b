// THEORY:
// A single misclassified frame (motion blur, a glint, a hand in the way) must
// never move a servo. The `DebounceWindow` holds the last few labels and only
// reports a color once every one of them agrees.
//
// Key architectural principles:
// 1.  **Discard-oldest window**: A fixed-capacity `VecDeque`; a new label pushes
//     the oldest one out.
// 2.  **Edge-triggered**: A run of identical labels settles exactly once. The
//     window re-arms after it has seen disagreement or when it settles on a
//     different label than last time, so a steady color does not flood the
//     decision layer with repeats, even with a window of one.
// 3.  **Total**: `push` never fails. Short histories simply do not settle.

use crate::core_modules::color_classifier::ColorLabel;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Emitted when the window fills with a single, unanimous label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettledEvent(pub ColorLabel);

#[derive(Debug, Clone)]
pub struct DebounceWindow {
    history: VecDeque<ColorLabel>,
    capacity: usize,
    /// Whether the next unanimous fill may emit.
    armed: bool,
    /// Label of the most recent `SettledEvent`.
    last_settled: Option<ColorLabel>,
}

impl DebounceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            capacity,
            armed: true,
            last_settled: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn push(&mut self, label: ColorLabel) -> Option<SettledEvent> {
        self.history.push_back(label);
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }

        if !self.is_settled_on(label) {
            self.armed = true;
            return None;
        }

        if self.armed || self.last_settled != Some(label) {
            self.armed = false;
            self.last_settled = Some(label);
            Some(SettledEvent(label))
        } else {
            None
        }
    }

    fn is_settled_on(&self, label: ColorLabel) -> bool {
        self.history.len() == self.capacity && self.history.iter().all(|entry| *entry == label)
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.armed = true;
        self.last_settled = None;
    }
}

impl Default for DebounceWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
