// THEORY:
// The `TriggerStateMachine` is the decision core of the sorter. It only ever
// sees *settled* colors, and for each one decides whether to retract the servo
// that is currently out, ignore the color as background, or divert the object.
//
// Key architectural principles:
// 1.  **Change-driven**: Seeing the color that was last triggered again is a
//     no-op. Servos only move on a change.
// 2.  **Retract before actuate**: When the color changes, the previously
//     triggered servo is returned to neutral first, then the new one is moved.
//     A previous color without a servo is tracked but never retracted.
// 3.  **Background is not sticky**: A background sighting retracts the previous
//     servo and is reported, but it does not replace the last triggered color.
// 4.  **Pure decisions**: The machine returns a `TriggerDecision` describing the
//     servo moves in order. Executing them is the caller's job.

use crate::core_modules::actuator::{ACTUATE_ANGLE, Angle, RETRACT_ANGLE, has_servo};
use crate::core_modules::color_classifier::ColorLabel;
use crate::core_modules::debounce_window::SettledEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Triggering is off, or the color is already the active one.
    Unchanged,
    /// The settled color is the learned background.
    Background { retract: Option<ColorLabel> },
    /// A new color was triggered. `actuate` is false for colors without a servo.
    Triggered {
        color: ColorLabel,
        retract: Option<ColorLabel>,
        actuate: bool,
    },
}

impl TriggerDecision {
    /// Servo moves to perform, in order.
    pub fn servo_moves(&self) -> Vec<(ColorLabel, Angle)> {
        let mut moves = Vec::with_capacity(2);
        match self {
            TriggerDecision::Unchanged => {}
            TriggerDecision::Background { retract } => {
                if let Some(previous) = retract {
                    moves.push((*previous, RETRACT_ANGLE));
                }
            }
            TriggerDecision::Triggered { color, retract, actuate } => {
                if let Some(previous) = retract {
                    moves.push((*previous, RETRACT_ANGLE));
                }
                if *actuate {
                    moves.push((*color, ACTUATE_ANGLE));
                }
            }
        }
        moves
    }

    /// The label to announce on the "triggered" stream, if any.
    pub fn notification(&self) -> Option<ColorLabel> {
        match self {
            TriggerDecision::Unchanged => None,
            TriggerDecision::Background { .. } => Some(ColorLabel::Background),
            TriggerDecision::Triggered { color, .. } => Some(*color),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TriggerStateMachine {
    enabled: bool,
    last_triggered: Option<ColorLabel>,
    background: Option<ColorLabel>,
}

impl TriggerStateMachine {
    pub fn new(background: Option<ColorLabel>) -> Self {
        Self {
            enabled: false,
            last_triggered: None,
            background,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn last_triggered(&self) -> Option<ColorLabel> {
        self.last_triggered
    }

    pub fn background(&self) -> Option<ColorLabel> {
        self.background
    }

    pub fn set_background(&mut self, background: Option<ColorLabel>) {
        self.background = background;
    }

    pub fn evaluate(&mut self, event: SettledEvent) -> TriggerDecision {
        let SettledEvent(color) = event;

        if !self.enabled || self.last_triggered == Some(color) {
            return TriggerDecision::Unchanged;
        }

        let retract = self.last_triggered.filter(|previous| has_servo(*previous));

        if self.background == Some(color) {
            return TriggerDecision::Background { retract };
        }

        self.last_triggered = Some(color);
        TriggerDecision::Triggered {
            color,
            retract,
            actuate: has_servo(color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ColorLabel::*;

    fn enabled(background: Option<ColorLabel>) -> TriggerStateMachine {
        let mut machine = TriggerStateMachine::new(background);
        machine.set_enabled(true);
        machine
    }

    #[test]
    fn disabled_machine_does_nothing() {
        let mut machine = TriggerStateMachine::new(None);
        assert_eq!(machine.evaluate(SettledEvent(Green)), TriggerDecision::Unchanged);
        assert_eq!(machine.last_triggered(), None);
    }

    #[test]
    fn repeated_color_actuates_once() {
        let mut machine = enabled(None);
        let first = machine.evaluate(SettledEvent(Green));
        assert_eq!(first.servo_moves(), vec![(Green, 90)]);
        assert_eq!(first.notification(), Some(Green));
        assert_eq!(machine.evaluate(SettledEvent(Green)), TriggerDecision::Unchanged);
    }

    #[test]
    fn change_retracts_then_actuates() {
        let mut machine = enabled(None);
        machine.evaluate(SettledEvent(Green));
        let decision = machine.evaluate(SettledEvent(Blue));
        assert_eq!(decision.servo_moves(), vec![(Green, 0), (Blue, 90)]);
        assert_eq!(machine.last_triggered(), Some(Blue));
    }

    #[test]
    fn background_retracts_but_is_not_sticky() {
        let mut machine = enabled(Some(White));
        machine.evaluate(SettledEvent(Green));
        let decision = machine.evaluate(SettledEvent(White));
        assert_eq!(decision, TriggerDecision::Background { retract: Some(Green) });
        assert_eq!(decision.servo_moves(), vec![(Green, 0)]);
        assert_eq!(decision.notification(), Some(Background));
        assert_eq!(machine.last_triggered(), Some(Green));
    }

    #[test]
    fn background_with_no_prior_color_moves_nothing() {
        let mut machine = enabled(Some(White));
        let decision = machine.evaluate(SettledEvent(White));
        assert!(decision.servo_moves().is_empty());
        assert_eq!(decision.notification(), Some(Background));
    }

    #[test]
    fn colors_without_servos_still_notify() {
        let mut machine = enabled(None);
        for color in [Yellow, Orange, Pink, White, Black, Unknown, Red] {
            let decision = machine.evaluate(SettledEvent(color));
            assert_eq!(decision.notification(), Some(color));
            assert!(decision.servo_moves().is_empty());
            assert_eq!(machine.last_triggered(), Some(color));
        }
    }

    #[test]
    fn unmapped_previous_color_is_not_retracted() {
        let mut machine = enabled(None);
        machine.evaluate(SettledEvent(Yellow));
        let decision = machine.evaluate(SettledEvent(Blue));
        assert_eq!(decision.servo_moves(), vec![(Blue, 90)]);

        let decision = machine.evaluate(SettledEvent(Yellow));
        assert_eq!(decision.servo_moves(), vec![(Blue, 0)]);
    }

    #[test]
    fn learned_unknown_background_suppresses_unknown() {
        let mut machine = enabled(Some(Unknown));
        let decision = machine.evaluate(SettledEvent(Unknown));
        assert_eq!(decision.notification(), Some(Background));
        assert_eq!(machine.last_triggered(), None);
    }
}
