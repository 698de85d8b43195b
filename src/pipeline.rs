// THEORY:
// The `pipeline` module is the synchronous top-level API of the sorter. A
// `SortingPipeline` owns every piece of mutable decision state: the debounce
// window, the calibration collector, the trigger state machine, the actuator
// dispatcher and the settings store. Because one value owns all of it, a label
// is always judged against a consistent mode, and the single-consumer actor in
// `controller` only has to own this one struct.
//
// Each label goes to exactly one place:
// - while calibrating, into the calibration buffer and nowhere else;
// - while triggering, through the debounce window and, once settled, the
//   trigger state machine, whose servo moves are dispatched in order;
// - otherwise it is dropped.

use crate::config::SorterConfig;
use crate::core_modules::actuator::{ActuatorCommand, ActuatorDispatcher, Dispatch};
use crate::core_modules::calibration::{CalibrationController, CalibrationOutcome};
use crate::core_modules::color_classifier::ColorLabel;
use crate::core_modules::debounce_window::DebounceWindow;
use crate::core_modules::trigger_state::TriggerStateMachine;
use crate::error::ModeError;
use crate::settings::SettingsStore;
use std::fmt;
use tracing::{error, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::calibration::CalibrationFailure;
pub use crate::core_modules::trigger_state::TriggerDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Triggering,
    Calibrating,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Idle => "idle",
            Mode::Triggering => "triggering",
            Mode::Calibrating => "calibrating",
        })
    }
}

/// Outward notifications for whatever UI or log sits on top of the sorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SorterEvent {
    /// A settled color was acted upon. `Background` for background sightings.
    Triggered(ColorLabel),
    CalibrationFinished(CalibrationOutcome),
    ModeChanged(Mode),
    ActuatorFault { command: String, reason: String },
    SamplingStopped(String),
}

impl fmt::Display for SorterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SorterEvent::Triggered(color) => write!(f, "triggered:{color}"),
            SorterEvent::CalibrationFinished(outcome) => {
                write!(f, "calibration:{}:{}", outcome.status(), outcome.detail())
            }
            SorterEvent::ModeChanged(mode) => write!(f, "mode:{mode}"),
            SorterEvent::ActuatorFault { command, reason } => write!(f, "actuator-fault:{command}:{reason}"),
            SorterEvent::SamplingStopped(reason) => write!(f, "sampling-stopped:{reason}"),
        }
    }
}

/// Snapshot of the pipeline for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SorterStatus {
    pub mode: Mode,
    pub last_triggered: Option<ColorLabel>,
    pub background: Option<ColorLabel>,
    pub calibration_samples: usize,
}

pub struct SortingPipeline {
    debounce: DebounceWindow,
    calibration: CalibrationController,
    trigger: TriggerStateMachine,
    dispatcher: ActuatorDispatcher,
    settings: Box<dyn SettingsStore>,
}

impl SortingPipeline {
    pub fn new(config: &SorterConfig, dispatcher: ActuatorDispatcher, settings: Box<dyn SettingsStore>) -> Self {
        let background = match settings.load_background() {
            Ok(background) => background,
            Err(err) => {
                warn!(error = %err, "could not load background color, starting without one");
                None
            }
        };
        info!(?background, "sorting pipeline ready");

        Self {
            debounce: DebounceWindow::new(config.debounce_window),
            calibration: CalibrationController::new(config.calibration.sample_target),
            trigger: TriggerStateMachine::new(background),
            dispatcher,
            settings,
        }
    }

    pub fn mode(&self) -> Mode {
        if self.calibration.is_active() {
            Mode::Calibrating
        } else if self.trigger.is_enabled() {
            Mode::Triggering
        } else {
            Mode::Idle
        }
    }

    pub fn status(&self) -> SorterStatus {
        SorterStatus {
            mode: self.mode(),
            last_triggered: self.trigger.last_triggered(),
            background: self.trigger.background(),
            calibration_samples: self.calibration.collected(),
        }
    }

    pub fn start_triggering(&mut self) -> Result<Vec<SorterEvent>, ModeError> {
        match self.mode() {
            Mode::Calibrating => Err(ModeError::CalibrationActive),
            Mode::Triggering => Ok(Vec::new()),
            Mode::Idle => {
                // Labels seen before this start must not count toward a settle.
                self.debounce.clear();
                self.trigger.set_enabled(true);
                info!("triggering started");
                Ok(vec![SorterEvent::ModeChanged(Mode::Triggering)])
            }
        }
    }

    pub fn stop_triggering(&mut self) -> Vec<SorterEvent> {
        if self.mode() != Mode::Triggering {
            return Vec::new();
        }
        self.trigger.set_enabled(false);
        info!("triggering stopped");
        vec![SorterEvent::ModeChanged(Mode::Idle)]
    }

    /// Starts (or restarts) a calibration run.
    pub fn start_calibration(&mut self) -> Result<Vec<SorterEvent>, ModeError> {
        if self.mode() == Mode::Triggering {
            return Err(ModeError::TriggeringActive);
        }
        self.calibration.start();
        info!(target_samples = self.calibration.sample_target(), "calibration started");
        Ok(vec![SorterEvent::ModeChanged(Mode::Calibrating)])
    }

    /// Ends the calibration run, if any, and applies a passing result.
    pub fn finish_calibration(&mut self) -> Vec<SorterEvent> {
        let Some(outcome) = self.calibration.finish() else {
            return Vec::new();
        };

        match outcome {
            CalibrationOutcome::Passed(color) => {
                self.trigger.set_background(Some(color));
                info!(background = %color, "calibration passed");
                if let Err(err) = self.settings.store_background(Some(color)) {
                    error!(error = %err, "failed to persist background color");
                }
            }
            CalibrationOutcome::Failed(reason) => {
                warn!(%reason, "calibration failed, background unchanged");
            }
        }

        vec![
            SorterEvent::CalibrationFinished(outcome),
            SorterEvent::ModeChanged(Mode::Idle),
        ]
    }

    /// Routes one classified frame.
    pub fn process_label(&mut self, label: ColorLabel) -> Vec<SorterEvent> {
        match self.mode() {
            Mode::Calibrating => {
                self.calibration.on_sample(label);
                Vec::new()
            }
            Mode::Idle => Vec::new(),
            Mode::Triggering => {
                let Some(settled) = self.debounce.push(label) else {
                    return Vec::new();
                };
                let decision = self.trigger.evaluate(settled);
                self.apply(decision)
            }
        }
    }

    fn apply(&mut self, decision: TriggerDecision) -> Vec<SorterEvent> {
        let mut events = Vec::new();

        for (color, angle) in decision.servo_moves() {
            if let Dispatch::Failed { command, reason } = self.dispatcher.send(color, angle) {
                events.push(fault_event(command, reason));
            }
        }

        if let Some(notified) = decision.notification() {
            info!(color = %notified, "triggered");
            events.push(SorterEvent::Triggered(notified));
        }
        events
    }
}

fn fault_event(command: ActuatorCommand, reason: String) -> SorterEvent {
    SorterEvent::ActuatorFault {
        command: command.to_string(),
        reason,
    }
}
