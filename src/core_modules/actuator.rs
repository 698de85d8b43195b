// THEORY:
// The `actuator` module is the last step of the decision path: it turns a
// (color, angle) decision into a line of ASCII and hands it to the serial link.
//
// Key architectural principles:
// 1.  **Tiny wire protocol**: One command per line, `NAME:ANGLE\n`. No framing,
//     no acknowledgment. Only three labels own a servo; every other label is a
//     silent no-op here.
// 2.  **Best effort**: A failed write is logged and reported back as a
//     `Dispatch::Failed`, never retried and never propagated as an error. The
//     decision has already been taken; the sorter keeps running.
// 3.  **Link seam**: The physical device sits behind the `ActuatorLink` trait so
//     the decision core can be exercised without hardware, and so the runner can
//     swap in a queued, non-blocking link.

use crate::core_modules::color_classifier::ColorLabel;
use std::fmt;
use std::io::Write;
use tracing::{debug, error};

pub type Angle = u16;

/// Angle that returns a servo to neutral.
pub const RETRACT_ANGLE: Angle = 0;
/// Angle that diverts an object.
pub const ACTUATE_ANGLE: Angle = 90;

/// Returns the servo name wired to `label`, if any.
pub fn servo_name(label: ColorLabel) -> Option<&'static str> {
    match label {
        ColorLabel::Red2 => Some("RED2"),
        ColorLabel::Green => Some("GREEN"),
        ColorLabel::Blue => Some("BLUE"),
        _ => None,
    }
}

pub fn has_servo(label: ColorLabel) -> bool {
    servo_name(label).is_some()
}

/// A single encoded servo instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub servo: &'static str,
    pub angle: Angle,
}

impl ActuatorCommand {
    pub fn for_label(label: ColorLabel, angle: Angle) -> Option<Self> {
        servo_name(label).map(|servo| Self { servo, angle })
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}\n", self.servo, self.angle).into_bytes()
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.servo, self.angle)
    }
}

/// Anything that can carry one encoded command line to the actuator board.
pub trait ActuatorLink: Send {
    fn write_command(&mut self, line: &[u8]) -> std::io::Result<()>;
}

/// Adapts any `Write` (a tty file, a socket, a sink) into a link.
pub struct WriterLink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterLink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> ActuatorLink for WriterLink<W> {
    fn write_command(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line)?;
        self.writer.flush()
    }
}

/// What happened to a `send` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The label has no servo; nothing was written.
    Unmapped,
    /// Accepted by the link. For a queued link the device write happens later.
    Sent(ActuatorCommand),
    Failed { command: ActuatorCommand, reason: String },
}

pub struct ActuatorDispatcher {
    link: Box<dyn ActuatorLink>,
}

impl ActuatorDispatcher {
    pub fn new(link: Box<dyn ActuatorLink>) -> Self {
        Self { link }
    }

    pub fn send(&mut self, label: ColorLabel, angle: Angle) -> Dispatch {
        let Some(command) = ActuatorCommand::for_label(label, angle) else {
            return Dispatch::Unmapped;
        };

        match self.link.write_command(&command.encode()) {
            Ok(()) => {
                debug!(%command, "actuator command handed to link");
                Dispatch::Sent(command)
            }
            Err(err) => {
                error!(%command, error = %err, "actuator write failed");
                Dispatch::Failed {
                    command,
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ActuatorLink;
    use std::sync::{Arc, Mutex};

    /// Records every line written, for assertions.
    #[derive(Clone, Default)]
    pub struct RecordingLink {
        pub lines: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingLink {
        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl ActuatorLink for RecordingLink {
        fn write_command(&mut self, line: &[u8]) -> std::io::Result<()> {
            self.lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(line).into_owned());
            Ok(())
        }
    }

    /// A link whose device has gone away.
    pub struct BrokenLink;

    impl ActuatorLink for BrokenLink {
        fn write_command(&mut self, _line: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{BrokenLink, RecordingLink};
    use super::*;

    #[test]
    fn only_three_labels_have_servos() {
        let mapped: Vec<ColorLabel> = ColorLabel::ALL.iter().copied().filter(|l| has_servo(*l)).collect();
        assert_eq!(mapped, vec![ColorLabel::Red2, ColorLabel::Green, ColorLabel::Blue]);
    }

    #[test]
    fn commands_are_ascii_lines() {
        let command = ActuatorCommand::for_label(ColorLabel::Red2, ACTUATE_ANGLE).unwrap();
        assert_eq!(command.encode(), b"RED2:90\n".to_vec());
        let command = ActuatorCommand::for_label(ColorLabel::Blue, RETRACT_ANGLE).unwrap();
        assert_eq!(command.encode(), b"BLUE:0\n".to_vec());
    }

    #[test]
    fn unmapped_labels_write_nothing() {
        let link = RecordingLink::default();
        let mut dispatcher = ActuatorDispatcher::new(Box::new(link.clone()));
        assert_eq!(dispatcher.send(ColorLabel::Yellow, ACTUATE_ANGLE), Dispatch::Unmapped);
        assert_eq!(dispatcher.send(ColorLabel::Red, ACTUATE_ANGLE), Dispatch::Unmapped);
        assert!(link.lines().is_empty());
    }

    #[test]
    fn mapped_labels_are_written() {
        let link = RecordingLink::default();
        let mut dispatcher = ActuatorDispatcher::new(Box::new(link.clone()));
        let dispatch = dispatcher.send(ColorLabel::Green, ACTUATE_ANGLE);
        assert!(matches!(dispatch, Dispatch::Sent(ActuatorCommand { servo: "GREEN", angle: 90 })));
        assert_eq!(link.lines(), vec!["GREEN:90\n".to_string()]);
    }

    #[test]
    fn write_failures_are_reported_not_raised() {
        let mut dispatcher = ActuatorDispatcher::new(Box::new(BrokenLink));
        match dispatcher.send(ColorLabel::Blue, ACTUATE_ANGLE) {
            Dispatch::Failed { command, reason } => {
                assert_eq!(command.servo, "BLUE");
                assert!(reason.contains("unplugged"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn writer_link_writes_bytes_verbatim() {
        let mut link = WriterLink::new(Vec::new());
        link.write_command(b"GREEN:0\n").unwrap();
        assert_eq!(link.writer, b"GREEN:0\n".to_vec());
    }
}
