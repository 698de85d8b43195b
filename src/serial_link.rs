// THEORY:
// The serial link is the one shared physical resource of the sorter. Three
// rules govern it:
// 1.  **Raw, fixed-speed line**: The actuator board speaks plain ASCII at a fixed
//     baud rate. The port is switched to raw mode so the kernel neither echoes
//     nor rewrites line endings.
// 2.  **Never block the decision path**: Writes to a stuck or unplugged device
//     can block or fail. The decision path therefore writes into a `QueuedLink`,
//     which only enqueues; a dedicated blocking writer drains the queue into the
//     device, logs failures and reports them as events.
// 3.  **Bounded backlog**: The queue has a fixed capacity. While the device is
//     stalled, further commands fail at once instead of piling up.

use crate::core_modules::actuator::ActuatorLink;
use crate::pipeline::SorterEvent;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Commands that may wait for the writer before new ones are refused.
pub const DEFAULT_WRITER_QUEUE: usize = 32;

/// Opens the actuator device for writing and configures it as a raw serial line.
///
/// A path that is not a terminal (a plain file or a FIFO, handy for bench
/// testing) is accepted as-is.
pub fn open_serial(device: &Path, baud_rate: u32) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOCTTY);
    }
    let file = options.open(device)?;

    #[cfg(unix)]
    configure_raw(&file, baud_rate)?;
    #[cfg(not(unix))]
    let _ = baud_rate;

    info!(device = %device.display(), baud_rate, "serial link open");
    Ok(file)
}

#[cfg(unix)]
fn baud_constant(baud_rate: u32) -> Option<libc::speed_t> {
    Some(match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => return None,
    })
}

#[cfg(unix)]
fn configure_raw(file: &File, baud_rate: u32) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let speed = baud_constant(baud_rate).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("unsupported baud rate {baud_rate}"))
    })?;
    let fd = file.as_raw_fd();

    // SAFETY: `fd` is an open descriptor owned by `file` for the duration of
    // this call, and `termios` is a plain C struct filled in by `tcgetattr`.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOTTY) {
                warn!("actuator device is not a terminal, writing without line setup");
                return Ok(());
            }
            return Err(err);
        }
        libc::cfmakeraw(&mut termios);
        termios.c_cflag |= libc::CLOCAL | libc::CREAD;
        if libc::cfsetispeed(&mut termios, speed) != 0 || libc::cfsetospeed(&mut termios, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Enqueues command lines for the background writer. Never blocks.
#[derive(Clone)]
pub struct QueuedLink {
    queue: mpsc::Sender<Vec<u8>>,
}

impl ActuatorLink for QueuedLink {
    fn write_command(&mut self, line: &[u8]) -> io::Result<()> {
        self.queue.try_send(line.to_vec()).map_err(|err| match err {
            TrySendError::Full(_) => io::Error::new(io::ErrorKind::WouldBlock, "actuator queue is full"),
            TrySendError::Closed(_) => io::Error::new(io::ErrorKind::BrokenPipe, "actuator writer has stopped"),
        })
    }
}

/// Moves `link` onto a blocking writer task and returns the queue feeding it.
///
/// At most `capacity` commands wait for the device. The writer runs until
/// every `QueuedLink` clone is dropped. Write failures are logged and published
/// on `events`; they are never retried.
pub fn spawn_writer(
    mut link: Box<dyn ActuatorLink>,
    events: broadcast::Sender<SorterEvent>,
    capacity: usize,
) -> (QueuedLink, JoinHandle<()>) {
    let (queue, mut pending) = mpsc::channel::<Vec<u8>>(capacity.max(1));

    let writer = tokio::task::spawn_blocking(move || {
        while let Some(line) = pending.blocking_recv() {
            let command = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Err(err) = link.write_command(&line) {
                error!(%command, error = %err, "serial write failed");
                let _ = events.send(SorterEvent::ActuatorFault {
                    command,
                    reason: err.to_string(),
                });
            } else {
                info!(%command, "sent actuator command");
            }
        }
        debug!("actuator writer stopped");
    });

    (QueuedLink { queue }, writer)
}
