// THEORY:
// The `SorterController` is an actor that owns the `SortingPipeline`. Every
// input to the sorter arrives as a message in one inbox and is handled in
// arrival order by one task, so no two inputs ever observe the pipeline
// half-updated.
//
// Key architectural principles:
// 1.  **Single consumer**: Frame samples, operator commands and timer expiries
//     share the inbox. The pipeline needs no locks.
// 2.  **Samples are droppable, commands are not**: The sampling thread offers
//     samples with `try_send` and moves on if the inbox is full. Commands wait
//     for space and get their answer over a `oneshot` reply channel.
// 3.  **Generation-tagged timers**: Each calibration run gets a number. The
//     timeout for a run that has already been finished or restarted arrives with
//     a stale number and is ignored.
// 4.  **Broadcast outputs**: Everything the sorter reports goes out on a
//     `broadcast` bus. Having no listeners is not an error.

use crate::config::SorterConfig;
use crate::core_modules::color_classifier::ColorLabel;
use crate::error::{ControllerError, ModeError};
use crate::pipeline::{Mode, SorterEvent, SorterStatus, SortingPipeline};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Number of events a slow subscriber may fall behind before it lags.
pub const EVENT_CAPACITY: usize = 64;

/// Creates the event bus shared by the controller and the actuator writer.
pub fn event_bus() -> broadcast::Sender<SorterEvent> {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    events
}

/// Message type for the controller actor.
enum ControlMessage {
    Sample(ColorLabel),
    StartTriggering(oneshot::Sender<Result<(), ModeError>>),
    StopTriggering(oneshot::Sender<()>),
    StartCalibration(oneshot::Sender<Result<(), ModeError>>),
    FinishCalibration(oneshot::Sender<()>),
    CalibrationTimeout(u64),
    Status(oneshot::Sender<SorterStatus>),
    SamplingStopped(String),
    Shutdown,
}

/// Cheap, cloneable front door to a running controller.
#[derive(Clone)]
pub struct SorterHandle {
    inbox: mpsc::Sender<ControlMessage>,
    events: broadcast::Sender<SorterEvent>,
}

impl SorterHandle {
    /// Offers one classified frame. Returns `false` if the sample was dropped.
    pub fn try_submit_sample(&self, label: ColorLabel) -> bool {
        match self.inbox.try_send(ControlMessage::Sample(label)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(%label, "controller busy, sample dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Reports the end of the frame stream. Blocks; call it from the sampling thread.
    pub fn report_sampling_stopped(&self, reason: impl Into<String>) {
        let _ = self
            .inbox
            .blocking_send(ControlMessage::SamplingStopped(reason.into()));
    }

    pub async fn start_triggering(&self) -> Result<(), ControllerError> {
        Ok(self.request(ControlMessage::StartTriggering).await??)
    }

    pub async fn stop_triggering(&self) -> Result<(), ControllerError> {
        self.request(ControlMessage::StopTriggering).await
    }

    pub async fn start_calibration(&self) -> Result<(), ControllerError> {
        Ok(self.request(ControlMessage::StartCalibration).await??)
    }

    /// Ends the current calibration run early. The outcome arrives as an event.
    pub async fn finish_calibration(&self) -> Result<(), ControllerError> {
        self.request(ControlMessage::FinishCalibration).await
    }

    pub async fn status(&self) -> Result<SorterStatus, ControllerError> {
        self.request(ControlMessage::Status).await
    }

    /// True once the controller task has ended.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SorterEvent> {
        self.events.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.inbox.send(ControlMessage::Shutdown).await;
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> ControlMessage,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(message(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }
}

pub struct SorterController {
    pipeline: SortingPipeline,
    inbox: mpsc::Receiver<ControlMessage>,
    /// Weak so that pending timers do not keep the controller alive.
    timer_inbox: mpsc::WeakSender<ControlMessage>,
    events: broadcast::Sender<SorterEvent>,
    calibration_timeout: Duration,
    calibration_run: u64,
}

impl SorterController {
    /// Moves `pipeline` onto its own task and returns a handle to it.
    ///
    /// The task ends on `shutdown` or once every handle has been dropped.
    pub fn spawn(
        pipeline: SortingPipeline,
        config: &SorterConfig,
        events: broadcast::Sender<SorterEvent>,
    ) -> (SorterHandle, JoinHandle<()>) {
        let (inbox_tx, inbox) = mpsc::channel(config.sample_queue.max(1));
        let controller = Self {
            pipeline,
            inbox,
            timer_inbox: inbox_tx.downgrade(),
            events: events.clone(),
            calibration_timeout: config.calibration.timeout(),
            calibration_run: 0,
        };
        let task = tokio::spawn(controller.run());
        (SorterHandle { inbox: inbox_tx, events }, task)
    }

    async fn run(mut self) {
        info!("sorter controller running");
        while let Some(message) = self.inbox.recv().await {
            match message {
                ControlMessage::Sample(label) => {
                    let events = self.pipeline.process_label(label);
                    self.publish(events);
                }
                ControlMessage::StartTriggering(reply) => {
                    let result = match self.pipeline.start_triggering() {
                        Ok(events) => {
                            self.publish(events);
                            Ok(())
                        }
                        Err(err) => Err(err),
                    };
                    let _ = reply.send(result);
                }
                ControlMessage::StopTriggering(reply) => {
                    let events = self.pipeline.stop_triggering();
                    self.publish(events);
                    let _ = reply.send(());
                }
                ControlMessage::StartCalibration(reply) => {
                    let result = match self.pipeline.start_calibration() {
                        Ok(events) => {
                            self.calibration_run += 1;
                            self.arm_calibration_timer();
                            self.publish(events);
                            Ok(())
                        }
                        Err(err) => Err(err),
                    };
                    let _ = reply.send(result);
                }
                ControlMessage::FinishCalibration(reply) => {
                    self.calibration_run += 1;
                    let events = self.pipeline.finish_calibration();
                    self.publish(events);
                    let _ = reply.send(());
                }
                ControlMessage::CalibrationTimeout(run) => {
                    if run == self.calibration_run && self.pipeline.mode() == Mode::Calibrating {
                        debug!(run, "calibration window elapsed");
                        let events = self.pipeline.finish_calibration();
                        self.publish(events);
                    } else {
                        debug!(run, current = self.calibration_run, "stale calibration timer ignored");
                    }
                }
                ControlMessage::Status(reply) => {
                    let _ = reply.send(self.pipeline.status());
                }
                ControlMessage::SamplingStopped(reason) => {
                    warn!(%reason, "frame sampling stopped");
                    self.publish(vec![SorterEvent::SamplingStopped(reason)]);
                }
                ControlMessage::Shutdown => break,
            }
        }
        info!("sorter controller stopped");
    }

    fn arm_calibration_timer(&self) {
        let run = self.calibration_run;
        let timeout = self.calibration_timeout;
        let inbox = self.timer_inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(ControlMessage::CalibrationTimeout(run)).await;
            }
        });
    }

    fn publish(&self, events: Vec<SorterEvent>) {
        for event in events {
            debug!(%event, "sorter event");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::actuator::ActuatorDispatcher;
    use crate::core_modules::actuator::testing::RecordingLink;
    use crate::core_modules::calibration::{CalibrationFailure, CalibrationOutcome};
    use crate::settings::MemorySettingsStore;
    use ColorLabel::*;

    fn spawn_with(config: SorterConfig) -> (SorterHandle, JoinHandle<()>, RecordingLink) {
        let link = RecordingLink::default();
        let pipeline = SortingPipeline::new(
            &config,
            ActuatorDispatcher::new(Box::new(link.clone())),
            Box::new(MemorySettingsStore::default()),
        );
        let (handle, task) = SorterController::spawn(pipeline, &config, event_bus());
        (handle, task, link)
    }

    fn drain(events: &mut broadcast::Receiver<SorterEvent>) -> Vec<SorterEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    fn submit(handle: &SorterHandle, label: ColorLabel, times: usize) {
        for _ in 0..times {
            assert!(handle.try_submit_sample(label));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settled_green_is_dispatched() {
        let (handle, _task, link) = spawn_with(SorterConfig::default());
        let mut events = handle.subscribe();

        handle.start_triggering().await.unwrap();
        submit(&handle, Green, 3);
        let status = handle.status().await.unwrap();

        assert_eq!(status.mode, Mode::Triggering);
        assert_eq!(status.last_triggered, Some(Green));
        assert_eq!(link.lines(), vec!["GREEN:90\n"]);
        assert_eq!(
            drain(&mut events),
            vec![SorterEvent::ModeChanged(Mode::Triggering), SorterEvent::Triggered(Green)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn calibration_finishes_when_the_window_elapses() {
        let (handle, _task, link) = spawn_with(SorterConfig::default());
        let mut events = handle.subscribe();

        handle.start_calibration().await.unwrap();
        submit(&handle, White, 50);
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        let status = handle.status().await.unwrap();

        assert_eq!(status.mode, Mode::Idle);
        assert_eq!(status.background, Some(White));
        assert!(link.lines().is_empty());
        assert_eq!(
            drain(&mut events),
            vec![
                SorterEvent::ModeChanged(Mode::Calibrating),
                SorterEvent::CalibrationFinished(CalibrationOutcome::Passed(White)),
                SorterEvent::ModeChanged(Mode::Idle),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_cut_a_new_run_short() {
        let (handle, _task, _link) = spawn_with(SorterConfig::default());
        let mut events = handle.subscribe();

        handle.start_calibration().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.finish_calibration().await.unwrap();
        handle.start_calibration().await.unwrap();
        submit(&handle, Blue, 50);

        // The first run's timer fires here and must be ignored.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.mode, Mode::Calibrating);
        assert_eq!(status.calibration_samples, 50);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.mode, Mode::Idle);
        assert_eq!(status.background, Some(Blue));

        let outcomes: Vec<SorterEvent> = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, SorterEvent::CalibrationFinished(_)))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                SorterEvent::CalibrationFinished(CalibrationOutcome::Failed(
                    CalibrationFailure::InsufficientSamples {
                        collected: 0,
                        required: 50
                    }
                )),
                SorterEvent::CalibrationFinished(CalibrationOutcome::Passed(Blue)),
            ]
        );
    }

    #[tokio::test]
    async fn mode_conflicts_are_reported_to_the_caller() {
        let (handle, _task, _link) = spawn_with(SorterConfig::default());
        handle.start_triggering().await.unwrap();
        assert!(matches!(
            handle.start_calibration().await,
            Err(ControllerError::Mode(ModeError::TriggeringActive))
        ));

        handle.stop_triggering().await.unwrap();
        handle.start_calibration().await.unwrap();
        assert!(matches!(
            handle.start_triggering().await,
            Err(ControllerError::Mode(ModeError::CalibrationActive))
        ));
    }

    #[tokio::test]
    async fn full_inbox_drops_samples() {
        let config = SorterConfig {
            sample_queue: 1,
            ..SorterConfig::default()
        };
        let (handle, _task, _link) = spawn_with(config);
        // The controller task has not run yet on this single-threaded runtime.
        assert!(handle.try_submit_sample(Green));
        assert!(!handle.try_submit_sample(Green));
    }

    #[tokio::test]
    async fn sampling_stop_is_announced() {
        let (handle, _task, _link) = spawn_with(SorterConfig::default());
        let mut events = handle.subscribe();

        let reporter = handle.clone();
        tokio::task::spawn_blocking(move || reporter.report_sampling_stopped("end of stream"))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SorterEvent::SamplingStopped("end of stream".into())
        );
        assert_eq!(handle.status().await.unwrap().mode, Mode::Idle);
    }

    #[tokio::test]
    async fn shutdown_closes_the_handle() {
        let (handle, task, _link) = spawn_with(SorterConfig::default());
        handle.shutdown().await;
        task.await.unwrap();
        assert!(matches!(handle.status().await, Err(ControllerError::Closed)));
        assert!(!handle.try_submit_sample(Green));
    }
}
