//! Scan session driver.
//!
//! [`start_scan`] prepares a session (scan record, calibration upload, motor
//! start) and hands the rest to a background task that owns the telemetry
//! queue and the [`SessionMemory`]. The task takes one frame at a time and
//! does not look at the next until every action for the current one has
//! finished, including a blade recording. Frames that arrive meanwhile
//! wait in the queue.
//!
//! ```text
//! reader thread ──frames──► TelemetryStream ──► Sequencer ──► machine::step
//!                                                  │
//!                                  ┌───────────────┼────────────────┐
//!                                  ▼               ▼                ▼
//!                              Dispatcher      Recorder         ScanStore
//! ```
//!
//! Collaborators follow the session through [`ScanEvent`]s. Every session
//! ends with exactly one [`ScanEvent::Finished`], whose [`ScanOutcome`]
//! separates a clean finish from a fault.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use soundscan_link::{Command, TelemetryFrame, TelemetryStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, Recorder};
use crate::device::{BladeRecord, DeviceConfig};
use crate::dispatcher::{build, Dispatcher};
use crate::error::{CoreError, Result};
use crate::machine::{self, Action, CaptureRequest, ScanPhase, SessionMemory};
use crate::store::ScanStore;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Everything a session needs. The telemetry stream is consumed by it.
pub struct ScanContext {
    pub dispatcher: Dispatcher,
    pub telemetry: TelemetryStream,
    pub store: Arc<dyn ScanStore>,
    pub recorder: Arc<dyn Recorder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed {
        scan_id: u64,
        blades: u32,
    },
    Faulted {
        scan_id: u64,
        blades: u32,
        reason: String,
    },
}

impl ScanOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ScanOutcome::Completed { .. })
    }

    pub fn scan_id(&self) -> u64 {
        match self {
            ScanOutcome::Completed { scan_id, .. } | ScanOutcome::Faulted { scan_id, .. } => {
                *scan_id
            }
        }
    }

    pub fn blades(&self) -> u32 {
        match self {
            ScanOutcome::Completed { blades, .. } | ScanOutcome::Faulted { blades, .. } => *blades,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started { scan_id: u64, disk_type_id: u64 },
    Phase { phase: ScanPhase },
    BladeDownloaded { disk_type_id: u64, blade: BladeRecord },
    Finished { outcome: ScanOutcome },
}

enum Control {
    Stop,
}

/// A running session.
pub struct ScanHandle {
    scan_id: u64,
    blades: Arc<AtomicU32>,
    control: mpsc::UnboundedSender<Control>,
    events: mpsc::WeakUnboundedSender<ScanEvent>,
    task: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> u64 {
        self.scan_id
    }

    /// Ask the rig to return the base. The session ends once the device
    /// reports the base is home, so a blade already being recorded is kept.
    /// Returns false if the session is already over.
    pub fn stop(&self) -> bool {
        self.control.send(Control::Stop).is_ok()
    }

    /// Drop the session immediately, mid-cycle if need be. Blades already
    /// saved stay saved and the event stream still ends with
    /// [`ScanEvent::Finished`].
    pub fn abort(&self) {
        if self.task.is_finished() {
            return;
        }
        let events = self.events.upgrade();
        self.task.abort();
        if let Some(events) = events {
            let _ = events.send(ScanEvent::Finished {
                outcome: self.faulted("aborted".to_string()),
            });
        }
    }

    pub async fn wait(mut self) -> ScanOutcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => self.faulted("aborted".to_string()),
            Err(e) => self.faulted(format!("sequencer task failed: {e}")),
        }
    }

    fn faulted(&self, reason: String) -> ScanOutcome {
        ScanOutcome::Faulted {
            scan_id: self.scan_id,
            blades: self.blades.load(Ordering::SeqCst),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// start_scan
// ---------------------------------------------------------------------------

/// Create the scan record, upload calibration, start the motor, then run the
/// session in the background.
///
/// Fails before anything is sent if the link is down or the disk type is
/// unknown. Telemetry that queued up before this call is discarded.
///
/// The scan record exists before the first command goes out. If the upload
/// or motor start then fails, the error is returned and that record stays
/// behind with no blades; no session runs and no events are sent.
pub async fn start_scan(
    ctx: ScanContext,
    disk_type_id: u64,
) -> Result<(ScanHandle, mpsc::UnboundedReceiver<ScanEvent>)> {
    let ScanContext {
        dispatcher,
        mut telemetry,
        store,
        recorder,
    } = ctx;

    if !dispatcher.link().is_connected() {
        return Err(CoreError::NotConnected);
    }
    let params = store
        .get_disk_type_params(disk_type_id)?
        .ok_or(CoreError::DiskTypeNotFound(disk_type_id))?;
    let device = match store.get_device_config()? {
        Some(device) => device,
        None => {
            warn!("no device configuration stored; using defaults");
            DeviceConfig::default()
        }
    };
    let blade_force = build::pressure(params.blade_force)?;
    let upload = build::settings_upload(&device, &params)?;

    let scan_id = store.create_scan_session(disk_type_id)?;
    info!(scan_id, disk_type_id, blade_force, "scan session created");

    let stale = telemetry.drain();
    if stale > 0 {
        debug!(stale, "discarded telemetry queued before the scan");
    }

    dispatcher.dispatch_all(&upload).await?;
    dispatcher
        .dispatch_all(&[build::motor_on(true), Command::Status, Command::StartScan])
        .await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let sequencer = Sequencer {
        dispatcher,
        store,
        recorder,
        memory: SessionMemory::new(blade_force, device.recording_duration()),
        last_phase: ScanPhase::Idle,
        events: events_tx,
        scan_id,
        disk_type_id,
        blades: Arc::new(AtomicU32::new(0)),
    };
    let blades = Arc::clone(&sequencer.blades);
    let weak_events = sequencer.events.downgrade();
    sequencer.emit(ScanEvent::Started {
        scan_id,
        disk_type_id,
    });
    let task = tokio::spawn(sequencer.run(telemetry, control_rx));

    Ok((
        ScanHandle {
            scan_id,
            blades,
            control: control_tx,
            events: weak_events,
            task,
        },
        events_rx,
    ))
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

struct Sequencer {
    dispatcher: Dispatcher,
    store: Arc<dyn ScanStore>,
    recorder: Arc<dyn Recorder>,
    memory: SessionMemory,
    last_phase: ScanPhase,
    events: mpsc::UnboundedSender<ScanEvent>,
    scan_id: u64,
    disk_type_id: u64,
    blades: Arc<AtomicU32>,
}

impl Sequencer {
    async fn run(
        mut self,
        mut telemetry: TelemetryStream,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) -> ScanOutcome {
        let mut link_state = self.dispatcher.link().subscribe();

        loop {
            tokio::select! {
                biased;

                changed = link_state.changed() => {
                    if changed.is_err() || !*link_state.borrow() {
                        return self.fault(&mut telemetry, "device disconnected");
                    }
                }

                Some(Control::Stop) = control.recv() => {
                    if let Err(e) = self.stop().await {
                        return self.fault(&mut telemetry, &e.to_string());
                    }
                }

                frame = telemetry.recv() => {
                    let Some(frame) = frame else {
                        return self.fault(&mut telemetry, "telemetry stream ended");
                    };
                    if !self.dispatcher.link().is_connected() {
                        return self.fault(&mut telemetry, "device disconnected");
                    }
                    match self.on_frame(frame).await {
                        Ok(true) => return self.finish(&mut telemetry),
                        Ok(false) => {}
                        Err(e) if e.is_fatal() => {
                            return self.fault(&mut telemetry, &e.to_string());
                        }
                        Err(e) => error!(scan_id = self.scan_id, "frame processing failed: {e}"),
                    }
                }
            }
        }
    }

    /// Returns true once the session is finished.
    async fn on_frame(&mut self, frame: TelemetryFrame) -> Result<bool> {
        let unreported = frame.unknown_fields();
        if !unreported.is_empty() {
            debug!(?unreported, "frame is missing fields");
        }
        let transition = machine::step(&mut self.memory, &frame);
        self.sync_phase();

        for action in transition.actions {
            match action {
                Action::Send(command) => self.send(&command).await?,
                Action::Pluck(request) => self.pluck(request).await?,
            }
        }
        Ok(transition.finished)
    }

    /// Unacknowledged commands are logged and the session goes on.
    async fn send(&self, command: &Command) -> Result<()> {
        match self.dispatcher.dispatch(command).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(command = %command, "{e}");
                Ok(())
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.memory.request_stop() {
            info!(scan_id = self.scan_id, "stop requested; returning base");
        } else {
            debug!("stop already requested; resending return_base");
        }
        self.send(&Command::ReturnBase).await
    }

    /// Ding, record, persist. A failed ding or recording leaves the blade
    /// current so the next frame can try again.
    async fn pluck(&mut self, request: CaptureRequest) -> Result<()> {
        let seq = request.seq;
        match self.dispatcher.ding().await {
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(seq, "ding not acknowledged; skipping capture: {e}");
                self.memory.abandon_capture();
                self.sync_phase();
                return Ok(());
            }
        }

        self.memory.begin_recording();
        self.sync_phase();

        let audio = match self.record(request.duration).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(seq, "capture failed; blade will be retried: {e}");
                self.memory.abandon_capture();
                self.sync_phase();
                return Ok(());
            }
        };

        match self.store.save_blade_record(self.scan_id, seq, &audio) {
            Ok(blade) => {
                info!(seq, id = blade.id, bytes = audio.len(), "blade saved");
                self.blades.fetch_add(1, Ordering::SeqCst);
                self.emit(ScanEvent::BladeDownloaded {
                    disk_type_id: self.disk_type_id,
                    blade,
                });
            }
            Err(e) => error!(seq, "blade record lost: {e}"),
        }
        self.memory.finish_cycle();
        self.sync_phase();
        Ok(())
    }

    /// Run the blocking recorder off the async workers.
    async fn record(&self, duration: Duration) -> Result<Vec<u8>> {
        let recorder = Arc::clone(&self.recorder);
        match tokio::task::spawn_blocking(move || recorder.capture(duration)).await {
            Ok(captured) => Ok(captured?),
            Err(e) => Err(CaptureError::Stream(format!("capture task failed: {e}")).into()),
        }
    }

    fn blade_count(&self) -> u32 {
        self.blades.load(Ordering::SeqCst)
    }

    fn sync_phase(&mut self) {
        let phase = self.memory.phase();
        if phase != self.last_phase {
            info!(scan_id = self.scan_id, %phase, "phase");
            self.last_phase = phase;
            self.emit(ScanEvent::Phase { phase });
        }
    }

    fn emit(&self, event: ScanEvent) {
        if self.events.send(event).is_err() {
            debug!("no one is listening for scan events");
        }
    }

    fn finish(&mut self, telemetry: &mut TelemetryStream) -> ScanOutcome {
        let drained = telemetry.drain();
        self.dispatcher.link().close();
        info!(
            scan_id = self.scan_id,
            blades = self.blade_count(),
            stop_requested = self.memory.stop_requested(),
            base_returning_seen = self.memory.is_stopping(),
            drained,
            "scan finished"
        );
        self.conclude(ScanOutcome::Completed {
            scan_id: self.scan_id,
            blades: self.blade_count(),
        })
    }

    fn fault(&mut self, telemetry: &mut TelemetryStream, reason: &str) -> ScanOutcome {
        self.memory.fault();
        self.sync_phase();
        let dropped = telemetry.drain();
        self.dispatcher.link().close();
        error!(scan_id = self.scan_id, dropped, "scan faulted: {reason}");
        self.conclude(ScanOutcome::Faulted {
            scan_id: self.scan_id,
            blades: self.blade_count(),
            reason: reason.to_string(),
        })
    }

    fn conclude(&self, outcome: ScanOutcome) -> ScanOutcome {
        self.emit(ScanEvent::Finished {
            outcome: outcome.clone(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_success_flag() {
        let done = ScanOutcome::Completed {
            scan_id: 1,
            blades: 3,
        };
        let faulted = ScanOutcome::Faulted {
            scan_id: 1,
            blades: 0,
            reason: "device disconnected".into(),
        };
        assert!(done.success());
        assert!(!faulted.success());
        assert_eq!(done.blades(), 3);
        assert_eq!(faulted.scan_id(), 1);
    }

    #[test]
    fn capture_errors_do_not_end_the_session() {
        let err = CoreError::from(CaptureError::Empty);
        assert!(matches!(err, CoreError::Capture(CaptureError::Empty)));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "no samples were captured");
    }

    #[test]
    fn events_serialize_with_tags() {
        let event = ScanEvent::Finished {
            outcome: ScanOutcome::Completed {
                scan_id: 4,
                blades: 2,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "finished");
        assert_eq!(json["outcome"]["status"], "completed");
        assert_eq!(json["outcome"]["blades"], 2);
    }
}
