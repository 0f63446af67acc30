//! Scan state machine.
//!
//! [`step`] is the only place that decides what the rig does next. It looks
//! at the session memory and the newest telemetry frame and returns the
//! actions to perform. The sequencer performs them and reports the outcome
//! of a pluck back through [`SessionMemory::finish_cycle`] or
//! [`SessionMemory::abandon_capture`].

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use soundscan_link::{Command, Flag, HeadPosition, TelemetryFrame};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ScanPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    HeadUp,
    HeadDescending,
    Searching,
    Pulling,
    Dinging,
    Recording,
    ReturningBase,
    Finished,
    Faulted,
}

impl ScanPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::HeadUp => "head_up",
            ScanPhase::HeadDescending => "head_descending",
            ScanPhase::Searching => "searching",
            ScanPhase::Pulling => "pulling",
            ScanPhase::Dinging => "dinging",
            ScanPhase::Recording => "recording",
            ScanPhase::ReturningBase => "returning_base",
            ScanPhase::Finished => "finished",
            ScanPhase::Faulted => "faulted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Finished | ScanPhase::Faulted)
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Ding the blade, then record it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub seq: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Command),
    /// Send `ding`; once acknowledged, capture and persist blade `seq`.
    Pluck(CaptureRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub phase: ScanPhase,
    pub actions: Vec<Action>,
    pub finished: bool,
}

impl Transition {
    fn stay(phase: ScanPhase) -> Self {
        Self {
            phase,
            actions: Vec::new(),
            finished: false,
        }
    }

    fn send(phase: ScanPhase, command: Command) -> Self {
        Self {
            phase,
            actions: vec![Action::Send(command)],
            finished: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionMemory
// ---------------------------------------------------------------------------

/// Everything the machine remembers between frames.
#[derive(Debug, Clone)]
pub struct SessionMemory {
    blade_force: u32,
    recording: Duration,
    blade_counter: u32,
    blade_created: bool,
    stopping: bool,
    stop_requested: bool,
    phase: ScanPhase,
}

impl SessionMemory {
    pub fn new(blade_force: u32, recording: Duration) -> Self {
        Self {
            blade_force,
            recording,
            blade_counter: 0,
            blade_created: false,
            stopping: false,
            stop_requested: false,
            phase: ScanPhase::Idle,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn blade_counter(&self) -> u32 {
        self.blade_counter
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Record an operator stop. Returns false if one was already requested.
    /// The session keeps running until the device reports the base is home.
    pub fn request_stop(&mut self) -> bool {
        !std::mem::replace(&mut self.stop_requested, true)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// The ding was acknowledged and the microphone is open.
    pub fn begin_recording(&mut self) {
        self.phase = ScanPhase::Recording;
    }

    /// The pluck cycle is over, saved or not. The next blade starts fresh.
    pub fn finish_cycle(&mut self) {
        self.blade_created = false;
        self.phase = ScanPhase::Searching;
    }

    /// Nothing was captured. The blade stays current so the next frame
    /// can retry the ding under the same sequence number.
    pub fn abandon_capture(&mut self) {
        self.phase = ScanPhase::Dinging;
    }

    pub fn fault(&mut self) {
        self.phase = ScanPhase::Faulted;
    }
}

// ---------------------------------------------------------------------------
// step
// ---------------------------------------------------------------------------

/// Decide what to do with one frame.
pub fn step(memory: &mut SessionMemory, frame: &TelemetryFrame) -> Transition {
    if memory.phase.is_terminal() {
        return Transition::stay(memory.phase);
    }

    let scanning = frame.scan_in_progress.is_set();
    let returning = frame.base_returning.is_set();

    // A device-initiated return ends the session just like an operator stop.
    if returning && !memory.stopping {
        info!(
            requested = memory.stop_requested,
            "base returning; session will finish once it is home"
        );
        memory.stopping = true;
    }

    let transition = if memory.stopping && !scanning && !returning {
        Transition {
            phase: ScanPhase::Finished,
            actions: Vec::new(),
            finished: true,
        }
    } else if !scanning && !returning {
        note_unknown("scan_in_progress", frame.scan_in_progress);
        note_unknown("base_returning", frame.base_returning);
        if frame.head_position == HeadPosition::Up {
            Transition::send(
                ScanPhase::HeadUp,
                Command::MoveHeadDown {
                    pressure: memory.blade_force,
                },
            )
        } else {
            Transition::send(ScanPhase::HeadDescending, Command::StartScan)
        }
    } else if !frame.preparing_for_new_blade.is_set() && frame.blade_found.is_set() {
        note_unknown("preparing_for_new_blade", frame.preparing_for_new_blade);
        blade_cycle(memory, frame)
    } else if returning {
        Transition::stay(ScanPhase::ReturningBase)
    } else {
        Transition::stay(ScanPhase::Searching)
    };

    memory.phase = transition.phase;
    transition
}

fn blade_cycle(memory: &mut SessionMemory, frame: &TelemetryFrame) -> Transition {
    if !memory.blade_created {
        memory.blade_created = true;
        memory.blade_counter += 1;
        debug!(seq = memory.blade_counter, "blade found");
    }

    if !frame.pressure_reached.is_set() {
        if frame.pulling_blade.is_set() {
            Transition::stay(ScanPhase::Pulling)
        } else {
            Transition::send(ScanPhase::Pulling, Command::PullBlade)
        }
    } else if !frame.making_ding.is_set() {
        Transition {
            phase: ScanPhase::Dinging,
            actions: vec![Action::Pluck(CaptureRequest {
                seq: memory.blade_counter,
                duration: memory.recording,
            })],
            finished: false,
        }
    } else {
        Transition::stay(ScanPhase::Dinging)
    }
}

fn note_unknown(field: &str, flag: Flag) {
    if !flag.is_known() {
        debug!(field, "device did not report flag; treating as not set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SessionMemory {
        SessionMemory::new(50, Duration::from_millis(3000))
    }

    fn frame(json: &str) -> TelemetryFrame {
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        TelemetryFrame::from_object(value.as_object().unwrap())
    }

    fn sent(t: &Transition) -> Vec<&'static str> {
        t.actions
            .iter()
            .map(|a| match a {
                Action::Send(c) => c.name(),
                Action::Pluck(_) => "pluck",
            })
            .collect()
    }

    #[test]
    fn head_up_issues_move_down_every_time() {
        let mut m = memory();
        for _ in 0..3 {
            let t = step(&mut m, &frame(r#"{"head_position":"up","scan_in_progress":false}"#));
            assert_eq!(t.phase, ScanPhase::HeadUp);
            assert_eq!(
                t.actions,
                vec![Action::Send(Command::MoveHeadDown { pressure: 50 })]
            );
        }
        assert_eq!(m.blade_counter(), 0);
    }

    #[test]
    fn head_down_starts_scan() {
        let mut m = memory();
        let t = step(&mut m, &frame(r#"{"head_position":"down"}"#));
        assert_eq!(t.phase, ScanPhase::HeadDescending);
        assert_eq!(sent(&t), vec!["start_scan"]);
    }

    #[test]
    fn blade_counter_increments_once_per_cycle() {
        let mut m = memory();
        let found = frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":false,"pulling_blade":false}"#);
        let pulling = frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":false,"pulling_blade":true}"#);

        assert_eq!(sent(&step(&mut m, &found)), vec!["pull_blade"]);
        assert_eq!(sent(&step(&mut m, &pulling)), Vec::<&str>::new());
        assert_eq!(sent(&step(&mut m, &found)), vec!["pull_blade"]);
        assert_eq!(m.blade_counter(), 1);
        assert_eq!(m.phase(), ScanPhase::Pulling);
    }

    #[test]
    fn pressure_reached_requests_pluck_with_current_seq() {
        let mut m = memory();
        step(&mut m, &frame(r#"{"scan_in_progress":true,"blade_found":true}"#));
        let t = step(
            &mut m,
            &frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":true,"making_ding":false}"#),
        );
        assert_eq!(
            t.actions,
            vec![Action::Pluck(CaptureRequest {
                seq: 1,
                duration: Duration::from_millis(3000),
            })]
        );
        assert_eq!(t.phase, ScanPhase::Dinging);
    }

    #[test]
    fn failed_capture_retries_same_blade() {
        let mut m = memory();
        let ready = frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":true,"making_ding":false}"#);
        step(&mut m, &ready);
        m.abandon_capture();

        let t = step(&mut m, &ready);
        match t.actions.as_slice() {
            [Action::Pluck(req)] => assert_eq!(req.seq, 1),
            other => panic!("expected a pluck, got {other:?}"),
        }
        assert_eq!(m.blade_counter(), 1);
    }

    #[test]
    fn completed_cycle_starts_a_new_blade() {
        let mut m = memory();
        let ready = frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":true}"#);
        step(&mut m, &ready);
        m.finish_cycle();
        step(&mut m, &frame(r#"{"scan_in_progress":true,"prepearing_for_new_blade":true}"#));
        assert_eq!(m.phase(), ScanPhase::Searching);

        let t = step(&mut m, &ready);
        match t.actions.as_slice() {
            [Action::Pluck(req)] => assert_eq!(req.seq, 2),
            other => panic!("expected a pluck, got {other:?}"),
        }
    }

    #[test]
    fn ringing_blade_waits() {
        let mut m = memory();
        let t = step(
            &mut m,
            &frame(r#"{"scan_in_progress":true,"blade_found":true,"pressure_reached":true,"making_ding":true}"#),
        );
        assert!(t.actions.is_empty());
        assert_eq!(t.phase, ScanPhase::Dinging);
    }

    #[test]
    fn preparing_for_next_blade_ignores_blade_found() {
        let mut m = memory();
        let t = step(
            &mut m,
            &frame(r#"{"scan_in_progress":true,"blade_found":true,"prepearing_for_new_blade":true}"#),
        );
        assert!(t.actions.is_empty());
        assert_eq!(m.blade_counter(), 0);
    }

    #[test]
    fn finishes_after_base_returns() {
        let mut m = memory();
        assert!(!m.stop_requested());
        assert!(m.request_stop());
        assert!(!m.request_stop());
        assert!(m.stop_requested());

        let t = step(&mut m, &frame(r#"{"base_returning":true}"#));
        assert_eq!(t.phase, ScanPhase::ReturningBase);
        assert!(!t.finished);
        assert!(m.is_stopping());

        let t = step(&mut m, &frame(r#"{"base_returning":false}"#));
        assert!(t.finished);
        assert_eq!(m.phase(), ScanPhase::Finished);
    }

    #[test]
    fn stop_request_alone_does_not_finish() {
        let mut m = memory();
        m.request_stop();
        let t = step(&mut m, &frame(r#"{"head_position":"up","scan_in_progress":false,"base_returning":false}"#));
        assert!(!t.finished);
        assert_eq!(sent(&t), vec!["move_head_down"]);
    }

    #[test]
    fn device_initiated_return_also_finishes() {
        let mut m = memory();
        step(&mut m, &frame(r#"{"scan_in_progress":true,"base_returning":true}"#));
        let t = step(&mut m, &frame(r#"{"scan_in_progress":false,"base_returning":false}"#));
        assert!(t.finished);
    }

    #[test]
    fn terminal_phase_ignores_frames() {
        let mut m = memory();
        m.fault();
        let t = step(&mut m, &frame(r#"{"head_position":"up"}"#));
        assert!(t.actions.is_empty());
        assert_eq!(t.phase, ScanPhase::Faulted);
    }
}
