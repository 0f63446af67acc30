use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use soundscan_core::capture::{CaptureError, Recorder};
use soundscan_core::device::{BladeRecord, DeviceConfig, DiskTypeParams};
use soundscan_core::dispatcher::Dispatcher;
use soundscan_core::sequencer::{start_scan, ScanContext, ScanEvent, ScanOutcome};
use soundscan_core::store::{RedbStore, ScanStore};
use soundscan_core::{CoreError, Result};
use soundscan_link::testing::FakeDevice;
use soundscan_link::{Link, LinkConfig, TelemetryStream};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const FOUND: &str = r#"{"scan_in_progress":true,"blade_found":true,"prepearing_for_new_blade":false,"pressure_reached":false,"pulling_blade":false}"#;
const READY: &str = r#"{"scan_in_progress":true,"blade_found":true,"prepearing_for_new_blade":false,"pressure_reached":true,"making_ding":false}"#;
const NEXT: &str = r#"{"scan_in_progress":true,"blade_found":false,"prepearing_for_new_blade":true}"#;
const RETURNING: &str = r#"{"scan_in_progress":true,"base_returning":true}"#;
const HOME: &str = r#"{"scan_in_progress":false,"base_returning":false}"#;

fn fast_config() -> LinkConfig {
    LinkConfig {
        ack_timeout: Duration::from_millis(200),
        max_retries: 1,
        command_gap: Duration::ZERO,
        read_timeout: Duration::from_millis(20),
        settle: Duration::ZERO,
        ..Default::default()
    }
}

/// Hands out queued results, then a fixed clip.
#[derive(Default)]
struct StubRecorder {
    queued: Mutex<VecDeque<std::result::Result<Vec<u8>, CaptureError>>>,
    calls: AtomicUsize,
}

impl StubRecorder {
    fn failing_once() -> Self {
        let stub = Self::default();
        stub.queued.lock().unwrap().push_back(Err(CaptureError::Empty));
        stub
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recorder for StubRecorder {
    fn capture(&self, _duration: Duration) -> std::result::Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(b"RIFF-clip".to_vec()))
    }
}

/// Holds the microphone open for a while before handing back a clip.
struct SlowRecorder {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowRecorder {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recorder for SlowRecorder {
    fn capture(&self, _duration: Duration) -> std::result::Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(b"RIFF-slow".to_vec())
    }
}

/// Delegates to a real store but refuses to save blades.
struct FullDisk(RedbStore);

impl ScanStore for FullDisk {
    fn create_scan_session(&self, disk_type_id: u64) -> Result<u64> {
        self.0.create_scan_session(disk_type_id)
    }

    fn get_disk_type_params(&self, disk_type_id: u64) -> Result<Option<DiskTypeParams>> {
        self.0.get_disk_type_params(disk_type_id)
    }

    fn get_device_config(&self) -> Result<Option<DeviceConfig>> {
        self.0.get_device_config()
    }

    fn save_blade_record(&self, _scan_id: u64, _seq: u32, _audio: &[u8]) -> Result<BladeRecord> {
        Err(CoreError::Store("no space left on device".into()))
    }
}

struct Rig {
    _dir: TempDir,
    device: FakeDevice,
    link: Link,
    telemetry: TelemetryStream,
    store: Arc<RedbStore>,
    disk_type_id: u64,
}

fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RedbStore::open(&dir.path().join("soundscan.redb")).unwrap());
    let disk = store.put_disk_type("fan stage 1", 620.0, 12, 50).unwrap();
    let (device, link, telemetry) = FakeDevice::connect(fast_config());
    Rig {
        _dir: dir,
        device,
        link,
        telemetry,
        store,
        disk_type_id: disk.id,
    }
}

fn context(
    link: Link,
    telemetry: TelemetryStream,
    store: Arc<dyn ScanStore>,
    recorder: Arc<dyn Recorder>,
) -> ScanContext {
    ScanContext {
        dispatcher: Dispatcher::new(link),
        telemetry,
        store,
        recorder,
    }
}

async fn collect(mut events: UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        out.push(event);
    }
    out
}

fn count(device: &FakeDevice, name: &str) -> usize {
    device.commands().iter().filter(|c| *c == name).count()
}

async fn wait_for_command(device: &FakeDevice, name: &str) {
    for _ in 0..200 {
        if count(device, name) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("device never received {name}");
}

#[tokio::test]
async fn full_session_records_one_blade() {
    let rig = rig();
    let recorder = Arc::new(StubRecorder::default());
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        recorder.clone(),
    );

    let (handle, events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    let scan_id = handle.scan_id();

    rig.device
        .emit(r#"{"scan_in_progress":false,"base_returning":false,"head_position":"up"}"#);
    rig.device.emit(FOUND);
    rig.device.emit(READY);
    rig.device.emit(NEXT);
    assert!(handle.stop());
    rig.device.emit(RETURNING);
    rig.device.emit(HOME);

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not finish");
    assert_eq!(
        outcome,
        ScanOutcome::Completed {
            scan_id,
            blades: 1
        }
    );

    let commands = rig.device.commands();
    assert_eq!(
        &commands[..10],
        &[
            "set_head_settings",
            "set_base_settings",
            "set_searching_time",
            "set_circle",
            "set_recording_time",
            "set_force_to_find",
            "set_blade_width",
            "set_motor_on",
            "status",
            "start_scan",
        ]
    );
    assert_eq!(count(&rig.device, "move_head_down"), 1);
    assert_eq!(count(&rig.device, "pull_blade"), 1);
    assert_eq!(count(&rig.device, "ding"), 1);
    assert_eq!(count(&rig.device, "return_base"), 1);
    assert!(rig
        .device
        .received()
        .contains(&r#"{"command":"move_head_down","pressure":50}"#.to_string()));
    assert_eq!(recorder.calls(), 1);

    let blades = rig.store.blades_for_scan(scan_id).unwrap();
    assert_eq!(blades.len(), 1);
    assert_eq!(blades[0].seq, 1);
    assert_eq!(rig.store.blade_audio(blades[0].id).unwrap(), b"RIFF-clip");

    let events = collect(events).await;
    assert!(matches!(events.first(), Some(ScanEvent::Started { .. })));
    let downloaded = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::BladeDownloaded { .. }))
        .count();
    assert_eq!(downloaded, 1);
    match events.last() {
        Some(ScanEvent::Finished { outcome }) => assert!(outcome.success()),
        other => panic!("expected a finished event, got {other:?}"),
    }
    assert!(!rig.link.is_connected());
}

#[tokio::test]
async fn failed_capture_retries_same_blade() {
    let rig = rig();
    let recorder = Arc::new(StubRecorder::failing_once());
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        recorder.clone(),
    );

    let (handle, _events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    let scan_id = handle.scan_id();

    rig.device.emit(READY);
    rig.device.emit(READY);
    rig.device.emit(RETURNING);
    rig.device.emit(HOME);

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not finish");
    assert!(outcome.success());
    assert_eq!(outcome.blades(), 1);
    assert_eq!(count(&rig.device, "ding"), 2);
    assert_eq!(recorder.calls(), 2);

    let blades = rig.store.blades_for_scan(scan_id).unwrap();
    assert_eq!(blades.len(), 1);
    assert_eq!(blades[0].seq, 1);
}

#[tokio::test]
async fn persistence_failure_drops_blade_and_continues() {
    let rig = rig();
    let dir = TempDir::new().unwrap();
    let inner = RedbStore::open(&dir.path().join("soundscan.redb")).unwrap();
    let disk = inner.put_disk_type("fan stage 2", 540.0, 10, 40).unwrap();
    let store = Arc::new(FullDisk(inner));
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        store,
        Arc::new(StubRecorder::default()),
    );

    let (handle, events) = start_scan(ctx, disk.id).await.unwrap();

    rig.device.emit(READY);
    rig.device.emit(NEXT);
    rig.device.emit(READY);
    rig.device.emit(RETURNING);
    rig.device.emit(HOME);

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not finish");
    assert!(outcome.success());
    assert_eq!(outcome.blades(), 0);
    assert_eq!(count(&rig.device, "ding"), 2);

    let events = collect(events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, ScanEvent::BladeDownloaded { .. })));
}

#[tokio::test]
async fn disconnect_faults_the_session() {
    let mut rig = rig();
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        Arc::new(StubRecorder::default()),
    );

    let (handle, events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    rig.device
        .emit(r#"{"scan_in_progress":false,"head_position":"up"}"#);
    wait_for_command(&rig.device, "move_head_down").await;
    rig.device.disconnect();

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not end");
    assert!(matches!(outcome, ScanOutcome::Faulted { blades: 0, .. }));
    assert!(!rig.link.is_connected());

    let events = collect(events).await;
    match events.last() {
        Some(ScanEvent::Finished { outcome }) => assert!(!outcome.success()),
        other => panic!("expected a finished event, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_during_capture_keeps_the_blade() {
    let rig = rig();
    let recorder = Arc::new(SlowRecorder::new(Duration::from_millis(400)));
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        recorder.clone(),
    );

    let (handle, _events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    let scan_id = handle.scan_id();

    rig.device.emit(READY);
    wait_for_command(&rig.device, "ding").await;
    assert!(handle.stop());
    rig.device.emit(RETURNING);
    rig.device.emit(HOME);

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not finish");
    assert_eq!(
        outcome,
        ScanOutcome::Completed {
            scan_id,
            blades: 1
        }
    );
    assert_eq!(recorder.calls(), 1);

    let blades = rig.store.blades_for_scan(scan_id).unwrap();
    assert_eq!(blades.len(), 1);
    assert_eq!(blades[0].seq, 1);
    assert_eq!(rig.store.blade_audio(blades[0].id).unwrap(), b"RIFF-slow");

    let commands = rig.device.commands();
    let ding = commands.iter().position(|c| c == "ding").unwrap();
    let home = commands.iter().position(|c| c == "return_base").unwrap();
    assert!(ding < home, "return_base went out before the ding: {commands:?}");
    assert_eq!(count(&rig.device, "ding"), 1);
}

#[tokio::test]
async fn disconnect_during_capture_sends_nothing_more() {
    let mut rig = rig();
    let recorder = Arc::new(SlowRecorder::new(Duration::from_millis(400)));
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        recorder.clone(),
    );

    let (handle, events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    let scan_id = handle.scan_id();

    rig.device.emit_json(serde_json::json!({
        "scan_in_progress": true,
        "blade_found": true,
        "prepearing_for_new_blade": false,
        "pressure_reached": true,
        "making_ding": false,
    }));
    wait_for_command(&rig.device, "ding").await;
    for _ in 0..200 {
        if recorder.calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(recorder.calls(), 1, "capture never started");

    let sent = rig.device.commands().len();
    rig.device.disconnect();

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("session did not end");
    assert_eq!(
        outcome,
        ScanOutcome::Faulted {
            scan_id,
            blades: 1,
            reason: "device disconnected".into(),
        }
    );
    assert_eq!(rig.device.commands().len(), sent);
    assert_eq!(rig.store.blades_for_scan(scan_id).unwrap().len(), 1);

    let events = collect(events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ScanEvent::BladeDownloaded { .. })));
}

#[tokio::test]
async fn abort_reports_blades_already_saved() {
    let rig = rig();
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        Arc::new(StubRecorder::default()),
    );

    let (handle, events) = start_scan(ctx, rig.disk_type_id).await.unwrap();
    let scan_id = handle.scan_id();

    rig.device.emit(READY);
    for _ in 0..200 {
        if !rig.store.blades_for_scan(scan_id).unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rig.store.blades_for_scan(scan_id).unwrap().len(), 1);

    handle.abort();
    let aborted = ScanOutcome::Faulted {
        scan_id,
        blades: 1,
        reason: "aborted".into(),
    };
    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("aborted session did not end");
    assert_eq!(outcome, aborted);

    let events = collect(events).await;
    match events.last() {
        Some(ScanEvent::Finished { outcome }) => assert_eq!(outcome, &aborted),
        other => panic!("expected a finished event, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_during_upload_leaves_an_empty_scan() {
    let mut rig = rig();
    rig.device.set_echo(false);
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        Arc::new(StubRecorder::default()),
    );

    let starting = tokio::spawn(start_scan(ctx, rig.disk_type_id));
    wait_for_command(&rig.device, "set_head_settings").await;
    rig.device.disconnect();

    let err = tokio::time::timeout(Duration::from_secs(10), starting)
        .await
        .expect("start_scan hung")
        .unwrap()
        .err()
        .expect("scan should not start");
    assert!(err.is_fatal());

    let scans = rig.store.list_scans().unwrap();
    assert_eq!(scans.len(), 1);
    assert!(rig.store.blades_for_scan(scans[0].id).unwrap().is_empty());
    assert!(!rig.device.commands().contains(&"start_scan".to_string()));
}

#[tokio::test]
async fn unknown_disk_type_sends_nothing() {
    let rig = rig();
    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        Arc::new(StubRecorder::default()),
    );

    let err = start_scan(ctx, 42).await.err().expect("scan should not start");
    assert!(matches!(err, CoreError::DiskTypeNotFound(42)));
    assert!(rig.device.received().is_empty());
    assert!(rig.store.list_scans().unwrap().is_empty());
}

#[tokio::test]
async fn refuses_to_start_when_disconnected() {
    let mut rig = rig();
    rig.device.disconnect();
    for _ in 0..200 {
        if !rig.link.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let ctx = context(
        rig.link.clone(),
        rig.telemetry,
        rig.store.clone(),
        Arc::new(StubRecorder::default()),
    );
    let err = start_scan(ctx, rig.disk_type_id)
        .await
        .err()
        .expect("scan should not start");
    assert!(matches!(err, CoreError::NotConnected));
}
