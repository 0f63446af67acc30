//! In-memory stand-in for the rig, for tests that need a [`Link`] without
//! hardware.
//!
//! The device thread records every line the host writes and echoes it back,
//! the way the firmware acknowledges commands. Telemetry is injected with
//! [`FakeDevice::emit`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::link::{Link, LinkConfig};
use crate::stream::TelemetryStream;

const POLL: Duration = Duration::from_millis(10);

/// Host side of the read half.
pub struct HostReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    timeout: Duration,
}

impl Read for HostReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Host side of the write half.
pub struct HostWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for HostWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct FakeDevice {
    to_host: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    received: Arc<Mutex<Vec<String>>>,
    echo: Arc<AtomicBool>,
    swallow: Arc<AtomicU32>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FakeDevice {
    /// A device plus the host-side byte pair wired to it.
    pub fn pair(read_timeout: Duration) -> (FakeDevice, HostReader, HostWriter) {
        let (to_host_tx, to_host_rx) = mpsc::channel::<Vec<u8>>();
        let (from_host_tx, from_host_rx) = mpsc::channel::<Vec<u8>>();

        let device = FakeDevice {
            to_host: Arc::new(Mutex::new(Some(to_host_tx))),
            received: Arc::new(Mutex::new(Vec::new())),
            echo: Arc::new(AtomicBool::new(true)),
            swallow: Arc::new(AtomicU32::new(0)),
            alive: Arc::new(AtomicBool::new(true)),
            thread: None,
        };
        let device = device.spawn(from_host_rx);

        let reader = HostReader {
            rx: to_host_rx,
            pending: VecDeque::new(),
            timeout: read_timeout,
        };
        let writer = HostWriter { tx: from_host_tx };
        (device, reader, writer)
    }

    /// A device already connected to a running [`Link`].
    pub fn connect(config: LinkConfig) -> (FakeDevice, Link, TelemetryStream) {
        let (device, reader, writer) = Self::pair(config.read_timeout);
        let (link, telemetry) = Link::from_io("fake", reader, writer, config)
            .unwrap_or_else(|e| panic!("fake link failed to start: {e}"));
        (device, link, telemetry)
    }

    fn spawn(mut self, from_host: Receiver<Vec<u8>>) -> Self {
        let to_host = Arc::clone(&self.to_host);
        let received = Arc::clone(&self.received);
        let echo = Arc::clone(&self.echo);
        let swallow = Arc::clone(&self.swallow);
        let alive = Arc::clone(&self.alive);

        self.thread = Some(std::thread::spawn(move || {
            let mut partial = Vec::new();
            while alive.load(Ordering::SeqCst) {
                let chunk = match from_host.recv_timeout(POLL) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                partial.extend(chunk);
                while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = partial.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    if !alive.load(Ordering::SeqCst) {
                        break;
                    }
                    received.lock().unwrap().push(text.clone());

                    let skip = swallow
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                    if echo.load(Ordering::SeqCst) && !skip {
                        if let Some(tx) = to_host.lock().unwrap().as_ref() {
                            let _ = tx.send(format!("{text}\n").into_bytes());
                        }
                    }
                }
            }
        }));
        self
    }

    /// Send one line to the host, newline appended.
    pub fn emit(&self, line: &str) {
        if let Some(tx) = self.to_host.lock().unwrap().as_ref() {
            let _ = tx.send(format!("{line}\n").into_bytes());
        }
    }

    pub fn emit_json(&self, value: serde_json::Value) {
        self.emit(&value.to_string());
    }

    /// Every line the host has written, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Wire names of the commands received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|v| v.get("command").and_then(|c| c.as_str()).map(String::from))
            .collect()
    }

    pub fn set_echo(&self, on: bool) {
        self.echo.store(on, Ordering::SeqCst);
    }

    /// Drop the echo for the next `n` lines.
    pub fn swallow_echoes(&self, n: u32) {
        self.swallow.store(n, Ordering::SeqCst);
    }

    /// Pull the cable: the host sees end-of-stream and writes start failing.
    pub fn disconnect(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.to_host.lock().unwrap().take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}
