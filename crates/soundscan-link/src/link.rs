use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::ports;
use crate::stream::TelemetryStream;
use crate::telemetry::{decode_line, Inbound, TelemetryFrame};
use crate::{LinkError, Result};

// ─── Configuration ────────────────────────────────────────────────────────

/// How the per-attempt acknowledgement timeout grows across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Every attempt waits the same amount.
    #[default]
    Fixed,
    /// Each retry waits twice as long as the previous attempt.
    Exponential,
}

impl Backoff {
    /// Timeout for the 1-based `attempt`.
    pub fn attempt_timeout(self, base: Duration, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1 << shift)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Time to wait for the echo of one attempt.
    pub ack_timeout: Duration,
    /// Re-sends after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Minimum spacing between consecutive writes.
    pub command_gap: Duration,
    /// Serial read timeout; bounds how quickly the reader notices `close`.
    pub read_timeout: Duration,
    /// Wait after opening the port. The board resets when the port opens.
    pub settle: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(1000),
            max_retries: 3,
            backoff: Backoff::Fixed,
            command_gap: Duration::from_millis(100),
            read_timeout: Duration::from_millis(100),
            settle: Duration::from_millis(2000),
        }
    }
}

/// A command the device echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledged {
    pub command: &'static str,
    pub attempts: u32,
}

// ─── Shared state ─────────────────────────────────────────────────────────

/// The one expectation armed by an in-flight `send`.
struct PendingAck {
    expected: String,
    attempt: u32,
    deadline: Instant,
    done: oneshot::Sender<()>,
}

struct Shared {
    port: String,
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<Option<PendingAck>>,
    /// Serializes senders; holds the time of the last write.
    send_gate: tokio::sync::Mutex<Option<Instant>>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    state: watch::Sender<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn arm(&self, ack: PendingAck) {
        *lock(&self.pending) = Some(ack);
    }

    fn disarm(&self) {
        lock(&self.pending).take();
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Flip to disconnected once. Dropping the pending sender wakes any
    /// waiting `send` with a disconnect.
    fn mark_disconnected(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(port = %self.port, "link closed");
            } else {
                error!(port = %self.port, reason, "device disconnected");
            }
            self.state.send_replace(false);
        }
        self.disarm();
    }

    /// Complete the armed send if `line` is its echo.
    fn try_acknowledge(&self, line: &str) -> bool {
        let mut pending = lock(&self.pending);
        let matches = pending.as_ref().is_some_and(|p| p.expected == line);
        if !matches {
            return false;
        }
        if let Some(ack) = pending.take() {
            if Instant::now() > ack.deadline {
                debug!(attempt = ack.attempt, "echo arrived after the attempt deadline");
            }
            let _ = ack.done.send(());
        }
        true
    }
}

// ─── Link ─────────────────────────────────────────────────────────────────

/// An open connection to the rig.
///
/// A dedicated reader thread owns the read half of the port. It completes
/// pending sends when their echo arrives and forwards every other JSON
/// object as a [`TelemetryFrame`]. Cloning a `Link` shares the connection.
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
    config: LinkConfig,
}

impl Link {
    /// Open `port` at `baud`, wait for the board to settle, then start the
    /// reader. A bare name such as `ttyUSB0` is looked up under `/dev/`.
    pub async fn connect(
        port: &str,
        baud: u32,
        config: LinkConfig,
    ) -> Result<(Link, TelemetryStream)> {
        let path = ports::device_path(port);
        let serial = serialport::new(&path, baud)
            .timeout(config.read_timeout)
            .open()
            .map_err(|source| LinkError::Connect {
                port: path.clone(),
                source,
            })?;
        let writer = serial.try_clone().map_err(|source| LinkError::Connect {
            port: path.clone(),
            source,
        })?;

        tokio::time::sleep(config.settle).await;
        if let Err(e) = serial.clear(serialport::ClearBuffer::Input) {
            warn!(port = %path, "could not clear boot output: {e}");
        }

        info!(port = %path, baud, "serial port open");
        Self::from_io(&path, serial, writer, config)
    }

    /// Try `preferred` first, then every candidate port that reports a
    /// manufacturer. Use [`Link::port`] to learn which one opened.
    pub async fn connect_auto(
        preferred: &str,
        baud: u32,
        config: LinkConfig,
    ) -> Result<(Link, TelemetryStream)> {
        let mut tried = Vec::new();

        if !preferred.is_empty() {
            match Self::connect(preferred, baud, config.clone()).await {
                Ok(opened) => return Ok(opened),
                Err(e) => {
                    warn!("{e}");
                    tried.push(preferred.to_string());
                }
            }
        }

        let available = ports::available()?;
        for candidate in ports::candidates(&available) {
            if tried.iter().any(|t| t == &candidate.name) {
                continue;
            }
            debug!(port = %candidate.name, "trying candidate port");
            match Self::connect(&candidate.name, baud, config.clone()).await {
                Ok(opened) => return Ok(opened),
                Err(e) => {
                    warn!("{e}");
                    tried.push(candidate.name.clone());
                }
            }
        }

        Err(LinkError::NoPort {
            tried: if tried.is_empty() {
                "none".to_string()
            } else {
                tried.join(", ")
            },
        })
    }

    /// Run the link over an arbitrary byte pair.
    ///
    /// Reads should return `ErrorKind::TimedOut` periodically when idle so the
    /// reader can observe [`Link::close`]. `Ok(0)` or any other error is
    /// treated as a disconnect.
    pub fn from_io<R, W>(
        name: &str,
        reader: R,
        writer: W,
        config: LinkConfig,
    ) -> Result<(Link, TelemetryStream)>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (state, _) = watch::channel(true);
        let shared = Arc::new(Shared {
            port: name.to_string(),
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(None),
            send_gate: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            state,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name(format!("link-reader {name}"))
            .spawn(move || read_loop(reader_shared, reader, tx))?;

        Ok((Link { shared, config }, TelemetryStream::new(rx)))
    }

    pub fn port(&self) -> &str {
        &self.shared.port
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Watch the connection state. The value flips to `false` exactly once.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.state.subscribe()
    }

    /// Send with the configured timeout and retry count.
    pub async fn send(&self, command: &Command) -> Result<Acknowledged> {
        self.send_with(command, self.config.ack_timeout, self.config.max_retries)
            .await
    }

    /// Write `command` and wait for the device to echo the identical line.
    ///
    /// Re-sends the same bytes up to `max_retries` times. Only one send is in
    /// flight at a time; concurrent callers queue on the gate.
    pub async fn send_with(
        &self,
        command: &Command,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Acknowledged> {
        let line = command.encode()?;
        let name = command.name();
        let attempts = max_retries.saturating_add(1);
        let mut gate = self.shared.send_gate.lock().await;

        for attempt in 1..=attempts {
            if !self.is_connected() {
                return Err(LinkError::Disconnected);
            }
            if let Some(last) = *gate {
                let since = last.elapsed();
                if since < self.config.command_gap {
                    tokio::time::sleep(self.config.command_gap - since).await;
                }
            }

            let wait = self.config.backoff.attempt_timeout(timeout, attempt);
            let (done, acked) = oneshot::channel();
            self.shared.arm(PendingAck {
                expected: line.clone(),
                attempt,
                deadline: Instant::now() + wait,
                done,
            });

            if let Err(e) = self.shared.write_line(&line) {
                self.shared.mark_disconnected(&e.to_string());
                return Err(LinkError::Io(e));
            }
            *gate = Some(Instant::now());
            debug!(command = %name, attempt, "sent {line}");

            match tokio::time::timeout(wait, acked).await {
                Ok(Ok(())) => {
                    debug!(command = %name, attempt, "acknowledged");
                    return Ok(Acknowledged {
                        command: name,
                        attempts: attempt,
                    });
                }
                // Sender dropped without completing: the reader disarmed us.
                Ok(Err(_)) => return Err(LinkError::Disconnected),
                Err(_) => {
                    warn!(command = %name, attempt, "no echo within {wait:?}");
                }
            }
        }

        self.shared.disarm();
        Err(LinkError::Timeout {
            command: name.to_string(),
            attempts,
        })
    }

    /// Stop the reader. It exits at its next read timeout and the telemetry
    /// stream ends once drained.
    pub fn close(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.mark_disconnected("closed");
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────

/// Longest line kept from the device. Anything longer is noise on the line.
const MAX_LINE_BYTES: usize = 64 * 1024;

fn read_loop<R: Read>(shared: Arc<Shared>, reader: R, tx: mpsc::UnboundedSender<TelemetryFrame>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    // Set while skipping the rest of an over-long line.
    let mut overlong = false;

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if buf.len() >= MAX_LINE_BYTES {
            if !overlong {
                warn!(port = %shared.port, "dropping device line longer than {MAX_LINE_BYTES} bytes");
            }
            overlong = true;
            buf.clear();
        }
        let room = (MAX_LINE_BYTES - buf.len()) as u64;
        match (&mut reader).take(room).read_until(b'\n', &mut buf) {
            Ok(0) => {
                shared.mark_disconnected("end of stream");
                break;
            }
            Ok(_) if buf.ends_with(b"\n") => {
                if std::mem::take(&mut overlong) {
                    buf.clear();
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                buf.clear();
                handle_line(&shared, &line, &tx);
            }
            // Line cap reached, or the stream ended mid-line. The next pass
            // sorts out which.
            Ok(_) => continue,
            // Partial bytes stay in `buf` until the rest of the line arrives.
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                shared.mark_disconnected(&e.to_string());
                break;
            }
        }
    }
    debug!(port = %shared.port, "reader exited");
}

fn handle_line(shared: &Shared, line: &str, tx: &mpsc::UnboundedSender<TelemetryFrame>) {
    if line.is_empty() || shared.try_acknowledge(line) {
        return;
    }
    match decode_line(line) {
        Ok(Inbound::Telemetry(frame)) => {
            debug!(?frame, "telemetry");
            if tx.send(frame).is_err() {
                debug!("telemetry receiver dropped");
            }
        }
        Ok(Inbound::StaleEcho(name)) => {
            debug!(command = %name, "dropping unmatched echo");
        }
        Err(e) => warn!("dropping device line: {e}"),
    }
}
