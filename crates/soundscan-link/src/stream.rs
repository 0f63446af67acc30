use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::telemetry::TelemetryFrame;

// ─── TelemetryStream ──────────────────────────────────────────────────────

/// Unsolicited telemetry frames, in arrival order.
///
/// Backed by an unbounded channel fed by the link's reader thread. Frames
/// queue rather than drop when the consumer is busy. The stream ends once
/// the reader exits (disconnect or [`Link::close`](crate::Link::close)) and
/// every queued frame has been taken. It cannot be restarted.
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// let (link, mut telemetry) = Link::connect("ttyUSB0", 115200, LinkConfig::default()).await?;
/// while let Some(frame) = telemetry.next().await {
///     println!("{frame:?}");
/// }
/// ```
pub struct TelemetryStream {
    rx: mpsc::UnboundedReceiver<TelemetryFrame>,
}

impl TelemetryStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TelemetryFrame>) -> Self {
        Self { rx }
    }

    /// Wait for the next frame. `None` once the reader is gone and the queue
    /// is empty.
    pub async fn recv(&mut self) -> Option<TelemetryFrame> {
        self.rx.recv().await
    }

    /// Discard everything queued so far. Returns the number of frames dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Wrap a raw receiver. Used by tests that inject frames directly.
    #[cfg(any(test, feature = "test-util"))]
    pub fn from_channel(rx: mpsc::UnboundedReceiver<TelemetryFrame>) -> Self {
        Self { rx }
    }
}

impl Stream for TelemetryStream {
    type Item = TelemetryFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Flag;
    use futures::StreamExt;

    #[tokio::test]
    async fn yields_frames_in_order_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let first = TelemetryFrame {
            blade_found: Flag::True,
            ..Default::default()
        };
        let second = TelemetryFrame {
            blade_found: Flag::False,
            ..Default::default()
        };
        tx.send(first.clone()).unwrap();
        tx.send(second.clone()).unwrap();
        drop(tx);

        let frames: Vec<_> = TelemetryStream::from_channel(rx).collect().await;
        assert_eq!(frames, vec![first, second]);
    }

    #[tokio::test]
    async fn drain_discards_queued_frames() {
        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            tx.send(TelemetryFrame::default()).unwrap();
        }
        let mut stream = TelemetryStream::from_channel(rx);
        assert_eq!(stream.drain(), 3);
        drop(tx);
        assert!(stream.recv().await.is_none());
    }
}
