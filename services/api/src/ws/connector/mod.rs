//! Connectors to the streaming speech backends.
//!
//! Each connector is a spawned task bridging a backend WebSocket to a pair
//! of bounded channels. Dropping the handle aborts the task, which closes
//! the backend socket; a handle is owned by exactly one place so each
//! connector is closed at most once.

pub mod stt;
pub mod tts;

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};

/// Bound on each connector channel. A full channel pauses the producer
/// instead of dropping frames.
pub(crate) const CONNECTOR_QUEUE: usize = 64;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend protocol violation: {0}")]
    ProtocolViolation(String),
}

/// A frame produced by a connector task. One enum covers both directions;
/// each connector only ever produces the variants of its own backend.
#[derive(Debug)]
pub enum StreamFrame {
    /// The backend finished its handshake.
    Ready,
    /// A partial transcript fragment with its utterance-relative start time.
    TranscriptDelta { text: String, start_time: f64 },
    /// The authoritative transcript of the utterance so far.
    TranscriptFinal { text: String },
    /// The backend VAD decided the user stopped speaking.
    EndOfSpeech,
    /// Raw little-endian PCM16 synthesized audio.
    Audio(Bytes),
    /// Synthesis of the submitted text is complete.
    SynthesisDone,
    /// The connector failed; no further frames follow.
    Failed(ConnectorError),
}

/// Handle to a running connector task. `Out` is the outbound payload type
/// of the backend (audio bytes for STT, text commands for TTS).
#[derive(Debug)]
pub struct ConnectorHandle<Out> {
    tx: mpsc::Sender<Out>,
    pub frames: mpsc::Receiver<StreamFrame>,
    task: JoinHandle<()>,
}

impl<Out> ConnectorHandle<Out> {
    pub(crate) fn new(
        tx: mpsc::Sender<Out>,
        frames: mpsc::Receiver<StreamFrame>,
        task: JoinHandle<()>,
    ) -> Self {
        Self { tx, frames, task }
    }

    /// Forwards a payload to the backend. Blocks when the connector's
    /// queue is full, propagating backpressure to the caller.
    pub async fn send(&self, out: Out) -> Result<(), ConnectorError> {
        self.tx
            .send(out)
            .await
            .map_err(|_| ConnectorError::Unavailable("connector task stopped".into()))
    }

    /// Aborts the connector task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl<Out> Drop for ConnectorHandle<Out> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_joins_the_connector_task() {
        let (tx, _out_rx) = mpsc::channel::<Bytes>(1);
        let (_frame_tx, frame_rx) = mpsc::channel(1);
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = ConnectorHandle::new(tx, frame_rx, task);

        // Must return even though the task itself never finishes.
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_fails_after_task_stops() {
        let (tx, out_rx) = mpsc::channel::<Bytes>(1);
        let (_frame_tx, frame_rx) = mpsc::channel(1);
        drop(out_rx);
        let task = tokio::spawn(async {});
        let handle = ConnectorHandle::new(tx, frame_rx, task);

        let result = handle.send(Bytes::from_static(b"pcm")).await;
        assert!(matches!(result, Err(ConnectorError::Unavailable(_))));
    }
}
