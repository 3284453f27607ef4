/// Progress Reporting
///
/// One-way channel from an analysis to a streaming client. Progress ticks
/// are fire-and-forget: when the reader falls behind and the buffer is full
/// they are dropped. The terminal event (result or error) waits for buffer
/// space, so it is always delivered while the reader is still listening.
/// Dropping the reporter closes the stream.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::AnalyzeResult;

/// Streaming protocol events, serialized as `{"type": "...", ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalysisEvent {
    Progress {
        phase: String,
        current: usize,
        total: usize,
    },
    Result(AnalyzeResult),
    Error {
        message: String,
    },
}

impl AnalysisEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisEvent::Progress { .. })
    }

    /// JSON body of one `data:` line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"unserializable event: {}"}}"#, e)
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<AnalysisEvent>>,
}

impl ProgressReporter {
    /// Reporter and the receiving end, buffering up to `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AnalysisEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Reporter that discards everything (non-streaming requests)
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Non-blocking progress tick
    pub fn progress(&self, phase: &str, current: usize, total: usize) {
        let Some(tx) = &self.tx else { return };

        let event = AnalysisEvent::Progress {
            phase: phase.to_string(),
            current,
            total,
        };
        if let Err(e) = tx.try_send(event) {
            trace!(phase = phase, current = current, total = total, error = %e, "Progress tick dropped");
        }
    }

    /// Deliver the result and close the stream. Returns false when the
    /// reader is gone.
    pub async fn finish(self, result: AnalyzeResult) -> bool {
        self.send_terminal(AnalysisEvent::Result(result)).await
    }

    /// Deliver an error and close the stream
    pub async fn fail(self, message: impl Into<String>) -> bool {
        self.send_terminal(AnalysisEvent::Error {
            message: message.into(),
        })
        .await
    }

    async fn send_terminal(self, event: AnalysisEvent) -> bool {
        match self.tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => true,
        }
    }

    /// True once the receiving side has hung up
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(false)
    }

    /// Resolves when the receiver is dropped; never for a disabled reporter
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}
