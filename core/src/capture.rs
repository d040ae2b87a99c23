use crate::record::TelemetryBatch;
use anyhow::Result;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// Bounded hand-off between transport threads and the ingest engine
pub struct TelemetryCapture {
    sender: Sender<TelemetryBatch>,
    receiver: Receiver<TelemetryBatch>,
}

impl TelemetryCapture {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, receiver) = bounded(buffer_size);
        Self { sender, receiver }
    }

    /// Queue a batch without blocking; fails when the queue is full
    pub fn capture(&self, batch: TelemetryBatch) -> Result<()> {
        self.sender.try_send(batch).map_err(|e| match e {
            TrySendError::Full(batch) => {
                tracing::warn!(
                    kind = ?batch.kind(),
                    records = batch.record_count(),
                    "capture queue full, dropping batch"
                );
                anyhow::anyhow!("Failed to capture batch: queue is full")
            }
            TrySendError::Disconnected(_) => {
                anyhow::anyhow!("Failed to capture batch: queue is disconnected")
            }
        })
    }

    /// Sender handle for transport threads
    pub fn sender(&self) -> Sender<TelemetryBatch> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<TelemetryBatch> {
        self.receiver.clone()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Drain all pending batches
    pub fn drain(&self) -> Vec<TelemetryBatch> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.receiver.try_recv() {
            batches.push(batch);
        }
        batches
    }
}
