use crate::capture::TelemetryCapture;
use crate::config::{Config, EngineConfig};
use crate::store::Store;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Moves captured batches from the transport queue into the store
pub struct IngestEngine {
    capture: Arc<TelemetryCapture>,
    store: Arc<Store>,
    config: EngineConfig,
    running: Arc<RwLock<bool>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestEngine {
    pub fn new(config: EngineConfig, store: Arc<Store>) -> Result<Self> {
        config.validate()?;
        let capture = Arc::new(TelemetryCapture::new(config.buffer_size));

        Ok(Self {
            capture,
            store,
            config,
            running: Arc::new(RwLock::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Build a store and engine from a full configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::new(&config.store)?);
        Self::new(config.engine.clone(), store)
    }

    /// Start the engine
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        let capture = Arc::clone(&self.capture);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);

        let handle = task::spawn(async move {
            Self::process_batches(capture, store, config, running).await;
        });
        *self.worker.lock().await = Some(handle);

        info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval_ms,
            "Ingest engine started"
        );
        Ok(())
    }

    /// Stop the engine. Returns once every batch captured before the call
    /// has been applied to the store.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                info!("Ingest engine stopping");
            }
            *running = false;
        }

        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Ingest worker ended abnormally: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn process_batches(
        capture: Arc<TelemetryCapture>,
        store: Arc<Store>,
        config: EngineConfig,
        running: Arc<RwLock<bool>>,
    ) {
        let receiver = capture.receiver();

        loop {
            {
                let is_running = running.read().await;
                if !*is_running {
                    let pending: Vec<_> = receiver.try_iter().collect();
                    if !pending.is_empty() {
                        debug!(batches = pending.len(), "applying pending telemetry before stop");
                    }
                    for telemetry in pending {
                        store.apply(telemetry);
                    }
                    break;
                }
            }

            let mut batch = Vec::with_capacity(config.batch_size);
            for _ in 0..config.batch_size {
                match receiver.try_recv() {
                    Ok(telemetry) => batch.push(telemetry),
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                debug!(batches = batch.len(), "applying captured telemetry");
            }
            for telemetry in batch {
                store.apply(telemetry);
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(config.flush_interval_ms)).await;
        }
    }

    /// Get the capture queue
    pub fn capture(&self) -> Arc<TelemetryCapture> {
        Arc::clone(&self.capture)
    }

    /// Get the store
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Log, ResourceLogs, ScopeLogs, TelemetryBatch};

    fn engine() -> IngestEngine {
        let mut config = Config::default();
        config.engine.flush_interval_ms = 5;
        IngestEngine::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_engine_start_stop() {
        let engine = engine();
        assert!(engine.start().await.is_ok());
        assert!(engine.start().await.is_ok());
        assert!(engine.is_running().await);
        engine.stop().await;
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_engine_applies_captured_batches() {
        let engine = engine();
        engine.start().await.unwrap();

        engine
            .capture()
            .capture(TelemetryBatch::Logs(vec![ResourceLogs {
                resource: Default::default(),
                scope_logs: vec![ScopeLogs {
                    scope: Default::default(),
                    logs: vec![Log::new("hello")],
                }],
            }]))
            .unwrap();

        let store = engine.store();
        for _ in 0..40 {
            if store.log_count() == 1 {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
        }
        assert_eq!(store.log_count(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stop_applies_pending_batches() {
        let mut config = Config::default();
        config.engine.flush_interval_ms = 200;
        config.engine.batch_size = 1;
        let engine = IngestEngine::from_config(&config).unwrap();
        engine.start().await.unwrap();

        let capture = engine.capture();
        for body in ["a", "b", "c", "d"] {
            capture
                .capture(TelemetryBatch::Logs(vec![ResourceLogs {
                    resource: Default::default(),
                    scope_logs: vec![ScopeLogs {
                        scope: Default::default(),
                        logs: vec![Log::new(body)],
                    }],
                }]))
                .unwrap();
        }

        engine.stop().await;
        assert_eq!(engine.store().log_count(), 4);
        assert!(capture.is_empty());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.engine.batch_size = 0;
        assert!(IngestEngine::from_config(&config).is_err());
    }
}
