use anyhow::{Context, Result};
use spanscope_core::{Config, IngestEngine, Store, TelemetryBatch};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

pub struct TestApp {
    engine: IngestEngine,
}

impl TestApp {
    pub async fn new(mut config: Config) -> Result<Self> {
        config.engine.flush_interval_ms = 10;
        // Another test may already own the global subscriber.
        let _ = spanscope_core::logging::init(&config.logging);

        let engine = IngestEngine::from_config(&config).context("engine setup failed")?;
        engine.start().await?;

        Ok(Self { engine })
    }

    pub fn store(&self) -> Arc<Store> {
        self.engine.store()
    }

    pub fn send(&self, batch: TelemetryBatch) -> Result<()> {
        self.engine.capture().capture(batch)
    }

    pub fn send_all(&self, batches: impl IntoIterator<Item = TelemetryBatch>) -> Result<()> {
        for batch in batches {
            self.send(batch)?;
        }
        Ok(())
    }

    /// Poll until `probe` holds for the store or the wait gives up
    pub async fn wait_for(&self, what: &str, probe: impl Fn(&Store) -> bool) -> Result<()> {
        let store = self.store();
        for _ in 0..40 {
            if probe(&store) {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(anyhow::anyhow!("store never reached expected state: {what}"))
    }

    pub async fn shutdown(self) {
        self.engine.stop().await;
    }
}
