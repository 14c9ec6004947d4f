use anyhow::Result;
use async_trait::async_trait;

/// Narrow interface to whatever persists records downstream. Callers treat
/// it fire-and-forget: spawn the save, log a failure, never block a turn
/// on the ack.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save(&self, record: serde_json::Value) -> Result<()>;
}

/// Sink that records to the log stream only.
pub struct LogSink;

#[async_trait]
impl PersistenceSink for LogSink {
    async fn save(&self, record: serde_json::Value) -> Result<()> {
        tracing::info!(record = %record, "record persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_sink_accepts_any_record() {
        let sink = LogSink;
        let result = sink.save(serde_json::json!({"kind": "miranda_log"})).await;
        assert!(result.is_ok());
    }
}
