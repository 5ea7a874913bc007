//! Persistent record of every model call a run makes.
//!
//! Recording is fire-and-forget: the sink must never block or fail a stage.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use textkg_types::StageName;

/// One model call, as observed at the client boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: uuid::Uuid,
    pub run_id: uuid::Uuid,
    pub stage: StageName,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl CallRecord {
    pub fn new(
        run_id: uuid::Uuid,
        stage: StageName,
        model: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
        success: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            run_id,
            stage,
            model: model.into(),
            input_tokens,
            output_tokens,
            latency_ms,
            success,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Destination for call records. Implementations must be non-blocking.
pub trait CallSink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Discards every record. Used when call logging is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCallSink;

impl CallSink for NullCallSink {
    fn record(&self, _record: CallRecord) {}
}

/// Appends one JSON line per record to a file via a background writer task.
///
/// Write errors are logged and dropped; a broken call log never affects the
/// pipeline outcome.
pub struct JsonlCallSink {
    tx: mpsc::UnboundedSender<CallRecord>,
}

impl JsonlCallSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<CallRecord>();

        tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot open call log, records will be dropped");
                    while rx.recv().await.is_some() {}
                    return;
                }
            };

            while let Some(record) = rx.recv().await {
                let line = match serde_json::to_string(&record) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unserializable call record dropped");
                        continue;
                    }
                };
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    tracing::warn!(path = %path.display(), error = %e, "Call log write failed");
                }
            }
        });

        Self { tx }
    }
}

impl CallSink for JsonlCallSink {
    fn record(&self, record: CallRecord) {
        // Receiver gone means shutdown; losing the record is acceptable.
        let _ = self.tx.send(record);
    }
}

impl<T: CallSink + ?Sized> CallSink for Arc<T> {
    fn record(&self, record: CallRecord) {
        (**self).record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_record(run_id: uuid::Uuid) -> CallRecord {
        CallRecord::new(
            run_id,
            StageName::GraphGeneration,
            "gpt-4o",
            120,
            340,
            900,
            true,
        )
    }

    #[test]
    fn record_serializes_with_snake_case_stage() {
        let record = sample_record(uuid::Uuid::new_v4());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["stage"], "graph_generation");
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn null_sink_accepts_records() {
        let sink = NullCallSink;
        sink.record(sample_record(uuid::Uuid::new_v4()));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.jsonl");
        let sink = JsonlCallSink::new(&path);

        let run_id = uuid::Uuid::new_v4();
        sink.record(sample_record(run_id));
        sink.record(sample_record(run_id));

        // The writer task flushes asynchronously.
        let mut content = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
        }

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: CallRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.run_id, run_id);
        }
    }
}
