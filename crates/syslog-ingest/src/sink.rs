// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use tracing::debug;

use crate::batch::RecordBatch;
use crate::errors::{ConfigError, SinkError};

/// Destination for rotated batches.
///
/// A sink receives ownership of one frozen batch at a time and either persists
/// or forwards it. Failures are reported back but never retried by the caller.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, batch: RecordBatch) -> Result<(), SinkError>;
}

/// Accepts and drops every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl Sink for DiscardSink {
    async fn write(&self, batch: RecordBatch) -> Result<(), SinkError> {
        debug!(
            "Discarding batch {} with {} records",
            batch.sequence(),
            batch.len()
        );
        Ok(())
    }
}

/// Writes each batch to its own newline-delimited JSON file.
///
/// Files are named `batch-<run>-<sequence>.jsonl`, where `<run>` is the UTC
/// time the sink was created, so restarts never overwrite earlier output.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
    run: String,
}

impl JsonLinesSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonLinesSink {
            dir: dir.into(),
            run: chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("batch-{}-{:06}.jsonl", self.run, sequence))
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn write(&self, batch: RecordBatch) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for record in batch.records() {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(batch.sequence());
        tokio::fs::write(&path, buf).await?;
        debug!("Wrote {} records to {}", batch.len(), path.display());
        Ok(())
    }
}

/// Sink implementations selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    #[default]
    Discard,
    JsonLines,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Ok(SinkKind::Discard),
            "jsonl" => Ok(SinkKind::JsonLines),
            other => Err(ConfigError::Invalid(format!(
                "Invalid sink '{other}'. Must be one of: discard, jsonl"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::batch::tests::record;

    fn full_batch(n: u32) -> RecordBatch {
        let mut batch = RecordBatch::new(n as usize).unwrap();
        for i in 0..n {
            let _ = batch.append(record(i)).unwrap();
        }
        batch
    }

    #[test]
    fn test_sink_kind_from_str() {
        assert_eq!("discard".parse::<SinkKind>(), Ok(SinkKind::Discard));
        assert_eq!(" JSONL ".parse::<SinkKind>(), Ok(SinkKind::JsonLines));
        assert!("parquet".parse::<SinkKind>().is_err());
    }

    #[tokio::test]
    async fn test_discard_sink_accepts_batch() {
        assert!(DiscardSink.write(full_batch(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out"));

        sink.write(full_batch(3)).await.unwrap();

        let mut entries = std::fs::read_dir(sink.dir()).unwrap();
        let path = entries.next().unwrap().unwrap().path();
        assert!(entries.next().is_none());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("batch-{}-", sink.run)));
        assert!(name.ends_with("-000000.jsonl"));

        let contents = std::fs::read_to_string(path).unwrap();
        let rows: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["pid"], "0");
        assert_eq!(rows[2]["message"], "message 2");
        assert_eq!(rows[1]["host"], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_json_lines_sink_reports_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let sink = JsonLinesSink::new(&blocker);

        let err = sink.write(full_batch(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
