//! Date-partitioned JSONL batch files
//!
//! One line per item: `{"ts":..,"batch_id":..,"seq":..,"data":..}`.
//! A batch is serialized into a buffer first, then written and flushed with a
//! single call, so a failed batch leaves no partial lines from encoding.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::SinkError;
use crate::message::Batch;
use crate::sink::BatchSink;

pub struct FileSink {
    base_dir: PathBuf,
    name: String,
    max_item_bytes: Option<usize>,
    inner: Mutex<FileSinkInner>,
}

struct FileSinkInner {
    writer: Option<BufWriter<File>>,
    current_date: String,
}

#[derive(Serialize)]
struct Record<'a> {
    ts: DateTime<Utc>,
    batch_id: Uuid,
    seq: usize,
    data: std::borrow::Cow<'a, str>,
}

impl FileSink {
    pub fn new(base_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            name: name.into(),
            max_item_bytes: None,
            inner: Mutex::new(FileSinkInner {
                writer: None,
                current_date: String::new(),
            }),
        }
    }

    pub fn with_max_item_bytes(mut self, limit: usize) -> Self {
        self.max_item_bytes = Some(limit);
        self
    }

    /// Path of the file a batch written at `now` goes to
    pub fn path_for(&self, now: DateTime<Utc>) -> PathBuf {
        self.base_dir
            .join(now.format("%Y-%m-%d").to_string())
            .join(format!("{}.jsonl", self.name))
    }

    fn encode(batch: &Batch, now: DateTime<Utc>) -> Result<Vec<u8>, SinkError> {
        let mut buf = Vec::with_capacity(batch.payload_bytes() + batch.len() * 96);
        for (seq, item) in batch.items().iter().enumerate() {
            let record = Record {
                ts: now,
                batch_id: batch.id(),
                seq,
                data: String::from_utf8_lossy(item.data()),
            };
            serde_json::to_writer(&mut buf, &record)
                .map_err(|e| SinkError::Transport(format!("encode failed: {}", e)))?;
            buf.push(b'\n');
        }
        Ok(buf)
    }

    fn write_buffer(&self, buf: &[u8], now: DateTime<Utc>) -> std::io::Result<()> {
        let date = now.format("%Y-%m-%d").to_string();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // Rotate file if date changed, reopen after close
        if date != inner.current_date || inner.writer.is_none() {
            if let Some(ref mut writer) = inner.writer {
                writer.flush()?;
            }

            let path = self.path_for(now);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;

            inner.writer = Some(BufWriter::new(file));
            inner.current_date = date;
        }

        if let Some(ref mut writer) = inner.writer {
            writer.write_all(buf)?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[async_trait]
impl BatchSink for FileSink {
    fn max_item_bytes(&self) -> Option<usize> {
        self.max_item_bytes
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let now = Utc::now();
        let buf = Self::encode(batch, now)?;
        self.write_buffer(&buf, now)
            .map_err(|e| SinkError::Transport(format!("file write failed: {}", e)))
    }

    async fn close(&self) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref mut writer) = inner.writer {
            writer
                .flush()
                .map_err(|e| SinkError::Transport(format!("file flush failed: {}", e)))?;
        }
        inner.writer = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_one_line_per_item() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path(), "batches");

        let batch = Batch::new(vec![
            Message::new(r#"{"id":1}"#),
            Message::new(r#"{"id":2}"#),
        ])
        .unwrap();
        sink.send(&batch).await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(sink.path_for(Utc::now())).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["batch_id"], batch.id().to_string());
        assert_eq!(lines[0]["seq"], 0);
        assert_eq!(lines[1]["seq"], 1);
        assert_eq!(lines[1]["data"], r#"{"id":2}"#);
    }

    #[tokio::test]
    async fn test_appends_across_batches() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path(), "batches");

        for i in 0..3 {
            let batch = Batch::new(vec![Message::new(format!("m{}", i))]).unwrap();
            sink.send(&batch).await.unwrap();
        }
        sink.close().await.unwrap();

        let content = fs::read_to_string(sink.path_for(Utc::now())).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_send_after_close_reopens() {
        let tmp = TempDir::new().unwrap();
        let sink = FileSink::new(tmp.path(), "batches");

        let first = Batch::new(vec![Message::new("one")]).unwrap();
        sink.send(&first).await.unwrap();
        sink.close().await.unwrap();

        let second = Batch::new(vec![Message::new("two")]).unwrap();
        sink.send(&second).await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(sink.path_for(Utc::now())).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_reports_limit() {
        let sink = FileSink::new("/tmp", "x").with_max_item_bytes(1024);
        assert_eq!(sink.max_item_bytes(), Some(1024));
    }
}
