use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::{watch, Mutex},
};

use crate::{
    log::{LogEntry, LogError, MemorySpanLog, Offset, SpanLog},
    span::Span,
};

/// Durable log storing one JSON span per line.
///
/// Existing lines are replayed into an in-memory index on open, so offsets
/// survive restarts. The file mutex is the single append critical section.
#[derive(Debug)]
pub struct FileSpanLog {
    path: PathBuf,
    index: MemorySpanLog,
    writer: Mutex<File>,
}

impl FileSpanLog {
    /// Opens (or creates) the log file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let index = MemorySpanLog::new();
        match fs::read_to_string(&path).await {
            Ok(existing) => {
                for (line_no, line) in existing.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Span>(line) {
                        Ok(span) if span.validate().is_ok() => {
                            index.push_validated(span);
                        }
                        _ => tracing::warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            "skipping unreadable span line"
                        ),
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::debug!(path = %path.display(), spans = index.len(), "span log opened");
        Ok(Self {
            path,
            index,
            writer: Mutex::new(writer),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces buffered writes to disk.
    pub async fn flush(&self) -> Result<(), LogError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl SpanLog for FileSpanLog {
    async fn append(&self, span: Span) -> Result<Offset, LogError> {
        span.validate()?;
        let mut line = serde_json::to_vec(&span)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(self.index.push_validated(span))
    }

    fn read_from(&self, after: Offset, limit: usize) -> Vec<LogEntry> {
        self.index.read_from(after, limit)
    }

    fn head(&self) -> Offset {
        self.index.head()
    }

    fn watch(&self) -> watch::Receiver<Offset> {
        self.index.watch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_log_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spans/telemetry_spans.jsonl");
        {
            let log = FileSpanLog::open(&path).await.unwrap();
            log.append(Span::new("swarmsh.roberts.open").with_attr("motion_id", "m1"))
                .await
                .unwrap();
            log.append(Span::new("swarmsh.roberts.vote")).await.unwrap();
            log.flush().await.unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reopened = FileSpanLog::open(&path).await.unwrap();
        assert_eq!(reopened.head(), 2);
        let offset = reopened
            .append(Span::new("swarmsh.scrum.plan"))
            .await
            .unwrap();
        assert_eq!(offset, 3);
        let entries = reopened.read_from(0, 10);
        assert_eq!(entries[0].span.attr_str("motion_id"), Some("m1"));
    }

    #[tokio::test]
    async fn reload_skips_garbage_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spans.jsonl");
        let good = serde_json::to_string(&Span::new("swarmsh.ping.request")).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n{{\"name\":\"x\"}}\n{good}\n")).unwrap();
        let log = FileSpanLog::open(&path).await.unwrap();
        assert_eq!(log.head(), 2);
    }
}
