use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;

use crate::span::Span;

/// Position in the log. Offsets start at 1; offset 0 means "before the first span".
pub type Offset = u64;

/// Shared handle to a log implementation.
pub type SharedLog = Arc<dyn SpanLog>;

/// Errors surfaced at the log boundary.
#[derive(Debug, Error)]
pub enum LogError {
    /// The span is missing required fields or is not dot-namespaced.
    #[error("malformed span: {0}")]
    MalformedSpan(String),
    /// Underlying storage failed.
    #[error("span log io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Span could not be encoded.
    #[error("span encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A span together with the offset it was assigned.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Assigned offset.
    pub offset: Offset,
    /// Shared immutable span.
    pub span: Arc<Span>,
}

/// Append-only store of spans.
///
/// Appends are serialized; reads never block each other and never move any
/// reader's position, since readers keep their own offsets.
#[async_trait]
pub trait SpanLog: Send + Sync {
    /// Validates and appends a span, returning its offset.
    async fn append(&self, span: Span) -> Result<Offset, LogError>;

    /// Returns up to `limit` entries with offsets strictly greater than `after`.
    fn read_from(&self, after: Offset, limit: usize) -> Vec<LogEntry>;

    /// Offset of the most recent span (0 when empty).
    fn head(&self) -> Offset;

    /// Receiver notified with the new head after every append.
    fn watch(&self) -> watch::Receiver<Offset>;
}

impl fmt::Debug for dyn SpanLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanLog").field("head", &self.head()).finish()
    }
}

/// In-memory log, used directly in tests and as the index of the file log.
#[derive(Debug)]
pub struct MemorySpanLog {
    entries: RwLock<Vec<Arc<Span>>>,
    notify: watch::Sender<Offset>,
}

impl Default for MemorySpanLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySpanLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Vec::new()),
            notify,
        }
    }

    /// Creates an empty log already wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedLog {
        Arc::new(Self::new())
    }

    /// Appends a span that has already been validated.
    pub(crate) fn push_validated(&self, span: Span) -> Offset {
        let mut entries = self.entries.write();
        entries.push(Arc::new(span));
        let offset = entries.len() as Offset;
        self.notify.send_replace(offset);
        offset
    }

    /// Number of spans stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log holds no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SpanLog for MemorySpanLog {
    async fn append(&self, span: Span) -> Result<Offset, LogError> {
        span.validate()?;
        Ok(self.push_validated(span))
    }

    fn read_from(&self, after: Offset, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(entries.len());
        entries[start..]
            .iter()
            .take(limit)
            .enumerate()
            .map(|(idx, span)| LogEntry {
                offset: after + idx as Offset + 1,
                span: Arc::clone(span),
            })
            .collect()
    }

    fn head(&self) -> Offset {
        self.entries.read().len() as Offset
    }

    fn watch(&self) -> watch::Receiver<Offset> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_monotonic_offsets() {
        let log = MemorySpanLog::new();
        let first = log.append(Span::new("swarmsh.ping.request")).await.unwrap();
        let second = log.append(Span::new("swarmsh.ping.request")).await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(log.head(), 2);
    }

    #[tokio::test]
    async fn malformed_span_is_rejected_without_side_effects() {
        let log = MemorySpanLog::new();
        let err = log.append(Span::new("nonamespace")).await.unwrap_err();
        assert!(matches!(err, LogError::MalformedSpan(_)));
        assert!(log.is_empty());
        assert_eq!(*log.watch().borrow(), 0);
    }

    #[tokio::test]
    async fn read_from_respects_offset_and_limit() {
        let log = MemorySpanLog::new();
        for idx in 0..5_i64 {
            log.append(Span::new("swarmsh.test.step").with_attr("idx", idx))
                .await
                .unwrap();
        }
        let batch = log.read_from(2, 2);
        let offsets: Vec<Offset> = batch.iter().map(|entry| entry.offset).collect();
        assert_eq!(offsets, vec![3, 4]);
        assert_eq!(batch[0].span.attr("idx"), Some(&crate::Scalar::Int(2)));
        assert!(log.read_from(5, 10).is_empty());
        assert!(log.read_from(99, 10).is_empty());
    }
}
