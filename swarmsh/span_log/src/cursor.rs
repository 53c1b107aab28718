use std::collections::VecDeque;

use futures::Stream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::log::{LogEntry, Offset, SharedLog};

const READ_BATCH: usize = 256;

#[derive(Debug, Clone)]
enum TailMode {
    Finite,
    Follow(CancellationToken),
}

/// Private read cursor over a [`crate::SpanLog`].
///
/// A finite tail ends once it has caught up with the head. A following tail
/// waits for new appends until its cancellation token fires. Every consumer
/// owns its own `Tail`, so readers never influence each other.
#[derive(Debug)]
pub struct Tail {
    log: SharedLog,
    offset: Offset,
    mode: TailMode,
    buffered: VecDeque<LogEntry>,
    notify: watch::Receiver<Offset>,
}

impl Tail {
    /// Finite tail yielding every span after `after`.
    #[must_use]
    pub fn new(log: SharedLog, after: Offset) -> Self {
        Self::with_mode(log, after, TailMode::Finite)
    }

    /// Blocking tail that keeps yielding new spans until `cancel` fires.
    #[must_use]
    pub fn follow(log: SharedLog, after: Offset, cancel: CancellationToken) -> Self {
        Self::with_mode(log, after, TailMode::Follow(cancel))
    }

    fn with_mode(log: SharedLog, after: Offset, mode: TailMode) -> Self {
        let notify = log.watch();
        Self {
            log,
            offset: after,
            mode,
            buffered: VecDeque::new(),
            notify,
        }
    }

    /// Offset of the last span handed out (or the starting offset).
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.offset
    }

    /// Next span in append order, or `None` when caught up (finite) or
    /// cancelled (follow).
    pub async fn next(&mut self) -> Option<LogEntry> {
        loop {
            if let TailMode::Follow(cancel) = &self.mode {
                if cancel.is_cancelled() {
                    return None;
                }
            }
            if let Some(entry) = self.buffered.pop_front() {
                self.offset = entry.offset;
                return Some(entry);
            }
            let after = self.buffered_head();
            let batch = self.log.read_from(after, READ_BATCH);
            if !batch.is_empty() {
                self.buffered.extend(batch);
                continue;
            }
            match &self.mode {
                TailMode::Finite => return None,
                TailMode::Follow(cancel) => {
                    tokio::select! {
                        () = cancel.cancelled() => return None,
                        changed = self.notify.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Everything currently available, without waiting.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        let mut drained: Vec<LogEntry> = self.buffered.drain(..).collect();
        loop {
            let after = drained.last().map_or(self.offset, |entry| entry.offset);
            let batch = self.log.read_from(after, READ_BATCH);
            if batch.is_empty() {
                break;
            }
            drained.extend(batch);
        }
        if let Some(last) = drained.last() {
            self.offset = last.offset;
        }
        drained
    }

    /// Adapts the tail into a `Stream` of entries.
    pub fn into_stream(self) -> impl Stream<Item = LogEntry> + Send {
        futures::stream::unfold(self, |mut tail| async move {
            tail.next().await.map(|entry| (entry, tail))
        })
    }

    fn buffered_head(&self) -> Offset {
        self.buffered.back().map_or(self.offset, |entry| entry.offset)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use futures::StreamExt;

    use super::*;
    use crate::{log::MemorySpanLog, span::Span, SpanLog};

    async fn seeded(count: usize) -> SharedLog {
        let log = MemorySpanLog::shared();
        for idx in 0..count {
            log.append(Span::new("swarmsh.test.step").with_attr("idx", idx as i64))
                .await
                .unwrap();
        }
        log
    }

    #[tokio::test]
    async fn finite_tail_is_gap_free_and_ordered() {
        let log = seeded(600).await;
        let mut tail = Tail::new(Arc::clone(&log), 0);
        let mut seen = Vec::new();
        while let Some(entry) = tail.next().await {
            seen.push(entry.offset);
        }
        let expected: Vec<Offset> = (1..=600).collect();
        assert_eq!(seen, expected);
        assert_eq!(tail.offset(), 600);
    }

    #[tokio::test]
    async fn readers_keep_independent_offsets() {
        let log = seeded(10).await;
        let mut early = Tail::new(Arc::clone(&log), 0);
        let mut late = Tail::new(Arc::clone(&log), 7);
        assert_eq!(early.next().await.unwrap().offset, 1);
        let late_offsets: Vec<Offset> = late.drain().iter().map(|entry| entry.offset).collect();
        assert_eq!(late_offsets, vec![8, 9, 10]);
        assert_eq!(early.next().await.unwrap().offset, 2);
    }

    #[tokio::test]
    async fn follow_tail_sees_concurrent_appends_then_cancels() {
        let log = seeded(1).await;
        let cancel = CancellationToken::new();
        let tail = Tail::follow(Arc::clone(&log), 0, cancel.clone());
        let reader = tokio::spawn(async move {
            tail.into_stream()
                .map(|entry| entry.offset)
                .collect::<Vec<_>>()
                .await
        });

        let writer_log = Arc::clone(&log);
        let writer = tokio::spawn(async move {
            for _ in 0..50 {
                writer_log
                    .append(Span::new("swarmsh.test.step"))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        });
        writer.await.unwrap();
        while log.head() < 51 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let seen = reader.await.unwrap();
        let expected: Vec<Offset> = (1..=51).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn cancelled_follow_returns_immediately() {
        let log = seeded(0).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut tail = Tail::follow(log, 0, cancel);
        assert!(tail.next().await.is_none());
    }
}
