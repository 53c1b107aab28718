use std::{collections::VecDeque, sync::Arc, time::Duration};

use span_log::Span;

/// Default horizon covered by a window.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(60);
/// Default maximum number of buffered spans.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Bounded circular buffer of the spans seen in the last `horizon`.
///
/// Capacity overflow evicts the oldest span; [`SpanWindow::evict_before`]
/// drops spans that fell out of the horizon.
#[derive(Debug, Clone)]
pub struct SpanWindow {
    spans: VecDeque<Arc<Span>>,
    horizon: Duration,
    capacity: usize,
    overflowed: u64,
}

impl Default for SpanWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HORIZON, DEFAULT_CAPACITY)
    }
}

impl SpanWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new(horizon: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            spans: VecDeque::with_capacity(capacity.min(1024)),
            horizon,
            capacity,
            overflowed: 0,
        }
    }

    /// Horizon covered by the window.
    #[must_use]
    pub const fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Adds a span, evicting the oldest one when full.
    pub fn push(&mut self, span: Arc<Span>) {
        if self.spans.len() == self.capacity {
            self.spans.pop_front();
            self.overflowed += 1;
        }
        self.spans.push_back(span);
    }

    /// Drops every span stamped before `now - horizon`. Returns how many were dropped.
    pub fn evict_before(&mut self, now: f64) -> usize {
        let cutoff = now - self.horizon.as_secs_f64();
        let before = self.spans.len();
        self.spans.retain(|span| span.timestamp >= cutoff);
        before - self.spans.len()
    }

    /// Spans evicted by capacity overflow since creation.
    #[must_use]
    pub const fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Number of buffered spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Buffered spans, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Span> + '_ {
        self.spans.iter().map(AsRef::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_at(ts: f64) -> Arc<Span> {
        Arc::new(Span::new("swarmsh.work.item").at(ts))
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let mut window = SpanWindow::new(Duration::from_secs(60), 3);
        for ts in 0..5 {
            window.push(span_at(f64::from(ts)));
        }
        let stamps: Vec<f64> = window.iter().map(|span| span.timestamp).collect();
        assert_eq!(stamps, vec![2.0, 3.0, 4.0]);
        assert_eq!(window.overflowed(), 2);
    }

    #[test]
    fn horizon_eviction_drops_stale_spans() {
        let mut window = SpanWindow::new(Duration::from_secs(60), 100);
        window.push(span_at(1_000.0));
        window.push(span_at(1_050.0));
        window.push(span_at(1_100.0));
        assert_eq!(window.evict_before(1_110.0), 1);
        assert_eq!(window.len(), 2);
        assert_eq!(window.evict_before(1_200.0), 2);
        assert!(window.is_empty());
    }
}
