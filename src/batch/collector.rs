//! Pending-request collector.

use crate::request::AsyncRequest;

/// Requests accumulated for the next transport batch, in submission order.
///
/// Each batch has a generation number; taking a snapshot empties the
/// collector and starts the next generation, so a timer armed for an older
/// batch can tell it has already been flushed.
pub(crate) struct BatchCollector<R, T> {
    max_batch_size: usize,
    requests: Vec<AsyncRequest<R, T>>,
    generation: u64,
    started_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchAddResult {
    /// `opened` is set when this request started a new batch.
    Added { count: usize, opened: bool },
    ShouldFlush { count: usize },
}

impl BatchAddResult {
    pub(crate) fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }

    pub(crate) fn opened(&self) -> bool {
        matches!(self, BatchAddResult::Added { opened: true, .. })
    }

    pub(crate) fn count(&self) -> usize {
        match self {
            BatchAddResult::Added { count, .. } | BatchAddResult::ShouldFlush { count } => *count,
        }
    }
}

impl<R, T> BatchCollector<R, T> {
    pub(crate) fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            requests: Vec::new(),
            generation: 0,
            started_at_ms: None,
        }
    }

    pub(crate) fn add(&mut self, request: AsyncRequest<R, T>, now_ms: u64) -> BatchAddResult {
        let opened = self.requests.is_empty();
        if opened {
            self.started_at_ms = Some(now_ms);
        }
        self.requests.push(request);
        let count = self.requests.len();
        if count >= self.max_batch_size {
            BatchAddResult::ShouldFlush { count }
        } else {
            BatchAddResult::Added { count, opened }
        }
    }

    /// Take every queued request and start the next generation.
    pub(crate) fn take(&mut self) -> Vec<AsyncRequest<R, T>> {
        self.generation += 1;
        self.started_at_ms = None;
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Age of the current batch, `None` when empty.
    pub(crate) fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.started_at_ms.map(|start| now_ms.saturating_sub(start))
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
