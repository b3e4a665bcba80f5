use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Completion of one flush.
///
/// Resolves to the number of requests in the flushed snapshot that finished
/// `COMPLETED`, retries included. Dropping the handle does not cancel the
/// flush.
#[derive(Debug)]
pub struct FlushHandle {
    flush_id: Option<u64>,
    inner: FlushInner,
}

#[derive(Debug)]
enum FlushInner {
    Ready(Option<usize>),
    Pending(oneshot::Receiver<usize>),
}

impl FlushHandle {
    pub(crate) fn ready(count: usize) -> Self {
        Self {
            flush_id: None,
            inner: FlushInner::Ready(Some(count)),
        }
    }

    pub(crate) fn pending(flush_id: u64, rx: oneshot::Receiver<usize>) -> Self {
        Self {
            flush_id: Some(flush_id),
            inner: FlushInner::Pending(rx),
        }
    }

    /// `None` for a flush that had nothing to send.
    pub fn flush_id(&self) -> Option<u64> {
        self.flush_id
    }
}

impl Future for FlushHandle {
    type Output = Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            FlushInner::Ready(count) => Poll::Ready(Ok(count.take().unwrap_or(0))),
            FlushInner::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(count)) => Poll::Ready(Ok(count)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::runtime_with_context(
                    "flush aborted before completion",
                    ErrorContext::new()
                        .with_details(format!("flush_id={}", this.flush_id.unwrap_or(0)))
                        .with_source("batch_service"),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
