use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{stream::FusedStream, Stream, StreamExt};

use crate::platform::ReconstructionOutput;

/// Bounds the engine's open-ended output to a single run.
///
/// Items pass through up to and including the first `ProcessingComplete` or
/// `ProcessingCancelled`. The inner stream is dropped at that point, so nothing
/// after the marker is ever polled.
pub struct UntilProcessingComplete<S> {
    inner: Option<S>,
}

impl<S> UntilProcessingComplete<S> {
    pub fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<S> Stream for UntilProcessingComplete<S>
where
    S: Stream<Item = ReconstructionOutput> + Unpin,
{
    type Item = ReconstructionOutput;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(output)) => {
                if output.is_terminal() {
                    self.inner = None;
                }
                Poll::Ready(Some(output))
            }
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> FusedStream for UntilProcessingComplete<S>
where
    S: Stream<Item = ReconstructionOutput> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}
