//! Byte stream wrapper that reports download progress.

use super::progress::ProgressCallback;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

const UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// Counts bytes flowing through `inner` and calls the callback at most
/// every 250 ms, plus once at the end of the stream.
pub struct ProgressStream<S> {
    inner: S,
    bytes_transferred: u64,
    last_update: Instant,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            last_update: Instant::now(),
            callback,
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_transferred += chunk.len() as u64;
                let now = Instant::now();
                if now.duration_since(self.last_update) >= UPDATE_INTERVAL {
                    (self.callback)(self.bytes_transferred);
                    self.last_update = now;
                }
            }
            Poll::Ready(None) => (self.callback)(self.bytes_transferred),
            _ => {}
        }
        polled
    }
}
