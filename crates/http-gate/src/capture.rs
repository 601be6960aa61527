use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures_util::Stream;

/// Decode up to `cap` bytes of a payload for the audit row.
///
/// Over-cap payloads keep their first `cap` bytes and gain the literal
/// suffix `... [truncated, N bytes total]` when the original length is
/// known, or `... [truncated]` when it is not (a stream that broke off).
pub fn truncate_payload(bytes: &[u8], cap: usize, total: Option<u64>) -> String {
    if bytes.len() <= cap && total.map_or(true, |t| t <= cap as u64) {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let kept = String::from_utf8_lossy(&bytes[..bytes.len().min(cap)]);
    match total {
        Some(total) => format!("{kept}... [truncated, {total} bytes total]"),
        None => format!("{kept}... [truncated]"),
    }
}

/// What the tee observed by the time the body finished (or was dropped).
pub struct CaptureResult {
    /// The first `cap` bytes.
    pub captured: Vec<u8>,
    /// Bytes seen in total.
    pub total: u64,
    /// Whether the stream ran to its natural end. False when the client went
    /// away mid-body or the upstream read failed.
    pub completed: bool,
}

type Completion = Box<dyn FnOnce(CaptureResult) + Send>;

/// Pass-through body stream that copies the first `cap` bytes aside and
/// invokes a completion callback exactly once: at end-of-stream, on a read
/// error, or on drop. The audit row for a proxied response is written from
/// that callback, which is what guarantees "record strictly after the body
/// finished" and still records when the client disconnects.
pub struct CaptureStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    captured: Vec<u8>,
    total: u64,
    cap: usize,
    on_complete: Option<Completion>,
}

impl CaptureStream {
    pub fn new(
        inner: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        cap: usize,
        on_complete: impl FnOnce(CaptureResult) + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            captured: Vec::new(),
            total: 0,
            cap,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn finish(&mut self, completed: bool) {
        if let Some(callback) = self.on_complete.take() {
            callback(CaptureResult {
                captured: std::mem::take(&mut self.captured),
                total: self.total,
                completed,
            });
        }
    }
}

impl Stream for CaptureStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.total += chunk.len() as u64;
                if this.captured.len() < this.cap {
                    let room = this.cap - this.captured.len();
                    this.captured
                        .extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(false);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // Client disconnect drops the body mid-stream; the audit row is
        // still owed.
        self.finish(false);
    }
}
