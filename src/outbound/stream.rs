//! Upstream stream translation
//!
//! The upstream answers with newline-delimited JSON objects. [`FragmentStream`]
//! turns that byte stream into a lazy sequence of [`Fragment`]s, ending with
//! exactly one terminal [`Fragment::Done`] no matter how the session ends:
//! clean end-of-body, read error, or the inactivity deadline firing against a
//! connection that went silent without closing.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::time::Sleep;
use tracing::{debug, warn};

/// Inactivity window for one streaming session
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// One unit of incrementally-delivered output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Extracted content from one upstream line
    Content(String),
    /// The upstream read failed mid-stream
    Interrupted,
    /// Terminal sentinel; always the last item of a session
    Done,
}

/// Session state over the lifetime of one upstream body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Consuming upstream bytes
    Reading,
    /// Upstream signaled end-of-body; flushing the buffered partial line
    Draining,
    /// Terminal; no further items
    Closed,
}

pin_project! {
    /// Stateful translator from upstream bytes to [`Fragment`]s
    ///
    /// Dropping the stream drops the inner body and the deadline timer with
    /// it, so consumer cancellation releases the upstream connection without
    /// any extra bookkeeping.
    pub struct FragmentStream<S> {
        #[pin]
        inner: S,
        #[pin]
        deadline: Sleep,
        state: SessionState,
        buffer: Vec<u8>,
        pending: VecDeque<Fragment>,
        emitted_content: bool,
    }
}

impl<S> FragmentStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_timeout(inner, STREAM_IDLE_TIMEOUT)
    }

    pub fn with_timeout(inner: S, idle_timeout: Duration) -> Self {
        Self {
            inner,
            deadline: tokio::time::sleep(idle_timeout),
            state: SessionState::Reading,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            emitted_content: false,
        }
    }
}

/// Extract the `content` field from one upstream line, if it parses
///
/// Malformed lines are logged and dropped; a partial stream is still useful
/// to a live consumer.
fn content_from_line(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => match value.get("content").and_then(|c| c.as_str()) {
            Some(content) if !content.is_empty() => Some(content.to_string()),
            _ => None,
        },
        Err(e) => {
            debug!("Dropping malformed upstream line: {}", e);
            None
        }
    }
}

/// Pull every complete line out of the buffer into the pending queue
fn drain_complete_lines(buffer: &mut Vec<u8>, pending: &mut VecDeque<Fragment>) {
    while let Some(idx) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=idx).collect();
        if let Some(content) = content_from_line(&line[..line.len() - 1]) {
            pending.push_back(Fragment::Content(content));
        }
    }
}

impl<S, E> Stream for FragmentStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    type Item = Fragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(fragment) = this.pending.pop_front() {
                if fragment == Fragment::Done {
                    *this.state = SessionState::Closed;
                } else if matches!(fragment, Fragment::Content(_)) {
                    *this.emitted_content = true;
                }
                return Poll::Ready(Some(fragment));
            }

            match *this.state {
                SessionState::Closed => return Poll::Ready(None),

                SessionState::Draining => {
                    // Flush a trailing line that never got its newline, then
                    // terminate. The Done pop above flips us to Closed.
                    if let Some(content) = content_from_line(this.buffer) {
                        this.pending.push_back(Fragment::Content(content));
                    }
                    this.buffer.clear();
                    this.pending.push_back(Fragment::Done);
                }

                SessionState::Reading => {
                    if this.deadline.as_mut().poll(cx).is_ready() {
                        warn!("Upstream stream idle past deadline; closing session");
                        *this.state = SessionState::Closed;
                        return Poll::Ready(Some(Fragment::Done));
                    }

                    match this.inner.as_mut().poll_next(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Some(Ok(chunk))) => {
                            this.buffer.extend_from_slice(&chunk);
                            drain_complete_lines(this.buffer, this.pending);
                        }
                        Poll::Ready(Some(Err(e))) => {
                            warn!("Upstream read error: {}", e);
                            if *this.emitted_content {
                                this.pending.push_back(Fragment::Interrupted);
                            }
                            this.pending.push_back(Fragment::Done);
                            *this.state = SessionState::Draining;
                            this.buffer.clear();
                        }
                        Poll::Ready(None) => {
                            *this.state = SessionState::Draining;
                        }
                    }
                }
            }
        }
    }
}
