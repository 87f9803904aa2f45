//! Connection deadline enforcement.
//!
//! Hyper sees a [`DeadlineStream`] instead of the raw TCP stream. Each
//! read and write poll arms a timer from the connection's current
//! deadlines; long-lived handlers (SSE, WebSocket) clear the deadlines
//! through the [`ConnDeadlines`] handle carried in the request context,
//! which takes effect on the next poll.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

/// Shared, mutable deadlines for one connection. Zero means disabled.
#[derive(Debug, Default)]
pub struct ConnDeadlines {
    read_ms: AtomicU64,
    write_ms: AtomicU64,
}

impl ConnDeadlines {
    /// Deadlines from the configured timeouts.
    pub fn new(read: Duration, write: Duration) -> Self {
        Self {
            read_ms: AtomicU64::new(read.as_millis() as u64),
            write_ms: AtomicU64::new(write.as_millis() as u64),
        }
    }

    /// Disable the read deadline (WebSocket sessions keep their own).
    pub fn disable_read(&self) {
        self.read_ms.store(0, Ordering::Relaxed);
    }

    /// Disable the write deadline (required before streaming SSE).
    pub fn disable_write(&self) {
        self.write_ms.store(0, Ordering::Relaxed);
    }

    fn read(&self) -> Option<Duration> {
        match self.read_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn write(&self) -> Option<Duration> {
        match self.write_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Byte stream enforcing [`ConnDeadlines`] on stalled polls.
#[derive(Debug)]
pub struct DeadlineStream<S> {
    inner: S,
    deadlines: Arc<ConnDeadlines>,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl<S> DeadlineStream<S> {
    /// Wrap `inner` with the given deadline handle.
    pub fn new(inner: S, deadlines: Arc<ConnDeadlines>) -> Self {
        Self {
            inner,
            deadlines,
            read_timer: None,
            write_timer: None,
        }
    }
}

fn timed_out(direction: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("connection {direction} deadline elapsed"),
    )
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                self.read_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                let Some(deadline) = self.deadlines.read() else {
                    self.read_timer = None;
                    return Poll::Pending;
                };
                let timer = self
                    .read_timer
                    .get_or_insert_with(|| Box::pin(sleep(deadline)));
                match timer.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        self.read_timer = None;
                        Poll::Ready(Err(timed_out("read")))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                self.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                let Some(deadline) = self.deadlines.write() else {
                    self.write_timer = None;
                    return Poll::Pending;
                };
                let timer = self
                    .write_timer
                    .get_or_insert_with(|| Box::pin(sleep(deadline)));
                match timer.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        self.write_timer = None;
                        Poll::Ready(Err(timed_out("write")))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
