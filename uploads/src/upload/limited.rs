//! Size-capped byte stream.
//!
//! [`SizeLimitedStream`] sits between the multipart transport and the upload service. It yields
//! at most `limit` bytes, silently discards anything past that point while still pulling the
//! inner stream to its end, and records that truncation happened. The handler inspects the flag
//! only after the upload service has returned.
//!
//! An optional ceiling bounds how much is pulled in total: once more than `ceiling` bytes have
//! come through (passed on or discarded), the stream ends early, still flagged as truncated.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Byte stream handed to the upload service.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

pub struct SizeLimitedStream<'a, E> {
    inner: BoxStream<'a, Result<Bytes, E>>,
    limit: u64,
    ceiling: Option<u64>,
    consumed: u64,
    seen: u64,
    truncated: bool,
    finished: bool,
    error: Option<E>,
}

impl<'a, E> SizeLimitedStream<'a, E>
where
    E: std::fmt::Display,
{
    pub fn new(inner: BoxStream<'a, Result<Bytes, E>>, limit: u64) -> Self {
        Self {
            inner,
            limit,
            ceiling: None,
            consumed: 0,
            seen: 0,
            truncated: false,
            finished: false,
            error: None,
        }
    }

    /// Stop pulling the inner stream once more than `ceiling` bytes have been seen.
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = Some(ceiling.max(self.limit));
        self
    }

    /// Whether content past the limit was seen (and discarded).
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes passed through to the consumer.
    pub fn bytes_read(&self) -> u64 {
        self.consumed
    }

    /// The transport error that ended the stream, if any.
    pub fn take_error(&mut self) -> Option<E> {
        self.error.take()
    }

    /// Pull whatever the consumer left unread. Stops at the first transport error.
    pub async fn drain(&mut self) -> u64 {
        let mut chunks = 0;
        while let Some(chunk) = self.next().await {
            if chunk.is_err() {
                break;
            }
            chunks += 1;
        }
        chunks
    }
}

// No field is structurally pinned
impl<E> Unpin for SizeLimitedStream<'_, E> {}

impl<E> Stream for SizeLimitedStream<'_, E>
where
    E: std::fmt::Display,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            let chunk = match this.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    let err = io::Error::other(e.to_string());
                    this.error = Some(e);
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Ok(chunk))) => chunk,
            };

            if chunk.is_empty() {
                continue;
            }

            this.seen += chunk.len() as u64;
            if let Some(ceiling) = this.ceiling
                && this.seen > ceiling
            {
                // Give up on the rest of the body; whatever fits under the limit is still handed on
                this.truncated = true;
                this.finished = true;
                let remaining = this.limit - this.consumed;
                if remaining == 0 {
                    return Poll::Ready(None);
                }
                let take = remaining.min(chunk.len() as u64);
                this.consumed += take;
                return Poll::Ready(Some(Ok(chunk.slice(..take as usize))));
            }

            let remaining = this.limit - this.consumed;
            if remaining == 0 {
                // Past the limit: keep consuming, hand nothing on
                this.truncated = true;
                continue;
            }

            let len = chunk.len() as u64;
            if len > remaining {
                this.truncated = true;
                this.consumed = this.limit;
                return Poll::Ready(Some(Ok(chunk.slice(..remaining as usize))));
            }

            this.consumed += len;
            return Poll::Ready(Some(Ok(chunk)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: Vec<&'static [u8]>) -> BoxStream<'static, Result<Bytes, io::Error>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p)))).boxed()
    }

    async fn collect<E: std::fmt::Display>(limited: &mut SizeLimitedStream<'_, E>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = limited.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_under_limit_passes_everything() {
        let mut limited = SizeLimitedStream::new(chunks(vec![b"hello ", b"world"]), 64);

        assert_eq!(collect(&mut limited).await, b"hello world");
        assert!(!limited.is_truncated());
        assert_eq!(limited.bytes_read(), 11);
    }

    #[tokio::test]
    async fn test_exactly_at_limit_is_not_truncated() {
        let mut limited = SizeLimitedStream::new(chunks(vec![b"12345", b"67890"]), 10);

        assert_eq!(collect(&mut limited).await, b"1234567890");
        assert!(!limited.is_truncated());
    }

    #[tokio::test]
    async fn test_over_limit_cuts_and_flags() {
        let mut limited = SizeLimitedStream::new(chunks(vec![b"1234", b"5678", b"90ab"]), 6);

        assert_eq!(collect(&mut limited).await, b"123456");
        assert!(limited.is_truncated());
        assert_eq!(limited.bytes_read(), 6);
    }

    #[tokio::test]
    async fn test_drain_consumes_rest_and_detects_truncation() {
        let mut limited = SizeLimitedStream::new(chunks(vec![b"ab", b"cd", b"ef", b"gh"]), 5);

        // Consumer reads a single chunk and walks away
        let first = limited.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"ab");
        assert!(!limited.is_truncated());

        limited.drain().await;
        assert!(limited.is_truncated());
        assert!(limited.next().await.is_none());
    }

    #[tokio::test]
    async fn test_ceiling_stops_pulling_inner_stream() {
        let pulled = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = pulled.clone();
        let inner = stream::iter(0..100)
            .map(move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, io::Error>(Bytes::from_static(b"0123456789"))
            })
            .boxed();
        let mut limited = SizeLimitedStream::new(inner, 15).with_ceiling(35);

        assert_eq!(collect(&mut limited).await, b"012345678901234");
        assert!(limited.is_truncated());
        assert_eq!(limited.bytes_read(), 15);
        // Fourth chunk crosses the ceiling, nothing after it is pulled
        assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), 4);

        limited.drain().await;
        assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_ceiling_crossed_before_limit_passes_what_fits() {
        let mut limited = SizeLimitedStream::new(chunks(vec![b"abcdefghij"]), 6).with_ceiling(4);

        // A ceiling below the limit is raised to the limit
        assert_eq!(collect(&mut limited).await, b"abcdef");
        assert!(limited.is_truncated());
    }

    #[tokio::test]
    async fn test_transport_error_is_kept() {
        let inner = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection reset")),
            Ok(Bytes::from_static(b"never seen")),
        ])
        .boxed();
        let mut limited = SizeLimitedStream::new(inner, 100);

        assert!(limited.next().await.unwrap().is_ok());
        let err = limited.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(limited.next().await.is_none());

        let kept = limited.take_error().expect("error should be retained");
        assert_eq!(kept.kind(), io::ErrorKind::UnexpectedEof);
    }
}
