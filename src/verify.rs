use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::digest::Digest;

/// Raised once the wrapped stream is exhausted and the bytes that passed
/// through do not match the expectation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("digest does not match contents: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },
    #[error("size does not match contents: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Hashes and counts bytes as they pass through, checking both against the
/// expectation when the inner stream ends. Verification happens in the same
/// pass as the read; nothing is buffered here.
pub struct VerifyingStream<S> {
    inner: S,
    expected: Digest,
    expected_size: Option<u64>,
    hasher: Sha256,
    seen: u64,
    done: bool,
}

impl<S> VerifyingStream<S> {
    /// `expected_size` of `None` skips the length check, for callers that
    /// cannot know the size up front (e.g. chunked request bodies).
    pub fn new(inner: S, expected: Digest, expected_size: Option<u64>) -> Self {
        VerifyingStream {
            inner,
            expected,
            expected_size,
            hasher: Sha256::new(),
            seen: 0,
            done: false,
        }
    }

    fn check(&mut self) -> Result<(), VerifyError> {
        if let Some(expected) = self.expected_size {
            if expected != self.seen {
                return Err(VerifyError::SizeMismatch {
                    expected,
                    actual: self.seen,
                });
            }
        }
        let hasher = std::mem::replace(&mut self.hasher, Sha256::new());
        let actual = Digest::sha256(format!("{:x}", hasher.finalize()));
        if actual != self.expected {
            return Err(VerifyError::DigestMismatch {
                expected: self.expected.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl<S> Stream for VerifyingStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.hasher.update(&chunk);
                this.seen += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                match this.check() {
                    Ok(()) => Poll::Ready(None),
                    Err(err) => Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        err,
                    )))),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Digs a [`VerifyError`] out of an I/O error, if that is what it carries.
/// Engines use this to tell a client-caused digest mismatch apart from a
/// genuine I/O failure.
pub fn verification_failure(err: &io::Error) -> Option<&VerifyError> {
    err.get_ref()?.downcast_ref()
}
