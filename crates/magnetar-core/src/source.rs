//! Byte sources for media files and single-range `Range` handling.
//!
//! # Design
//! - A source answers with the status, length and `Content-Range` a client should see,
//!   so passthrough delivery can mirror them verbatim.
//! - Range parsing accepts one `bytes=` range; anything else is ignored and the whole
//!   file is served.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

/// Boxed stream of file bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Status a source answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// Whole file (200).
    Full,
    /// Requested slice (206).
    Partial,
    /// Requested range lies outside the file (416).
    Unsatisfiable,
}

impl SourceStatus {
    /// Matching HTTP status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Full => 200,
            Self::Partial => 206,
            Self::Unsatisfiable => 416,
        }
    }
}

/// An opened byte source.
pub struct SourceResponse {
    /// Status to present.
    pub status: SourceStatus,
    /// Body length, when known.
    pub content_length: Option<u64>,
    /// `Content-Range` value, for partial and unsatisfiable answers.
    pub content_range: Option<String>,
    /// File bytes.
    pub body: ByteStream,
}

impl std::fmt::Debug for SourceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Failures opening a byte source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No bytes of the file are available yet.
    #[error("file has no downloaded bytes yet")]
    NotReady,
    /// The engine does not know the file.
    #[error("file is not known to the engine")]
    UnknownFile {
        /// Requested index.
        file_index: usize,
    },
    /// Reading from the engine failed.
    #[error("byte source failed")]
    Failed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
}

/// One parsed `bytes=` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` or `bytes=start-end`.
    From {
        /// First byte.
        start: u64,
        /// Last byte, inclusive.
        end_inclusive: Option<u64>,
    },
    /// `bytes=-len`: the final `len` bytes.
    Suffix {
        /// Number of trailing bytes.
        len: u64,
    },
}

impl ByteRange {
    /// Parse a `Range` header holding a single byte range.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?.trim();
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            return end.parse().ok().map(|len| Self::Suffix { len });
        }
        let start = start.parse().ok()?;
        let end_inclusive = if end.is_empty() {
            None
        } else {
            let end = end.parse().ok()?;
            if end < start {
                return None;
            }
            Some(end)
        };
        Some(Self::From {
            start,
            end_inclusive,
        })
    }

    /// Resolve against a file of `total` bytes into an inclusive `(start, end)` pair.
    ///
    /// `None` means the range is not satisfiable.
    #[must_use]
    pub fn resolve(self, total: u64) -> Option<(u64, u64)> {
        if total == 0 {
            return None;
        }
        match self {
            Self::From {
                start,
                end_inclusive,
            } => {
                if start >= total {
                    return None;
                }
                let end = end_inclusive.map_or(total - 1, |end| end.min(total - 1));
                Some((start, end))
            }
            Self::Suffix { len: 0 } => None,
            Self::Suffix { len } => Some((total.saturating_sub(len), total - 1)),
        }
    }
}

/// Build a source response for a file of `total` bytes, honouring `range`.
///
/// `open(start, len)` produces the body for the selected slice.
pub fn respond_with_range<F>(total: u64, range: Option<&str>, open: F) -> SourceResponse
where
    F: FnOnce(u64, u64) -> ByteStream,
{
    match range.and_then(ByteRange::parse) {
        None => SourceResponse {
            status: SourceStatus::Full,
            content_length: Some(total),
            content_range: None,
            body: open(0, total),
        },
        Some(requested) => match requested.resolve(total) {
            Some((start, end)) => {
                let len = end - start + 1;
                SourceResponse {
                    status: SourceStatus::Partial,
                    content_length: Some(len),
                    content_range: Some(format!("bytes {start}-{end}/{total}")),
                    body: open(start, len),
                }
            }
            None => SourceResponse {
                status: SourceStatus::Unsatisfiable,
                content_length: Some(0),
                content_range: Some(format!("bytes */{total}")),
                body: Box::pin(futures_util::stream::empty()),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn slice(data: &'static [u8]) -> impl FnOnce(u64, u64) -> ByteStream {
        move |start, len| {
            let start = usize::try_from(start).unwrap_or(usize::MAX);
            let end = start + usize::try_from(len).unwrap_or(0);
            let chunk = Bytes::from_static(&data[start..end]);
            Box::pin(futures_util::stream::iter([Ok(chunk)]))
        }
    }

    async fn collect(body: ByteStream) -> Vec<u8> {
        body.fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk.expect("chunk"));
            acc
        })
        .await
    }

    #[test]
    fn parse_accepts_single_ranges() {
        assert_eq!(
            ByteRange::parse("bytes=1000-1999"),
            Some(ByteRange::From {
                start: 1000,
                end_inclusive: Some(1999)
            })
        );
        assert_eq!(
            ByteRange::parse(" bytes=500- "),
            Some(ByteRange::From {
                start: 500,
                end_inclusive: None
            })
        );
        assert_eq!(
            ByteRange::parse("bytes=-300"),
            Some(ByteRange::Suffix { len: 300 })
        );
    }

    #[test]
    fn parse_ignores_unsupported_forms() {
        assert_eq!(ByteRange::parse("bytes=0-1,5-6"), None);
        assert_eq!(ByteRange::parse("items=0-1"), None);
        assert_eq!(ByteRange::parse("bytes=9-3"), None);
        assert_eq!(ByteRange::parse("bytes=a-b"), None);
        assert_eq!(ByteRange::parse("bytes=-"), None);
    }

    #[test]
    fn resolve_clamps_and_rejects() {
        let total = 5000;
        let from = |start, end_inclusive| ByteRange::From {
            start,
            end_inclusive,
        };
        assert_eq!(from(1000, Some(1999)).resolve(total), Some((1000, 1999)));
        assert_eq!(from(4000, Some(9999)).resolve(total), Some((4000, 4999)));
        assert_eq!(from(4000, None).resolve(total), Some((4000, 4999)));
        assert_eq!(from(5000, None).resolve(total), None);
        assert_eq!(ByteRange::Suffix { len: 100 }.resolve(total), Some((4900, 4999)));
        assert_eq!(ByteRange::Suffix { len: 9000 }.resolve(total), Some((0, 4999)));
        assert_eq!(ByteRange::Suffix { len: 0 }.resolve(total), None);
        assert_eq!(from(0, None).resolve(0), None);
    }

    #[tokio::test]
    async fn respond_with_range_builds_partial_answers() {
        static DATA: &[u8] = b"0123456789";
        let full = respond_with_range(10, None, slice(DATA));
        assert_eq!(full.status, SourceStatus::Full);
        assert_eq!(full.content_length, Some(10));
        assert_eq!(collect(full.body).await, DATA);

        let partial = respond_with_range(10, Some("bytes=2-4"), slice(DATA));
        assert_eq!(partial.status.code(), 206);
        assert_eq!(partial.content_range.as_deref(), Some("bytes 2-4/10"));
        assert_eq!(partial.content_length, Some(3));
        assert_eq!(collect(partial.body).await, b"234");

        let outside = respond_with_range(10, Some("bytes=10-"), slice(DATA));
        assert_eq!(outside.status, SourceStatus::Unsatisfiable);
        assert_eq!(outside.content_range.as_deref(), Some("bytes */10"));

        let ignored = respond_with_range(10, Some("bytes=1-2,4-5"), slice(DATA));
        assert_eq!(ignored.status, SourceStatus::Full);
    }
}
