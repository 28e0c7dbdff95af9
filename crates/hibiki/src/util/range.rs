use crate::{HibikiError, HibikiResult};

/// A byte span within a remote resource. `end` is inclusive; `None` means
/// "to the end of the resource".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn to_http_range(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }

    /// Number of bytes covered, if the range is bounded.
    pub fn len(&self) -> Option<u64> {
        // 0-500 means 501 bytes
        self.end.map(|end| end - self.start + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// The byte range shall be expressed and formatted as a byte-range-spec as defined in
/// IETF RFC 7233:2014, subclause 2.1. It is restricted to a single expression identifying
/// a contiguous range of bytes.
pub fn parse_media_range<S>(s: S) -> HibikiResult<ByteRange>
where
    S: AsRef<str>,
{
    let s = s.as_ref();
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| HibikiError::InvalidMediaRange(s.to_string()))?;

    let first_byte_pos = start
        .parse::<u64>()
        .map_err(|_| HibikiError::InvalidMediaRange(s.to_string()))?;
    let last_byte_pos = if end.is_empty() {
        None
    } else {
        Some(
            end.parse::<u64>()
                .map_err(|_| HibikiError::InvalidMediaRange(s.to_string()))?,
        )
    };

    if let Some(last_byte_pos) = last_byte_pos {
        if last_byte_pos < first_byte_pos {
            return Err(HibikiError::InvalidMediaRange(s.to_string()));
        }
    }

    Ok(ByteRange {
        start: first_byte_pos,
        end: last_byte_pos,
    })
}
