//! Byte-range resolution over the virtual concatenation
//!
//! A `Range` header is resolved against the playlist's total size into an
//! inclusive [`RangeWindow`], which [`decompose`] splits into per-track
//! sub-ranges. Only single ranges are served; `bytes=a-b,c-d` is refused.

use crate::playlist::Track;

/// Parsed `Range: bytes=...` value, not yet bound to a size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=-N`: the last N bytes
    Suffix(u64),
    /// `bytes=N-`: from N to the end
    From(u64),
    /// `bytes=N-M`
    Bounded(u64, u64),
}

/// Why a range cannot be served (both surface as 416)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    MultipleRanges,
    Unsatisfiable,
}

/// Inclusive byte interval `start..=end` of the virtual concatenation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
}

impl RangeWindow {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// What the client asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No (usable) Range header: 200 with the whole resource
    Full,
    /// 206 with this window
    Partial(RangeWindow),
}

impl RangeRequest {
    /// Bytes to send; `None` when the resource is empty
    pub fn window(&self, total_size: u64) -> Option<RangeWindow> {
        match self {
            RangeRequest::Partial(window) => Some(*window),
            RangeRequest::Full if total_size == 0 => None,
            RangeRequest::Full => Some(RangeWindow {
                start: 0,
                end: total_size - 1,
            }),
        }
    }
}

/// Parse a `Range` header value.
///
/// `Ok(None)` means the header is not a byte range we understand and is
/// ignored (RFC 9110 §14.2), so the whole resource is served.
pub fn parse_range_header(value: &str) -> Result<Option<RangeSpec>, RangeError> {
    let value = value.trim();

    if value.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let Some((unit, spec)) = value.split_once('=') else {
        return Ok(None);
    };
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Ok(None);
    }

    let Some((first, last)) = spec.trim().split_once('-') else {
        return Ok(None);
    };
    let (first, last) = (first.trim(), last.trim());

    let parsed = match (first.is_empty(), last.is_empty()) {
        (true, false) => last.parse().ok().map(RangeSpec::Suffix),
        (false, true) => first.parse().ok().map(RangeSpec::From),
        (false, false) => match (first.parse(), last.parse()) {
            (Ok(start), Ok(end)) => Some(RangeSpec::Bounded(start, end)),
            _ => None,
        },
        (true, true) => None,
    };

    Ok(parsed)
}

impl RangeSpec {
    /// Bind to a resource of `total_size` bytes
    pub fn resolve(self, total_size: u64) -> Result<RangeWindow, RangeError> {
        let (start, end) = match self {
            RangeSpec::Suffix(n) => {
                if n == 0 || total_size == 0 {
                    return Err(RangeError::Unsatisfiable);
                }
                (total_size.saturating_sub(n), total_size - 1)
            }
            RangeSpec::From(start) => {
                if start >= total_size {
                    return Err(RangeError::Unsatisfiable);
                }
                (start, total_size - 1)
            }
            RangeSpec::Bounded(start, end) => {
                if start >= total_size || start > end {
                    return Err(RangeError::Unsatisfiable);
                }
                (start, end.min(total_size - 1))
            }
        };

        Ok(RangeWindow { start, end })
    }
}

/// Resolve an optional `Range` header against the total size
pub fn resolve(header: Option<&str>, total_size: u64) -> Result<RangeRequest, RangeError> {
    let Some(value) = header else {
        return Ok(RangeRequest::Full);
    };

    match parse_range_header(value)? {
        None => Ok(RangeRequest::Full),
        Some(spec) => spec.resolve(total_size).map(RangeRequest::Partial),
    }
}

/// Part of one track inside a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Index into the playlist's tracks
    pub track_index: usize,
    /// Inclusive offsets within the track
    pub local_start: u64,
    pub local_end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.local_end - self.local_start + 1
    }

    /// True when the segment is the track's complete byte range
    pub fn covers_track(&self, track_size: u64) -> bool {
        self.local_start == 0 && self.local_end + 1 == track_size
    }
}

/// Split a window into per-track sub-ranges, in playlist order, with no
/// gaps or overlaps. Tracks of size 0 contribute nothing.
pub fn decompose(tracks: &[Track], window: RangeWindow) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current_pos = 0u64;

    for (track_index, track) in tracks.iter().enumerate() {
        if current_pos > window.end {
            break;
        }
        if track.size == 0 {
            continue;
        }
        if current_pos + track.size <= window.start {
            current_pos += track.size;
            continue;
        }

        segments.push(Segment {
            track_index,
            local_start: window.start.saturating_sub(current_pos),
            local_end: (track.size - 1).min(window.end - current_pos),
        });
        current_pos += track.size;
    }

    segments
}
