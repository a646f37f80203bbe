//! Response head for stream responses
//!
//! Status and headers are assembled here and turned into a response in one
//! step together with the body, so nothing can touch them once bytes flow.
//! Only the headers listed in [`HeadField`] can be emitted.

use crate::range::RangeWindow;
use axum::{
    body::Body,
    http::{header, HeaderName, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
};

pub const AUDIO_MPEG: &str = "audio/mpeg";

/// Headers a stream response may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadField {
    ContentType,
    AcceptRanges,
    CacheControl,
    ContentLength(u64),
    ContentRange { start: u64, end: u64, total: u64 },
}

impl HeadField {
    fn name(&self) -> HeaderName {
        match self {
            HeadField::ContentType => header::CONTENT_TYPE,
            HeadField::AcceptRanges => header::ACCEPT_RANGES,
            HeadField::CacheControl => header::CACHE_CONTROL,
            HeadField::ContentLength(_) => header::CONTENT_LENGTH,
            HeadField::ContentRange { .. } => header::CONTENT_RANGE,
        }
    }

    fn value(&self) -> String {
        match self {
            HeadField::ContentType => AUDIO_MPEG.to_string(),
            HeadField::AcceptRanges => "bytes".to_string(),
            HeadField::CacheControl => "no-cache".to_string(),
            HeadField::ContentLength(length) => length.to_string(),
            HeadField::ContentRange { start, end, total } => {
                RangeWindow {
                    start: *start,
                    end: *end,
                }
                .content_range(*total)
            }
        }
    }
}

/// Status line plus headers, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    status: StatusCode,
    fields: Vec<HeadField>,
}

impl ResponseHead {
    /// 200 for the whole resource
    pub fn full(total_size: u64) -> Self {
        Self {
            status: StatusCode::OK,
            fields: vec![
                HeadField::ContentType,
                HeadField::AcceptRanges,
                HeadField::CacheControl,
                HeadField::ContentLength(total_size),
            ],
        }
    }

    /// 206 for one window
    pub fn partial(window: RangeWindow, total_size: u64) -> Self {
        Self {
            status: StatusCode::PARTIAL_CONTENT,
            fields: vec![
                HeadField::ContentType,
                HeadField::AcceptRanges,
                HeadField::CacheControl,
                HeadField::ContentRange {
                    start: window.start,
                    end: window.end,
                    total: total_size,
                },
                HeadField::ContentLength(window.len()),
            ],
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn fields(&self) -> &[HeadField] {
        &self.fields
    }

    /// Announced body length
    pub fn content_length(&self) -> u64 {
        self.fields
            .iter()
            .find_map(|field| match field {
                HeadField::ContentLength(length) => Some(*length),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Finalize with a body
    pub fn into_response(self, body: Body) -> Response {
        let headers: Vec<(HeaderName, String)> = self
            .fields
            .iter()
            .map(|field| (field.name(), field.value()))
            .collect();

        (self.status, AppendHeaders(headers), body).into_response()
    }
}
