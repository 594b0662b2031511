/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! `Range` request support: header parsing and construction of 206
//! partial-content bodies, including `multipart/byteranges` framing that
//! is byte-compatible with common HTTP client expectations.

use anyhow::anyhow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpRangeError {
    #[error("malformed range header")]
    Malformed,
    #[error("requested range not satisfiable")]
    Unsatisfiable,
}

/// An inclusive byte range of a body of known full length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRange {
    pub start: u64,
    pub end: u64,
}

impl HttpRange {
    /// The `Content-Range` value for this range of a `full_len` body.
    pub fn content_range(&self, full_len: u64) -> String {
        format!("bytes {}-{}/{full_len}", self.start, self.end)
    }
}

/// Parse a `Range` header value against a body of `full_len` bytes.
///
/// Supported forms are `bytes=a-b` and the open-ended `bytes=a-`, with
/// multiple comma-separated ranges. Anything else is malformed; a range
/// with an inverted or out-of-bounds start is unsatisfiable. Both cases
/// map to a 416 response at the call site.
pub fn parse_range_header(value: &str, full_len: u64) -> Result<Vec<HttpRange>, HttpRangeError> {
    let value = value.trim();
    let spec = value
        .strip_prefix("bytes=")
        .or_else(|| value.strip_prefix("Bytes="))
        .ok_or(HttpRangeError::Malformed)?;

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let Some((start_s, end_s)) = part.split_once('-') else {
            return Err(HttpRangeError::Malformed);
        };
        let start = start_s
            .trim()
            .parse::<u64>()
            .map_err(|_| HttpRangeError::Malformed)?;
        let end = if end_s.trim().is_empty() {
            full_len.checked_sub(1).ok_or(HttpRangeError::Unsatisfiable)?
        } else {
            let end = end_s
                .trim()
                .parse::<u64>()
                .map_err(|_| HttpRangeError::Malformed)?;
            // clamp a too-large end to the last byte
            end.min(full_len.saturating_sub(1))
        };
        if start > end || start >= full_len {
            return Err(HttpRangeError::Unsatisfiable);
        }
        ranges.push(HttpRange { start, end });
    }
    if ranges.is_empty() {
        return Err(HttpRangeError::Malformed);
    }
    Ok(ranges)
}

/// A random 60-character boundary for multipart range bodies.
pub fn random_boundary() -> anyhow::Result<String> {
    let mut buf = [0u8; 30];
    openssl::rand::rand_bytes(&mut buf)
        .map_err(|e| anyhow!("failed to generate random boundary: {e}"))?;
    Ok(hex::encode(buf))
}

/// Build a `multipart/byteranges` body over `body` for the given ranges.
/// Each part carries its own Content-Range (and Content-Type, when one is
/// given). Ranges must have been validated by [`parse_range_header`].
pub fn multipart_byteranges(
    body: &[u8],
    ranges: &[HttpRange],
    content_type: &str,
    boundary: &str,
) -> Vec<u8> {
    let full_len = body.len() as u64;
    let mut out = Vec::new();
    for (i, range) in ranges.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(format!("Content-Range: {}\r\n", range.content_range(full_len)).as_bytes());
        if !content_type.is_empty() {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&body[range.start as usize..=range.end as usize]);
    }
    out.extend_from_slice(b"\r\n--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--\r\n");
    out
}
