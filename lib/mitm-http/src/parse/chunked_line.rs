/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::HttpLineParseError;

pub struct HttpChunkedLine {
    pub chunk_size: u64,
}

impl HttpChunkedLine {
    /// Parse a chunk-size line, ignoring any chunk extension after ';'.
    pub fn parse(buf: &[u8]) -> Result<HttpChunkedLine, HttpLineParseError> {
        let line = super::trim_line_end(buf);
        let size_part = match memchr::memchr(b';', line) {
            Some(p) => &line[..p],
            None => line,
        };
        let size_part = std::str::from_utf8(size_part)?.trim();
        if size_part.is_empty() {
            return Err(HttpLineParseError::InvalidChunkSize);
        }
        let chunk_size = u64::from_str_radix(size_part, 16)
            .map_err(|_| HttpLineParseError::InvalidChunkSize)?;
        Ok(HttpChunkedLine { chunk_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain() {
        assert_eq!(HttpChunkedLine::parse(b"1a\r\n").unwrap().chunk_size, 0x1a);
        assert_eq!(HttpChunkedLine::parse(b"0\r\n").unwrap().chunk_size, 0);
    }

    #[test]
    fn parse_with_extension() {
        assert_eq!(
            HttpChunkedLine::parse(b"10;name=value\r\n").unwrap().chunk_size,
            0x10
        );
    }

    #[test]
    fn parse_invalid() {
        assert!(HttpChunkedLine::parse(b"\r\n").is_err());
        assert!(HttpChunkedLine::parse(b"zz\r\n").is_err());
    }
}
