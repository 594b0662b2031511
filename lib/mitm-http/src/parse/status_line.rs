/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::Version;

use super::HttpLineParseError;

pub struct HttpStatusLine<'a> {
    pub version: Version,
    pub code: u16,
    pub reason: &'a str,
}

impl<'a> HttpStatusLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpStatusLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(super::trim_line_end(buf))?;

        let Some(p1) = memchr::memchr(b' ', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let version = match &line[..p1] {
            "HTTP/1.0" => Version::HTTP_10,
            "HTTP/1.1" => Version::HTTP_11,
            _ => return Err(HttpLineParseError::InvalidVersion),
        };

        let left = line[p1 + 1..].trim_start();
        let (code_s, reason) = match memchr::memchr(b' ', left.as_bytes()) {
            Some(p2) => (&left[..p2], left[p2 + 1..].trim()),
            None => (left, ""),
        };
        let code = code_s
            .parse::<u16>()
            .map_err(|_| HttpLineParseError::InvalidStatusCode)?;
        if !(100..1000).contains(&code) {
            return Err(HttpLineParseError::InvalidStatusCode);
        }

        Ok(HttpStatusLine {
            version,
            code,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let line = HttpStatusLine::parse(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(line.version, Version::HTTP_11);
        assert_eq!(line.code, 200);
        assert_eq!(line.reason, "OK");
    }

    #[test]
    fn parse_no_reason() {
        let line = HttpStatusLine::parse(b"HTTP/1.1 204\r\n").unwrap();
        assert_eq!(line.code, 204);
        assert_eq!(line.reason, "");
    }

    #[test]
    fn parse_bad_code() {
        assert!(HttpStatusLine::parse(b"HTTP/1.1 20x OK\r\n").is_err());
        assert!(HttpStatusLine::parse(b"HTTP/1.1 99 Low\r\n").is_err());
    }
}
