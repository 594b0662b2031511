/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::{Method, Version};

use super::HttpLineParseError;

pub struct HttpMethodLine<'a> {
    pub method: Method,
    pub uri: &'a str,
    pub version: Version,
}

impl<'a> HttpMethodLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HttpMethodLine<'a>, HttpLineParseError> {
        let line = std::str::from_utf8(super::trim_line_end(buf))?;

        let Some(p1) = memchr::memchr(b' ', line.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let method =
            Method::from_bytes(line[..p1].as_bytes()).map_err(|_| HttpLineParseError::InvalidMethod)?;

        let left = &line[p1 + 1..];
        let Some(p2) = memchr::memrchr(b' ', left.as_bytes()) else {
            return Err(HttpLineParseError::NoDelimiterFound(' '));
        };
        let uri = left[..p2].trim();
        if uri.is_empty() {
            return Err(HttpLineParseError::InvalidUri);
        }

        let version = match left[p2 + 1..].trim() {
            "HTTP/1.0" => Version::HTTP_10,
            "HTTP/1.1" => Version::HTTP_11,
            _ => return Err(HttpLineParseError::InvalidVersion),
        };

        Ok(HttpMethodLine {
            method,
            uri,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_origin_form() {
        let line = HttpMethodLine::parse(b"GET /index.html HTTP/1.1\r\n").unwrap();
        assert_eq!(line.method, Method::GET);
        assert_eq!(line.uri, "/index.html");
        assert_eq!(line.version, Version::HTTP_11);
    }

    #[test]
    fn parse_connect() {
        let line = HttpMethodLine::parse(b"CONNECT example.com:443 HTTP/1.1\r\n").unwrap();
        assert_eq!(line.method, Method::CONNECT);
        assert_eq!(line.uri, "example.com:443");
    }

    #[test]
    fn parse_bad_version() {
        assert!(HttpMethodLine::parse(b"GET / SPDY/3\r\n").is_err());
    }
}
