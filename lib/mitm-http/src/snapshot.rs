/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use http::header;

use crate::chunked::{ChunkedReader, encode_chunked};
use crate::{Request, Response};

#[derive(Clone, Copy, PartialEq, Eq)]
enum ContentCoding {
    Gzip,
    Deflate,
}

/// A static capture of a request or response: status/request line, a
/// filtered header block, and optionally the body and trailer, addressable
/// as disjoint byte ranges of one buffer.
///
/// Taking a snapshot is semantically a no-op for the captured message: the
/// body is drained and replaced with an in-memory copy, so the caller can
/// still consume it unchanged.
#[derive(Default)]
pub struct MessageSnapshot {
    message: Vec<u8>,
    body_offset: usize,
    trailer_offset: usize,
    chunked: bool,
    compress: Option<ContentCoding>,
    skip_body: bool,
    content_types: Vec<String>,
}

impl MessageSnapshot {
    pub fn new() -> Self {
        MessageSnapshot::default()
    }

    /// Skip reading the body when a message is captured.
    pub fn set_skip_body(&mut self, skip: bool) {
        self.skip_body = skip;
    }

    /// Skip reading the body unless the Content-Type starts with one of
    /// the given prefixes.
    pub fn skip_body_unless_content_type<I, S>(&mut self, cts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_body = true;
        self.content_types = cts.into_iter().map(|s| s.into()).collect();
    }

    fn match_content_type(&self, ct: &str) -> bool {
        self.content_types.iter().any(|p| ct.starts_with(p.as_str()))
    }

    fn content_coding(headers: &http::HeaderMap) -> Option<ContentCoding> {
        let value = headers.get(header::CONTENT_ENCODING)?;
        match value.to_str().ok()?.trim() {
            "gzip" => Some(ContentCoding::Gzip),
            "deflate" => Some(ContentCoding::Deflate),
            _ => None,
        }
    }

    fn write_headers(buf: &mut Vec<u8>, headers: &http::HeaderMap) {
        for (name, value) in headers {
            if *name == header::HOST
                || *name == header::CONTENT_LENGTH
                || *name == header::TRANSFER_ENCODING
            {
                continue;
            }
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    /// Capture `req`. The request keeps an equivalent, re-readable body.
    pub async fn snapshot_request(&mut self, req: &mut Request) -> std::io::Result<()> {
        let mut buf = Vec::new();

        write!(buf, "{} {} {}\r\n", req.method, req.uri, req.proto_str())?;
        if !req.host.is_empty() {
            write!(buf, "Host: {}\r\n", req.host)?;
        }
        self.chunked = req.chunked;
        if self.chunked {
            buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        } else if let Some(len) = req.content_length {
            write!(buf, "Content-Length: {len}\r\n")?;
        }
        self.compress = Self::content_coding(&req.headers);

        Self::write_headers(&mut buf, &req.headers);
        buf.extend_from_slice(b"\r\n");

        self.body_offset = buf.len();
        self.trailer_offset = buf.len();

        let ct = req
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if self.skip_body && !self.match_content_type(ct) {
            self.message = buf;
            return Ok(());
        }

        let data = req.body.read_all().await?;
        if self.chunked {
            encode_chunked(&data, &mut buf);
        } else {
            buf.extend_from_slice(&data);
        }
        self.trailer_offset = buf.len();

        if !req.trailer.is_empty() {
            Self::write_headers(&mut buf, &req.trailer);
        } else if self.chunked {
            buf.extend_from_slice(b"\r\n");
        }

        self.message = buf;
        Ok(())
    }

    /// Capture `res`. The response keeps an equivalent, re-readable body.
    pub async fn snapshot_response(&mut self, res: &mut Response) -> std::io::Result<()> {
        let mut buf = Vec::new();

        write!(buf, "{} {}\r\n", res.proto_str(), res.status_str())?;
        self.chunked = res.chunked;
        if self.chunked {
            buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        } else if let Some(len) = res.content_length {
            write!(buf, "Content-Length: {len}\r\n")?;
        }
        self.compress = Self::content_coding(&res.headers);
        // a no-content or partial-content response does not carry the
        // full stream, so it cannot be decoded
        let code = res.status.as_u16();
        if code == 204 || code == 206 {
            self.compress = None;
        }

        Self::write_headers(&mut buf, &res.headers);
        buf.extend_from_slice(b"\r\n");

        self.body_offset = buf.len();
        self.trailer_offset = buf.len();

        let ct = res
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if self.skip_body && !self.match_content_type(ct) {
            self.message = buf;
            return Ok(());
        }

        let data = res.body.read_all().await?;
        if self.chunked {
            encode_chunked(&data, &mut buf);
        } else {
            buf.extend_from_slice(&data);
        }
        self.trailer_offset = buf.len();

        if !res.trailer.is_empty() {
            Self::write_headers(&mut buf, &res.trailer);
        } else if self.chunked {
            buf.extend_from_slice(b"\r\n");
        }

        self.message = buf;
        Ok(())
    }

    /// The full captured buffer.
    pub fn captured(&self) -> &[u8] {
        &self.message
    }

    /// Reads the request/status line and headers.
    pub fn header_reader(&self) -> impl Read + '_ {
        &self.message[..self.body_offset]
    }

    /// Reads the captured body. With `decode` the chunked framing is
    /// unwrapped and a gzip/deflate Content-Encoding is decompressed;
    /// without it the raw captured bytes are returned, chunk framing
    /// included. If the body was skipped the reader is empty.
    pub fn body_reader(&self, decode: bool) -> Box<dyn Read + '_> {
        let section = &self.message[self.body_offset..self.trailer_offset];
        if !decode {
            return Box::new(section);
        }
        let r: Box<dyn Read + '_> = if self.chunked {
            Box::new(ChunkedReader::new(section))
        } else {
            Box::new(section)
        };
        match self.compress {
            Some(ContentCoding::Gzip) => Box::new(GzDecoder::new(r)),
            Some(ContentCoding::Deflate) => Box::new(DeflateDecoder::new(r)),
            None => r,
        }
    }

    /// Reads the captured trailer section, if any.
    pub fn trailer_reader(&self) -> impl Read + '_ {
        &self.message[self.trailer_offset..]
    }

    /// Reads the whole captured message.
    pub fn reader(&self, decode: bool) -> Box<dyn Read + '_> {
        Box::new(
            self.header_reader()
                .chain(self.body_reader(decode))
                .chain(self.trailer_reader()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Body;
    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use http::{HeaderValue, Method, StatusCode, Uri, Version};
    use std::sync::Arc;

    fn read_to_string(mut r: impl Read) -> String {
        let mut s = String::new();
        r.read_to_string(&mut s).unwrap();
        s
    }

    #[tokio::test]
    async fn request_round_trip() {
        let mut req = Request::new(Method::POST, Uri::from_static("http://example.com/data"));
        req.host = "example.com".to_string();
        req.headers
            .insert("x-flavor", HeaderValue::from_static("vanilla"));
        req.content_length = Some(10);
        req.body = Body::full(Bytes::from_static(b"0123456789"));

        let mut snap = MessageSnapshot::new();
        snap.snapshot_request(&mut req).await.unwrap();

        let text = read_to_string(snap.reader(false));
        assert_eq!(
            text,
            "POST http://example.com/data HTTP/1.1\r\n\
             Host: example.com\r\n\
             Content-Length: 10\r\n\
             x-flavor: vanilla\r\n\
             \r\n\
             0123456789"
        );

        // the request body is still readable afterwards
        let data = req.body.read_all().await.unwrap();
        assert_eq!(&data[..], b"0123456789");
    }

    #[tokio::test]
    async fn chunked_request_decode() {
        let content = b"this travels in chunks";
        let mut req = Request::new(Method::PUT, Uri::from_static("/up"));
        req.chunked = true;
        req.body = Body::full(Bytes::from_static(content));

        let mut snap = MessageSnapshot::new();
        snap.snapshot_request(&mut req).await.unwrap();

        // raw view keeps the chunk framing
        let raw = read_to_string(snap.body_reader(false));
        assert!(raw.starts_with("16\r\n"));
        assert!(raw.ends_with("\r\n0\r\n"));

        // decoded view restores the plaintext, byte count preserved
        let decoded = read_to_string(snap.body_reader(true));
        assert_eq!(decoded.as_bytes(), content);
        assert_eq!(decoded.len(), content.len());

        // the full message ends with the terminating CRLF
        let text = read_to_string(snap.reader(false));
        assert!(text.ends_with("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn chunked_trailer_section() {
        let mut req = Request::new(Method::PUT, Uri::from_static("/up"));
        req.chunked = true;
        req.body = Body::full(Bytes::from_static(b"data"));
        req.trailer
            .insert("x-checksum", HeaderValue::from_static("abc"));

        let mut snap = MessageSnapshot::new();
        snap.snapshot_request(&mut req).await.unwrap();

        let trailer = read_to_string(snap.trailer_reader());
        assert_eq!(trailer, "x-checksum: abc\r\n");
    }

    #[tokio::test]
    async fn gzip_response_decode() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello compressed world").unwrap();
        let compressed = encoder.finish().unwrap();

        let req = Request::new(Method::GET, Uri::from_static("http://example.com/"));
        let mut res = Response::new(
            StatusCode::OK,
            Body::full(compressed.clone()),
            Arc::new(req.head()),
        );
        res.headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let mut snap = MessageSnapshot::new();
        snap.snapshot_response(&mut res).await.unwrap();

        let decoded = read_to_string(snap.body_reader(true));
        assert_eq!(decoded, "hello compressed world");

        let mut raw = Vec::new();
        snap.body_reader(false).read_to_end(&mut raw).unwrap();
        assert_eq!(raw, compressed);
    }

    #[tokio::test]
    async fn partial_content_is_not_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"fragment").unwrap();
        let compressed = encoder.finish().unwrap();

        let req = Request::new(Method::GET, Uri::from_static("http://example.com/"));
        let mut res = Response::new(
            StatusCode::PARTIAL_CONTENT,
            Body::full(compressed.clone()),
            Arc::new(req.head()),
        );
        res.headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let mut snap = MessageSnapshot::new();
        snap.snapshot_response(&mut res).await.unwrap();

        let mut decoded = Vec::new();
        snap.body_reader(true).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, compressed);
    }

    #[tokio::test]
    async fn skip_body_unless_content_type() {
        let mut req = Request::new(Method::POST, Uri::from_static("/a"));
        req.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        req.body = Body::full(Bytes::from_static(b"pngdata"));

        let mut snap = MessageSnapshot::new();
        snap.skip_body_unless_content_type(["text/"]);
        snap.snapshot_request(&mut req).await.unwrap();

        let mut body = Vec::new();
        snap.body_reader(false).read_to_end(&mut body).unwrap();
        assert!(body.is_empty());
        assert!(read_to_string(snap.trailer_reader()).is_empty());

        let mut req = Request::new(Method::POST, Uri::from_static("/b"));
        req.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        req.body = Body::full(Bytes::from_static(b"textual"));

        let mut snap = MessageSnapshot::new();
        snap.skip_body_unless_content_type(["text/"]);
        snap.snapshot_request(&mut req).await.unwrap();

        let body = read_to_string(snap.body_reader(false));
        assert_eq!(body, "textual");
    }

    #[tokio::test]
    async fn http10_version_line() {
        let mut req = Request::new(Method::GET, Uri::from_static("/old"));
        req.version = Version::HTTP_10;
        let mut snap = MessageSnapshot::new();
        snap.snapshot_request(&mut req).await.unwrap();
        let text = read_to_string(snap.reader(false));
        assert!(text.starts_with("GET /old HTTP/1.0\r\n"));
    }
}
