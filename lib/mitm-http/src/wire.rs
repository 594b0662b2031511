/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::parse::{
    HttpChunkedLine, HttpHeaderLine, HttpLineParseError, HttpMethodLine, HttpStatusLine,
};
use crate::{Body, Request, RequestHead, Response};

/// Default cap on bodies read into memory. 0 disables the cap.
pub const DEFAULT_BODY_LIMIT: usize = 64 << 20;

const MAX_LINE_SIZE: usize = 8192;
const MAX_HEADER_COUNT: usize = 128;

#[derive(Debug, Error)]
pub enum HttpWireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("header line too long")]
    LineTooLong,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("invalid request line: {0}")]
    InvalidRequestLine(HttpLineParseError),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(HttpLineParseError),
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(HttpLineParseError),
    #[error("invalid chunk size line: {0}")]
    InvalidChunkedLine(HttpLineParseError),
    #[error("invalid header name")]
    InvalidHeaderName,
    #[error("invalid header value")]
    InvalidHeaderValue,
    #[error("invalid content-length header")]
    InvalidContentLength,
    #[error("invalid uri: {0}")]
    InvalidUri(http::uri::InvalidUri),
    #[error("invalid status code")]
    InvalidStatusCode,
    #[error("body larger than the configured limit")]
    BodyTooLarge,
    #[error("unexpected end of body")]
    UnexpectedBodyEnd,
}

/// Read one line including the trailing LF. Returns false on a clean EOF
/// before any byte of the line.
async fn read_line_capped<R>(
    reader: &mut R,
    line: &mut Vec<u8>,
    cap: usize,
) -> Result<bool, HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let used = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(false);
                }
                return Err(HttpWireError::ConnectionClosed);
            }
            match memchr::memchr(b'\n', buf) {
                Some(p) => {
                    line.extend_from_slice(&buf[..=p]);
                    p + 1
                }
                None => {
                    line.extend_from_slice(buf);
                    buf.len()
                }
            }
        };
        reader.consume(used);
        if line.last() == Some(&b'\n') {
            return Ok(true);
        }
        if line.len() > cap {
            return Err(HttpWireError::LineTooLong);
        }
    }
}

fn is_end_of_headers(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

enum SpecialHeader {
    Host(String),
    ContentLength(u64),
    Chunked(bool),
    Plain(HeaderName, HeaderValue),
}

fn parse_header(line: &[u8]) -> Result<SpecialHeader, HttpWireError> {
    let header = HttpHeaderLine::parse(line).map_err(HttpWireError::InvalidHeaderLine)?;
    if header.name.eq_ignore_ascii_case("host") {
        return Ok(SpecialHeader::Host(header.value.to_string()));
    }
    if header.name.eq_ignore_ascii_case("content-length") {
        let len = atoi::atoi::<u64>(header.value.as_bytes())
            .ok_or(HttpWireError::InvalidContentLength)?;
        return Ok(SpecialHeader::ContentLength(len));
    }
    if header.name.eq_ignore_ascii_case("transfer-encoding") {
        let chunked = header
            .value
            .split(',')
            .next_back()
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        return Ok(SpecialHeader::Chunked(chunked));
    }
    let name =
        HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| HttpWireError::InvalidHeaderName)?;
    let value =
        HeaderValue::from_str(header.value).map_err(|_| HttpWireError::InvalidHeaderValue)?;
    Ok(SpecialHeader::Plain(name, value))
}

/// Read a request line and headers off the wire. Returns `None` on a
/// clean EOF between requests. `Host`, `Content-Length` and
/// `Transfer-Encoding` land in the dedicated request fields rather than
/// the header map; the body is left untouched for [`read_request_body`].
pub async fn read_request_head<R>(
    reader: &mut R,
    remote_addr: &str,
) -> Result<Option<Request>, HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(256);
    if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
        return Ok(None);
    }
    let method_line = HttpMethodLine::parse(&line).map_err(HttpWireError::InvalidRequestLine)?;
    // CONNECT targets are authority-form, which Uri parses directly
    let uri = Uri::try_from(method_line.uri).map_err(HttpWireError::InvalidUri)?;
    let mut req = Request::new(method_line.method, uri);
    req.version = method_line.version;
    req.remote_addr = remote_addr.to_string();

    loop {
        line.clear();
        if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
            return Err(HttpWireError::ConnectionClosed);
        }
        if is_end_of_headers(&line) {
            break;
        }
        if req.headers.len() >= MAX_HEADER_COUNT {
            return Err(HttpWireError::TooManyHeaders);
        }
        match parse_header(&line)? {
            SpecialHeader::Host(host) => {
                // an absolute-form request target wins over the Host header
                if req.host.is_empty() {
                    req.host = host;
                }
            }
            SpecialHeader::ContentLength(len) => req.content_length = Some(len),
            SpecialHeader::Chunked(chunked) => req.chunked = chunked,
            SpecialHeader::Plain(name, value) => {
                req.headers.append(name, value);
            }
        }
    }
    Ok(Some(req))
}

/// Read a status line and headers off the wire for the response to
/// `request`.
pub async fn read_response_head<R>(
    reader: &mut R,
    request: Arc<RequestHead>,
) -> Result<Response, HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(256);
    if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
        return Err(HttpWireError::ConnectionClosed);
    }
    let status_line = HttpStatusLine::parse(&line).map_err(HttpWireError::InvalidStatusLine)?;
    let status =
        StatusCode::from_u16(status_line.code).map_err(|_| HttpWireError::InvalidStatusCode)?;

    let mut rsp = Response::new(status, Body::Empty, request);
    rsp.version = status_line.version;
    rsp.content_length = None;

    loop {
        line.clear();
        if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
            return Err(HttpWireError::ConnectionClosed);
        }
        if is_end_of_headers(&line) {
            break;
        }
        if rsp.headers.len() >= MAX_HEADER_COUNT {
            return Err(HttpWireError::TooManyHeaders);
        }
        match parse_header(&line)? {
            SpecialHeader::Host(host) => {
                let value = HeaderValue::from_str(&host)
                    .map_err(|_| HttpWireError::InvalidHeaderValue)?;
                rsp.headers.append(http::header::HOST, value);
            }
            SpecialHeader::ContentLength(len) => rsp.content_length = Some(len),
            SpecialHeader::Chunked(chunked) => rsp.chunked = chunked,
            SpecialHeader::Plain(name, value) => {
                rsp.headers.append(name, value);
            }
        }
    }
    Ok(rsp)
}

async fn read_fixed_body<R>(reader: &mut R, len: u64, limit: usize) -> Result<Bytes, HttpWireError>
where
    R: AsyncRead + Unpin,
{
    if limit > 0 && len > limit as u64 {
        return Err(HttpWireError::BodyTooLarge);
    }
    let mut data = vec![0u8; len as usize];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|_| HttpWireError::UnexpectedBodyEnd)?;
    Ok(Bytes::from(data))
}

async fn read_chunked_body<R>(
    reader: &mut R,
    limit: usize,
) -> Result<(Bytes, HeaderMap), HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut data = Vec::new();
    let mut line = Vec::with_capacity(64);
    loop {
        line.clear();
        if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
            return Err(HttpWireError::UnexpectedBodyEnd);
        }
        let chunk = HttpChunkedLine::parse(&line).map_err(HttpWireError::InvalidChunkedLine)?;
        if chunk.chunk_size == 0 {
            break;
        }
        if limit > 0 && data.len() as u64 + chunk.chunk_size > limit as u64 {
            return Err(HttpWireError::BodyTooLarge);
        }
        let start = data.len();
        data.resize(start + chunk.chunk_size as usize, 0);
        reader
            .read_exact(&mut data[start..])
            .await
            .map_err(|_| HttpWireError::UnexpectedBodyEnd)?;
        let mut end = [0u8; 2];
        reader
            .read_exact(&mut end)
            .await
            .map_err(|_| HttpWireError::UnexpectedBodyEnd)?;
        if &end != b"\r\n" {
            return Err(HttpWireError::InvalidChunkedLine(
                HttpLineParseError::InvalidChunkSize,
            ));
        }
    }

    // trailer section runs until the empty line
    let mut trailer = HeaderMap::new();
    loop {
        line.clear();
        if !read_line_capped(reader, &mut line, MAX_LINE_SIZE).await? {
            return Err(HttpWireError::UnexpectedBodyEnd);
        }
        if is_end_of_headers(&line) {
            break;
        }
        let header = HttpHeaderLine::parse(&line).map_err(HttpWireError::InvalidHeaderLine)?;
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpWireError::InvalidHeaderName)?;
        let value =
            HeaderValue::from_str(header.value).map_err(|_| HttpWireError::InvalidHeaderValue)?;
        trailer.append(name, value);
    }
    Ok((Bytes::from(data), trailer))
}

/// Read the request body into memory according to the framing recorded on
/// the request head. Requests without Content-Length or chunked framing
/// carry no body.
pub async fn read_request_body<R>(
    reader: &mut R,
    req: &mut Request,
    limit: usize,
) -> Result<(), HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    if req.chunked {
        let (data, trailer) = read_chunked_body(reader, limit).await?;
        req.trailer = trailer;
        req.body = Body::Full(data);
    } else if let Some(len) = req.content_length {
        req.body = if len > 0 {
            Body::Full(read_fixed_body(reader, len, limit).await?)
        } else {
            Body::Empty
        };
    } else {
        req.body = Body::Empty;
    }
    Ok(())
}

fn response_has_body(rsp: &Response) -> bool {
    if rsp.request.method == http::Method::HEAD {
        return false;
    }
    let code = rsp.status.as_u16();
    !(rsp.status.is_informational() || code == 204 || code == 304)
}

/// Read the response body into memory. A response without Content-Length
/// or chunked framing is delimited by connection close.
pub async fn read_response_body<R>(
    reader: &mut R,
    rsp: &mut Response,
    limit: usize,
) -> Result<(), HttpWireError>
where
    R: AsyncBufRead + Unpin,
{
    if !response_has_body(rsp) {
        rsp.body = Body::Empty;
        return Ok(());
    }
    if rsp.chunked {
        let (data, trailer) = read_chunked_body(reader, limit).await?;
        rsp.trailer = trailer;
        rsp.body = Body::Full(data);
    } else if let Some(len) = rsp.content_length {
        rsp.body = if len > 0 {
            Body::Full(read_fixed_body(reader, len, limit).await?)
        } else {
            Body::Empty
        };
    } else {
        let mut data = Vec::new();
        let nr = reader.read_to_end(&mut data).await?;
        if limit > 0 && nr > limit {
            return Err(HttpWireError::BodyTooLarge);
        }
        rsp.body = Body::Full(Bytes::from(data));
    }
    Ok(())
}

fn write_header_block(
    headers: &HeaderMap,
    chunked: bool,
    content_length: Option<u64>,
    trailer: &HeaderMap,
    buf: &mut Vec<u8>,
) {
    if chunked {
        buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        if !trailer.is_empty() {
            buf.extend_from_slice(b"Trailer: ");
            for (i, name) in trailer.keys().enumerate() {
                if i > 0 {
                    buf.extend_from_slice(b", ");
                }
                buf.extend_from_slice(name.as_str().as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
        }
    } else if let Some(len) = content_length {
        let mut n = itoa::Buffer::new();
        buf.extend_from_slice(b"Content-Length: ");
        buf.extend_from_slice(n.format(len).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    for (name, value) in headers {
        // framing headers always come from the dedicated fields
        if *name == http::header::CONTENT_LENGTH
            || *name == http::header::TRANSFER_ENCODING
            || *name == http::header::HOST
            || *name == http::header::TRAILER
        {
            continue;
        }
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"\r\n");
}

/// Serialize the request line and headers for the upstream hop, using the
/// origin-form request target.
pub fn write_request_head(req: &Request, buf: &mut Vec<u8>) {
    buf.extend_from_slice(req.method.as_str().as_bytes());
    buf.push(b' ');
    let target = req
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    buf.extend_from_slice(target.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(req.proto_str().as_bytes());
    buf.extend_from_slice(b"\r\n");
    if !req.host.is_empty() {
        buf.extend_from_slice(b"Host: ");
        buf.extend_from_slice(req.host.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    write_header_block(&req.headers, req.chunked, req.content_length, &req.trailer, buf);
}

/// Serialize the status line and headers.
pub fn write_response_head(rsp: &Response, buf: &mut Vec<u8>) {
    buf.extend_from_slice(rsp.proto_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(rsp.status_str().as_bytes());
    buf.extend_from_slice(b"\r\n");
    write_header_block(&rsp.headers, rsp.chunked, rsp.content_length, &rsp.trailer, buf);
}

/// Serialize an in-memory body with its original framing: chunked bodies
/// are re-framed as one chunk plus trailer, identity bodies are written
/// as-is.
pub fn write_body_full(data: &[u8], chunked: bool, trailer: &HeaderMap, buf: &mut Vec<u8>) {
    if chunked {
        crate::chunked::encode_chunked(data, buf);
        for (name, value) in trailer {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
    } else {
        buf.extend_from_slice(data);
    }
}
