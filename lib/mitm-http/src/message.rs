/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A message body. Bodies read off the wire start out as [`Body::Full`]
/// captures or [`Body::Streaming`] readers; modifiers may replace them at
/// will. Reading a streaming body to completion converts it in place so
/// the content stays re-readable.
pub enum Body {
    Empty,
    Full(Bytes),
    Streaming(Box<dyn AsyncRead + Send + Unpin>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn full<T: Into<Bytes>>(data: T) -> Self {
        Body::Full(data.into())
    }

    pub fn streaming<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Body::Streaming(Box::new(reader))
    }

    /// Whether the body is known to hold no bytes. A streaming body is
    /// never known-empty before it is read.
    pub fn is_known_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(data) => data.is_empty(),
            Body::Streaming(_) => false,
        }
    }

    /// Drain the body into memory. Afterwards the body is a [`Body::Full`]
    /// holding the same bytes, so it can be read again.
    pub async fn read_all(&mut self) -> std::io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(data) => Ok(data.clone()),
            Body::Streaming(reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data).await?;
                let data = Bytes::from(data);
                *self = Body::Full(data.clone());
                Ok(data)
            }
        }
    }

    /// Replace the body with [`Body::Empty`] and return the old value.
    pub fn take(&mut self) -> Body {
        std::mem::take(self)
    }

    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        match self {
            Body::Empty => Box::new(tokio::io::empty()),
            Body::Full(data) => Box::new(Cursor::new(data)),
            Body::Streaming(reader) => reader,
        }
    }
}

/// An HTTP request flowing through the proxy.
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Target authority, taken from the request target or the Host header.
    pub host: String,
    pub remote_addr: String,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub trailer: HeaderMap,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        let host = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Request {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            host,
            remote_addr: String::new(),
            content_length: None,
            chunked: false,
            trailer: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// Replace the body with in-memory content and fix up the framing
    /// metadata accordingly.
    pub fn set_body_full<T: Into<Bytes>>(&mut self, data: T) {
        let data = data.into();
        self.content_length = Some(data.len() as u64);
        self.chunked = false;
        self.trailer.clear();
        self.body = Body::Full(data);
    }

    /// The body-less projection carried on the response side.
    pub fn head(&self) -> RequestHead {
        RequestHead {
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            host: self.host.clone(),
            remote_addr: self.remote_addr.clone(),
        }
    }

    /// The proto string for the request line, e.g. `HTTP/1.1`.
    pub fn proto_str(&self) -> &'static str {
        version_str(self.version)
    }
}

/// The request-side facts a response carries with it. Response predicates
/// evaluate against this alone, so a request/response pair always takes
/// the same match decision on both legs.
#[derive(Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub host: String,
    pub remote_addr: String,
}

impl RequestHead {
    pub fn proto_str(&self) -> &'static str {
        version_str(self.version)
    }
}

/// An HTTP response flowing back through the proxy, linked to the head of
/// the request that caused it.
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub trailer: HeaderMap,
    pub body: Body,
    pub request: Arc<RequestHead>,
}

impl Response {
    /// Build a response for `request` the way an origin server would:
    /// protocol version inherited from the request, reason phrase from the
    /// status code.
    pub fn new(status: StatusCode, body: Body, request: Arc<RequestHead>) -> Self {
        let content_length = match &body {
            Body::Empty => Some(0),
            Body::Full(data) => Some(data.len() as u64),
            Body::Streaming(_) => None,
        };
        Response {
            status,
            version: request.version,
            headers: HeaderMap::new(),
            content_length,
            chunked: false,
            trailer: HeaderMap::new(),
            body,
            request,
        }
    }

    /// Replace the body with in-memory content and fix up the framing
    /// metadata accordingly.
    pub fn set_body_full<T: Into<Bytes>>(&mut self, data: T) {
        let data = data.into();
        self.content_length = Some(data.len() as u64);
        self.chunked = false;
        self.trailer.clear();
        self.body = Body::Full(data);
    }

    pub fn proto_str(&self) -> &'static str {
        version_str(self.version)
    }

    /// The status line text, e.g. `200 OK`.
    pub fn status_str(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_u16()),
            None => self.status.as_u16().to_string(),
        }
    }
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        _ => "HTTP/1.1",
    }
}
