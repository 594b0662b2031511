/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Body replacement, with byte-range support on the response side.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header};
use log::debug;

use mitm_http::range::{HttpRangeError, multipart_byteranges, parse_range_header, random_boundary};
use mitm_http::{Request, Response};

use super::{RequestModifier, ResponseModifier};
use crate::session::Context;

/// Substitutes the message body (and Content-Type) on either leg. On
/// responses an originating `Range` request is honored: a single range is
/// answered with 206 and a Content-Range header, several ranges with a
/// `multipart/byteranges` body, and an invalid header with 416.
pub struct BodyModifier {
    content_type: String,
    body: Bytes,
    boundary: String,
}

impl BodyModifier {
    pub fn new<T: Into<Bytes>>(body: T, content_type: &str) -> anyhow::Result<Self> {
        Ok(BodyModifier {
            content_type: content_type.to_string(),
            body: body.into(),
            boundary: random_boundary()?,
        })
    }

    /// Override the generated boundary for multipart range responses.
    pub fn set_boundary(&mut self, boundary: String) {
        self.boundary = boundary;
    }

    fn set_content_type(&self, headers: &mut http::HeaderMap, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(header::CONTENT_TYPE, v);
            }
            Err(_) => {
                headers.remove(header::CONTENT_TYPE);
            }
        }
        // the replacement body is not encoded
        headers.remove(header::CONTENT_ENCODING);
    }
}

#[async_trait]
impl RequestModifier for BodyModifier {
    async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        debug!("body.modify_request: {}", req.uri);
        self.set_content_type(&mut req.headers, &self.content_type);
        req.set_body_full(self.body.clone());
        Ok(())
    }
}

#[async_trait]
impl ResponseModifier for BodyModifier {
    async fn modify_response(&self, _ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        debug!("body.modify_response: {}", res.request.uri);
        self.set_content_type(&mut res.headers, &self.content_type);

        let range_header = res
            .request
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let Some(range_header) = range_header else {
            res.status = StatusCode::OK;
            res.set_body_full(self.body.clone());
            return Ok(());
        };

        let full_len = self.body.len() as u64;
        let ranges = match parse_range_header(&range_header, full_len) {
            Ok(ranges) => ranges,
            Err(e @ (HttpRangeError::Malformed | HttpRangeError::Unsatisfiable)) => {
                debug!("range request rejected: {e}");
                res.status = StatusCode::RANGE_NOT_SATISFIABLE;
                res.headers.insert(
                    header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes */{full_len}"))?,
                );
                res.set_body_full(Bytes::new());
                return Ok(());
            }
        };

        res.status = StatusCode::PARTIAL_CONTENT;
        if let [range] = ranges.as_slice() {
            res.headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&range.content_range(full_len))?,
            );
            res.set_body_full(
                self.body
                    .slice(range.start as usize..=range.end as usize),
            );
            return Ok(());
        }

        let body = multipart_byteranges(&self.body, &ranges, &self.content_type, &self.boundary);
        res.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&format!(
                "multipart/byteranges; boundary={}",
                self.boundary
            ))?,
        );
        res.set_body_full(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Uri};
    use std::sync::Arc;

    fn response_for(range: Option<&'static str>) -> Response {
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/file"));
        if let Some(range) = range {
            req.headers
                .insert(header::RANGE, HeaderValue::from_static(range));
        }
        Response::new(
            StatusCode::OK,
            mitm_http::Body::empty(),
            Arc::new(req.head()),
        )
    }

    #[tokio::test]
    async fn replaces_request_body() {
        let m = BodyModifier::new(&b"new body"[..], "text/plain").unwrap();
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::POST, Uri::from_static("http://h/"));
        req.set_body_full(&b"old"[..]);
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(req.content_length, Some(8));
        let data = req.body.read_all().await.unwrap();
        assert_eq!(&data[..], b"new body");
    }

    #[tokio::test]
    async fn single_range_partial_content() {
        let m = BodyModifier::new(&b"0123456789"[..], "text/plain").unwrap();
        let ctx = Context::for_tests();
        let mut res = response_for(Some("bytes=1-4"));
        m.modify_response(&ctx, &mut res).await.unwrap();

        assert_eq!(res.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            res.headers.get(header::CONTENT_RANGE).unwrap(),
            "bytes 1-4/10"
        );
        let data = res.body.read_all().await.unwrap();
        assert_eq!(&data[..], b"1234");
        assert_eq!(res.content_length, Some(4));
    }

    #[tokio::test]
    async fn multipart_range_response() {
        let mut m = BodyModifier::new(&b"0123456789"[..], "text/plain").unwrap();
        m.set_boundary("BOUNDARY".to_string());
        let ctx = Context::for_tests();
        let mut res = response_for(Some("bytes=1-4, 7-9"));
        m.modify_response(&ctx, &mut res).await.unwrap();

        assert_eq!(res.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            res.headers.get(header::CONTENT_TYPE).unwrap(),
            "multipart/byteranges; boundary=BOUNDARY"
        );
        let data = res.body.read_all().await.unwrap();
        let text = std::str::from_utf8(&data).unwrap();
        assert!(text.contains("Content-Range: bytes 1-4/10\r\n"));
        assert!(text.contains("\r\n\r\n1234\r\n"));
        assert!(text.contains("Content-Range: bytes 7-9/10\r\n"));
        assert!(text.contains("\r\n\r\n789\r\n"));
        assert!(text.ends_with("--BOUNDARY--\r\n"));
    }

    #[tokio::test]
    async fn malformed_range_yields_416() {
        let m = BodyModifier::new(&b"0123456789"[..], "text/plain").unwrap();
        let ctx = Context::for_tests();
        let mut res = response_for(Some("bytes=9-1"));
        m.modify_response(&ctx, &mut res).await.unwrap();
        assert_eq!(res.status, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn no_range_replaces_whole_body() {
        let m = BodyModifier::new(&b"payload"[..], "text/plain").unwrap();
        let ctx = Context::for_tests();
        let mut res = response_for(None);
        m.modify_response(&ctx, &mut res).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        let data = res.body.read_all().await.unwrap();
        assert_eq!(&data[..], b"payload");
    }
}
