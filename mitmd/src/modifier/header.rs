/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Header rewriting and verification modifiers.

use std::sync::Mutex;

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use log::debug;

use mitm_http::{Request, Response};

use super::{
    MultiError, RequestModifier, RequestVerifier, ResponseModifier, ResponseVerifier,
};
use crate::session::Context;

/// Sets a header to a fixed value on requests and/or responses. Setting
/// `Host` on a request rewrites the target host instead of the header map.
pub struct SetHeaderModifier {
    name: HeaderName,
    value: HeaderValue,
}

impl SetHeaderModifier {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        SetHeaderModifier { name, value }
    }
}

#[async_trait]
impl RequestModifier for SetHeaderModifier {
    async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        debug!("header.set request: {}: {:?}", self.name, self.value);
        if self.name == header::HOST {
            req.host = self.value.to_str().unwrap_or_default().to_string();
        } else {
            req.headers.insert(self.name.clone(), self.value.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseModifier for SetHeaderModifier {
    async fn modify_response(&self, _ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        res.headers.insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// Appends a header value, keeping any values already present.
pub struct AppendHeaderModifier {
    name: HeaderName,
    value: HeaderValue,
}

impl AppendHeaderModifier {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        AppendHeaderModifier { name, value }
    }
}

#[async_trait]
impl RequestModifier for AppendHeaderModifier {
    async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        req.headers.append(self.name.clone(), self.value.clone());
        Ok(())
    }
}

#[async_trait]
impl ResponseModifier for AppendHeaderModifier {
    async fn modify_response(&self, _ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        res.headers.append(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// Records a failure for every passing message that misses the expected
/// header. With an empty expected value the header only has to exist;
/// otherwise at least one occurrence must carry exactly that value.
///
/// Failures never surface inline: `modify_*` always succeeds and the
/// collected state is reported through the verifier capability.
pub struct HeaderVerifier {
    name: HeaderName,
    value: String,
    reqerr: Mutex<MultiError>,
    reserr: Mutex<MultiError>,
}

impl HeaderVerifier {
    pub fn new(name: HeaderName, value: &str) -> Self {
        HeaderVerifier {
            name,
            value: value.to_string(),
            reqerr: Mutex::new(MultiError::new()),
            reserr: Mutex::new(MultiError::new()),
        }
    }

    fn check(&self, headers: &HeaderMap) -> Result<(), String> {
        let mut values = headers.get_all(&self.name).iter();
        if self.value.is_empty() {
            return match values.next() {
                Some(_) => Ok(()),
                None => Err(format!("got no {} header, want {} header", self.name, self.name)),
            };
        }
        let mut seen = Vec::new();
        for v in headers.get_all(&self.name) {
            let v = v.to_str().unwrap_or_default();
            if v == self.value {
                return Ok(());
            }
            seen.push(v.to_string());
        }
        if seen.is_empty() {
            Err(format!("got no {} header, want {} header", self.name, self.name))
        } else {
            Err(format!(
                "got {} with value {}, want value {}",
                self.name,
                seen.join(", "),
                self.value
            ))
        }
    }
}

#[async_trait]
impl RequestModifier for HeaderVerifier {
    async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        if let Err(msg) = self.check(&req.headers) {
            self.reqerr
                .lock()
                .unwrap()
                .add(format!("request({}) header verify failure: {msg}", req.uri));
        }
        Ok(())
    }

    fn as_request_verifier(&self) -> Option<&dyn RequestVerifier> {
        Some(self)
    }
}

#[async_trait]
impl ResponseModifier for HeaderVerifier {
    async fn modify_response(&self, _ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        if let Err(msg) = self.check(&res.headers) {
            self.reserr.lock().unwrap().add(format!(
                "response({}) header verify failure: {msg}",
                res.request.uri
            ));
        }
        Ok(())
    }

    fn as_response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        Some(self)
    }
}

impl RequestVerifier for HeaderVerifier {
    fn verify_requests(&self) -> anyhow::Result<()> {
        self.reqerr.lock().unwrap().clone().into_result()
    }

    fn reset_request_verifications(&self) {
        *self.reqerr.lock().unwrap() = MultiError::new();
    }
}

impl ResponseVerifier for HeaderVerifier {
    fn verify_responses(&self) -> anyhow::Result<()> {
        self.reserr.lock().unwrap().clone().into_result()
    }

    fn reset_response_verifications(&self) {
        *self.reserr.lock().unwrap() = MultiError::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Uri};

    #[tokio::test]
    async fn set_header() {
        let m = SetHeaderModifier::new(
            HeaderName::from_static("x-flag"),
            HeaderValue::from_static("on"),
        );
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.headers.get("x-flag").unwrap(), "on");
    }

    #[tokio::test]
    async fn set_host_rewrites_target() {
        let m = SetHeaderModifier::new(header::HOST, HeaderValue::from_static("new.example"));
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://old.example/"));
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.host, "new.example");
        assert!(req.headers.get(header::HOST).is_none());
    }

    #[tokio::test]
    async fn verifier_records_and_resets() {
        let v = HeaderVerifier::new(HeaderName::from_static("x-want"), "yes");
        let ctx = Context::for_tests();

        let mut good = Request::new(Method::GET, Uri::from_static("http://h/good"));
        good.headers
            .insert("x-want", HeaderValue::from_static("yes"));
        v.modify_request(&ctx, &mut good).await.unwrap();
        assert!(v.verify_requests().is_ok());

        let mut bad = Request::new(Method::GET, Uri::from_static("http://h/bad"));
        bad.headers.insert("x-want", HeaderValue::from_static("no"));
        // the inline call still succeeds
        v.modify_request(&ctx, &mut bad).await.unwrap();
        let err = v.verify_requests().unwrap_err();
        assert!(err.to_string().contains("http://h/bad"));

        v.reset_request_verifications();
        assert!(v.verify_requests().is_ok());
    }

    #[tokio::test]
    async fn verifier_present_mode() {
        let v = HeaderVerifier::new(HeaderName::from_static("x-any"), "");
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        req.headers
            .insert("x-any", HeaderValue::from_static("whatever"));
        v.modify_request(&ctx, &mut req).await.unwrap();
        assert!(v.verify_requests().is_ok());
    }
}
