/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::debug;

use mitm_http::{Request, Response};

use super::{
    MultiError, Noop, RequestModifier, RequestVerifier, ResponseModifier, ResponseVerifier,
};
use crate::session::Context;

/// A predicate over requests.
pub trait RequestCondition: Send + Sync {
    fn matches_request(&self, ctx: &Context, req: &Request) -> bool;
}

/// A predicate over responses. Implementations must decide from the
/// response's originating request head, so both legs of an exchange take
/// the same branch.
pub trait ResponseCondition: Send + Sync {
    fn matches_response(&self, ctx: &Context, res: &Response) -> bool;
}

/// Dispatches to one of two modifier branches based on a condition; the
/// unset branches default to no-ops.
pub struct Filter {
    reqcond: Option<Arc<dyn RequestCondition>>,
    rescond: Option<Arc<dyn ResponseCondition>>,

    treqmod: Arc<dyn RequestModifier>,
    tresmod: Arc<dyn ResponseModifier>,
    freqmod: Arc<dyn RequestModifier>,
    fresmod: Arc<dyn ResponseModifier>,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::new()
    }
}

impl Filter {
    pub fn new() -> Self {
        let noop = Arc::new(Noop);
        Filter {
            reqcond: None,
            rescond: None,
            treqmod: noop.clone(),
            tresmod: noop.clone(),
            freqmod: noop.clone(),
            fresmod: noop,
        }
    }

    pub fn set_request_condition(&mut self, cond: Arc<dyn RequestCondition>) {
        self.reqcond = Some(cond);
    }

    pub fn set_response_condition(&mut self, cond: Arc<dyn ResponseCondition>) {
        self.rescond = Some(cond);
    }

    pub fn request_when_true(&mut self, m: Arc<dyn RequestModifier>) {
        self.treqmod = m;
    }

    pub fn request_when_false(&mut self, m: Arc<dyn RequestModifier>) {
        self.freqmod = m;
    }

    pub fn response_when_true(&mut self, m: Arc<dyn ResponseModifier>) {
        self.tresmod = m;
    }

    pub fn response_when_false(&mut self, m: Arc<dyn ResponseModifier>) {
        self.fresmod = m;
    }
}

#[async_trait]
impl RequestModifier for Filter {
    async fn modify_request(&self, ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        let Some(cond) = &self.reqcond else {
            return Err(anyhow!("filter: no request condition set"));
        };
        if cond.matches_request(ctx, req) {
            debug!("filter.modify_request: matched {}", req.uri);
            self.treqmod.modify_request(ctx, req).await
        } else {
            self.freqmod.modify_request(ctx, req).await
        }
    }

    fn as_request_verifier(&self) -> Option<&dyn RequestVerifier> {
        Some(self)
    }
}

#[async_trait]
impl ResponseModifier for Filter {
    async fn modify_response(&self, ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        let Some(cond) = &self.rescond else {
            return Err(anyhow!("filter: no response condition set"));
        };
        if cond.matches_response(ctx, res) {
            debug!("filter.modify_response: matched {}", res.request.uri);
            self.tresmod.modify_response(ctx, res).await
        } else {
            self.fresmod.modify_response(ctx, res).await
        }
    }

    fn as_response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        Some(self)
    }
}

impl RequestVerifier for Filter {
    fn verify_requests(&self) -> anyhow::Result<()> {
        let mut merr = MultiError::new();
        for m in [&self.freqmod, &self.treqmod] {
            if let Some(v) = m.as_request_verifier() {
                if let Err(e) = v.verify_requests() {
                    merr.add(e);
                }
            }
        }
        merr.into_result()
    }

    fn reset_request_verifications(&self) {
        for m in [&self.freqmod, &self.treqmod] {
            if let Some(v) = m.as_request_verifier() {
                v.reset_request_verifications();
            }
        }
    }
}

impl ResponseVerifier for Filter {
    fn verify_responses(&self) -> anyhow::Result<()> {
        let mut merr = MultiError::new();
        for m in [&self.tresmod, &self.fresmod] {
            if let Some(v) = m.as_response_verifier() {
                if let Err(e) = v.verify_responses() {
                    merr.add(e);
                }
            }
        }
        merr.into_result()
    }

    fn reset_response_verifications(&self) {
        for m in [&self.tresmod, &self.fresmod] {
            if let Some(v) = m.as_response_verifier() {
                v.reset_response_verifications();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method, Uri};

    struct MatchPath(&'static str);

    impl RequestCondition for MatchPath {
        fn matches_request(&self, _ctx: &Context, req: &Request) -> bool {
            req.uri.path() == self.0
        }
    }

    struct SetMarker(&'static str);

    #[async_trait]
    impl RequestModifier for SetMarker {
        async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
            req.headers.append(self.0, HeaderValue::from_static("1"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn true_branch_only_on_match() {
        let mut filter = Filter::new();
        filter.set_request_condition(Arc::new(MatchPath("/match")));
        filter.request_when_true(Arc::new(SetMarker("x-true")));
        filter.request_when_false(Arc::new(SetMarker("x-false")));

        let ctx = Context::for_tests();

        let mut req = Request::new(Method::GET, Uri::from_static("http://h/match"));
        filter.modify_request(&ctx, &mut req).await.unwrap();
        assert!(req.headers.contains_key("x-true"));
        assert!(!req.headers.contains_key("x-false"));

        let mut req = Request::new(Method::GET, Uri::from_static("http://h/other"));
        filter.modify_request(&ctx, &mut req).await.unwrap();
        assert!(!req.headers.contains_key("x-true"));
        assert!(req.headers.contains_key("x-false"));
    }

    #[tokio::test]
    async fn no_else_branch_is_a_noop() {
        let mut filter = Filter::new();
        filter.set_request_condition(Arc::new(MatchPath("/match")));
        filter.request_when_true(Arc::new(SetMarker("x-true")));

        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/other"));
        filter.modify_request(&ctx, &mut req).await.unwrap();
        assert!(req.headers.is_empty());
    }

    #[tokio::test]
    async fn missing_condition_is_an_error() {
        let filter = Filter::new();
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        assert!(filter.modify_request(&ctx, &mut req).await.is_err());
    }
}
