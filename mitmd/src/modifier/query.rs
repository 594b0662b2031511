/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Query string rewriting.

use anyhow::anyhow;
use async_trait::async_trait;
use http::Uri;
use http::uri::PathAndQuery;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use mitm_http::Request;

use super::{RequestModifier, matcher::query_pairs};
use crate::session::Context;

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

/// Sets a query parameter on the request target, replacing every existing
/// occurrence of the key.
pub struct QueryModifier {
    key: String,
    value: String,
}

impl QueryModifier {
    pub fn new(key: &str, value: &str) -> Self {
        QueryModifier {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[async_trait]
impl RequestModifier for QueryModifier {
    async fn modify_request(&self, _ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        let mut pairs = query_pairs(req.uri.query().unwrap_or(""));
        pairs.retain(|(k, _)| k != &self.key);
        pairs.push((self.key.clone(), self.value.clone()));

        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    encode_component(k)
                } else {
                    format!("{}={}", encode_component(k), encode_component(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");

        let pq = if query.is_empty() {
            req.uri.path().to_string()
        } else {
            format!("{}?{query}", req.uri.path())
        };
        let pq = PathAndQuery::try_from(pq.as_str())
            .map_err(|e| anyhow!("rewritten query is not a valid request target: {e}"))?;

        let mut parts = req.uri.clone().into_parts();
        parts.path_and_query = Some(pq);
        req.uri = Uri::from_parts(parts)
            .map_err(|e| anyhow!("failed to rebuild request uri: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[tokio::test]
    async fn sets_new_param() {
        let m = QueryModifier::new("tag", "injected");
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/path?a=1"));
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.uri.query().unwrap(), "a=1&tag=injected");
        assert_eq!(req.uri.path(), "/path");
    }

    #[tokio::test]
    async fn replaces_all_occurrences() {
        let m = QueryModifier::new("a", "new");
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/?a=1&a=2&b=3"));
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.uri.query().unwrap(), "b=3&a=new");
    }

    #[tokio::test]
    async fn encodes_reserved_characters() {
        let m = QueryModifier::new("q", "a b&c");
        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        m.modify_request(&ctx, &mut req).await.unwrap();
        assert_eq!(req.uri.query().unwrap(), "q=a%20b%26c");
    }
}
