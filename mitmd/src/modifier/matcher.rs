/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use http::{HeaderMap, HeaderName, Uri};
use percent_encoding::percent_decode_str;

use mitm_cert::Host;
use mitm_http::{Request, Response};

use super::{RequestCondition, ResponseCondition};
use crate::session::Context;

/// Decode one application/x-www-form-urlencoded component.
fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}

/// Split a raw query string into decoded key/value pairs.
pub(crate) fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(part), String::new()),
        })
        .collect()
}

/// Matches requests whose target host equals the configured one, ports
/// ignored.
pub struct HostMatcher {
    host: String,
}

impl HostMatcher {
    pub fn new(host: &str) -> Self {
        HostMatcher {
            host: Host::strip_port(host).to_ascii_lowercase(),
        }
    }

    fn match_host(&self, host: &str) -> bool {
        Host::strip_port(host).eq_ignore_ascii_case(&self.host)
    }
}

impl RequestCondition for HostMatcher {
    fn matches_request(&self, _ctx: &Context, req: &Request) -> bool {
        self.match_host(&req.host)
    }
}

impl ResponseCondition for HostMatcher {
    fn matches_response(&self, _ctx: &Context, res: &Response) -> bool {
        self.match_host(&res.request.host)
    }
}

/// Matches on a query parameter. With an empty value the key merely has
/// to be present; otherwise at least one occurrence of the key must carry
/// exactly that value.
pub struct QueryMatcher {
    key: String,
    value: String,
}

impl QueryMatcher {
    pub fn new(key: &str, value: &str) -> Self {
        QueryMatcher {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn match_uri(&self, uri: &Uri) -> bool {
        let Some(query) = uri.query() else {
            return false;
        };
        for (k, v) in query_pairs(query) {
            if k != self.key {
                continue;
            }
            if self.value.is_empty() || v == self.value {
                return true;
            }
        }
        false
    }
}

impl RequestCondition for QueryMatcher {
    fn matches_request(&self, _ctx: &Context, req: &Request) -> bool {
        self.match_uri(&req.uri)
    }
}

impl ResponseCondition for QueryMatcher {
    fn matches_response(&self, _ctx: &Context, res: &Response) -> bool {
        self.match_uri(&res.request.uri)
    }
}

/// Matches on a header. Same two modes as [`QueryMatcher`]: key presence
/// when the value is empty, exact value match on any occurrence otherwise.
pub struct HeaderMatcher {
    name: HeaderName,
    value: String,
}

impl HeaderMatcher {
    pub fn new(name: HeaderName, value: &str) -> Self {
        HeaderMatcher {
            name,
            value: value.to_string(),
        }
    }

    fn match_headers(&self, headers: &HeaderMap) -> bool {
        let mut values = headers.get_all(&self.name).iter();
        if self.value.is_empty() {
            return values.next().is_some();
        }
        values.any(|v| v.to_str().map(|v| v == self.value).unwrap_or(false))
    }
}

impl RequestCondition for HeaderMatcher {
    fn matches_request(&self, _ctx: &Context, req: &Request) -> bool {
        self.match_headers(&req.headers)
    }
}

impl ResponseCondition for HeaderMatcher {
    fn matches_response(&self, _ctx: &Context, res: &Response) -> bool {
        self.match_headers(&res.request.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request(uri: &str) -> Request {
        Request::new(Method::GET, uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn query_present_mode() {
        let ctx = Context::for_tests();
        let m = QueryMatcher::new("token", "");
        assert!(m.matches_request(&ctx, &request("http://h/?token=abc")));
        assert!(m.matches_request(&ctx, &request("http://h/?token=")));
        assert!(!m.matches_request(&ctx, &request("http://h/?other=1")));
        assert!(!m.matches_request(&ctx, &request("http://h/")));
    }

    #[test]
    fn query_equals_mode() {
        let ctx = Context::for_tests();
        let m = QueryMatcher::new("token", "abc");
        assert!(m.matches_request(&ctx, &request("http://h/?token=abc")));
        assert!(m.matches_request(&ctx, &request("http://h/?token=x&token=abc")));
        assert!(!m.matches_request(&ctx, &request("http://h/?token=x")));
    }

    #[test]
    fn query_decodes_escapes() {
        let ctx = Context::for_tests();
        let m = QueryMatcher::new("q", "a b");
        assert!(m.matches_request(&ctx, &request("http://h/?q=a+b")));
        assert!(m.matches_request(&ctx, &request("http://h/?q=a%20b")));
    }

    #[test]
    fn host_matching_ignores_port() {
        let ctx = Context::for_tests();
        let m = HostMatcher::new("example.com");
        let mut req = request("http://example.com:8080/");
        assert!(m.matches_request(&ctx, &req));
        req.host = "other.example".to_string();
        assert!(!m.matches_request(&ctx, &req));
    }

    #[test]
    fn header_matching_modes() {
        let ctx = Context::for_tests();
        let mut req = request("http://h/");
        req.headers
            .append("x-token", http::HeaderValue::from_static("abc"));

        let present = HeaderMatcher::new(HeaderName::from_static("x-token"), "");
        assert!(present.matches_request(&ctx, &req));

        let equals = HeaderMatcher::new(HeaderName::from_static("x-token"), "abc");
        assert!(equals.matches_request(&ctx, &req));

        let wrong = HeaderMatcher::new(HeaderName::from_static("x-token"), "zzz");
        assert!(!wrong.matches_request(&ctx, &req));
    }
}
