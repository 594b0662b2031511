/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! JSON-driven modifier construction. A configuration message is an
//! object with exactly one top-level key naming a modifier kind:
//!
//! ```json
//! { "header.set": { "scope": ["request"], "name": "X-Tag", "value": "on" } }
//! ```
//!
//! Kinds are looked up in an explicit [`Registry`] instance; there is no
//! global table and no registration at program start. The optional
//! `scope` array restricts which legs the modifier attaches to.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderName, HeaderValue};
use serde_json::Value;

use crate::modifier::body::BodyModifier;
use crate::modifier::header::{AppendHeaderModifier, HeaderVerifier, SetHeaderModifier};
use crate::modifier::query::QueryModifier;
use crate::modifier::{
    Filter, HeaderMatcher, HostMatcher, ModifierGroup, QueryMatcher, RequestModifier,
    ResponseModifier,
};

/// Which legs a parsed modifier covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Request,
    Response,
}

/// The outcome of parsing one configuration message.
pub struct ParsedModifier {
    reqmod: Option<Arc<dyn RequestModifier>>,
    resmod: Option<Arc<dyn ResponseModifier>>,
}

impl std::fmt::Debug for ParsedModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedModifier")
            .field("reqmod", &self.reqmod.is_some())
            .field("resmod", &self.resmod.is_some())
            .finish()
    }
}

impl ParsedModifier {
    /// Build a result honoring the requested scope. Asking for a scope
    /// the modifier kind cannot serve is a configuration error.
    fn scoped(
        reqmod: Option<Arc<dyn RequestModifier>>,
        resmod: Option<Arc<dyn ResponseModifier>>,
        scope: Option<Vec<Scope>>,
    ) -> anyhow::Result<Self> {
        let Some(scope) = scope else {
            return Ok(ParsedModifier { reqmod, resmod });
        };
        let mut out = ParsedModifier {
            reqmod: None,
            resmod: None,
        };
        for s in scope {
            match s {
                Scope::Request => {
                    out.reqmod = Some(
                        reqmod
                            .clone()
                            .ok_or_else(|| anyhow!("invalid scope \"request\" for modifier"))?,
                    );
                }
                Scope::Response => {
                    out.resmod = Some(
                        resmod
                            .clone()
                            .ok_or_else(|| anyhow!("invalid scope \"response\" for modifier"))?,
                    );
                }
            }
        }
        Ok(out)
    }

    pub fn request_modifier(&self) -> Option<Arc<dyn RequestModifier>> {
        self.reqmod.clone()
    }

    pub fn response_modifier(&self) -> Option<Arc<dyn ResponseModifier>> {
        self.resmod.clone()
    }
}

type ParseFn = fn(&Registry, &Value) -> anyhow::Result<ParsedModifier>;

/// An explicit table of modifier kinds. [`Registry::with_builtin`] knows
/// the kinds shipped with the proxy; embedders may register more.
pub struct Registry {
    table: HashMap<String, ParseFn>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            table: HashMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut r = Registry::new();
        r.register("group", parse_group);
        r.register("filter.header", parse_header_filter);
        r.register("filter.host", parse_host_filter);
        r.register("filter.query", parse_query_filter);
        r.register("header.set", parse_header_set);
        r.register("header.append", parse_header_append);
        r.register("header.verify", parse_header_verify);
        r.register("query.set", parse_query_set);
        r.register("body.replace", parse_body_replace);
        r
    }

    pub fn register(&mut self, name: &str, f: ParseFn) {
        self.table.insert(name.to_string(), f);
    }

    /// Parse one configuration message.
    pub fn parse(&self, v: &Value) -> anyhow::Result<ParsedModifier> {
        let obj = v
            .as_object()
            .ok_or_else(|| anyhow!("modifier message must be a json object"))?;
        if obj.len() != 1 {
            return Err(anyhow!(
                "expected one modifier, received {}: {}",
                obj.len(),
                obj.keys().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        let (name, body) = obj.iter().next().unwrap();
        let parse_fn = self
            .table
            .get(name.as_str())
            .ok_or_else(|| anyhow!("unknown modifier: {name}"))?;
        parse_fn(self, body).context(format!("in modifier {name}"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtin()
    }
}

fn get_scope(v: &Value) -> anyhow::Result<Option<Vec<Scope>>> {
    let Some(scope) = v.get("scope") else {
        return Ok(None);
    };
    let arr = scope
        .as_array()
        .ok_or_else(|| anyhow!("scope must be an array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for s in arr {
        match s.as_str() {
            Some("request") => out.push(Scope::Request),
            Some("response") => out.push(Scope::Response),
            _ => {
                return Err(anyhow!(
                    "invalid scope: {s} not in [\"request\", \"response\"]"
                ));
            }
        }
    }
    Ok(Some(out))
}

fn get_str<'a>(v: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string field {key}"))
}

fn get_str_or<'a>(v: &'a Value, key: &str, default: &'a str) -> anyhow::Result<&'a str> {
    match v.get(key) {
        Some(s) => s
            .as_str()
            .ok_or_else(|| anyhow!("field {key} must be a string")),
        None => Ok(default),
    }
}

fn get_header_name(v: &Value, key: &str) -> anyhow::Result<HeaderName> {
    let name = get_str(v, key)?;
    HeaderName::from_str(name).map_err(|e| anyhow!("invalid header name {name}: {e}"))
}

fn parse_header_set(_r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let name = get_header_name(v, "name")?;
    let value = get_str(v, "value")?;
    let value = HeaderValue::from_str(value).map_err(|e| anyhow!("invalid header value: {e}"))?;
    let m = Arc::new(SetHeaderModifier::new(name, value));
    ParsedModifier::scoped(Some(m.clone()), Some(m), get_scope(v)?)
}

fn parse_header_append(_r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let name = get_header_name(v, "name")?;
    let value = get_str(v, "value")?;
    let value = HeaderValue::from_str(value).map_err(|e| anyhow!("invalid header value: {e}"))?;
    let m = Arc::new(AppendHeaderModifier::new(name, value));
    ParsedModifier::scoped(Some(m.clone()), Some(m), get_scope(v)?)
}

fn parse_header_verify(_r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let name = get_header_name(v, "name")?;
    let value = get_str_or(v, "value", "")?;
    let m = Arc::new(HeaderVerifier::new(name, value));
    ParsedModifier::scoped(Some(m.clone()), Some(m), get_scope(v)?)
}

fn parse_query_set(_r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let key = get_str(v, "name")?;
    let value = get_str_or(v, "value", "")?;
    let m = Arc::new(QueryModifier::new(key, value));
    ParsedModifier::scoped(Some(m), None, get_scope(v)?)
}

fn parse_body_replace(_r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let content_type = get_str(v, "contentType")?;
    let body = get_str(v, "body")?;
    let body = BASE64
        .decode(body)
        .map_err(|e| anyhow!("body is not valid base64: {e}"))?;
    let m = Arc::new(BodyModifier::new(body, content_type)?);
    ParsedModifier::scoped(Some(m.clone()), Some(m), get_scope(v)?)
}

fn parse_group(r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let group = if v
        .get("aggregateErrors")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        ModifierGroup::new_aggregating()
    } else {
        ModifierGroup::new()
    };
    if let Some(mods) = v.get("modifiers") {
        let arr = mods
            .as_array()
            .ok_or_else(|| anyhow!("modifiers must be an array"))?;
        for m in arr {
            let parsed = r.parse(m)?;
            if let Some(reqmod) = parsed.request_modifier() {
                group.add_request_modifier(reqmod);
            }
            if let Some(resmod) = parsed.response_modifier() {
                group.add_response_modifier(resmod);
            }
        }
    }
    let group = Arc::new(group);
    ParsedModifier::scoped(Some(group.clone()), Some(group), get_scope(v)?)
}

fn parse_filter_branches(r: &Registry, v: &Value, filter: &mut Filter) -> anyhow::Result<()> {
    let modifier = v
        .get("modifier")
        .ok_or_else(|| anyhow!("missing modifier field"))?;
    let parsed = r.parse(modifier)?;
    if let Some(reqmod) = parsed.request_modifier() {
        filter.request_when_true(reqmod);
    }
    if let Some(resmod) = parsed.response_modifier() {
        filter.response_when_true(resmod);
    }
    if let Some(else_modifier) = v.get("else") {
        let parsed = r.parse(else_modifier)?;
        if let Some(reqmod) = parsed.request_modifier() {
            filter.request_when_false(reqmod);
        }
        if let Some(resmod) = parsed.response_modifier() {
            filter.response_when_false(resmod);
        }
    }
    Ok(())
}

fn parse_header_filter(r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let name = get_header_name(v, "name")?;
    let value = get_str_or(v, "value", "")?;
    let matcher = Arc::new(HeaderMatcher::new(name, value));
    let mut filter = Filter::new();
    filter.set_request_condition(matcher.clone());
    filter.set_response_condition(matcher);
    parse_filter_branches(r, v, &mut filter)?;
    let filter = Arc::new(filter);
    ParsedModifier::scoped(Some(filter.clone()), Some(filter), get_scope(v)?)
}

fn parse_host_filter(r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let host = get_str(v, "host")?;
    let matcher = Arc::new(HostMatcher::new(host));
    let mut filter = Filter::new();
    filter.set_request_condition(matcher.clone());
    filter.set_response_condition(matcher);
    parse_filter_branches(r, v, &mut filter)?;
    let filter = Arc::new(filter);
    ParsedModifier::scoped(Some(filter.clone()), Some(filter), get_scope(v)?)
}

fn parse_query_filter(r: &Registry, v: &Value) -> anyhow::Result<ParsedModifier> {
    let name = get_str(v, "name")?;
    let value = get_str_or(v, "value", "")?;
    let matcher = Arc::new(QueryMatcher::new(name, value));
    let mut filter = Filter::new();
    filter.set_request_condition(matcher.clone());
    filter.set_response_condition(matcher);
    parse_filter_branches(r, v, &mut filter)?;
    let filter = Arc::new(filter);
    ParsedModifier::scoped(Some(filter.clone()), Some(filter), get_scope(v)?)
}
