/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;

use mitm_http::{Request, Response};

use super::{
    MultiError, RequestModifier, RequestVerifier, ResponseModifier, ResponseVerifier,
};
use crate::session::Context;

/// An ordered, append-only list of request modifiers and an independently
/// ordered list of response modifiers, executed first-in first-out.
///
/// By default the first modifier error halts the run and is returned
/// as-is; with error aggregation enabled every modifier runs and the
/// collected errors are returned together. Groups implement the modifier
/// traits themselves, so they nest.
#[derive(Default)]
pub struct ModifierGroup {
    reqmods: RwLock<Vec<Arc<dyn RequestModifier>>>,
    resmods: RwLock<Vec<Arc<dyn ResponseModifier>>>,
    aggregate_errors: bool,
}

impl ModifierGroup {
    pub fn new() -> Self {
        ModifierGroup::default()
    }

    pub fn new_aggregating() -> Self {
        ModifierGroup {
            reqmods: RwLock::new(Vec::new()),
            resmods: RwLock::new(Vec::new()),
            aggregate_errors: true,
        }
    }

    pub fn add_request_modifier(&self, m: Arc<dyn RequestModifier>) {
        self.reqmods.write().unwrap().push(m);
    }

    pub fn add_response_modifier(&self, m: Arc<dyn ResponseModifier>) {
        self.resmods.write().unwrap().push(m);
    }

    // the list lock may not be held across modifier await points, so
    // each run works on a snapshot of the (append-only) list
    fn request_modifiers(&self) -> Vec<Arc<dyn RequestModifier>> {
        self.reqmods.read().unwrap().clone()
    }

    fn response_modifiers(&self) -> Vec<Arc<dyn ResponseModifier>> {
        self.resmods.read().unwrap().clone()
    }
}

#[async_trait]
impl RequestModifier for ModifierGroup {
    async fn modify_request(&self, ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        debug!("group.modify_request: {}", req.uri);
        let mut merr = MultiError::new();
        for m in self.request_modifiers() {
            if let Err(e) = m.modify_request(ctx, req).await {
                if !self.aggregate_errors {
                    return Err(e);
                }
                merr.add(e);
            }
        }
        merr.into_result()
    }

    fn as_request_verifier(&self) -> Option<&dyn RequestVerifier> {
        Some(self)
    }
}

#[async_trait]
impl ResponseModifier for ModifierGroup {
    async fn modify_response(&self, ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        debug!("group.modify_response: {}", res.request.uri);
        let mut merr = MultiError::new();
        for m in self.response_modifiers() {
            if let Err(e) = m.modify_response(ctx, res).await {
                if !self.aggregate_errors {
                    return Err(e);
                }
                merr.add(e);
            }
        }
        merr.into_result()
    }

    fn as_response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        Some(self)
    }
}

impl RequestVerifier for ModifierGroup {
    /// Visits every contained verifier, never halting early, and returns
    /// the aggregate of all failures.
    fn verify_requests(&self) -> anyhow::Result<()> {
        let mut merr = MultiError::new();
        for m in self.request_modifiers() {
            if let Some(v) = m.as_request_verifier() {
                if let Err(e) = v.verify_requests() {
                    merr.add(e);
                }
            }
        }
        merr.into_result()
    }

    fn reset_request_verifications(&self) {
        for m in self.request_modifiers() {
            if let Some(v) = m.as_request_verifier() {
                v.reset_request_verifications();
            }
        }
    }
}

impl ResponseVerifier for ModifierGroup {
    fn verify_responses(&self) -> anyhow::Result<()> {
        let mut merr = MultiError::new();
        for m in self.response_modifiers() {
            if let Some(v) = m.as_response_verifier() {
                if let Err(e) = v.verify_responses() {
                    merr.add(e);
                }
            }
        }
        merr.into_result()
    }

    fn reset_response_verifications(&self) {
        for m in self.response_modifiers() {
            if let Some(v) = m.as_response_verifier() {
                v.reset_response_verifications();
            }
        }
    }
}
