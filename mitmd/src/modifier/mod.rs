/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! The modifier pipeline. A modifier inspects or rewrites one leg of an
//! exchange; optional capabilities (verification, reset) are reached
//! through explicit accessors instead of downcasting.

use std::fmt;

use async_trait::async_trait;

use mitm_http::{Request, Response};

use crate::session::Context;

mod group;
pub use group::ModifierGroup;

mod filter;
pub use filter::{Filter, RequestCondition, ResponseCondition};

mod matcher;
pub use matcher::{HeaderMatcher, HostMatcher, QueryMatcher};

pub mod header;
pub mod query;

pub mod body;

#[async_trait]
pub trait RequestModifier: Send + Sync {
    async fn modify_request(&self, ctx: &Context, req: &mut Request) -> anyhow::Result<()>;

    /// The verification capability of this modifier, if it records
    /// verification state.
    fn as_request_verifier(&self) -> Option<&dyn RequestVerifier> {
        None
    }
}

#[async_trait]
pub trait ResponseModifier: Send + Sync {
    async fn modify_response(&self, ctx: &Context, res: &mut Response) -> anyhow::Result<()>;

    fn as_response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        None
    }
}

/// Verification failures are recorded while requests flow through the
/// pipeline and surface only through this capability, so a failed check
/// never halts traffic.
pub trait RequestVerifier: Send + Sync {
    fn verify_requests(&self) -> anyhow::Result<()>;
    fn reset_request_verifications(&self);
}

pub trait ResponseVerifier: Send + Sync {
    fn verify_responses(&self) -> anyhow::Result<()>;
    fn reset_response_verifications(&self);
}

/// A modifier that does nothing, used for unset filter branches.
pub struct Noop;

#[async_trait]
impl RequestModifier for Noop {
    async fn modify_request(&self, _ctx: &Context, _req: &mut Request) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ResponseModifier for Noop {
    async fn modify_response(&self, _ctx: &Context, _res: &mut Response) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An ordered collection of error messages. Its display form joins the
/// messages with newlines in the order they were recorded.
#[derive(Debug, Default, Clone)]
pub struct MultiError {
    errors: Vec<String>,
}

impl MultiError {
    pub fn new() -> Self {
        MultiError::default()
    }

    pub fn add<E: fmt::Display>(&mut self, e: E) {
        self.errors.push(e.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok` when no errors were recorded, otherwise `self` as the error.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join("\n"))
    }
}

impl std::error::Error for MultiError {}
