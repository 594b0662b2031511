/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! The HTTP/1.1 message model used by the interception pipeline: requests
//! and responses with replaceable bodies, wire framing (head parsing and
//! serialization, chunked transfer, trailers), addressable in-memory
//! snapshots and byte-range response construction.

pub mod parse;
pub use parse::HttpLineParseError;

mod message;
pub use message::{Body, Request, RequestHead, Response};

mod chunked;
pub use chunked::ChunkedReader;

mod wire;
pub use wire::{
    DEFAULT_BODY_LIMIT, HttpWireError, read_request_body, read_request_head, read_response_body,
    read_response_head, write_body_full, write_request_head, write_response_head,
};

mod snapshot;
pub use snapshot::MessageSnapshot;

pub mod range;
