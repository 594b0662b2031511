/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use async_trait::async_trait;

use mitm_http::{Request, Response};

use super::TrafficStream;
use crate::modifier::{RequestModifier, ResponseModifier};
use crate::session::Context;

/// Attaches a [`TrafficStream`] to the pipeline. Added to both legs of a
/// group it observes every exchange, keyed by the context id, unless the
/// context opted out of logging.
pub struct TrafficLogger {
    stream: TrafficStream,
}

impl TrafficLogger {
    pub fn new(stream: TrafficStream) -> Self {
        TrafficLogger { stream }
    }
}

#[async_trait]
impl RequestModifier for TrafficLogger {
    async fn modify_request(&self, ctx: &Context, req: &mut Request) -> anyhow::Result<()> {
        if ctx.skipping_logging() {
            return Ok(());
        }
        self.stream
            .log_request(ctx.id(), req, ctx.is_api_request())
            .await;
        Ok(())
    }
}

#[async_trait]
impl ResponseModifier for TrafficLogger {
    async fn modify_response(&self, ctx: &Context, res: &mut Response) -> anyhow::Result<()> {
        if ctx.skipping_logging() {
            return Ok(());
        }
        self.stream
            .log_response(ctx.id(), res, ctx.is_api_request())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::frame::{Frame, FrameReader};
    use bytes::Bytes;
    use http::{Method, Uri};
    use mitm_http::Body;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn skip_logging_emits_nothing() {
        let (client, mut server) = tokio::io::duplex(4096);
        let stream = TrafficStream::new(client);
        let logger = TrafficLogger::new(stream.clone());

        let ctx = Context::for_tests();
        ctx.skip_logging();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        req.body = Body::full(Bytes::from_static(b"quiet"));
        logger.modify_request(&ctx, &mut req).await.unwrap();

        stream.close().await;
        drop(stream);
        drop(logger);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn both_legs_share_the_exchange_id() {
        let (client, mut server) = tokio::io::duplex(1 << 16);
        let stream = TrafficStream::new(client);
        let logger = TrafficLogger::new(stream.clone());

        let ctx = Context::for_tests();
        let mut req = Request::new(Method::GET, Uri::from_static("http://h/"));
        logger.modify_request(&ctx, &mut req).await.unwrap();
        let _ = req.body.read_all().await.unwrap();

        let mut res = Response::new(
            http::StatusCode::OK,
            Body::empty(),
            std::sync::Arc::new(req.head()),
        );
        logger.modify_response(&ctx, &mut res).await.unwrap();
        let _ = res.body.read_all().await.unwrap();

        stream.close().await;
        drop(stream);
        drop(logger);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let mut reader = FrameReader::new(&raw[..]);
        let mut ids = std::collections::HashSet::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            match frame {
                Frame::Header { id, .. } | Frame::Data { id, .. } => {
                    ids.insert(id);
                }
            }
        }
        assert_eq!(ids.len(), 1);
    }
}
