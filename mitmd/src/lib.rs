/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use log::info;
use tokio::net::{TcpListener, TcpStream};

pub mod config;

pub mod opts;
use opts::ProcArgs;

pub mod logging;

pub mod modifier;
pub mod parse;
pub mod serve;
pub mod session;
pub mod sink;

pub async fn run(proc_args: &ProcArgs) -> anyhow::Result<()> {
    let authority = Arc::new(
        config::build_authority(proc_args).context("failed to build certificate authority")?,
    );
    let group = config::load_modifier_group(proc_args)
        .context("failed to load modifier configuration")?;

    if let Some(addr) = proc_args.log_stream {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| anyhow!("failed to connect traffic log sink {addr}: {e}"))?;
        let traffic = sink::TrafficStream::new(stream);
        let logger = Arc::new(sink::TrafficLogger::new(traffic));
        group.add_request_modifier(logger.clone());
        group.add_response_modifier(logger);
        info!("streaming traffic log to {addr}");
    }

    let upstream_ca = match &proc_args.upstream_ca {
        Some(path) => Some(std::fs::read(path).map_err(|e| {
            anyhow!("failed to read upstream CA bundle {}: {e:?}", path.display())
        })?),
        None => None,
    };

    let server = Arc::new(serve::ProxyServer::new(
        authority,
        Arc::new(group),
        upstream_ca.as_deref(),
        proc_args.body_limit,
    )?);

    let listener = TcpListener::bind(proc_args.listen)
        .await
        .map_err(|e| anyhow!("failed to listen on {}: {e}", proc_args.listen))?;
    server.serve(listener).await
}
