/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;

fn main() -> anyhow::Result<()> {
    let proc_args = mitmd::opts::parse_clap()?;
    mitmd::logging::setup(proc_args.verbose_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to build runtime: {e}"))?;
    runtime.block_on(mitmd::run(&proc_args))
}
