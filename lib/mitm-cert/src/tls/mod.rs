/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod server;
pub use server::{IssuingCertResolver, server_config, server_config_for_host};

mod client;
pub use client::{insecure_client_config, upstream_client_config};
