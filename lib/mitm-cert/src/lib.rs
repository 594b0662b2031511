/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! On-demand X.509 issuance for TLS interception. A [`CertificateAuthority`]
//! holds a root certificate and signs per-hostname leaf certificates lazily,
//! caching them until they fall out of their validity window. The [`tls`]
//! module turns an authority into rustls server/client configs.

pub mod builder;

mod host;
pub use host::Host;

mod authority;
pub use authority::{CertificateAuthority, LeafCert};

pub mod tls;
