/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::sync::Arc;

use log::warn;
use rustls::ServerConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::CertificateAuthority;

/// Certificate selection callback that issues a leaf for the SNI hostname
/// on every handshake. Without SNI the configured fallback hostname is
/// used; if there is none the handshake is aborted.
pub struct IssuingCertResolver {
    authority: Arc<CertificateAuthority>,
    fallback: Option<String>,
}

impl fmt::Debug for IssuingCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuingCertResolver")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for IssuingCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let hostname = match client_hello.server_name() {
            Some(name) => name.to_string(),
            None => match &self.fallback {
                Some(fallback) => fallback.clone(),
                None => {
                    warn!("no SNI hostname in client hello, unable to select a certificate");
                    return None;
                }
            },
        };
        match self.authority.issue(&hostname) {
            Ok(leaf) => Some(leaf.certified_key()),
            Err(e) => {
                warn!("failed to issue certificate for {hostname}: {e:?}");
                None
            }
        }
    }
}

/// A server config that requires SNI and issues certificates on the fly.
pub fn server_config(authority: Arc<CertificateAuthority>) -> Arc<ServerConfig> {
    build_config(authority, None)
}

/// Like [`server_config`] but falls back to `hostname` when the client
/// sends no SNI extension.
pub fn server_config_for_host(
    authority: Arc<CertificateAuthority>,
    hostname: String,
) -> Arc<ServerConfig> {
    build_config(authority, Some(hostname))
}

fn build_config(
    authority: Arc<CertificateAuthority>,
    fallback: Option<String>,
) -> Arc<ServerConfig> {
    let resolver = IssuingCertResolver {
        authority,
        fallback,
    };
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}
