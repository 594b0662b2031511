/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::anyhow;
use openssl::x509::X509;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::CertificateAuthority;

/// Client config for the upstream leg of an intercepted exchange.
///
/// When the authority has skip-verify set, upstream certificates are
/// accepted without verification. Otherwise `ca_bundle_pem` must hold a
/// PEM bundle of trusted roots.
pub fn upstream_client_config(
    authority: &CertificateAuthority,
    ca_bundle_pem: Option<&[u8]>,
) -> anyhow::Result<Arc<ClientConfig>> {
    if authority.skip_verify() {
        return Ok(insecure_client_config());
    }
    let pem = ca_bundle_pem.ok_or_else(|| {
        anyhow!("no upstream CA bundle configured and certificate verification is enabled")
    })?;

    let certs = X509::stack_from_pem(pem)
        .map_err(|e| anyhow!("failed to parse upstream CA bundle: {e}"))?;
    if certs.is_empty() {
        return Err(anyhow!("upstream CA bundle holds no certificates"));
    }
    let mut roots = RootCertStore::empty();
    for cert in certs {
        let der = cert
            .to_der()
            .map_err(|e| anyhow!("failed to encode CA certificate: {e}"))?;
        roots
            .add(CertificateDer::from(der))
            .map_err(|e| anyhow!("failed to add CA certificate to root store: {e}"))?;
    }

    Ok(Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

/// Client config that accepts any upstream certificate. Testing toggle.
pub fn insecure_client_config() -> Arc<ClientConfig> {
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier))
            .with_no_client_auth(),
    )
}

#[derive(Debug)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
