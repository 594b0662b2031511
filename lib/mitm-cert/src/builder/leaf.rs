/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Ref};

use crate::Host;

use super::SubjectNameBuilder;

/// Builds per-host server certificates signed by an interception root.
/// The key pair is owned by the builder and shared by every leaf it signs.
pub struct LeafCertBuilder {
    pkey: PKey<Private>,
    validity: Duration,
    subject_builder: SubjectNameBuilder,
}

impl LeafCertBuilder {
    pub fn new(pkey: PKey<Private>, validity: Duration) -> Self {
        LeafCertBuilder {
            pkey,
            validity,
            subject_builder: SubjectNameBuilder::default(),
        }
    }

    #[inline]
    pub fn subject_builder_mut(&mut self) -> &mut SubjectNameBuilder {
        &mut self.subject_builder
    }

    #[inline]
    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    pub fn set_validity(&mut self, validity: Duration) {
        self.validity = validity;
    }

    /// Sign a certificate for `host` with a fresh random serial. The
    /// subject alternative name is an IP entry for IP literals and a DNS
    /// entry otherwise.
    pub fn build(
        &self,
        host: &Host,
        ca_cert: &X509Ref,
        ca_key: &PKeyRef<Private>,
    ) -> anyhow::Result<X509> {
        let serial = super::serial::random_20()?;

        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(|e| anyhow!("failed to build KeyUsage extension: {e}"))?;
        let ext_key_usage = ExtendedKeyUsage::new()
            .server_auth()
            .build()
            .map_err(|e| anyhow!("failed to build ExtendedKeyUsage extension: {e}"))?;

        let (not_before, not_after) = super::validity_bounds(self.validity)?;

        let mut san = SubjectAlternativeName::new();
        let subject_name = match host {
            Host::Domain(domain) => {
                san.dns(domain);
                self.subject_builder
                    .build_with_default_common_name(domain)
                    .context("failed to build subject name")?
            }
            Host::Ip(ip) => {
                let text = ip.to_string();
                san.ip(&text);
                self.subject_builder
                    .build_with_default_common_name(&text)
                    .context("failed to build subject name")?
            }
        };

        let mut builder =
            X509::builder().map_err(|e| anyhow!("failed to create x509 builder: {e}"))?;
        builder
            .set_pubkey(&self.pkey)
            .map_err(|e| anyhow!("failed to set pub key: {e}"))?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| anyhow!("failed to set serial number: {e}"))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("failed to set NotBefore: {e}"))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("failed to set NotAfter: {e}"))?;
        builder
            .set_version(2)
            .map_err(|e| anyhow!("failed to set x509 version 3: {e}"))?;
        builder
            .append_extension(key_usage)
            .map_err(|e| anyhow!("failed to append KeyUsage extension: {e}"))?;
        builder
            .append_extension(ext_key_usage)
            .map_err(|e| anyhow!("failed to append ExtendedKeyUsage extension: {e}"))?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("failed to set subject name: {e}"))?;
        builder
            .set_issuer_name(ca_cert.subject_name())
            .map_err(|e| anyhow!("failed to set issuer name: {e}"))?;

        let v3_ctx = builder.x509v3_context(Some(ca_cert), None);
        let san = san
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build SubjectAlternativeName extension: {e}"))?;
        let ski = SubjectKeyIdentifier::new()
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build SubjectKeyIdentifier extension: {e}"))?;
        let mut aki_builder = AuthorityKeyIdentifier::new();
        aki_builder.keyid(false);
        let aki = aki_builder
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build AuthorityKeyIdentifier extension: {e}"))?;

        builder
            .append_extension(san)
            .map_err(|e| anyhow!("failed to append SubjectAlternativeName extension: {e}"))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("failed to append SubjectKeyIdentifier extension: {e}"))?;
        builder
            .append_extension(aki)
            .map_err(|e| anyhow!("failed to append AuthorityKeyIdentifier extension: {e}"))?;

        builder
            .sign(ca_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("failed to sign: {e}"))?;

        Ok(builder.build())
    }
}
