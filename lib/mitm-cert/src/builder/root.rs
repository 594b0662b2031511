/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName, SubjectKeyIdentifier,
};

use super::SubjectNameBuilder;

/// Builds a self-signed root authority usable to sign interception leaves.
pub struct RootCertBuilder {
    pkey: PKey<Private>,
    validity: Duration,
    subject_builder: SubjectNameBuilder,
}

impl RootCertBuilder {
    pub fn new(validity: Duration) -> anyhow::Result<Self> {
        let pkey = super::pkey::new_rsa(2048)?;
        Ok(RootCertBuilder {
            pkey,
            validity,
            subject_builder: SubjectNameBuilder::default(),
        })
    }

    #[inline]
    pub fn subject_builder_mut(&mut self) -> &mut SubjectNameBuilder {
        &mut self.subject_builder
    }

    #[inline]
    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    pub fn build(&self) -> anyhow::Result<X509> {
        let serial = super::serial::random_20()?;

        let key_usage = KeyUsage::new()
            .critical()
            .key_encipherment()
            .digital_signature()
            .key_cert_sign()
            .build()
            .map_err(|e| anyhow!("failed to build KeyUsage extension: {e}"))?;
        let ext_key_usage = ExtendedKeyUsage::new()
            .server_auth()
            .build()
            .map_err(|e| anyhow!("failed to build ExtendedKeyUsage extension: {e}"))?;
        let basic_constraints = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(|e| anyhow!("failed to build BasicConstraints extension: {e}"))?;

        let (not_before, not_after) = super::validity_bounds(self.validity)?;

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
            .append_extension(basic_constraints)
            .map_err(|e| anyhow!("failed to append BasicConstraints extension: {e}"))?;

        let subject_name = self
            .subject_builder
            .build()
            .context("failed to build subject name")?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("failed to set subject name: {e}"))?;
        builder
            .set_issuer_name(&subject_name)
            .map_err(|e| anyhow!("failed to set issuer name: {e}"))?;

        let v3_ctx = builder.x509v3_context(None, None);
        let ski = SubjectKeyIdentifier::new()
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build SubjectKeyIdentifier extension: {e}"))?;
        let san = if let Some(cn) = self.subject_builder.common_name() {
            let mut san = SubjectAlternativeName::new();
            san.dns(cn);
            Some(
                san.build(&v3_ctx)
                    .map_err(|e| anyhow!("failed to build SubjectAlternativeName extension: {e}"))?,
            )
        } else {
            None
        };
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("failed to append SubjectKeyIdentifier extension: {e}"))?;
        if let Some(san) = san {
            builder
                .append_extension(san)
                .map_err(|e| anyhow!("failed to append SubjectAlternativeName extension: {e}"))?;
        }

        builder
            .sign(&self.pkey, MessageDigest::sha256())
            .map_err(|e| anyhow!("failed to sign: {e}"))?;

        Ok(builder.build())
    }
}
