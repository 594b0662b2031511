/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::Write;

use anyhow::{Context as _, anyhow};
use log::info;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use mitm_cert::CertificateAuthority;
use mitm_cert::builder::RootCertBuilder;

use crate::modifier::ModifierGroup;
use crate::opts::ProcArgs;
use crate::parse::Registry;

fn load_root(proc_args: &ProcArgs) -> anyhow::Result<(X509, PKey<Private>)> {
    let cert_file = proc_args.ca_cert.as_ref().unwrap();
    let key_file = proc_args.ca_key.as_ref().unwrap();

    let cert_content = std::fs::read(cert_file)
        .map_err(|e| anyhow!("failed to read ca cert file {}: {e:?}", cert_file.display()))?;
    let cert = X509::from_pem(&cert_content)
        .map_err(|e| anyhow!("invalid ca cert in file {}: {e}", cert_file.display()))?;

    let key_content = std::fs::read(key_file)
        .map_err(|e| anyhow!("failed to read ca pkey file {}: {e:?}", key_file.display()))?;
    let key = PKey::private_key_from_pem(&key_content)
        .map_err(|e| anyhow!("invalid ca pkey in file {}: {e}", key_file.display()))?;

    Ok((cert, key))
}

fn generate_root(proc_args: &ProcArgs) -> anyhow::Result<(X509, PKey<Private>)> {
    let mut builder = RootCertBuilder::new(mitm_cert::builder::DEFAULT_ROOT_VALIDITY)?;
    builder
        .subject_builder_mut()
        .set_common_name(proc_args.ca_common_name.clone());
    builder
        .subject_builder_mut()
        .set_organization(proc_args.organization.clone());
    let cert = builder.build().context("failed to build root authority")?;
    let key = builder.pkey().to_owned();

    if let Some(cert_file) = &proc_args.ca_cert {
        let pem = cert
            .to_pem()
            .map_err(|e| anyhow!("failed to encode root certificate: {e}"))?;
        write_file(cert_file, &pem)?;
        info!("wrote root certificate to {}", cert_file.display());
    }
    if let Some(key_file) = &proc_args.ca_key {
        let pem = key
            .private_key_to_pem_pkcs8()
            .map_err(|e| anyhow!("failed to encode root key: {e}"))?;
        write_file(key_file, &pem)?;
        info!("wrote root key to {}", key_file.display());
    }

    Ok((cert, key))
}

fn write_file(path: &std::path::Path, content: &[u8]) -> anyhow::Result<()> {
    let mut file = std::fs::File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| anyhow!("failed to open output file {}: {e:?}", path.display()))?;
    file.write_all(content)
        .map_err(|e| anyhow!("failed to write {}: {e:?}", path.display()))
}

pub fn build_authority(proc_args: &ProcArgs) -> anyhow::Result<CertificateAuthority> {
    let (root, root_key) = if proc_args.generate_ca {
        generate_root(proc_args)?
    } else {
        load_root(proc_args)?
    };
    let mut authority = CertificateAuthority::new(root, root_key)?;
    authority.set_validity(proc_args.leaf_validity);
    authority.set_organization(proc_args.organization.clone());
    authority.set_skip_verify(proc_args.insecure_upstream);
    Ok(authority)
}

/// The top-level pipeline: the configured modifier tree, if a modifier
/// file was given, inside a fresh group the daemon may extend.
pub fn load_modifier_group(proc_args: &ProcArgs) -> anyhow::Result<ModifierGroup> {
    let group = ModifierGroup::new();
    let Some(path) = &proc_args.modifier_file else {
        return Ok(group);
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read modifier file {}: {e:?}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("modifier file {} is not valid json: {e}", path.display()))?;

    let registry = Registry::with_builtin();
    let parsed = registry
        .parse(&value)
        .context(format!("invalid modifier file {}", path.display()))?;
    if let Some(reqmod) = parsed.request_modifier() {
        group.add_request_modifier(reqmod);
    }
    if let Some(resmod) = parsed.response_modifier() {
        group.add_response_modifier(resmod);
    }
    Ok(group)
}
