/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::anyhow;
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameBuilder};

#[derive(Default, Clone)]
pub struct SubjectNameBuilder {
    organization: Option<String>,
    common_name: Option<String>,
}

impl SubjectNameBuilder {
    pub fn set_organization(&mut self, o: String) {
        self.organization = Some(o);
    }

    pub fn set_common_name(&mut self, cn: String) {
        self.common_name = Some(cn);
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    fn get_builder(&self) -> anyhow::Result<X509NameBuilder> {
        let mut builder = X509Name::builder()
            .map_err(|e| anyhow!("failed to create x509 subject name builder: {e}"))?;
        if let Some(o) = &self.organization {
            builder
                .append_entry_by_nid(Nid::ORGANIZATIONNAME, o)
                .map_err(|e| anyhow!("failed to set organization name to {o}: {e}"))?;
        }
        Ok(builder)
    }

    pub fn build(&self) -> anyhow::Result<X509Name> {
        let mut builder = self.get_builder()?;
        if let Some(cn) = &self.common_name {
            builder
                .append_entry_by_nid(Nid::COMMONNAME, cn)
                .map_err(|e| anyhow!("failed to set common name to {cn}: {e}"))?;
        }
        Ok(builder.build())
    }

    pub(super) fn build_with_default_common_name(
        &self,
        default_cn: &str,
    ) -> anyhow::Result<X509Name> {
        let mut builder = self.get_builder()?;
        let cn = self.common_name.as_deref().unwrap_or(default_cn);
        builder
            .append_entry_by_nid(Nid::COMMONNAME, cn)
            .map_err(|e| anyhow!("failed to set common name to {cn}: {e}"))?;
        Ok(builder.build())
    }
}
