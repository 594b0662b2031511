/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::debug;
use lru::LruCache;
use openssl::hash::{MessageDigest, hash};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyParam;
use openssl::x509::{X509, X509Ref, X509StoreContext};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::Host;
use crate::builder::LeafCertBuilder;

const DEFAULT_VALIDITY: Duration = Duration::from_secs(3600);
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_ORGANIZATION: &str = "mitmd";

/// An issued leaf certificate together with everything a TLS stack needs
/// to serve it. Entries are replaced on reissue, never mutated.
pub struct LeafCert {
    leaf: X509,
    chain: Vec<CertificateDer<'static>>,
    certified: Arc<CertifiedKey>,
}

impl LeafCert {
    /// The parsed leaf, for introspection.
    #[inline]
    pub fn leaf(&self) -> &X509Ref {
        &self.leaf
    }

    /// DER chain, leaf first then the signing root.
    #[inline]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    #[inline]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }
}

/// Issues per-hostname leaf certificates signed by a fixed root, with a
/// bounded cache of previously issued leaves.
///
/// One leaf key pair is generated per authority and shared by all leaves.
/// Cached entries are re-verified against the root for the requested
/// hostname at the current time before reuse, so expired leaves are
/// replaced transparently.
pub struct CertificateAuthority {
    root: X509,
    root_key: PKey<Private>,
    root_der: CertificateDer<'static>,
    key_id: Vec<u8>,
    builder: LeafCertBuilder,
    signing_key: Arc<dyn rustls::sign::SigningKey>,
    skip_verify: bool,
    cache: Mutex<LruCache<String, Arc<LeafCert>>>,
}

impl CertificateAuthority {
    pub fn new(root: X509, root_key: PKey<Private>) -> anyhow::Result<Self> {
        Self::with_cache_capacity(root, root_key, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(
        root: X509,
        root_key: PKey<Private>,
        cache_capacity: usize,
    ) -> anyhow::Result<Self> {
        let leaf_key = crate::builder::new_rsa(2048)?;
        let spki = leaf_key
            .public_key_to_der()
            .map_err(|e| anyhow!("failed to encode leaf public key: {e}"))?;
        let key_id = hash(MessageDigest::sha1(), &spki)
            .map_err(|e| anyhow!("failed to digest leaf public key: {e}"))?
            .to_vec();
        let key_der = leaf_key
            .private_key_to_pkcs8()
            .map_err(|e| anyhow!("failed to encode leaf private key: {e}"))?;
        let signing_key =
            any_supported_type(&PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)))
                .map_err(|e| anyhow!("leaf private key rejected by tls stack: {e}"))?;
        let root_der = CertificateDer::from(
            root.to_der()
                .map_err(|e| anyhow!("failed to encode root certificate: {e}"))?,
        );

        let mut builder = LeafCertBuilder::new(leaf_key, DEFAULT_VALIDITY);
        builder
            .subject_builder_mut()
            .set_organization(DEFAULT_ORGANIZATION.to_string());

        let cache_capacity = NonZeroUsize::new(cache_capacity)
            .ok_or_else(|| anyhow!("leaf cache capacity may not be 0"))?;

        Ok(CertificateAuthority {
            root,
            root_key,
            root_der,
            key_id,
            builder,
            signing_key,
            skip_verify: false,
            cache: Mutex::new(LruCache::new(cache_capacity)),
        })
    }

    #[inline]
    pub fn root(&self) -> &X509Ref {
        &self.root
    }

    /// SHA-1 digest of the shared leaf public key, DER form.
    #[inline]
    pub fn key_id(&self) -> &[u8] {
        &self.key_id
    }

    /// The validity window applied around now to every issued leaf.
    pub fn set_validity(&mut self, validity: Duration) {
        self.builder.set_validity(validity);
    }

    pub fn set_organization(&mut self, organization: String) {
        self.builder
            .subject_builder_mut()
            .set_organization(organization);
    }

    /// Skip upstream certificate verification. Testing toggle, consulted
    /// by [`crate::tls::upstream_client_config`].
    pub fn set_skip_verify(&mut self, skip: bool) {
        self.skip_verify = skip;
    }

    #[inline]
    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    /// Return a certificate for `hostname`, issuing one if the cache has
    /// no entry that still verifies for that name at the current time.
    ///
    /// A `:port` suffix is stripped. Two tasks racing an issuance for the
    /// same new hostname may both sign; the last store wins and both
    /// certificates are valid, so no per-host lock is taken.
    pub fn issue(&self, hostname: &str) -> anyhow::Result<Arc<LeafCert>> {
        let hostname = Host::strip_port(hostname);
        let host = Host::from_str(hostname)
            .context(format!("invalid hostname {hostname}"))?;
        let cache_key = host.to_string();

        let cached = {
            let mut cache = self.cache.lock().unwrap();
            cache.get(&cache_key).cloned()
        };
        if let Some(entry) = cached {
            if self.leaf_verifies(&host, entry.leaf()) {
                debug!("leaf cache hit for {cache_key}");
                return Ok(entry);
            }
            debug!("cached leaf for {cache_key} no longer verifies, reissuing");
        }

        let leaf = self
            .builder
            .build(&host, &self.root, &self.root_key)
            .context(format!("failed to sign leaf for {cache_key}"))?;
        let leaf_der = CertificateDer::from(
            leaf.to_der()
                .map_err(|e| anyhow!("failed to encode leaf certificate: {e}"))?,
        );
        let chain = vec![leaf_der, self.root_der.clone()];
        let certified = Arc::new(CertifiedKey::new(chain.clone(), self.signing_key.clone()));

        let entry = Arc::new(LeafCert {
            leaf,
            chain,
            certified,
        });
        let mut cache = self.cache.lock().unwrap();
        cache.put(cache_key, entry.clone());
        Ok(entry)
    }

    /// Chain-verify a cached leaf against our root for `host` at the
    /// current time. Any setup failure counts as not-verified and leads
    /// to reissue rather than an error.
    fn leaf_verifies(&self, host: &Host, leaf: &X509Ref) -> bool {
        fn build_store(
            root: &X509Ref,
            host: &Host,
        ) -> anyhow::Result<openssl::x509::store::X509Store> {
            let mut param = X509VerifyParam::new()
                .map_err(|e| anyhow!("failed to create verify param: {e}"))?;
            match host {
                Host::Domain(domain) => param
                    .set_host(domain)
                    .map_err(|e| anyhow!("failed to set verify host: {e}"))?,
                Host::Ip(ip) => param
                    .set_ip(*ip)
                    .map_err(|e| anyhow!("failed to set verify ip: {e}"))?,
            }
            let mut store_builder = X509StoreBuilder::new()
                .map_err(|e| anyhow!("failed to create trust store builder: {e}"))?;
            store_builder
                .add_cert(root.to_owned())
                .map_err(|e| anyhow!("failed to add root to trust store: {e}"))?;
            store_builder
                .set_param(&param)
                .map_err(|e| anyhow!("failed to set trust store verify param: {e}"))?;
            Ok(store_builder.build())
        }

        let Ok(store) = build_store(&self.root, host) else {
            return false;
        };
        let Ok(mut vctx) = X509StoreContext::new() else {
            return false;
        };
        let Ok(chain) = Stack::new() else {
            return false;
        };
        vctx.init(&store, leaf, &chain, |c| c.verify_cert())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RootCertBuilder;

    fn test_authority() -> CertificateAuthority {
        let mut root_builder = RootCertBuilder::new(Duration::from_secs(24 * 3600)).unwrap();
        root_builder
            .subject_builder_mut()
            .set_common_name("mitmd test authority".to_string());
        let root = root_builder.build().unwrap();
        let root_key = root_builder.pkey().to_owned();
        CertificateAuthority::new(root, root_key).unwrap()
    }

    fn common_name(cert: &X509Ref) -> String {
        let entry = cert
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap();
        entry.data().as_utf8().unwrap().to_string()
    }

    #[test]
    fn distinct_hosts_distinct_leaves() {
        let ca = test_authority();
        let a = ca.issue("example.com").unwrap();
        let b = ca.issue("example.org").unwrap();

        assert_eq!(common_name(a.leaf()), "example.com");
        assert_eq!(common_name(b.leaf()), "example.org");

        let sa = a.leaf().serial_number().to_bn().unwrap();
        let sb = b.leaf().serial_number().to_bn().unwrap();
        assert_ne!(sa, sb);

        // both chain to the same root
        assert_eq!(a.chain()[1], b.chain()[1]);
        assert!(ca.leaf_verifies(&Host::Domain("example.com".to_string()), a.leaf()));
        assert!(ca.leaf_verifies(&Host::Domain("example.org".to_string()), b.leaf()));
    }

    #[test]
    fn cache_hit_within_validity() {
        let ca = test_authority();
        let a = ca.issue("example.com").unwrap();
        let b = ca.issue("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn expired_leaf_is_reissued() {
        let mut ca = test_authority();
        ca.set_validity(Duration::from_secs(0));
        let a = ca.issue("example.com").unwrap();
        std::thread::sleep(Duration::from_millis(1500));
        let b = ca.issue("example.com").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn hostname_mismatch_is_reissued() {
        let ca = test_authority();
        let a = ca.issue("example.com").unwrap();
        assert!(!ca.leaf_verifies(&Host::Domain("other.example".to_string()), a.leaf()));
    }

    #[test]
    fn port_suffix_is_stripped() {
        let ca = test_authority();
        let a = ca.issue("example.com:443").unwrap();
        assert_eq!(common_name(a.leaf()), "example.com");
        let b = ca.issue("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn ip_host_gets_ip_san() {
        let ca = test_authority();

        let dns = ca.issue("example.com").unwrap();
        let names = dns.leaf().subject_alt_names().unwrap();
        assert_eq!(names.len(), 1);
        let name = names.iter().next().unwrap();
        assert_eq!(name.dnsname(), Some("example.com"));
        assert!(name.ipaddress().is_none());

        let ip = ca.issue("10.0.0.1").unwrap();
        let names = ip.leaf().subject_alt_names().unwrap();
        assert_eq!(names.len(), 1);
        let name = names.iter().next().unwrap();
        assert_eq!(name.ipaddress(), Some(&[10u8, 0, 0, 1][..]));
        assert!(name.dnsname().is_none());
        assert_eq!(common_name(ip.leaf()), "10.0.0.1");
    }
}
