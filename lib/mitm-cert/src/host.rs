/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use anyhow::anyhow;

/// A target host, either an IP literal or a domain name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Domain(String),
}

impl Host {
    /// Strip a trailing `:port` suffix, handling squared IPv6 literals.
    pub fn strip_port(s: &str) -> &str {
        if s.is_empty() {
            return s;
        }
        if s.as_bytes()[0] == b'[' {
            if let Some(p) = s.find(']') {
                return &s[1..p];
            }
            return s;
        }
        match s.bytes().filter(|b| *b == b':').count() {
            0 => s,
            // more than one colon means a bare ipv6 literal
            1 => s.split(':').next().unwrap_or(s),
            _ => s,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Domain(domain) => write!(f, "{domain}"),
        }
    }
}

impl FromStr for Host {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(anyhow!("empty host string"));
        }
        if s.as_bytes()[0] == b'[' {
            let pos_last = s.len() - 1;
            if s.as_bytes()[pos_last] == b']' {
                if let Ok(ip6) = Ipv6Addr::from_str(&s[1..pos_last]) {
                    return Ok(Host::Ip(IpAddr::V6(ip6)));
                }
            }
            return Err(anyhow!("invalid ipv6 ip in squared brackets"));
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Host::Ip(ip));
        }
        Ok(Host::Domain(s.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_port() {
        assert_eq!(Host::strip_port("example.com:443"), "example.com");
        assert_eq!(Host::strip_port("example.com"), "example.com");
        assert_eq!(Host::strip_port("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(Host::strip_port("[::1]:443"), "::1");
        assert_eq!(Host::strip_port("::1"), "::1");
    }

    #[test]
    fn parse() {
        assert_eq!(
            Host::from_str("10.0.0.1").unwrap(),
            Host::Ip(IpAddr::from_str("10.0.0.1").unwrap())
        );
        assert_eq!(
            Host::from_str("Example.COM").unwrap(),
            Host::Domain("example.com".to_string())
        );
    }
}
