//! Tunnel start configuration
//!
//! One `TunnelConfig` is supplied fresh with every start request and
//! discarded after consumption; nothing is persisted.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use aura_tun::DEFAULT_DNS;

use crate::error::{Error, Result};

/// Parameters for one tunnel start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// DNS server as `host` or `host:port`; empty or absent means the
    /// default public resolver
    #[serde(default)]
    pub dns_server: Option<String>,

    /// Tunnel domain; must be absolute (trailing-dot form)
    pub domain: String,

    /// Restrict interception to these application identifiers
    #[serde(default)]
    pub allowed_apps: Option<Vec<String>>,
}

impl TunnelConfig {
    /// Create a configuration for the given domain
    pub fn new(dns_server: Option<String>, domain: impl Into<String>) -> Self {
        Self {
            dns_server,
            domain: domain.into(),
            allowed_apps: None,
        }
    }

    /// Validate the configuration
    ///
    /// The tunnel protocol requires a fully-qualified domain ending in the
    /// root separator.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::InvalidConfig("domain cannot be empty".into()));
        }

        if !self.domain.ends_with('.') {
            return Err(Error::InvalidConfig(format!(
                "domain '{}' must be absolute (trailing-dot form)",
                self.domain
            )));
        }

        Ok(())
    }

    /// DNS host with any `:port` suffix stripped
    ///
    /// Returns `None` when no server was supplied (empty counts as absent).
    pub fn dns_host(&self) -> Option<&str> {
        let s = self.dns_server.as_deref()?.trim();
        if s.is_empty() {
            return None;
        }

        // Bracketed IPv6 with optional port: "[::1]:53"
        if let Some(rest) = s.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                return Some(&rest[..end]);
            }
        }

        // Bare IPv6 addresses carry multiple colons and no port suffix
        if s.matches(':').count() > 1 {
            return Some(s);
        }

        match s.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => Some(host),
            _ => Some(s),
        }
    }

    /// Resolver address for the interface DNS configuration
    ///
    /// Falls back to the default public resolver when no server was supplied
    /// or the supplied host is not a literal address.
    pub fn resolver_addr(&self) -> IpAddr {
        match self.dns_host() {
            Some(host) => host.parse().unwrap_or_else(|_| {
                log::warn!(
                    "DNS server '{}' is not a literal address; using default resolver",
                    host
                );
                IpAddr::V4(DEFAULT_DNS)
            }),
            None => IpAddr::V4(DEFAULT_DNS),
        }
    }

    /// DNS server argument for the engine, verbatim as supplied
    pub fn engine_dns_arg(&self) -> &str {
        self.dns_server.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn empty_domain_is_rejected() {
        let config = TunnelConfig::new(None, "");
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn relative_domain_is_rejected() {
        let config = TunnelConfig::new(None, "tunnel.example.com");
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn absolute_domain_is_accepted() {
        let config = TunnelConfig::new(None, "tunnel.example.com.");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn port_is_stripped_from_dns_host() {
        let config = TunnelConfig::new(Some("1.2.3.4:53".into()), "x.y.");
        assert_eq!(config.dns_host(), Some("1.2.3.4"));
        assert_eq!(
            config.resolver_addr(),
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))
        );
    }

    #[test]
    fn host_without_port_passes_through() {
        let config = TunnelConfig::new(Some("9.9.9.9".into()), "x.y.");
        assert_eq!(config.dns_host(), Some("9.9.9.9"));
    }

    #[test]
    fn empty_dns_server_means_default_resolver() {
        let config = TunnelConfig::new(Some(String::new()), "x.y.");
        assert_eq!(config.dns_host(), None);
        assert_eq!(config.resolver_addr(), IpAddr::V4(DEFAULT_DNS));
        assert_eq!(config.engine_dns_arg(), "");
    }

    #[test]
    fn bare_ipv6_host_is_not_truncated() {
        let config = TunnelConfig::new(Some("2001:db8::1".into()), "x.y.");
        assert_eq!(config.dns_host(), Some("2001:db8::1"));
    }

    #[test]
    fn bracketed_ipv6_port_is_stripped() {
        let config = TunnelConfig::new(Some("[2001:db8::1]:5353".into()), "x.y.");
        assert_eq!(config.dns_host(), Some("2001:db8::1"));
    }
}
