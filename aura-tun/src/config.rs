//! Tunnel interface configuration
//!
//! The interface always captures the full default route through a
//! point-to-point address; only the DNS resolver list and the optional
//! application allow-list vary per start request.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::DEFAULT_MTU;

/// Point-to-point address assigned to the tunnel interface
pub const VPN_ADDRESS: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Prefix length for the tunnel address
pub const VPN_PREFIX_LEN: u8 = 32;

/// Resolver used when the caller supplies no DNS server
pub const DEFAULT_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// Configuration for establishing the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Interface name hint (auto-assigned by the host if not specified)
    pub name: Option<String>,
    /// Interface address
    pub address: Ipv4Addr,
    /// Prefix length for the interface address
    pub prefix_len: u8,
    /// Networks routed into the interface
    pub routes: Vec<Ipv4Net>,
    /// DNS resolvers advertised for the interface
    pub dns_servers: Vec<IpAddr>,
    /// Restrict interception to these application identifiers (empty = all)
    pub allowed_apps: Vec<String>,
    /// Maximum transmission unit
    pub mtu: u16,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: None,
            address: VPN_ADDRESS,
            prefix_len: VPN_PREFIX_LEN,
            routes: vec![default_route()],
            dns_servers: vec![IpAddr::V4(DEFAULT_DNS)],
            allowed_apps: Vec::new(),
            mtu: DEFAULT_MTU,
        }
    }
}

/// The default route, `0.0.0.0/0`
pub fn default_route() -> Ipv4Net {
    Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
}

impl InterfaceConfig {
    /// Create a new configuration builder
    pub fn builder() -> InterfaceConfigBuilder {
        InterfaceConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.prefix_len > 32 {
            return Err(Error::InvalidPrefix(format!(
                "prefix length {} is invalid (max 32)",
                self.prefix_len
            )));
        }

        if self.mtu < 68 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 68)",
                self.mtu
            )));
        }

        if self.routes.is_empty() {
            return Err(Error::Config("at least one route must be configured".into()));
        }

        if self.dns_servers.is_empty() {
            return Err(Error::Config(
                "at least one DNS resolver must be configured".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`InterfaceConfig`]
///
/// Unset fields fall back to the fixed tunnel constants: address
/// `10.0.0.2/32`, the default route and the `8.8.8.8` resolver.
#[derive(Debug, Default)]
pub struct InterfaceConfigBuilder {
    name: Option<String>,
    address: Option<(Ipv4Addr, u8)>,
    routes: Vec<Ipv4Net>,
    dns_servers: Vec<IpAddr>,
    allowed_apps: Vec<String>,
    mtu: Option<u16>,
}

impl InterfaceConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interface name hint
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the interface address and prefix length
    pub fn address(mut self, address: Ipv4Addr, prefix_len: u8) -> Self {
        self.address = Some((address, prefix_len));
        self
    }

    /// Add a network to route into the interface
    pub fn route(mut self, route: Ipv4Net) -> Self {
        self.routes.push(route);
        self
    }

    /// Add a DNS resolver (replaces the default resolver)
    pub fn dns_server(mut self, server: IpAddr) -> Self {
        self.dns_servers.push(server);
        self
    }

    /// Restrict interception to the given application identifier
    pub fn allow_app(mut self, app: impl Into<String>) -> Self {
        self.allowed_apps.push(app.into());
        self
    }

    /// Set the MTU
    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<InterfaceConfig> {
        let (address, prefix_len) = self.address.unwrap_or((VPN_ADDRESS, VPN_PREFIX_LEN));

        let routes = if self.routes.is_empty() {
            vec![default_route()]
        } else {
            self.routes
        };

        let dns_servers = if self.dns_servers.is_empty() {
            vec![IpAddr::V4(DEFAULT_DNS)]
        } else {
            self.dns_servers
        };

        let config = InterfaceConfig {
            name: self.name,
            address,
            prefix_len,
            routes,
            dns_servers,
            allowed_apps: self.allowed_apps,
            mtu: self.mtu.unwrap_or(DEFAULT_MTU),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = InterfaceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.prefix_len, 32);
        assert_eq!(config.routes, vec![default_route()]);
        assert_eq!(config.dns_servers, vec![IpAddr::V4(DEFAULT_DNS)]);
    }

    #[test]
    fn builder_defaults_to_tunnel_constants() {
        let config = InterfaceConfig::builder().build().unwrap();
        assert_eq!(config, InterfaceConfig::default());
    }

    #[test]
    fn explicit_dns_replaces_default() {
        let dns: IpAddr = "1.2.3.4".parse().unwrap();
        let config = InterfaceConfig::builder().dns_server(dns).build().unwrap();
        assert_eq!(config.dns_servers, vec![dns]);
    }

    #[test]
    fn rejects_tiny_mtu() {
        let result = InterfaceConfig::builder().mtu(40).build();
        assert!(result.is_err());
    }

    #[test]
    fn allow_list_is_empty_by_default() {
        let config = InterfaceConfig::default();
        assert!(config.allowed_apps.is_empty());

        let config = InterfaceConfig::builder()
            .allow_app("com.example.app")
            .build()
            .unwrap();
        assert_eq!(config.allowed_apps, vec!["com.example.app".to_string()]);
    }
}
