//! Route management for the tunnel interface
//!
//! Installs the routes that steer traffic into the interface. Routes bound
//! to the interface disappear with it when the device is closed, so
//! establishment-time installation needs no paired teardown on the normal
//! shutdown path; [`RouteManager::delete`] exists for hosts that replace
//! routes while the interface stays up.

use std::ffi::CString;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Convert an interface name to its index
fn interface_index(name: &str) -> Result<u32> {
    let c_name = CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex is safe to call with a valid C string
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(Error::NotFound(name.to_string()));
    }

    Ok(index)
}

/// A network route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: Ipv4Net,
    /// Gateway address (None for direct interface routes)
    pub gateway: Option<Ipv4Addr>,
    /// Interface name
    pub interface: Option<String>,
}

impl Route {
    /// Create a route to a destination network via a gateway
    pub fn new(destination: Ipv4Net, gateway: Ipv4Addr) -> Self {
        Self {
            destination,
            gateway: Some(gateway),
            interface: None,
        }
    }

    /// Create an interface route (no gateway, traffic goes directly to the
    /// interface)
    pub fn interface_route(destination: Ipv4Net, interface: impl Into<String>) -> Self {
        Self {
            destination,
            gateway: None,
            interface: Some(interface.into()),
        }
    }

    /// Check whether this is a default route
    pub fn is_default(&self) -> bool {
        self.destination.prefix_len() == 0
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(ref iface) = self.interface {
            write!(f, " dev {}", iface)?;
        }
        Ok(())
    }
}

/// Routing table handle
pub struct RouteManager {
    handle: net_route::Handle,
}

impl RouteManager {
    /// Open a handle to the host routing table
    pub async fn new() -> Result<Self> {
        let handle = net_route::Handle::new()
            .map_err(|e| Error::Route(format!("failed to open routing handle: {}", e)))?;
        Ok(Self { handle })
    }

    /// Add a route to the routing table
    ///
    /// An already-existing identical route is not an error.
    pub async fn add(&self, route: &Route) -> Result<()> {
        let mut net_route = net_route::Route::new(
            IpAddr::V4(route.destination.addr()),
            route.destination.prefix_len(),
        );

        if let Some(gw) = route.gateway {
            net_route = net_route.with_gateway(IpAddr::V4(gw));
        }

        if let Some(ref iface) = route.interface {
            net_route = net_route.with_ifindex(interface_index(iface)?);
        }

        match self.handle.add(&net_route).await {
            Ok(()) => {
                log::info!("added route: {}", route);
                Ok(())
            }
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("File exists") || err_str.contains("os error 17") {
                    log::debug!("route already exists: {}", route);
                    Ok(())
                } else {
                    Err(Error::Route(format!("failed to add route: {}", e)))
                }
            }
        }
    }

    /// Remove a route from the routing table
    pub async fn delete(&self, route: &Route) -> Result<()> {
        let mut net_route = net_route::Route::new(
            IpAddr::V4(route.destination.addr()),
            route.destination.prefix_len(),
        );

        if let Some(gw) = route.gateway {
            net_route = net_route.with_gateway(IpAddr::V4(gw));
        }

        if let Some(ref iface) = route.interface {
            // The interface may already be gone during teardown
            if let Ok(index) = interface_index(iface) {
                net_route = net_route.with_ifindex(index);
            }
        }

        self.handle
            .delete(&net_route)
            .await
            .map_err(|e| Error::Route(format!("failed to delete route: {}", e)))?;

        log::info!("deleted route: {}", route);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_route;

    #[test]
    fn default_route_is_default() {
        let route = Route::interface_route(default_route(), "tun0");
        assert!(route.is_default());
        assert_eq!(route.to_string(), "0.0.0.0/0 dev tun0");
    }

    #[test]
    fn gateway_route_display() {
        let net: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let route = Route::new(net, Ipv4Addr::new(192, 168, 1, 1));
        assert!(!route.is_default());
        assert_eq!(route.to_string(), "10.0.0.0/24 via 192.168.1.1");
    }
}
