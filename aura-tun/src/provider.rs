//! Host boundary for establishing the tunnel interface
//!
//! Establishing a traffic-capturing interface is a privileged operation the
//! host must have granted. [`InterfaceProvider`] keeps that boundary behind a
//! trait: [`NativeProvider`] creates a real TUN device and installs routes,
//! while tests substitute an in-memory implementation. Whatever the source,
//! the result is an [`InterfaceHandle`] that is owned exclusively by the
//! caller and released exactly once.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::InterfaceConfig;
use crate::device::TunDevice;
use crate::error::Result;
use crate::route::{Route, RouteManager};
use crate::transport::PacketIo;

/// Exclusive ownership of one established tunnel interface
///
/// The handle is the single release point for the interface: the underlying
/// descriptor closes when the handle is dropped and every I/O clone handed
/// out via [`io`](InterfaceHandle::io) has been dropped too. Workers reading
/// and writing packets hold only I/O clones and never close the interface
/// themselves.
pub struct InterfaceHandle {
    io: Arc<dyn PacketIo>,
    name: String,
}

impl InterfaceHandle {
    /// Wrap an established interface
    pub fn new(io: Arc<dyn PacketIo>) -> Self {
        let name = io.name().to_string();
        Self { io, name }
    }

    /// Clone of the packet I/O side of the interface
    pub fn io(&self) -> Arc<dyn PacketIo> {
        self.io.clone()
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for InterfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Host capability and establishment boundary
#[async_trait]
pub trait InterfaceProvider: Send + Sync {
    /// Whether the host has granted the capability to establish the
    /// interface
    ///
    /// A `false` result means establishment would be refused; callers report
    /// a permission condition instead of attempting it.
    fn is_authorized(&self) -> bool;

    /// Establish the interface described by `config`
    ///
    /// On failure no partial state is left behind; there is nothing for the
    /// caller to release.
    async fn establish(&self, config: &InterfaceConfig) -> Result<InterfaceHandle>;
}

/// Provider backed by a real TUN device plus host routes
#[derive(Debug, Default)]
pub struct NativeProvider;

impl NativeProvider {
    /// Create a new native provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InterfaceProvider for NativeProvider {
    fn is_authorized(&self) -> bool {
        // TUN creation needs root or CAP_NET_ADMIN; effective uid is the
        // closest probe available without attempting creation.
        // SAFETY: geteuid has no preconditions
        unsafe { libc::geteuid() == 0 }
    }

    async fn establish(&self, config: &InterfaceConfig) -> Result<InterfaceHandle> {
        config.validate()?;

        if !config.allowed_apps.is_empty() {
            log::warn!(
                "application allow-list ({} entries) is not enforceable on this host; \
                 intercepting all traffic",
                config.allowed_apps.len()
            );
        }

        let device = TunDevice::create(config).await?;
        let name = device.name().to_string();

        let routes = RouteManager::new().await?;
        for net in &config.routes {
            routes.add(&Route::interface_route(*net, &name)).await?;
        }

        log::info!(
            "interface {} established ({} routes, dns {:?})",
            name,
            config.routes.len(),
            config.dns_servers
        );

        Ok(InterfaceHandle::new(Arc::new(device)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockInterface;

    #[test]
    fn handle_reports_interface_name() {
        let iface = Arc::new(MockInterface::new("mock0", 1400));
        let handle = InterfaceHandle::new(iface);
        assert_eq!(handle.name(), "mock0");
    }

    #[test]
    fn dropping_handle_and_io_clones_releases_interface() {
        let iface = Arc::new(MockInterface::new("mock0", 1400));
        let weak = Arc::downgrade(&iface);

        let handle = InterfaceHandle::new(iface);
        let io = handle.io();
        drop(handle);
        assert!(weak.upgrade().is_some(), "I/O clone keeps the interface open");

        drop(io);
        assert!(weak.upgrade().is_none(), "last drop releases the interface");
    }
}
