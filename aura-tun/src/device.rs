//! TUN device abstraction
//!
//! A thin wrapper around the `tun-rs` crate. Devices are either created from
//! an [`InterfaceConfig`] (requires root/`CAP_NET_ADMIN`) or wrapped around a
//! descriptor the host has already established via [`TunDevice::from_fd`].

use std::os::unix::io::{AsRawFd, RawFd};

use async_trait::async_trait;

use crate::config::InterfaceConfig;
use crate::error::{Error, Result};
use crate::transport::{IfaceInfo, PacketIo};

/// Open TUN device with async packet I/O
///
/// Dropping the device closes the underlying descriptor (unless it was
/// borrowed by the host in the first place, which `tun-rs` does not do for
/// the constructors used here).
pub struct TunDevice {
    inner: tun_rs::AsyncDevice,
    info: IfaceInfo,
}

impl TunDevice {
    /// Create a new TUN device with the given configuration
    ///
    /// `tun-rs` handles the platform-specific details: interface creation,
    /// address assignment, MTU and bringing the interface up. Routes are not
    /// installed here; see [`RouteManager`](crate::route::RouteManager).
    pub async fn create(config: &InterfaceConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tun_rs::DeviceBuilder::new();

        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }

        builder = builder
            .ipv4(config.address, config.prefix_len, None)
            .mtu(config.mtu);

        let device = builder
            .build_async()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        let name = device
            .name()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        log::info!(
            "created TUN device {} ({}/{}, mtu {})",
            name,
            config.address,
            config.prefix_len,
            config.mtu
        );

        Ok(Self {
            inner: device,
            info: IfaceInfo {
                name,
                mtu: config.mtu,
            },
        })
    }

    /// Wrap a descriptor the host has already established
    ///
    /// # Safety
    ///
    /// The caller must ensure that `fd` is a valid, open TUN descriptor and
    /// that no other code closes it; the returned device takes ownership and
    /// closes it on drop.
    pub unsafe fn from_fd(fd: RawFd, name: impl Into<String>, mtu: u16) -> Result<Self> {
        let device = tun_rs::AsyncDevice::from_fd(fd)
            .map_err(|e| Error::DeviceCreation(format!("failed to adopt descriptor: {}", e)))?;

        let name = name.into();
        log::info!("adopted TUN descriptor {} as {} (mtu {})", fd, name, mtu);

        Ok(Self {
            inner: device,
            info: IfaceInfo { name, mtu },
        })
    }

    /// Get the device name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Get the MTU
    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }

    /// Get the underlying file descriptor
    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[async_trait]
impl PacketIo for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.recv(buf).await.map_err(Error::Io)
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.inner.send(buf).await.map_err(Error::Io)
    }

    fn info(&self) -> &IfaceInfo {
        &self.info
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice").field("info", &self.info).finish()
    }
}
