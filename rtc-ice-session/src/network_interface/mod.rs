#[cfg(test)]
mod network_interface_test;

use std::net::IpAddr;

use crate::error::{Error, Result};

/// Interface name prefixes treated as VPN tunnels.
const VPN_INTERFACE_PREFIXES: &[&str] = &["tun", "tap", "ppp", "utun", "wg", "ipsec"];

/// Address family of an interface entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// One live address of a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub name: String,
    pub addr: IpAddr,
    pub is_loopback: bool,
    pub is_vpn: bool,
}

impl InterfaceEntry {
    pub fn new(name: &str, addr: IpAddr) -> Self {
        InterfaceEntry {
            name: name.to_owned(),
            addr,
            is_loopback: addr.is_loopback(),
            is_vpn: is_vpn_interface_name(name),
        }
    }

    pub fn family(&self) -> AddressFamily {
        if self.addr.is_ipv4() {
            AddressFamily::V4
        } else {
            AddressFamily::V6
        }
    }
}

fn is_vpn_interface_name(name: &str) -> bool {
    VPN_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

#[derive(Debug, Clone)]
enum InterfaceSource {
    System,
    Static(Vec<InterfaceEntry>),
}

/// Collects the live interfaces a session may gather host candidates on.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    source: InterfaceSource,
    live_interfaces: Vec<InterfaceEntry>,
}

impl Default for NetworkInterface {
    fn default() -> Self {
        Self::system()
    }
}

impl NetworkInterface {
    /// Enumerates the operating system's interfaces on every `update`.
    pub fn system() -> Self {
        NetworkInterface {
            source: InterfaceSource::System,
            live_interfaces: vec![],
        }
    }

    /// A fixed interface list, for hosts where enumeration is done elsewhere.
    pub fn from_entries(entries: Vec<InterfaceEntry>) -> Self {
        NetworkInterface {
            source: InterfaceSource::Static(entries.clone()),
            live_interfaces: entries,
        }
    }

    /// Refreshes the live interface list.
    pub fn update_network_interfaces(&mut self) -> Result<()> {
        self.live_interfaces = match &self.source {
            InterfaceSource::System => if_addrs::get_if_addrs()
                .map_err(Error::from)?
                .into_iter()
                .map(|iface| InterfaceEntry {
                    is_loopback: iface.is_loopback(),
                    is_vpn: is_vpn_interface_name(&iface.name),
                    addr: iface.ip(),
                    name: iface.name,
                })
                .collect(),
            InterfaceSource::Static(entries) => entries.clone(),
        };

        log::debug!(
            "network interfaces updated: {} live address(es)",
            self.live_interfaces.len()
        );
        Ok(())
    }

    pub fn live_interfaces(&self) -> &[InterfaceEntry] {
        &self.live_interfaces
    }

    pub fn is_any_network_interface_up(&self) -> bool {
        self.live_interfaces.iter().any(|e| !e.is_loopback)
    }

    /// More than one live non-loopback address.
    pub fn is_multi_homed(&self) -> bool {
        self.live_interfaces
            .iter()
            .filter(|e| !e.is_loopback)
            .count()
            > 1
    }

    /// Whether `addr` belongs to an interface that looks like a VPN tunnel.
    pub fn is_vpn(&self, addr: IpAddr) -> bool {
        self.live_interfaces
            .iter()
            .any(|e| e.addr == addr && e.is_vpn)
    }
}
