use std::net::IpAddr;

/// One address observed on one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub interface_name: String,
    pub flags: u32,
    pub address: IpAddr,
}

impl InterfaceAddr {
    pub fn is_global_ipv4(&self) -> bool {
        matches!(self.address, IpAddr::V4(v4) if is_global_v4(&v4))
    }

    pub fn is_site_local(&self) -> bool {
        match self.address {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00, // unique local (fc00::/7)
        }
    }

    pub fn is_global(&self) -> bool {
        match self.address {
            IpAddr::V4(v4) => is_global_v4(&v4),
            IpAddr::V6(v6) => !v6.is_loopback() && !v6.is_unicast_link_local() && !v6.is_unique_local(),
        }
    }

    /// The `(interface-name | flags | address)` tuple used by the
    /// network-change hash (§4.A).
    pub fn change_tuple(&self) -> String {
        format!("{}|{}|{}", self.interface_name, self.flags, self.address)
    }
}

fn is_global_v4(v4: &std::net::Ipv4Addr) -> bool {
    !v4.is_private()
        && !v4.is_loopback()
        && !v4.is_link_local()
        && !v4.is_broadcast()
        && !v4.is_documentation()
        && !v4.is_unspecified()
}

/// Boundary to the platform-specific interface enumeration collaborator
/// (§1: "platform-specific packet interception" and related OS surfaces are
/// out of scope). Netenv only depends on this trait; the `daemon` binary
/// supplies the real implementation for the host OS.
pub trait InterfaceProvider: Send + Sync {
    fn current(&self) -> Vec<InterfaceAddr>;
}

/// A fixed-list provider, useful for tests and for platforms without a
/// netlink-style enumeration API wired up yet.
pub struct StaticInterfaceProvider(pub Vec<InterfaceAddr>);

impl InterfaceProvider for StaticInterfaceProvider {
    fn current(&self) -> Vec<InterfaceAddr> {
        self.0.clone()
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    //! Interface enumeration over rtnetlink, matching the approach in
    //! `firezone-firezone/rust/libs/bin-shared/src/network_changes` (which
    //! also drives its change-detection off an `rtnetlink` connection).
    use super::InterfaceAddr;
    use futures::TryStreamExt as _;
    use std::net::IpAddr;

    pub async fn enumerate() -> anyhow::Result<Vec<InterfaceAddr>> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);

        let mut links = handle.link().get().execute();
        let mut out = Vec::new();

        while let Some(link) = links.try_next().await? {
            let index = link.header.index;
            let name = link
                .attributes
                .iter()
                .find_map(|attr| match attr {
                    rtnetlink::packet_route::link::LinkAttribute::IfName(name) => {
                        Some(name.clone())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| index.to_string());
            let flags = link.header.flags.bits();

            let mut addresses = handle
                .address()
                .get()
                .set_link_index_filter(index)
                .execute();

            while let Some(addr) = addresses.try_next().await? {
                let Some(ip) = addr.attributes.iter().find_map(|a| match a {
                    rtnetlink::packet_route::address::AddressAttribute::Address(addr) => {
                        Some(*addr)
                    }
                    _ => None,
                }) else {
                    continue;
                };

                out.push(InterfaceAddr {
                    interface_name: name.clone(),
                    flags,
                    address: ip,
                });
            }
        }

        Ok(out)
    }

    /// Global addresses only, used to fold interface-sourced locations into
    /// the device-location set (§4.A).
    pub fn global_addresses(addrs: &[InterfaceAddr]) -> Vec<IpAddr> {
        addrs
            .iter()
            .filter(|a| a.is_global())
            .map(|a| a.address)
            .collect()
    }
}
