//! Per-interface network-address records.

use crate::flagset::{Flag, FlagSet};
use crate::ip::{Family, IpAddress};
use std::fmt;

/// Address scope as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Global,
    Site,
    Link,
    Host,
    Nowhere,
}

impl Scope {
    /// Maps a raw rtnetlink scope value. Unknown values collapse to
    /// [`Scope::Global`], matching the kernel's use of 0 for the universe.
    pub fn from_rtnl(raw: u8) -> Self {
        match raw {
            200 => Scope::Site,
            253 => Scope::Link,
            254 => Scope::Host,
            255 => Scope::Nowhere,
            _ => Scope::Global,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Site => f.write_str("site"),
            Scope::Link => f.write_str("link"),
            Scope::Host => f.write_str("host"),
            Scope::Nowhere => f.write_str("nowhere"),
        }
    }
}

/// Per-address flag bits, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFlag {
    Temporary,
    NoDuplicateAddressDetection,
    Optimistic,
    HomeAddress,
    DuplicateAddressDetectionFailed,
    Deprecated,
    Tentative,
    Permanent,
    ManagedTemporaryAddress,
    NoPrefixRoute,
    MulticastAutoJoin,
    StablePrivacy,
}

impl Flag for AddressFlag {
    const COUNT: usize = 12;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(AddressFlag::Temporary),
            1 => Some(AddressFlag::NoDuplicateAddressDetection),
            2 => Some(AddressFlag::Optimistic),
            3 => Some(AddressFlag::HomeAddress),
            4 => Some(AddressFlag::DuplicateAddressDetectionFailed),
            5 => Some(AddressFlag::Deprecated),
            6 => Some(AddressFlag::Tentative),
            7 => Some(AddressFlag::Permanent),
            8 => Some(AddressFlag::ManagedTemporaryAddress),
            9 => Some(AddressFlag::NoPrefixRoute),
            10 => Some(AddressFlag::MulticastAutoJoin),
            11 => Some(AddressFlag::StablePrivacy),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            AddressFlag::Temporary => "Temporary",
            AddressFlag::NoDuplicateAddressDetection => "NoDuplicateAddressDetection",
            AddressFlag::Optimistic => "Optimistic",
            AddressFlag::HomeAddress => "HomeAddress",
            AddressFlag::DuplicateAddressDetectionFailed => "DuplicateAddressDetectionFailed",
            AddressFlag::Deprecated => "Deprecated",
            AddressFlag::Tentative => "Tentative",
            AddressFlag::Permanent => "Permanent",
            AddressFlag::ManagedTemporaryAddress => "ManagedTemporaryAddress",
            AddressFlag::NoPrefixRoute => "NoPrefixRoute",
            AddressFlag::MulticastAutoJoin => "MulticastAutoJoin",
            AddressFlag::StablePrivacy => "StablePrivacy",
        }
    }
}

pub type AddressFlags = FlagSet<AddressFlag>;

/// How an address was assigned, from the kernel's IFA_PROTO attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressAssignmentProtocol {
    #[default]
    Unspecified,
    KernelLoopback,
    KernelRouterAdvertisement,
    KernelLinkLocal,
}

impl AddressAssignmentProtocol {
    pub fn from_rtnl(raw: u8) -> Self {
        match raw {
            1 => AddressAssignmentProtocol::KernelLoopback,
            2 => AddressAssignmentProtocol::KernelRouterAdvertisement,
            3 => AddressAssignmentProtocol::KernelLinkLocal,
            _ => AddressAssignmentProtocol::Unspecified,
        }
    }
}

impl fmt::Display for AddressAssignmentProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressAssignmentProtocol::Unspecified => f.write_str("unspecified"),
            AddressAssignmentProtocol::KernelLoopback => f.write_str("kernel-loopback"),
            AddressAssignmentProtocol::KernelRouterAdvertisement => f.write_str("kernel-ra"),
            AddressAssignmentProtocol::KernelLinkLocal => f.write_str("kernel-link-local"),
        }
    }
}

/// An IP attachment on an interface: the address itself plus the broadcast
/// address, prefix length, scope, flag bits, and assignment protocol.
///
/// Records order lexicographically over the field tuple, so a set of them
/// sorts by address first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkAddress {
    ip: IpAddress,
    broadcast: Option<IpAddress>,
    prefix_len: u8,
    scope: Scope,
    flags: AddressFlags,
    protocol: AddressAssignmentProtocol,
}

impl NetworkAddress {
    pub fn new(
        ip: IpAddress,
        broadcast: Option<IpAddress>,
        prefix_len: u8,
        scope: Scope,
        flags: AddressFlags,
        protocol: AddressAssignmentProtocol,
    ) -> Self {
        Self {
            ip,
            broadcast,
            prefix_len,
            scope,
            flags,
            protocol,
        }
    }

    pub fn ip(&self) -> &IpAddress {
        &self.ip
    }

    pub fn broadcast(&self) -> Option<&IpAddress> {
        self.broadcast.as_ref()
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn flags(&self) -> AddressFlags {
        self.flags
    }

    pub fn protocol(&self) -> AddressAssignmentProtocol {
        self.protocol
    }

    pub fn family(&self) -> Family {
        self.ip.family()
    }

    pub fn is_v4(&self) -> bool {
        self.ip.is_v4()
    }

    pub fn is_v6(&self) -> bool {
        self.ip.is_v6()
    }

    /// True when `other` names the same attachment (address, broadcast,
    /// prefix, scope) regardless of its flag bits or assignment protocol.
    pub fn same_attachment(&self, other: &Self) -> bool {
        self.ip == other.ip
            && self.broadcast == other.broadcast
            && self.prefix_len == other.prefix_len
            && self.scope == other.scope
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} scope {}",
            self.family(),
            self.ip,
            self.prefix_len,
            self.scope
        )?;
        if let Some(broadcast) = &self.broadcast {
            write!(f, " brd {broadcast}")?;
        }
        if self.flags.any() {
            write!(f, " f {}", self.flags)?;
        }
        if self.protocol != AddressAssignmentProtocol::Unspecified {
            write!(f, " proto {}", self.protocol)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(ip: &str, prefix_len: u8, flags: AddressFlags) -> NetworkAddress {
        NetworkAddress::new(
            IpAddress::parse(ip),
            None,
            prefix_len,
            Scope::Global,
            flags,
            AddressAssignmentProtocol::Unspecified,
        )
    }

    #[test]
    fn scope_mapping_from_rtnl() {
        assert_eq!(Scope::from_rtnl(0), Scope::Global);
        assert_eq!(Scope::from_rtnl(200), Scope::Site);
        assert_eq!(Scope::from_rtnl(253), Scope::Link);
        assert_eq!(Scope::from_rtnl(254), Scope::Host);
        assert_eq!(Scope::from_rtnl(255), Scope::Nowhere);
        assert_eq!(Scope::from_rtnl(17), Scope::Global);
    }

    #[test]
    fn orders_by_address_first() {
        let a = sample("10.0.0.1", 24, AddressFlags::empty());
        let b = sample("10.0.0.2", 24, AddressFlags::empty());
        let c = sample("fe80::1", 64, AddressFlags::empty());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn flag_bits_distinguish_records() {
        let plain = sample("10.0.0.1", 24, AddressFlags::empty());
        let flagged = sample(
            "10.0.0.1",
            24,
            AddressFlags::empty().with(AddressFlag::Permanent),
        );
        assert_ne!(plain, flagged);
        assert!(plain.same_attachment(&flagged));
    }

    #[test]
    fn renders_like_ip_addr_output() {
        let record = NetworkAddress::new(
            IpAddress::parse("10.0.0.5"),
            Some(IpAddress::parse("10.0.0.255")),
            24,
            Scope::Global,
            AddressFlags::empty().with(AddressFlag::Permanent),
            AddressAssignmentProtocol::Unspecified,
        );
        assert_eq!(
            record.to_string(),
            "inet 10.0.0.5/24 scope global brd 10.0.0.255 f <Permanent>"
        );
    }

    #[test]
    fn address_flag_bit_positions_follow_wire_order() {
        let flags = AddressFlags::from_bits(0x80 | 0x200);
        assert!(flags.test(AddressFlag::Permanent));
        assert!(flags.test(AddressFlag::NoPrefixRoute));
        assert_eq!(flags.count(), 2);
    }
}
