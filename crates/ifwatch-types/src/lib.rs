//! Common value types for the ifwatch network-interface monitor.
//!
//! This crate provides type-safe representations of the network primitives
//! the monitor reports to its consumers:
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses
//! - [`IpAddress`]: IPv4 and IPv6 addresses with an explicit unspecified state
//! - [`NetworkAddress`]: a per-interface IP attachment (address, broadcast,
//!   prefix, scope, flags, assignment protocol)
//! - [`Interface`]: kernel interface identity (index plus name)
//! - [`FlagSet`]: fixed-width flag sets over closed enums

mod addr;
mod flagset;
mod iface;
mod ip;
mod mac;

pub use addr::{AddressAssignmentProtocol, AddressFlag, AddressFlags, NetworkAddress, Scope};
pub use flagset::{Flag, FlagSet};
pub use iface::Interface;
pub use ip::{Family, IpAddress};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),
}
