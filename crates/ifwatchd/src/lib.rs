//! Reactive monitor for Linux network-interface state.
//!
//! The monitor keeps a live cache of interfaces and their derived
//! attributes (name, link flags, operational state, hardware addresses,
//! assigned IP addresses, IPv4 default gateway) by speaking route-netlink
//! to the kernel: a three-phase enumeration (links, addresses, routes)
//! followed by multicast change notifications. Consumers register a
//! [`Subscriber`] for the interfaces they care about and are called back
//! only when an observable attribute actually changes.
//!
//! Single consumer process, single thread; see [`monitor::NetworkMonitor`].

pub mod attributes;
pub mod config;
pub mod error;
pub mod monitor;
pub mod netlink;
pub mod subscriber;
pub mod tracker;
pub mod watchable;

pub use config::{reconcile_family_preference, RuntimeFlag, RuntimeFlags};
pub use error::{MonitorError, Result};
pub use monitor::{MonitorHandle, MonitorStats, NetworkMonitor};
pub use subscriber::{Interfaces, Subscriber, SubscriberHandle};
pub use tracker::{
    DirtyFlag, DirtyFlags, GatewayClearReason, InterfaceStatusTracker, LinkFlag, LinkFlags,
    NetworkAddresses, OperationalState, TrackerStats,
};
pub use watchable::{WatchToken, Watchable};
