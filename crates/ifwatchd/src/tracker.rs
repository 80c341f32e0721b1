//! Per-interface status tracking with change-flag accounting.

use ifwatch_types::{Flag, FlagSet, IpAddress, MacAddress, NetworkAddress};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// The sorted set of address records attached to one interface.
pub type NetworkAddresses = BTreeSet<NetworkAddress>;

/// The kernel's aggregate judgement of a link's usability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationalState {
    #[default]
    Unknown,
    NotPresent,
    Down,
    LowerLayerDown,
    Testing,
    Dormant,
    Up,
}

impl OperationalState {
    /// Maps the wire value from IFLA_OPERSTATE. Values beyond the known
    /// range read as [`OperationalState::Unknown`].
    pub fn from_rtnl(raw: u8) -> Self {
        match raw {
            1 => OperationalState::NotPresent,
            2 => OperationalState::Down,
            3 => OperationalState::LowerLayerDown,
            4 => OperationalState::Testing,
            5 => OperationalState::Dormant,
            6 => OperationalState::Up,
            _ => OperationalState::Unknown,
        }
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationalState::Unknown => "Unknown",
            OperationalState::NotPresent => "NotPresent",
            OperationalState::Down => "Down",
            OperationalState::LowerLayerDown => "LowerLayerDown",
            OperationalState::Testing => "Testing",
            OperationalState::Dormant => "Dormant",
            OperationalState::Up => "Up",
        };
        f.write_str(label)
    }
}

/// Link-level flag bits from the ifinfomsg flag word, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkFlag {
    Up,
    Broadcast,
    Debug,
    Loopback,
    PointToPoint,
    NoTrailers,
    Running,
    NoArp,
    Promiscuous,
    AllMulticast,
    Master,
    Slave,
    Multicast,
    PortSet,
    AutoMedia,
    Dynamic,
}

impl Flag for LinkFlag {
    const COUNT: usize = 16;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(LinkFlag::Up),
            1 => Some(LinkFlag::Broadcast),
            2 => Some(LinkFlag::Debug),
            3 => Some(LinkFlag::Loopback),
            4 => Some(LinkFlag::PointToPoint),
            5 => Some(LinkFlag::NoTrailers),
            6 => Some(LinkFlag::Running),
            7 => Some(LinkFlag::NoArp),
            8 => Some(LinkFlag::Promiscuous),
            9 => Some(LinkFlag::AllMulticast),
            10 => Some(LinkFlag::Master),
            11 => Some(LinkFlag::Slave),
            12 => Some(LinkFlag::Multicast),
            13 => Some(LinkFlag::PortSet),
            14 => Some(LinkFlag::AutoMedia),
            15 => Some(LinkFlag::Dynamic),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LinkFlag::Up => "Up",
            LinkFlag::Broadcast => "Broadcast",
            LinkFlag::Debug => "Debug",
            LinkFlag::Loopback => "Loopback",
            LinkFlag::PointToPoint => "PointToPoint",
            LinkFlag::NoTrailers => "NoTrailers",
            LinkFlag::Running => "Running",
            LinkFlag::NoArp => "NoArp",
            LinkFlag::Promiscuous => "Promiscuous",
            LinkFlag::AllMulticast => "AllMulticast",
            LinkFlag::Master => "Master",
            LinkFlag::Slave => "Slave",
            LinkFlag::Multicast => "Multicast",
            LinkFlag::PortSet => "PortSet",
            LinkFlag::AutoMedia => "AutoMedia",
            LinkFlag::Dynamic => "Dynamic",
        }
    }
}

pub type LinkFlags = FlagSet<LinkFlag>;

/// One bit per observable attribute, set when the attribute changed since
/// the last fan-out pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyFlag {
    Name,
    LinkFlags,
    OperationalState,
    MacAddress,
    BroadcastAddress,
    GatewayAddress,
    NetworkAddresses,
}

impl Flag for DirtyFlag {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(DirtyFlag::Name),
            1 => Some(DirtyFlag::LinkFlags),
            2 => Some(DirtyFlag::OperationalState),
            3 => Some(DirtyFlag::MacAddress),
            4 => Some(DirtyFlag::BroadcastAddress),
            5 => Some(DirtyFlag::GatewayAddress),
            6 => Some(DirtyFlag::NetworkAddresses),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DirtyFlag::Name => "NameChanged",
            DirtyFlag::LinkFlags => "LinkFlagsChanged",
            DirtyFlag::OperationalState => "OperationalStateChanged",
            DirtyFlag::MacAddress => "MacAddressChanged",
            DirtyFlag::BroadcastAddress => "BroadcastAddressChanged",
            DirtyFlag::GatewayAddress => "GatewayAddressChanged",
            DirtyFlag::NetworkAddresses => "NetworkAddressesChanged",
        }
    }
}

pub type DirtyFlags = FlagSet<DirtyFlag>;

/// Why a tracker's gateway address was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayClearReason {
    LinkDown,
    RouteDeleted,
    AllIpv4AddressesRemoved,
}

impl fmt::Display for GatewayClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayClearReason::LinkDown => f.write_str("LinkDown"),
            GatewayClearReason::RouteDeleted => f.write_str("RouteDeleted"),
            GatewayClearReason::AllIpv4AddressesRemoved => f.write_str("AllIPv4AddressesRemoved"),
        }
    }
}

/// Per-field change counters, logged with the detailed statistics.
#[derive(Debug, Default, Clone)]
pub struct TrackerStats {
    pub name_changes: u64,
    pub link_flag_changes: u64,
    pub operational_state_changes: u64,
    pub mac_address_changes: u64,
    pub broadcast_address_changes: u64,
    pub gateway_address_changes: u64,
    pub gateway_address_clears: u64,
    pub address_no_change_updates: u64,
    pub addresses_added: u64,
    pub addresses_removed: u64,
    pub dirty_flag_changes: u64,
    pub dirty_flag_checks: u64,
    pub dirty_flag_clears: u64,
}

/// Mutable record of everything the monitor knows about one interface.
///
/// Field writes set the matching dirty flag only when the value actually
/// changed; the monitor clears all flags in bulk after each fan-out pass.
pub struct InterfaceStatusTracker {
    name: String,
    mac_address: MacAddress,
    broadcast_address: MacAddress,
    operational_state: OperationalState,
    link_flags: LinkFlags,
    addresses: NetworkAddresses,
    gateway: Option<IpAddress>,
    last_changed: Instant,
    dirty: DirtyFlags,
    stats: TrackerStats,
}

impl Default for InterfaceStatusTracker {
    fn default() -> Self {
        Self {
            name: String::new(),
            mac_address: MacAddress::ZERO,
            broadcast_address: MacAddress::ZERO,
            operational_state: OperationalState::Unknown,
            link_flags: LinkFlags::empty(),
            addresses: NetworkAddresses::new(),
            gateway: None,
            last_changed: Instant::now(),
            dirty: DirtyFlags::empty(),
            stats: TrackerStats::default(),
        }
    }
}

impl InterfaceStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, flag: DirtyFlag) {
        if !self.dirty.test(flag) {
            self.dirty.set(flag);
            self.last_changed = Instant::now();
            self.stats.dirty_flag_changes += 1;
            trace!(name = %self.name, flag = flag.label(), "dirty flag set");
        } else {
            trace!(name = %self.name, flag = flag.label(), "dirty flag already set");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn set_name(&mut self, name: &str) {
        if self.name != name {
            trace!(old = %self.name, new = name, "interface name changed");
            self.name = name.to_string();
            self.touch(DirtyFlag::Name);
            self.stats.name_changes += 1;
        }
    }

    pub fn operational_state(&self) -> OperationalState {
        self.operational_state
    }

    pub fn set_operational_state(&mut self, state: OperationalState) {
        if self.operational_state != state {
            self.operational_state = state;
            self.touch(DirtyFlag::OperationalState);
            trace!(name = %self.name, %state, "operational state changed");
            self.stats.operational_state_changes += 1;
        }
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    /// A write of the all-zero address always counts as a change: kernels
    /// report zero during transitions and consumers must observe it.
    pub fn set_mac_address(&mut self, address: MacAddress) {
        if self.mac_address != address || address.is_zero() {
            self.mac_address = address;
            self.touch(DirtyFlag::MacAddress);
            trace!(name = %self.name, %address, "mac address changed");
            self.stats.mac_address_changes += 1;
        }
    }

    pub fn broadcast_address(&self) -> MacAddress {
        self.broadcast_address
    }

    pub fn set_broadcast_address(&mut self, address: MacAddress) {
        if self.broadcast_address != address || address.is_zero() {
            self.broadcast_address = address;
            self.touch(DirtyFlag::BroadcastAddress);
            trace!(name = %self.name, %address, "broadcast address changed");
            self.stats.broadcast_address_changes += 1;
        }
    }

    pub fn link_flags(&self) -> LinkFlags {
        self.link_flags
    }

    pub fn update_link_flags(&mut self, flags: LinkFlags) {
        if self.link_flags != flags {
            self.link_flags = flags;
            self.touch(DirtyFlag::LinkFlags);
            trace!(name = %self.name, %flags, "link flags changed");
            self.stats.link_flag_changes += 1;
        }
    }

    pub fn gateway_address(&self) -> Option<IpAddress> {
        self.gateway
    }

    pub fn set_gateway_address(&mut self, gateway: IpAddress) {
        if self.gateway != Some(gateway) {
            self.gateway = Some(gateway);
            self.touch(DirtyFlag::GatewayAddress);
            trace!(name = %self.name, %gateway, "gateway address changed");
            self.stats.gateway_address_changes += 1;
        }
    }

    /// Clearing an already absent gateway is a no-op.
    pub fn clear_gateway_address(&mut self, reason: GatewayClearReason) {
        if self.gateway.is_some() {
            self.gateway = None;
            self.touch(DirtyFlag::GatewayAddress);
            trace!(name = %self.name, %reason, "gateway cleared");
            self.stats.gateway_address_clears += 1;
        }
    }

    pub fn network_addresses(&self) -> &NetworkAddresses {
        &self.addresses
    }

    /// Inserts an address record. A replay of an already known record sets
    /// no dirty flag; a record matching an existing attachment with
    /// different flag bits evicts the prior record before inserting.
    pub fn add_network_address(&mut self, address: NetworkAddress) {
        if address.ip().is_unspecified() {
            return;
        }
        if self.addresses.contains(&address) {
            // the kernel re-sent a known state
            trace!(name = %self.name, %address, "address unchanged");
            self.stats.address_no_change_updates += 1;
            return;
        }
        let stale: Vec<NetworkAddress> = self
            .addresses
            .iter()
            .filter(|existing| existing.same_attachment(&address))
            .cloned()
            .collect();
        for record in stale {
            self.addresses.remove(&record);
        }
        trace!(name = %self.name, %address, "address added");
        self.addresses.insert(address);
        self.touch(DirtyFlag::NetworkAddresses);
        self.stats.addresses_added += 1;
    }

    /// Removes an address record by equality. Dropping the last IPv4 record
    /// also clears the gateway.
    pub fn remove_network_address(&mut self, address: &NetworkAddress) {
        if self.addresses.remove(address) {
            trace!(name = %self.name, %address, "address removed");
            self.touch(DirtyFlag::NetworkAddresses);
            self.stats.addresses_removed += 1;
            if !self.addresses.iter().any(NetworkAddress::is_v4) {
                self.clear_gateway_address(GatewayClearReason::AllIpv4AddressesRemoved);
            }
        } else {
            trace!(name = %self.name, %address, "address unknown");
        }
    }

    /// Time since the last dirty-flag transition.
    pub fn age(&self) -> Duration {
        self.last_changed.elapsed()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.any()
    }

    pub fn is_flag_dirty(&self, flag: DirtyFlag) -> bool {
        self.dirty.test(flag)
    }

    /// Snapshot of the dirty flags, counted as one check.
    pub fn dirty_flags(&mut self) -> DirtyFlags {
        self.stats.dirty_flag_checks += 1;
        self.dirty
    }

    pub fn clear_flag(&mut self, flag: DirtyFlag) {
        if self.dirty.test(flag) {
            self.dirty.reset(flag);
            self.stats.dirty_flag_clears += 1;
        }
    }

    pub fn clear_dirty_flags(&mut self) {
        self.stats.dirty_flag_clears += self.dirty.count() as u64;
        self.dirty.reset_all();
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Logs the per-field change counters.
    pub fn log_stats(&self) {
        use tracing::info;
        info!("{:-^38}", self.name);
        info!("name changes                         {}", self.stats.name_changes);
        info!("link flag changes                    {}", self.stats.link_flag_changes);
        info!("operational state changes            {}", self.stats.operational_state_changes);
        info!("mac address changes                  {}", self.stats.mac_address_changes);
        info!("broadcast address changes            {}", self.stats.broadcast_address_changes);
        info!("gateway address changes              {}", self.stats.gateway_address_changes);
        info!("gateway address clears               {}", self.stats.gateway_address_clears);
        info!("address no-change updates            {}", self.stats.address_no_change_updates);
        info!("addresses added                      {}", self.stats.addresses_added);
        info!("addresses removed                    {}", self.stats.addresses_removed);
        info!("dirty flag changes                   {}", self.stats.dirty_flag_changes);
        info!("dirty flag checks                    {}", self.stats.dirty_flag_checks);
        info!("dirty flag clears                    {}", self.stats.dirty_flag_clears);
        info!("{:-^38}", "-");
    }
}

impl fmt::Display for InterfaceStatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.link_flags)?;
        write!(f, " mac {} brd {}", self.mac_address, self.broadcast_address)?;
        if !self.addresses.is_empty() {
            f.write_str(" [")?;
            let mut first = true;
            for address in &self.addresses {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{address}")?;
                first = false;
            }
            f.write_str("]")?;
        }
        if let Some(gateway) = &self.gateway {
            write!(f, " default via {gateway}")?;
        }
        write!(
            f,
            " op {}({}) age {}ms dirty {}",
            self.operational_state,
            self.operational_state as u8,
            self.age().as_millis(),
            self.dirty
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifwatch_types::{AddressAssignmentProtocol, AddressFlag, AddressFlags, Scope};
    use pretty_assertions::assert_eq;

    fn record(ip: &str, prefix_len: u8, flags: AddressFlags) -> NetworkAddress {
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
    fn default_state_is_clean_and_nameless() {
        let tracker = InterfaceStatusTracker::new();
        assert!(!tracker.has_name());
        assert_eq!(tracker.name(), "");
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.operational_state(), OperationalState::Unknown);
        assert_eq!(tracker.mac_address(), MacAddress::ZERO);
        assert!(tracker.gateway_address().is_none());
    }

    #[test]
    fn setting_a_name_marks_it_dirty_once() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.set_name("eth0");
        assert!(tracker.has_name());
        assert!(tracker.is_flag_dirty(DirtyFlag::Name));
        tracker.clear_dirty_flags();
        tracker.set_name("eth0");
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.stats().name_changes, 1);
    }

    #[test]
    fn operational_state_transitions_set_the_flag() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.set_operational_state(OperationalState::Up);
        assert!(tracker.is_flag_dirty(DirtyFlag::OperationalState));
        tracker.clear_dirty_flags();
        tracker.set_operational_state(OperationalState::Up);
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn zero_mac_always_registers_as_a_change() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.set_mac_address(MacAddress::ZERO);
        assert!(tracker.is_flag_dirty(DirtyFlag::MacAddress));
        tracker.clear_dirty_flags();
        tracker.set_mac_address(MacAddress::ZERO);
        assert!(tracker.is_flag_dirty(DirtyFlag::MacAddress));

        let real = MacAddress::new([2, 0, 0, 0, 0, 1]);
        tracker.clear_dirty_flags();
        tracker.set_mac_address(real);
        tracker.clear_dirty_flags();
        tracker.set_mac_address(real);
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn address_replay_is_idempotent() {
        let mut tracker = InterfaceStatusTracker::new();
        let permanent = AddressFlags::empty().with(AddressFlag::Permanent);
        tracker.add_network_address(record("10.0.0.5", 24, permanent));
        assert!(tracker.is_flag_dirty(DirtyFlag::NetworkAddresses));
        tracker.clear_dirty_flags();

        tracker.add_network_address(record("10.0.0.5", 24, permanent));
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.stats().address_no_change_updates, 1);
        assert_eq!(tracker.network_addresses().len(), 1);
    }

    #[test]
    fn flag_update_replaces_the_prior_record() {
        let mut tracker = InterfaceStatusTracker::new();
        let permanent = AddressFlags::empty().with(AddressFlag::Permanent);
        let with_no_prefix_route = permanent.with(AddressFlag::NoPrefixRoute);
        tracker.add_network_address(record("10.0.0.5", 24, permanent));
        tracker.clear_dirty_flags();

        tracker.add_network_address(record("10.0.0.5", 24, with_no_prefix_route));
        assert!(tracker.is_flag_dirty(DirtyFlag::NetworkAddresses));
        assert_eq!(tracker.network_addresses().len(), 1);
        let stored = tracker.network_addresses().iter().next().unwrap();
        assert_eq!(stored.flags(), with_no_prefix_route);
    }

    #[test]
    fn unspecified_addresses_are_ignored() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.add_network_address(record("not-an-ip", 0, AddressFlags::empty()));
        assert!(tracker.network_addresses().is_empty());
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn removing_the_last_v4_address_clears_the_gateway() {
        let mut tracker = InterfaceStatusTracker::new();
        let v4 = record("10.0.0.5", 24, AddressFlags::empty());
        let v6 = record("fe80::1", 64, AddressFlags::empty());
        tracker.add_network_address(v4.clone());
        tracker.add_network_address(v6);
        tracker.set_gateway_address(IpAddress::parse("10.0.0.1"));
        tracker.clear_dirty_flags();

        tracker.remove_network_address(&v4);
        assert!(tracker.is_flag_dirty(DirtyFlag::NetworkAddresses));
        assert!(tracker.is_flag_dirty(DirtyFlag::GatewayAddress));
        assert!(tracker.gateway_address().is_none());
        assert_eq!(tracker.stats().gateway_address_clears, 1);
    }

    #[test]
    fn gateway_clearing_is_idempotent() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.set_gateway_address(IpAddress::parse("10.0.0.1"));
        tracker.clear_dirty_flags();
        tracker.clear_gateway_address(GatewayClearReason::RouteDeleted);
        assert!(tracker.is_flag_dirty(DirtyFlag::GatewayAddress));
        tracker.clear_dirty_flags();
        tracker.clear_gateway_address(GatewayClearReason::RouteDeleted);
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.stats().gateway_address_clears, 1);
    }

    #[test]
    fn removing_an_unknown_address_changes_nothing() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.remove_network_address(&record("10.0.0.9", 24, AddressFlags::empty()));
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.stats().addresses_removed, 0);
    }

    #[test]
    fn age_is_reset_by_dirty_transitions() {
        let mut tracker = InterfaceStatusTracker::new();
        tracker.set_name("eth0");
        assert!(tracker.age() < Duration::from_secs(1));
    }

    #[test]
    fn operational_state_wire_mapping() {
        assert_eq!(OperationalState::from_rtnl(0), OperationalState::Unknown);
        assert_eq!(OperationalState::from_rtnl(2), OperationalState::Down);
        assert_eq!(OperationalState::from_rtnl(6), OperationalState::Up);
        assert_eq!(OperationalState::from_rtnl(42), OperationalState::Unknown);
    }

    #[test]
    fn link_flags_decode_from_the_wire_word() {
        // IFF_UP | IFF_LOOPBACK | IFF_RUNNING
        let flags = LinkFlags::from_bits(0x1 | 0x8 | 0x40);
        assert!(flags.test(LinkFlag::Up));
        assert!(flags.test(LinkFlag::Loopback));
        assert!(flags.test(LinkFlag::Running));
        assert_eq!(flags.to_string(), "<Up|Loopback|Running>");
    }
}
