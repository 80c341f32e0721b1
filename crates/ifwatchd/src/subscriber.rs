//! The notification surface the monitor calls into.

use crate::tracker::{LinkFlags, NetworkAddresses, OperationalState};
use ifwatch_types::{Interface, IpAddress, MacAddress};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// A set of interface identities, as returned by enumeration and used for
/// subscription interest sets.
pub type Interfaces = BTreeSet<Interface>;

/// Receives change notifications from the monitor.
///
/// Every method defaults to a no-op so new notifications can be added
/// without breaking existing consumers. Methods run inline with message
/// processing on the monitor's thread and must not block.
pub trait Subscriber {
    fn on_interface_added(&mut self, _interface: &Interface) {}

    fn on_interface_removed(&mut self, _interface: &Interface) {}

    fn on_interface_name_changed(&mut self, _interface: &Interface) {}

    fn on_link_flags_changed(&mut self, _interface: &Interface, _flags: LinkFlags) {}

    fn on_operational_state_changed(&mut self, _interface: &Interface, _state: OperationalState) {}

    fn on_network_addresses_changed(
        &mut self,
        _interface: &Interface,
        _addresses: &NetworkAddresses,
    ) {
    }

    fn on_gateway_address_changed(&mut self, _interface: &Interface, _gateway: Option<IpAddress>) {}

    fn on_mac_address_changed(&mut self, _interface: &Interface, _address: MacAddress) {}

    fn on_broadcast_address_changed(&mut self, _interface: &Interface, _address: MacAddress) {}
}

/// Shared handle under which a subscriber is registered. Identity is by
/// allocation, so one subscriber can be registered at most once.
pub type SubscriberHandle = Rc<RefCell<dyn Subscriber>>;
