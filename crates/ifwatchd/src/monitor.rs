//! The rtnetlink monitor engine: socket lifecycle, dump state machine,
//! message dispatch, interface trackers, and subscriber fan-out.

use crate::attributes::{align4, AttributeTable};
use crate::config::{self, RuntimeFlag, RuntimeFlags};
use crate::error::MonitorError;
use crate::netlink::{
    is_dump_request, rewrite_sequence_number, write_dump_request, AddressHeader, LinkHeader,
    RouteHeader, RtnetlinkSocket, AF_INET, AF_INET6, ARPHRD_ETHER, ARPHRD_IEEE80211,
    DUMP_REQUEST_LEN, IFA_ADDRESS, IFA_ATTR_MAX, IFA_BROADCAST, IFA_FLAGS, IFA_LABEL, IFA_LOCAL,
    IFA_PROTO, IFLA_ADDRESS, IFLA_ATTR_MAX, IFLA_BROADCAST, IFLA_CARRIER, IFLA_IFALIAS,
    IFLA_IFNAME, IFLA_OPERSTATE, NETLINK_HEADER_LEN, NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP,
    NLMSG_OVERRUN, RTA_ATTR_MAX, RTA_GATEWAY, RTA_OIF, RTM_DELADDR, RTM_DELLINK, RTM_DELROUTE,
    RTM_GETADDR, RTM_GETLINK, RTM_GETROUTE, RTM_NEWADDR, RTM_NEWLINK, RTM_NEWROUTE,
    RTNH_F_LINKDOWN, RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV6_IFADDR,
    RTNLGRP_IPV6_ROUTE, RTNLGRP_LINK, RTNLGRP_NOTIFY,
};
use crate::subscriber::{Interfaces, Subscriber, SubscriberHandle};
use crate::tracker::{
    DirtyFlag, GatewayClearReason, InterfaceStatusTracker, LinkFlags, OperationalState,
};
use crate::watchable::{panic_label, WatchToken, Watchable};
use ifwatch_types::{
    AddressAssignmentProtocol, AddressFlags, Interface, IpAddress, NetworkAddress, Scope,
};
use netlink_packet_core::NetlinkBuffer;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// A small multiple of the kernel's default datagram size; never resized.
const RECEIVE_BUFFER_SIZE: usize = 32 * 1024;
const SEND_BUFFER_SIZE: usize = 4 * 1024;

const DUMP_RETRY_DELAY: Duration = Duration::from_millis(10);

fn fatal(context: &str, error: &MonitorError) -> ! {
    let errno = error.raw_os_error().unwrap_or(0);
    error!(errno, error = %error, "{} failed, aborting", context);
    process::abort();
}

fn fatal_errno(context: &str, errno: i32) -> ! {
    let message = std::io::Error::from_raw_os_error(errno);
    error!(errno, error = %message, "{}", context);
    process::abort();
}

fn should_retry_dump(errno: i32) -> bool {
    matches!(errno, libc::EPROTO | libc::EINTR | libc::EAGAIN | libc::EBUSY)
}

/// Calls one subscriber method, catching and logging any panic so the rest
/// of the fan-out still runs.
fn deliver<F: FnOnce(&mut dyn Subscriber)>(subscriber: &SubscriberHandle, callback: F) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut *subscriber.borrow_mut())));
    if let Err(payload) = outcome {
        error!(
            reason = panic_label(payload.as_ref()),
            "subscriber panicked during notification"
        );
    }
}

fn dump_packet(data: &[u8]) {
    for (line, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        debug!("{:04x}  {}", line * 16, hex.join(" "));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    EnumeratingLinks,
    EnumeratingAddresses,
    EnumeratingRoutes,
    WaitingForChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatagramOutcome {
    Continue,
    BreakLoop,
}

/// Wire-level counters, logged on demand.
#[derive(Debug, Clone)]
pub struct MonitorStats {
    pub start_time: Instant,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub msgs_received: u64,
    pub msgs_discarded: u64,
    pub seen_attributes: u64,
    pub unknown_attributes: u64,
    pub link_messages_seen: u64,
    pub address_messages_seen: u64,
    pub route_messages_seen: u64,
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            msgs_received: 0,
            msgs_discarded: 0,
            seen_attributes: 0,
            unknown_attributes: 0,
            link_messages_seen: 0,
            address_messages_seen: 0,
            route_messages_seen: 0,
        }
    }
}

/// State shared between the monitor and its stop handles. Taking the socket
/// out of the option closes it exactly once.
struct ShutdownState {
    running: Cell<bool>,
    socket: RefCell<Option<RtnetlinkSocket>>,
}

/// Cloneable handle that can stop the monitor, including from inside a
/// subscriber callback during fan-out.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Rc<ShutdownState>,
}

impl MonitorHandle {
    /// Closes the socket and flips the running flag. Idempotent.
    pub fn stop(&self) {
        debug!("stopping network monitor");
        self.shared.socket.borrow_mut().take();
        self.shared.running.set(false);
    }
}

/// Observes kernel network-interface state over NETLINK_ROUTE and fans out
/// deduplicated change notifications to registered subscribers.
///
/// Single-threaded by design: one thread owns the monitor and runs
/// enumeration, parsing, tracker mutation, and subscriber callbacks inline.
pub struct NetworkMonitor {
    shared: Rc<ShutdownState>,
    receive_buffer: Vec<u8>,
    send_buffer: Vec<u8>,
    sequence_number: u32,
    dump_in_flight: bool,
    cache_state: CacheState,
    trackers: BTreeMap<u32, InterfaceStatusTracker>,
    subscribers: Vec<(SubscriberHandle, Interfaces)>,
    interfaces_listeners: Watchable<Interfaces>,
    options: RuntimeFlags,
    stats: MonitorStats,
}

impl NetworkMonitor {
    /// Opens the netlink socket and joins the multicast groups selected by
    /// `options`. Socket setup failure is fatal: it logs the errno and
    /// aborts the process.
    pub fn new(options: RuntimeFlags) -> Self {
        let options = config::reconcile_family_preference(options);
        let mut groups = vec![RTNLGRP_LINK, RTNLGRP_NOTIFY];
        if !options.test(RuntimeFlag::PreferredFamilyV6) {
            groups.push(RTNLGRP_IPV4_IFADDR);
            groups.push(RTNLGRP_IPV4_ROUTE);
        }
        if !options.test(RuntimeFlag::PreferredFamilyV4) {
            groups.push(RTNLGRP_IPV6_IFADDR);
            groups.push(RTNLGRP_IPV6_ROUTE);
        }
        debug!(?groups, "joining rtnetlink multicast groups");
        let socket =
            match RtnetlinkSocket::open(&groups, options.test(RuntimeFlag::NonBlocking)) {
                Ok(socket) => socket,
                Err(error) => fatal("netlink socket setup", &error),
            };
        Self::with_socket(Some(socket), options)
    }

    fn with_socket(socket: Option<RtnetlinkSocket>, options: RuntimeFlags) -> Self {
        Self {
            shared: Rc::new(ShutdownState {
                running: Cell::new(false),
                socket: RefCell::new(socket),
            }),
            receive_buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
            send_buffer: vec![0u8; SEND_BUFFER_SIZE],
            sequence_number: 0,
            dump_in_flight: false,
            cache_state: CacheState::EnumeratingLinks,
            trackers: BTreeMap::new(),
            subscribers: Vec::new(),
            interfaces_listeners: Watchable::new(),
            options,
            stats: MonitorStats::default(),
        }
    }

    /// Engine without a socket, driven directly with synthetic datagrams.
    #[cfg(test)]
    pub(crate) fn detached(options: RuntimeFlags) -> Self {
        Self::with_socket(None, config::reconcile_family_preference(options))
    }

    /// A handle that can stop this monitor from anywhere on the owning
    /// thread, including from inside a subscriber callback.
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    /// The socket file descriptor, for integration with an external
    /// readiness mechanism in non-blocking mode.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.shared
            .socket
            .borrow()
            .as_ref()
            .map(RtnetlinkSocket::as_raw_fd)
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    fn socket_open(&self) -> bool {
        self.shared.socket.borrow().is_some()
    }

    fn is_enumerating(&self) -> bool {
        self.cache_state != CacheState::WaitingForChanges
    }

    /// Drives the dump state machine to completion if initial enumeration
    /// has not finished yet, then returns the tracked interface identities.
    pub fn enumerate_interfaces(&mut self) -> Interfaces {
        if self.cache_state == CacheState::WaitingForChanges {
            return self.tracked_interfaces();
        }
        if !self.dump_in_flight {
            debug!("requesting RTM_GETLINK");
            self.send_dump_request(RTM_GETLINK);
        }
        while self.cache_state != CacheState::WaitingForChanges && self.socket_open() {
            self.receive_and_process();
        }
        self.tracked_interfaces()
    }

    /// Registers a subscriber for the given interfaces and immediately
    /// delivers an initial snapshot for every tracked interface in the
    /// interest set.
    pub fn subscribe(&mut self, interfaces: Interfaces, subscriber: SubscriberHandle) {
        if interfaces.is_empty() {
            warn!("cannot subscribe to an empty interface set");
            return;
        }
        debug!(count = interfaces.len(), "subscribing to interfaces");
        match self
            .subscribers
            .iter()
            .position(|(existing, _)| Rc::ptr_eq(existing, &subscriber))
        {
            Some(slot) => self.subscribers[slot].1 = interfaces.clone(),
            None => self.subscribers.push((subscriber.clone(), interfaces.clone())),
        }
        self.deliver_snapshot(&subscriber, &interfaces);
    }

    /// Replaces a subscriber's interest set. An empty set unsubscribes.
    pub fn update_subscription(&mut self, interfaces: Interfaces, subscriber: &SubscriberHandle) {
        if interfaces.is_empty() {
            self.unsubscribe(subscriber);
            return;
        }
        match self
            .subscribers
            .iter()
            .position(|(existing, _)| Rc::ptr_eq(existing, subscriber))
        {
            Some(slot) => {
                self.subscribers[slot].1 = interfaces.clone();
                debug!(count = interfaces.len(), "updated subscription");
                self.deliver_snapshot(subscriber, &interfaces);
            }
            None => warn!("cannot update subscription for an unknown subscriber"),
        }
    }

    pub fn unsubscribe(&mut self, subscriber: &SubscriberHandle) {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|(existing, _)| !Rc::ptr_eq(existing, subscriber));
        if self.subscribers.len() == before {
            warn!("cannot unsubscribe an unknown subscriber");
        }
    }

    /// Registers a listener invoked with the full set of tracked interfaces
    /// whenever the tracker map grows or shrinks.
    pub fn add_interfaces_listener(
        &self,
        listener: impl FnMut(&Interfaces) + 'static,
    ) -> WatchToken {
        self.interfaces_listeners.add_listener(listener)
    }

    pub fn remove_interfaces_listener(&self, token: WatchToken) {
        self.interfaces_listeners.remove_listener(token);
    }

    /// Runs enumeration and then processes kernel notifications until
    /// stopped.
    pub fn run(&mut self) {
        // stop() may already have closed the socket
        if !self.socket_open() {
            return;
        }
        self.shared.running.set(true);
        trace!("starting network monitor");
        self.enumerate_interfaces();
        trace!("watching for changes");
        while self.shared.running.get() {
            self.receive_and_process();
            if !self.socket_open() {
                break;
            }
        }
    }

    /// Stops the monitor: closes the socket and flips the running flag.
    pub fn stop(&mut self) {
        self.handle().stop();
    }

    /// Receives and processes datagrams until the socket would block, the
    /// current dump phase completes, or the monitor is stopped. Each
    /// datagram's dirty flags are fanned out before the next one is read.
    pub fn receive_and_process(&mut self) {
        loop {
            let Some(received) = self.try_receive() else {
                return;
            };
            if received == 0 {
                return;
            }
            self.stats.packets_received += 1;
            self.stats.bytes_received += received as u64;
            if self.options.test(RuntimeFlag::DumpPackets) {
                dump_packet(&self.receive_buffer[..received]);
            }
            let buffer = std::mem::take(&mut self.receive_buffer);
            let outcome = self.process_datagram(&buffer[..received]);
            self.receive_buffer = buffer;
            self.log_stats_if_enabled();
            self.notify_changes();
            if outcome == DatagramOutcome::BreakLoop || !self.socket_open() {
                return;
            }
        }
    }

    fn try_receive(&mut self) -> Option<usize> {
        let result = {
            let socket_ref = self.shared.socket.borrow();
            let socket = socket_ref.as_ref()?;
            socket.recv(&mut self.receive_buffer)
        };
        match result {
            Ok(received) => {
                trace!(received, "received datagram");
                Some(received)
            }
            Err(error) if error.is_would_block() => None,
            Err(error) => {
                let errno = error.raw_os_error().unwrap_or(0);
                if errno == libc::ENOBUFS {
                    warn!("kernel receive queue overflowed, re-running full enumeration");
                    self.resync();
                    return None;
                }
                if errno == libc::EINTR {
                    return None;
                }
                if self.is_enumerating() {
                    fatal("netlink receive during enumeration", &error);
                }
                warn!(error = %error, "netlink receive failed");
                None
            }
        }
    }

    /// Splits one datagram into messages and dispatches them in wire order.
    fn process_datagram(&mut self, data: &[u8]) -> DatagramOutcome {
        let expected_sequence = if self.is_enumerating() {
            self.sequence_number
        } else {
            0
        };
        let mut offset = 0;
        while offset + NETLINK_HEADER_LEN <= data.len() {
            let slice = &data[offset..];
            let header = match NetlinkBuffer::new_checked(slice) {
                Ok(header) => header,
                Err(error) => {
                    warn!(error = %error, "malformed netlink header, dropping rest of datagram");
                    break;
                }
            };
            let length = header.length() as usize;
            if length < NETLINK_HEADER_LEN || length > slice.len() {
                warn!(length, "netlink message length out of bounds, dropping rest of datagram");
                break;
            }
            let message_type = header.message_type();
            let sequence = header.sequence_number();
            let payload = &slice[NETLINK_HEADER_LEN..length];
            offset += align4(length);

            self.stats.msgs_received += 1;
            if expected_sequence != 0 && sequence != expected_sequence {
                trace!(sequence, expected_sequence, "ignoring message outside the current dump");
                self.stats.msgs_discarded += 1;
                continue;
            }

            match message_type {
                NLMSG_NOOP => continue,
                NLMSG_OVERRUN => {
                    warn!("kernel reported a receive overrun");
                    self.stats.msgs_discarded += 1;
                }
                NLMSG_DONE => return self.advance_dump_state(),
                NLMSG_ERROR => {
                    let code = if payload.len() >= 4 {
                        i32::from_ne_bytes([payload[0], payload[1], payload[2], payload[3]])
                    } else {
                        0
                    };
                    if code == 0 {
                        trace!("netlink ack");
                        continue;
                    }
                    let errno = -code;
                    if self.is_enumerating() {
                        if should_retry_dump(errno) {
                            info!(errno, "retrying interrupted dump request");
                            self.retry_last_dump_request();
                            return DatagramOutcome::BreakLoop;
                        }
                        fatal_errno(
                            "kernel reported an unrecoverable error during enumeration",
                            errno,
                        );
                    }
                    warn!(errno, "kernel reported an error");
                    self.stats.msgs_discarded += 1;
                }
                _ => self.dispatch_route_message(message_type, payload),
            }
        }
        DatagramOutcome::Continue
    }

    /// Advances links → addresses → routes → steady state on end-of-dump.
    fn advance_dump_state(&mut self) -> DatagramOutcome {
        self.dump_in_flight = false;
        match self.cache_state {
            CacheState::EnumeratingLinks => {
                self.cache_state = CacheState::EnumeratingAddresses;
                debug!("requesting RTM_GETADDR");
                self.send_dump_request(RTM_GETADDR);
                DatagramOutcome::Continue
            }
            CacheState::EnumeratingAddresses => {
                self.cache_state = CacheState::EnumeratingRoutes;
                debug!("requesting RTM_GETROUTE");
                self.send_dump_request(RTM_GETROUTE);
                DatagramOutcome::Continue
            }
            CacheState::EnumeratingRoutes => {
                self.cache_state = CacheState::WaitingForChanges;
                debug!("initial enumeration complete");
                debug!(count = self.trackers.len(), "tracking interfaces");
                self.log_stats_if_enabled();
                DatagramOutcome::BreakLoop
            }
            CacheState::WaitingForChanges => {
                warn!("unexpected end-of-dump outside enumeration");
                DatagramOutcome::BreakLoop
            }
        }
    }

    fn send_dump_request(&mut self, message_type: u16) {
        let sequence = self.next_sequence_number();
        write_dump_request(&mut self.send_buffer, message_type, sequence);
        self.send_current_request();
    }

    /// Re-sends the dump request sitting in the send buffer after a
    /// transient kernel error: validate it, flush the socket, back off
    /// briefly, and rewrite the header with a fresh sequence number.
    fn retry_last_dump_request(&mut self) {
        if !is_dump_request(&self.send_buffer[..DUMP_REQUEST_LEN]) {
            warn!("last request was not a dump, skipping retry");
            return;
        }
        {
            let socket_ref = self.shared.socket.borrow();
            if let Some(socket) = socket_ref.as_ref() {
                let drained = socket.drain(&mut self.receive_buffer);
                if drained > 0 {
                    trace!(drained, "flushed stale datagrams before retrying");
                }
            }
        }
        std::thread::sleep(DUMP_RETRY_DELAY);
        let sequence = self.next_sequence_number();
        rewrite_sequence_number(&mut self.send_buffer[..DUMP_REQUEST_LEN], sequence);
        self.send_current_request();
    }

    fn send_current_request(&mut self) {
        let socket_ref = self.shared.socket.borrow();
        // stop() may race us from within a listener
        let Some(socket) = socket_ref.as_ref() else {
            return;
        };
        match socket.send(&self.send_buffer[..DUMP_REQUEST_LEN]) {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
                self.dump_in_flight = true;
            }
            Err(error) => fatal("netlink send", &error),
        }
    }

    fn next_sequence_number(&mut self) -> u32 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        if self.sequence_number == 0 {
            // zero stays the "accept any sequence" sentinel
            self.sequence_number = 1;
        }
        self.sequence_number
    }

    /// Full re-enumeration, the recovery path for a receive-queue overflow.
    fn resync(&mut self) {
        self.cache_state = CacheState::EnumeratingLinks;
        self.dump_in_flight = false;
        debug!("requesting RTM_GETLINK");
        self.send_dump_request(RTM_GETLINK);
    }

    fn dispatch_route_message(&mut self, message_type: u16, payload: &[u8]) {
        match message_type {
            RTM_NEWLINK | RTM_DELLINK => self.parse_link_message(message_type, payload),
            RTM_NEWADDR | RTM_DELADDR => self.parse_address_message(message_type, payload),
            RTM_NEWROUTE | RTM_DELROUTE => self.parse_route_message(message_type, payload),
            _ => {
                warn!(message_type, "ignoring unexpected message type");
                self.stats.msgs_discarded += 1;
            }
        }
    }

    /// Creates the tracker for `index` if needed (announcing the new
    /// interface) and keeps its name current.
    fn ensure_tracker(&mut self, index: u32, name: Option<&str>) {
        let is_new = !self.trackers.contains_key(&index);
        {
            let tracker = self.trackers.entry(index).or_default();
            if let Some(name) = name {
                tracker.set_name(name);
            }
        }
        if is_new {
            let tracker_name = self
                .trackers
                .get(&index)
                .map(|tracker| tracker.name().to_owned())
                .unwrap_or_default();
            debug!(index, name = %tracker_name, "added interface tracker");
            self.notify_interface_added(&Interface::new(index, tracker_name));
        }
    }

    fn parse_link_message(&mut self, message_type: u16, payload: &[u8]) {
        let Some(header) = LinkHeader::parse(payload) else {
            warn!("truncated link message");
            self.stats.msgs_discarded += 1;
            return;
        };
        trace!(index = header.index, "parsing link message");
        self.stats.link_messages_seen += 1;
        let attrs = AttributeTable::parse(payload, LinkHeader::LEN, IFLA_ATTR_MAX);
        self.stats.seen_attributes += attrs.seen();
        self.stats.unknown_attributes += attrs.unknown();
        let name = attrs.get_string(IFLA_IFNAME);

        if header.link_type != ARPHRD_ETHER && header.link_type != ARPHRD_IEEE80211 {
            if !self.options.test(RuntimeFlag::IncludeNonIeee802) {
                debug!(
                    index = header.index,
                    name = name.as_deref().unwrap_or("unknown"),
                    link_type = header.link_type,
                    "discarding non-IEEE 802 interface"
                );
                self.stats.msgs_discarded += 1;
                return;
            }
            trace!(
                index = header.index,
                name = name.as_deref().unwrap_or("unknown"),
                "including non-IEEE 802 interface"
            );
        }

        if message_type == RTM_DELLINK {
            trace!(index = header.index, "removing interface tracker");
            self.trackers.remove(&header.index);
            let display_name = name.unwrap_or_else(|| "unknown".to_owned());
            self.notify_interface_removed(&Interface::new(header.index, display_name));
            return;
        }

        self.ensure_tracker(header.index, name.as_deref());
        let Some(tracker) = self.trackers.get_mut(&header.index) else {
            return;
        };
        tracker.update_link_flags(LinkFlags::from_bits(header.flags));
        if let Some(state) = attrs.get_u8(IFLA_OPERSTATE) {
            tracker.set_operational_state(OperationalState::from_rtnl(state));
        }
        if let Some(mac) = attrs.get_mac(IFLA_ADDRESS) {
            tracker.set_mac_address(mac);
        } else {
            warn!(index = header.index, name = %tracker.name(), "link message carried no MAC address");
        }
        if let Some(broadcast) = attrs.get_mac(IFLA_BROADCAST) {
            tracker.set_broadcast_address(broadcast);
        } else {
            warn!(index = header.index, name = %tracker.name(), "link message carried no broadcast address");
        }
        if let Some(carrier) = attrs.get_u8(IFLA_CARRIER) {
            trace!(index = header.index, carrier, "link carrier state");
        }
        if let Some(alias) = attrs.get_string(IFLA_IFALIAS) {
            debug!(index = header.index, alias = %alias, "interface alias");
        }
    }

    fn parse_address_message(&mut self, message_type: u16, payload: &[u8]) {
        let Some(header) = AddressHeader::parse(payload) else {
            warn!("truncated address message");
            self.stats.msgs_discarded += 1;
            return;
        };
        trace!(index = header.index, "parsing address message");
        self.stats.address_messages_seen += 1;
        if !self.trackers.contains_key(&header.index) {
            self.stats.msgs_discarded += 1;
            return;
        }
        if self.options.test(RuntimeFlag::PreferredFamilyV4) && header.family != AF_INET {
            self.stats.msgs_discarded += 1;
            return;
        }
        if self.options.test(RuntimeFlag::PreferredFamilyV6) && header.family != AF_INET6 {
            self.stats.msgs_discarded += 1;
            return;
        }

        let attrs = AttributeTable::parse(payload, AddressHeader::LEN, IFA_ATTR_MAX);
        self.stats.seen_attributes += attrs.seen();
        self.stats.unknown_attributes += attrs.unknown();

        self.ensure_tracker(header.index, attrs.get_string(IFA_LABEL).as_deref());

        // the byte-wide header field is superseded by IFA_FLAGS when present
        let mut flags = u32::from(header.flags);
        if let Some(wide) = attrs.get_u32(IFA_FLAGS) {
            flags = wide;
        }
        let protocol = attrs
            .get_u8(IFA_PROTO)
            .map(AddressAssignmentProtocol::from_rtnl)
            .unwrap_or_default();
        let broadcast = attrs.get_ipv4(IFA_BROADCAST);
        let mut ip = IpAddress::Unspecified;
        if let Some(local) = attrs.get_ipv4(IFA_LOCAL) {
            ip = local;
        }
        if let Some(address) = attrs.get_ipv6(IFA_ADDRESS) {
            ip = address;
        }
        let record = NetworkAddress::new(
            ip,
            broadcast,
            header.prefix_len,
            Scope::from_rtnl(header.scope),
            AddressFlags::from_bits(flags),
            protocol,
        );
        let Some(tracker) = self.trackers.get_mut(&header.index) else {
            return;
        };
        if message_type == RTM_NEWADDR {
            tracker.add_network_address(record);
        } else {
            tracker.remove_network_address(&record);
        }
    }

    /// IPv4 routes only; the gateway cache is deliberately v4-scoped.
    fn parse_route_message(&mut self, message_type: u16, payload: &[u8]) {
        trace!("parsing route message");
        self.stats.route_messages_seen += 1;
        let Some(header) = RouteHeader::parse(payload) else {
            warn!("truncated route message");
            self.stats.msgs_discarded += 1;
            return;
        };
        if header.family != AF_INET {
            self.stats.msgs_discarded += 1;
            return;
        }

        let attrs = AttributeTable::parse(payload, RouteHeader::LEN, RTA_ATTR_MAX);
        self.stats.seen_attributes += attrs.seen();
        self.stats.unknown_attributes += attrs.unknown();
        let out_interface = attrs.get_u32(RTA_OIF);
        let gateway = attrs.get_ipv4(RTA_GATEWAY);

        if message_type == RTM_DELROUTE {
            let Some(index) = out_interface else {
                return;
            };
            if header.flags & RTNH_F_LINKDOWN != 0 {
                if let Some(tracker) = self.trackers.get_mut(&index) {
                    tracker.clear_gateway_address(GatewayClearReason::LinkDown);
                }
            } else if gateway.is_some() {
                if let Some(tracker) = self.trackers.get_mut(&index) {
                    tracker.clear_gateway_address(GatewayClearReason::RouteDeleted);
                }
            }
            return;
        }

        if let (Some(index), Some(gateway)) = (out_interface, gateway) {
            if let Some(tracker) = self.trackers.get_mut(&index) {
                tracker.set_gateway_address(gateway);
            }
        }
    }

    /// One fan-out pass: for every tracker with dirty flags, call exactly
    /// the matching notification methods of every interested subscriber, in
    /// a fixed order, then clear all dirty flags.
    fn notify_changes(&mut self) {
        for (index, tracker) in self.trackers.iter_mut() {
            let flags = tracker.dirty_flags();
            if flags.none() {
                continue;
            }
            let interface = Interface::new(*index, tracker.name().to_owned());
            trace!(%interface, %flags, "fanning out changes");
            let renamed = flags.test(DirtyFlag::Name);
            for (subscriber, interests) in &self.subscribers {
                // a rename also matches interests registered under the old
                // name, so subscribers observe the new identity
                let interested = interests.contains(&interface)
                    || (renamed && interests.iter().any(|i| i.index() == *index));
                if !interested {
                    continue;
                }
                if flags.test(DirtyFlag::Name) {
                    deliver(subscriber, |s| s.on_interface_name_changed(&interface));
                }
                if flags.test(DirtyFlag::LinkFlags) {
                    let value = tracker.link_flags();
                    deliver(subscriber, |s| s.on_link_flags_changed(&interface, value));
                }
                if flags.test(DirtyFlag::OperationalState) {
                    let value = tracker.operational_state();
                    deliver(subscriber, |s| {
                        s.on_operational_state_changed(&interface, value)
                    });
                }
                if flags.test(DirtyFlag::NetworkAddresses) {
                    deliver(subscriber, |s| {
                        s.on_network_addresses_changed(&interface, tracker.network_addresses())
                    });
                }
                if flags.test(DirtyFlag::GatewayAddress) {
                    let value = tracker.gateway_address();
                    deliver(subscriber, |s| {
                        s.on_gateway_address_changed(&interface, value)
                    });
                }
                if flags.test(DirtyFlag::MacAddress) {
                    let value = tracker.mac_address();
                    deliver(subscriber, |s| s.on_mac_address_changed(&interface, value));
                }
                if flags.test(DirtyFlag::BroadcastAddress) {
                    let value = tracker.broadcast_address();
                    deliver(subscriber, |s| {
                        s.on_broadcast_address_changed(&interface, value)
                    });
                }
            }
            tracker.clear_dirty_flags();
        }
    }

    /// Initial snapshot for a fresh (or refreshed) subscription.
    fn deliver_snapshot(&self, subscriber: &SubscriberHandle, interests: &Interfaces) {
        for (index, tracker) in self.trackers.iter() {
            let interface = Interface::new(*index, tracker.name().to_owned());
            if !interests.contains(&interface) {
                continue;
            }
            deliver(subscriber, |s| {
                s.on_operational_state_changed(&interface, tracker.operational_state())
            });
            deliver(subscriber, |s| {
                s.on_network_addresses_changed(&interface, tracker.network_addresses())
            });
            deliver(subscriber, |s| {
                s.on_gateway_address_changed(&interface, tracker.gateway_address())
            });
            deliver(subscriber, |s| {
                s.on_mac_address_changed(&interface, tracker.mac_address())
            });
            deliver(subscriber, |s| {
                s.on_broadcast_address_changed(&interface, tracker.broadcast_address())
            });
            deliver(subscriber, |s| {
                s.on_link_flags_changed(&interface, tracker.link_flags())
            });
        }
    }

    fn notify_interface_added(&self, interface: &Interface) {
        for (subscriber, _) in &self.subscribers {
            deliver(subscriber, |s| s.on_interface_added(interface));
        }
        self.broadcast_interfaces();
    }

    fn notify_interface_removed(&self, interface: &Interface) {
        for (subscriber, _) in &self.subscribers {
            deliver(subscriber, |s| s.on_interface_removed(interface));
        }
        self.broadcast_interfaces();
    }

    fn broadcast_interfaces(&self) {
        if self.interfaces_listeners.has_listeners() {
            self.interfaces_listeners.notify(&self.tracked_interfaces());
        }
    }

    fn tracked_interfaces(&self) -> Interfaces {
        self.trackers
            .iter()
            .map(|(index, tracker)| Interface::new(*index, tracker.name().to_owned()))
            .collect()
    }

    fn log_stats_if_enabled(&self) {
        if self.is_enumerating() || !self.options.test(RuntimeFlag::StatsForNerds) {
            return;
        }
        info!("{:=^48}", " stats for nerds ");
        info!("uptime    {}ms", self.stats.start_time.elapsed().as_millis());
        info!(
            "sent      {} bytes in {} packets",
            self.stats.bytes_sent, self.stats.packets_sent
        );
        info!(
            "received  {} bytes in {} packets",
            self.stats.bytes_received, self.stats.packets_received
        );
        info!("received  {} rtnl messages", self.stats.msgs_received);
        info!("discarded {} rtnl messages", self.stats.msgs_discarded);
        info!("seen      {} attribute entries", self.stats.seen_attributes);
        info!("          {} attributes unknown", self.stats.unknown_attributes);
        info!("          {} link messages", self.stats.link_messages_seen);
        info!("          {} address messages", self.stats.address_messages_seen);
        info!("          {} route messages", self.stats.route_messages_seen);
        info!("{:=^48}", " interface details ");
        for tracker in self.trackers.values() {
            info!("{tracker}");
            tracker.log_stats();
        }
        info!("{:=^48}", "=");
    }
}
