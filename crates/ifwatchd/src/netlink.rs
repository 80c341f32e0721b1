//! NETLINK_ROUTE socket plumbing and wire-format definitions.

use crate::error::{MonitorError, Result};
use netlink_packet_core::{NetlinkBuffer, NLM_F_DUMP, NLM_F_REQUEST};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket};
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, trace};

pub const NETLINK_HEADER_LEN: usize = 16;

// Control message types.
pub const NLMSG_NOOP: u16 = libc::NLMSG_NOOP as u16;
pub const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;
pub const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
pub const NLMSG_OVERRUN: u16 = libc::NLMSG_OVERRUN as u16;

// Route-netlink message types.
pub const RTM_NEWLINK: u16 = libc::RTM_NEWLINK;
pub const RTM_DELLINK: u16 = libc::RTM_DELLINK;
pub const RTM_GETLINK: u16 = libc::RTM_GETLINK;
pub const RTM_NEWADDR: u16 = libc::RTM_NEWADDR;
pub const RTM_DELADDR: u16 = libc::RTM_DELADDR;
pub const RTM_GETADDR: u16 = libc::RTM_GETADDR;
pub const RTM_NEWROUTE: u16 = libc::RTM_NEWROUTE;
pub const RTM_DELROUTE: u16 = libc::RTM_DELROUTE;
pub const RTM_GETROUTE: u16 = libc::RTM_GETROUTE;

// Multicast groups, by group number (add_membership takes the number, not
// the 1 << (n - 1) mask used with plain bind).
pub const RTNLGRP_LINK: u32 = 1;
pub const RTNLGRP_NOTIFY: u32 = 2;
pub const RTNLGRP_IPV4_IFADDR: u32 = 5;
pub const RTNLGRP_IPV4_ROUTE: u32 = 7;
pub const RTNLGRP_IPV6_IFADDR: u32 = 9;
pub const RTNLGRP_IPV6_ROUTE: u32 = 11;

// Link attribute kinds.
pub const IFLA_ADDRESS: u16 = 1;
pub const IFLA_BROADCAST: u16 = 2;
pub const IFLA_IFNAME: u16 = 3;
pub const IFLA_OPERSTATE: u16 = 16;
pub const IFLA_IFALIAS: u16 = 20;
pub const IFLA_EXT_MASK: u16 = 29;
pub const IFLA_CARRIER: u16 = 33;
/// Highest link attribute kind worth indexing.
pub const IFLA_ATTR_MAX: u16 = 64;

// Address attribute kinds.
pub const IFA_ADDRESS: u16 = 1;
pub const IFA_LOCAL: u16 = 2;
pub const IFA_LABEL: u16 = 3;
pub const IFA_BROADCAST: u16 = 4;
pub const IFA_FLAGS: u16 = 8;
pub const IFA_PROTO: u16 = 11;
/// Highest address attribute kind worth indexing.
pub const IFA_ATTR_MAX: u16 = 16;

// Route attribute kinds.
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
/// Highest route attribute kind worth indexing.
pub const RTA_ATTR_MAX: u16 = 32;

// Hardware types accepted by default.
pub const ARPHRD_ETHER: u16 = 1;
pub const ARPHRD_IEEE80211: u16 = 801;

/// Asks the kernel to omit the heavyweight per-link statistics blob.
pub const RTEXT_FILTER_SKIP_STATS: u32 = 1 << 3;

/// Route flag bit: the next hop's carrier is down.
pub const RTNH_F_LINKDOWN: u32 = 16;

pub const AF_UNSPEC: u8 = libc::AF_UNSPEC as u8;
pub const AF_INET: u8 = libc::AF_INET as u8;
pub const AF_INET6: u8 = libc::AF_INET6 as u8;

/// Fixed header of a link message (struct ifinfomsg).
#[derive(Debug, Clone, Copy)]
pub struct LinkHeader {
    pub family: u8,
    pub link_type: u16,
    pub index: u32,
    pub flags: u32,
    pub change_mask: u32,
}

impl LinkHeader {
    pub const LEN: usize = 16;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::LEN {
            return None;
        }
        Some(Self {
            family: payload[0],
            link_type: u16::from_ne_bytes([payload[2], payload[3]]),
            index: i32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]) as u32,
            flags: u32::from_ne_bytes([payload[8], payload[9], payload[10], payload[11]]),
            change_mask: u32::from_ne_bytes([payload[12], payload[13], payload[14], payload[15]]),
        })
    }
}

/// Fixed header of an address message (struct ifaddrmsg).
#[derive(Debug, Clone, Copy)]
pub struct AddressHeader {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
}

impl AddressHeader {
    pub const LEN: usize = 8;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::LEN {
            return None;
        }
        Some(Self {
            family: payload[0],
            prefix_len: payload[1],
            flags: payload[2],
            scope: payload[3],
            index: u32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]),
        })
    }
}

/// Fixed header of a route message (struct rtmsg).
#[derive(Debug, Clone, Copy)]
pub struct RouteHeader {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub tos: u8,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
    pub flags: u32,
}

impl RouteHeader {
    pub const LEN: usize = 12;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::LEN {
            return None;
        }
        Some(Self {
            family: payload[0],
            dst_len: payload[1],
            src_len: payload[2],
            tos: payload[3],
            table: payload[4],
            protocol: payload[5],
            scope: payload[6],
            route_type: payload[7],
            flags: u32::from_ne_bytes([payload[8], payload[9], payload[10], payload[11]]),
        })
    }
}

/// Byte length of a dump request: netlink header, padded rtgenmsg, and the
/// extended-filter attribute.
pub const DUMP_REQUEST_LEN: usize = NETLINK_HEADER_LEN + 4 + 8;

/// Writes a table dump request into `buf` and returns its length.
///
/// The request carries `NLM_F_REQUEST | NLM_F_DUMP`, an AF_UNSPEC generic
/// family header, and an IFLA_EXT_MASK attribute telling the kernel to skip
/// link statistics.
pub fn write_dump_request(buf: &mut [u8], message_type: u16, sequence: u32) -> usize {
    buf[..DUMP_REQUEST_LEN].fill(0);
    let mut header = NetlinkBuffer::new(&mut buf[..DUMP_REQUEST_LEN]);
    header.set_length(DUMP_REQUEST_LEN as u32);
    header.set_message_type(message_type);
    header.set_flags(NLM_F_REQUEST | NLM_F_DUMP);
    header.set_sequence_number(sequence);
    header.set_port_number(0);
    buf[NETLINK_HEADER_LEN] = AF_UNSPEC;
    let attr = NETLINK_HEADER_LEN + 4;
    buf[attr..attr + 2].copy_from_slice(&8u16.to_ne_bytes());
    buf[attr + 2..attr + 4].copy_from_slice(&IFLA_EXT_MASK.to_ne_bytes());
    buf[attr + 4..attr + 8].copy_from_slice(&RTEXT_FILTER_SKIP_STATS.to_ne_bytes());
    DUMP_REQUEST_LEN
}

/// True if the buffer still holds a dump request, so its header may be
/// rewritten in place for a retry.
pub fn is_dump_request(buf: &[u8]) -> bool {
    if buf.len() < NETLINK_HEADER_LEN {
        return false;
    }
    let flags = NetlinkBuffer::new(buf).flags();
    flags & NLM_F_REQUEST != 0 && flags & NLM_F_DUMP != 0
}

/// Rewrites the sequence number of the request sitting in `buf`.
pub fn rewrite_sequence_number(buf: &mut [u8], sequence: u32) {
    NetlinkBuffer::new(buf).set_sequence_number(sequence);
}

/// A NETLINK_ROUTE datagram socket joined to the change-notification
/// multicast groups.
pub struct RtnetlinkSocket {
    socket: Socket,
    port_id: u32,
}

impl RtnetlinkSocket {
    /// Opens the socket, binds it to a kernel-assigned port, and joins the
    /// given multicast groups.
    pub fn open(groups: &[u32], non_blocking: bool) -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(MonitorError::Create)?;
        let address = socket.bind_auto().map_err(MonitorError::Bind)?;
        for &group in groups {
            socket.add_membership(group).map_err(MonitorError::Bind)?;
        }
        if non_blocking {
            socket
                .set_non_blocking(true)
                .map_err(MonitorError::Create)?;
        }
        let port_id = address.port_number();
        debug!(port_id, ?groups, "netlink socket bound");
        Ok(Self { socket, port_id })
    }

    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        self.socket.send(buf, 0).map_err(MonitorError::Send)
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.socket
            .recv(&mut &mut buf[..], 0)
            .map_err(MonitorError::Receive)
    }

    /// Discards everything currently queued on the socket. Returns the
    /// number of datagrams thrown away.
    pub fn drain(&self, scratch: &mut [u8]) -> usize {
        let mut drained = 0;
        while let Ok(len) = self.socket.recv(&mut &mut scratch[..], libc::MSG_DONTWAIT) {
            if len == 0 {
                break;
            }
            trace!(bytes = len, "drained stale datagram");
            drained += 1;
        }
        drained
    }
}

#[cfg(test)]
pub(crate) mod testmsg {
    //! Builders for synthetic rtnetlink datagrams used across the test
    //! suite.

    use super::*;
    use crate::attributes::align4;

    pub fn attr(kind: u16, data: &[u8]) -> Vec<u8> {
        let len = (4 + data.len()) as u16;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&len.to_ne_bytes());
        bytes.extend_from_slice(&kind.to_ne_bytes());
        bytes.extend_from_slice(data);
        bytes.resize(align4(bytes.len()), 0);
        bytes
    }

    pub fn string_attr(kind: u16, text: &str) -> Vec<u8> {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        attr(kind, &data)
    }

    pub fn u8_attr(kind: u16, value: u8) -> Vec<u8> {
        attr(kind, &[value])
    }

    pub fn u32_attr(kind: u16, value: u32) -> Vec<u8> {
        attr(kind, &value.to_ne_bytes())
    }

    pub fn netlink_message(message_type: u16, sequence: u32, payload: &[u8]) -> Vec<u8> {
        let total = NETLINK_HEADER_LEN + payload.len();
        let mut bytes = vec![0u8; total];
        {
            let mut header = NetlinkBuffer::new(&mut bytes[..]);
            header.set_length(total as u32);
            header.set_message_type(message_type);
            header.set_flags(0);
            header.set_sequence_number(sequence);
            header.set_port_number(0);
        }
        bytes[NETLINK_HEADER_LEN..].copy_from_slice(payload);
        bytes
    }

    pub fn link_message(
        message_type: u16,
        sequence: u32,
        index: u32,
        link_type: u16,
        link_flags: u32,
        attrs: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut payload = vec![0u8; LinkHeader::LEN];
        payload[0] = AF_UNSPEC;
        payload[2..4].copy_from_slice(&link_type.to_ne_bytes());
        payload[4..8].copy_from_slice(&(index as i32).to_ne_bytes());
        payload[8..12].copy_from_slice(&link_flags.to_ne_bytes());
        for a in attrs {
            payload.extend_from_slice(a);
        }
        netlink_message(message_type, sequence, &payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn address_message(
        message_type: u16,
        sequence: u32,
        index: u32,
        family: u8,
        prefix_len: u8,
        flags: u8,
        scope: u8,
        attrs: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut payload = vec![0u8; AddressHeader::LEN];
        payload[0] = family;
        payload[1] = prefix_len;
        payload[2] = flags;
        payload[3] = scope;
        payload[4..8].copy_from_slice(&index.to_ne_bytes());
        for a in attrs {
            payload.extend_from_slice(a);
        }
        netlink_message(message_type, sequence, &payload)
    }

    pub fn route_message(
        message_type: u16,
        sequence: u32,
        family: u8,
        route_flags: u32,
        attrs: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut payload = vec![0u8; RouteHeader::LEN];
        payload[0] = family;
        payload[8..12].copy_from_slice(&route_flags.to_ne_bytes());
        for a in attrs {
            payload.extend_from_slice(a);
        }
        netlink_message(message_type, sequence, &payload)
    }

    pub fn done_message(sequence: u32) -> Vec<u8> {
        netlink_message(NLMSG_DONE, sequence, &0i32.to_ne_bytes())
    }

    pub fn error_message(sequence: u32, errno: i32) -> Vec<u8> {
        let mut payload = (-errno).to_ne_bytes().to_vec();
        payload.extend_from_slice(&[0u8; NETLINK_HEADER_LEN]);
        netlink_message(NLMSG_ERROR, sequence, &payload)
    }

    pub fn datagram(messages: &[Vec<u8>]) -> Vec<u8> {
        messages.concat()
    }
}
