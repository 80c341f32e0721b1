//! Lazy, typed view over a parsed rtnetlink attribute table.

use ifwatch_types::{IpAddress, MacAddress};
use tracing::{trace, warn};

/// Length of the attribute header (length + kind).
const ATTR_HEADER_LEN: usize = 4;

/// Mask stripping the nested/byte-order bits from an attribute kind.
const ATTR_KIND_MASK: u16 = 0x3fff;

pub(crate) const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// An attribute table parsed out of one rtnetlink message payload.
///
/// Slots are indexed by attribute kind for O(1) access. Kinds beyond the
/// declared maximum are counted and ignored so newer kernels stay
/// compatible. The typed accessors validate payload size on demand and
/// report any mismatch as absence; they never abort the caller.
pub struct AttributeTable<'a> {
    slots: Vec<Option<&'a [u8]>>,
    seen: u64,
    unknown: u64,
}

impl<'a> AttributeTable<'a> {
    /// Parses the attributes that follow the fixed header of an rtnetlink
    /// message. `payload` is the message body after the netlink header,
    /// `fixed_header_len` the size of the per-family fixed header, and
    /// `max_kind` the highest attribute kind worth indexing.
    pub fn parse(payload: &'a [u8], fixed_header_len: usize, max_kind: u16) -> Self {
        let mut table = Self {
            slots: vec![None; max_kind as usize + 1],
            seen: 0,
            unknown: 0,
        };
        let mut offset = align4(fixed_header_len);
        while offset + ATTR_HEADER_LEN <= payload.len() {
            let len = u16::from_ne_bytes([payload[offset], payload[offset + 1]]) as usize;
            let kind =
                u16::from_ne_bytes([payload[offset + 2], payload[offset + 3]]) & ATTR_KIND_MASK;
            if len < ATTR_HEADER_LEN || offset + len > payload.len() {
                warn!(kind, len, "truncated attribute, stopping attribute parse");
                break;
            }
            let data = &payload[offset + ATTR_HEADER_LEN..offset + len];
            if (kind as usize) < table.slots.len() {
                table.slots[kind as usize] = Some(data);
                table.seen += 1;
            } else {
                trace!(kind, "ignoring attribute kind beyond the declared maximum");
                table.unknown += 1;
            }
            offset += align4(len);
        }
        table
    }

    /// Total attributes stored in the table.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Attributes whose kind was beyond the declared maximum.
    pub fn unknown(&self) -> u64 {
        self.unknown
    }

    pub fn has(&self, kind: u16) -> bool {
        self.raw(kind).is_some()
    }

    fn raw(&self, kind: u16) -> Option<&'a [u8]> {
        self.slots.get(kind as usize).copied().flatten()
    }

    fn fixed<const N: usize>(&self, kind: u16) -> Option<[u8; N]> {
        let data = self.raw(kind)?;
        if data.len() != N {
            warn!(
                kind,
                expected = N,
                actual = data.len(),
                "attribute payload has unexpected size"
            );
            return None;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(data);
        Some(bytes)
    }

    /// A NUL-terminated UTF-8 string attribute.
    pub fn get_string(&self, kind: u16) -> Option<String> {
        let data = self.raw(kind)?;
        let trimmed = match data.iter().position(|&b| b == 0) {
            Some(nul) => &data[..nul],
            None => data,
        };
        match std::str::from_utf8(trimmed) {
            Ok(text) => Some(text.to_string()),
            Err(_) => {
                warn!(kind, "string attribute is not valid UTF-8");
                None
            }
        }
    }

    pub fn get_u8(&self, kind: u16) -> Option<u8> {
        self.fixed::<1>(kind).map(|bytes| bytes[0])
    }

    pub fn get_u16(&self, kind: u16) -> Option<u16> {
        self.fixed::<2>(kind).map(u16::from_ne_bytes)
    }

    pub fn get_u32(&self, kind: u16) -> Option<u32> {
        self.fixed::<4>(kind).map(u32::from_ne_bytes)
    }

    pub fn get_u64(&self, kind: u16) -> Option<u64> {
        self.fixed::<8>(kind).map(u64::from_ne_bytes)
    }

    /// A 6-byte hardware address attribute.
    pub fn get_mac(&self, kind: u16) -> Option<MacAddress> {
        self.fixed::<6>(kind).map(MacAddress::new)
    }

    /// A 4-byte IPv4 address attribute.
    pub fn get_ipv4(&self, kind: u16) -> Option<IpAddress> {
        self.fixed::<4>(kind).map(IpAddress::from)
    }

    /// A 16-byte IPv6 address attribute.
    pub fn get_ipv6(&self, kind: u16) -> Option<IpAddress> {
        self.fixed::<16>(kind).map(IpAddress::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn attr(kind: u16, data: &[u8]) -> Vec<u8> {
        let len = (ATTR_HEADER_LEN + data.len()) as u16;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&len.to_ne_bytes());
        bytes.extend_from_slice(&kind.to_ne_bytes());
        bytes.extend_from_slice(data);
        bytes.resize(align4(bytes.len()), 0);
        bytes
    }

    fn payload(fixed_header_len: usize, attrs: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = vec![0u8; align4(fixed_header_len)];
        for a in attrs {
            bytes.extend_from_slice(a);
        }
        bytes
    }

    #[test]
    fn indexes_attributes_by_kind() {
        let body = payload(8, &[attr(1, &[7]), attr(3, b"eth0\0")]);
        let table = AttributeTable::parse(&body, 8, 8);
        assert!(table.has(1));
        assert!(!table.has(2));
        assert_eq!(table.get_u8(1), Some(7));
        assert_eq!(table.get_string(3).as_deref(), Some("eth0"));
        assert_eq!(table.seen(), 2);
        assert_eq!(table.unknown(), 0);
    }

    #[test]
    fn counts_kinds_beyond_the_maximum() {
        let body = payload(8, &[attr(40, &[1, 2, 3, 4]), attr(2, &[9])]);
        let table = AttributeTable::parse(&body, 8, 8);
        assert_eq!(table.seen(), 1);
        assert_eq!(table.unknown(), 1);
        assert!(!table.has(40));
    }

    #[test]
    fn size_mismatch_reads_as_absent() {
        let body = payload(8, &[attr(1, &[1, 2, 3])]);
        let table = AttributeTable::parse(&body, 8, 8);
        assert!(table.has(1));
        assert_eq!(table.get_u32(1), None);
        assert_eq!(table.get_mac(1), None);
        assert_eq!(table.get_ipv4(1), None);
    }

    #[test]
    fn typed_accessors_decode_native_endian() {
        let body = payload(
            0,
            &[
                attr(1, &0xdead_beefu32.to_ne_bytes()),
                attr(2, &0x1234u16.to_ne_bytes()),
                attr(3, &0x0102_0304_0506_0708u64.to_ne_bytes()),
            ],
        );
        let table = AttributeTable::parse(&body, 0, 8);
        assert_eq!(table.get_u32(1), Some(0xdead_beef));
        assert_eq!(table.get_u16(2), Some(0x1234));
        assert_eq!(table.get_u64(3), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn decodes_addresses() {
        let body = payload(
            0,
            &[
                attr(1, &[10, 0, 0, 5]),
                attr(2, &[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
                attr(3, &[0x02, 0x42, 0xac, 0x11, 0x00, 0x02]),
            ],
        );
        let table = AttributeTable::parse(&body, 0, 8);
        assert_eq!(table.get_ipv4(1), Some(IpAddress::parse("10.0.0.5")));
        assert_eq!(table.get_ipv6(2), Some(IpAddress::parse("fe80::1")));
        assert_eq!(
            table.get_mac(3),
            Some(MacAddress::new([0x02, 0x42, 0xac, 0x11, 0x00, 0x02]))
        );
    }

    #[test]
    fn truncated_attribute_stops_the_parse() {
        let mut body = payload(0, &[attr(1, &[1, 2, 3, 4])]);
        // a header promising more bytes than remain
        body.extend_from_slice(&32u16.to_ne_bytes());
        body.extend_from_slice(&2u16.to_ne_bytes());
        let table = AttributeTable::parse(&body, 0, 8);
        assert!(table.has(1));
        assert!(!table.has(2));
    }

    #[test]
    fn rejects_non_utf8_strings() {
        let body = payload(0, &[attr(1, &[0xff, 0xfe, 0x00])]);
        let table = AttributeTable::parse(&body, 0, 8);
        assert_eq!(table.get_string(1), None);
    }
}
