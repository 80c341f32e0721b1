//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// 6 octet pairs joined by 5 colons.
const TEXT_LEN: usize = 17;

/// A 48-bit Ethernet hardware address.
///
/// The canonical textual form is lowercase hex octets joined by `:`, and
/// parsing accepts exactly that shape (upper- or lowercase digits).
///
/// # Examples
///
/// ```
/// use ifwatch_types::MacAddress;
///
/// let mac: MacAddress = "02:42:ac:11:00:02".parse().unwrap();
/// assert_eq!(mac.to_string(), "02:42:ac:11:00:02");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast address (ff:ff:ff:ff:ff:ff).
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// The all-zero address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    /// Creates a MAC address from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    /// Returns the raw octets.
    pub const fn octets(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if every octet is zero.
    ///
    /// Kernels report an all-zero address while an interface is in
    /// transition, so callers may see this for otherwise valid links.
    pub const fn is_zero(&self) -> bool {
        self.0[0] == 0
            && self.0[1] == 0
            && self.0[2] == 0
            && self.0[3] == 0
            && self.0[4] == 0
            && self.0[5] == 0
    }

    /// Returns true if this is the broadcast address.
    pub const fn is_broadcast(&self) -> bool {
        self.0[0] == 0xff
            && self.0[1] == 0xff
            && self.0[2] == 0xff
            && self.0[3] == 0xff
            && self.0[4] == 0xff
            && self.0[5] == 0xff
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = [0u8; TEXT_LEN];
        let mut at = 0;
        for (i, &octet) in self.0.iter().enumerate() {
            if i > 0 {
                text[at] = b':';
                at += 1;
            }
            text[at] = HEX_DIGITS[usize::from(octet >> 4)];
            text[at + 1] = HEX_DIGITS[usize::from(octet & 0xf)];
            at += 2;
        }
        // only ASCII was written above
        f.write_str(std::str::from_utf8(&text).map_err(|_| fmt::Error)?)
    }
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.as_bytes();
        if raw.len() != TEXT_LEN {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let at = i * 3;
            if i > 0 && raw[at - 1] != b':' {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            match (hex_value(raw[at]), hex_value(raw[at + 1])) {
                (Some(high), Some(low)) => *octet = high << 4 | low,
                _ => return Err(ParseError::InvalidMacAddress(s.to_string())),
            }
        }
        Ok(MacAddress(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_the_canonical_form() {
        let mac: MacAddress = "02:42:ac:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), &[0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
    }

    #[test]
    fn parses_uppercase_digits() {
        let upper: MacAddress = "DE:AD:BE:EF:00:5A".parse().unwrap();
        let lower: MacAddress = "de:ad:be:ef:00:5a".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn renders_lowercase() {
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn broadcast_and_zero_predicates() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(!MacAddress::BROADCAST.is_zero());
        assert!(MacAddress::ZERO.is_zero());
        assert!(!MacAddress::ZERO.is_broadcast());
        assert_eq!(MacAddress::default(), MacAddress::ZERO);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("".parse::<MacAddress>().is_err());
        assert!("02-42-ac-11-00-02".parse::<MacAddress>().is_err());
        assert!("2:42:ac:11:0:2".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:02:03".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:zz".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:0 ".parse::<MacAddress>().is_err());
    }

    #[test]
    fn round_trips_through_text() {
        let mac = MacAddress::new([0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        let reparsed: MacAddress = mac.to_string().parse().unwrap();
        assert_eq!(mac, reparsed);
    }
}
