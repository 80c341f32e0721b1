//! Textual round-trip properties of the public address types.

use ifwatch_types::{IpAddress, MacAddress};
use pretty_assertions::assert_eq;

#[test]
fn parse_format_parse_is_the_identity_for_valid_addresses() {
    for text in [
        "0.0.0.0",
        "10.0.0.1",
        "169.254.1.1",
        "192.0.2.1",
        "224.0.0.251",
        "255.255.255.255",
        "::",
        "::1",
        "::ffff:10.0.0.1",
        "fc00::1",
        "fe80::dead:beef",
        "2001:db8:85a3::8a2e:370:7334",
        "ff02::fb",
    ] {
        let parsed = IpAddress::parse(text);
        assert!(!parsed.is_unspecified(), "failed to parse {text}");
        let reparsed = IpAddress::parse(&parsed.to_string());
        assert_eq!(parsed, reparsed, "round trip failed for {text}");
    }
}

#[test]
fn garbage_text_parses_to_the_unspecified_address() {
    for text in ["", " ", "localhost", "10.0.0.1/24", "fe80::1%eth0", "1.2.3"] {
        assert!(
            IpAddress::parse(text).is_unspecified(),
            "unexpectedly parsed {text:?}"
        );
    }
}

#[test]
fn mac_addresses_round_trip_through_their_canonical_form() {
    for text in ["00:00:00:00:00:00", "02:42:ac:11:00:02", "ff:ff:ff:ff:ff:ff"] {
        let parsed: MacAddress = text.parse().unwrap();
        assert_eq!(parsed.to_string(), text);
        let reparsed: MacAddress = parsed.to_string().parse().unwrap();
        assert_eq!(parsed, reparsed);
    }
}

#[test]
fn mac_parsing_accepts_uppercase_but_renders_lowercase() {
    let parsed: MacAddress = "AA:BB:CC:DD:EE:0F".parse().unwrap();
    assert_eq!(parsed.to_string(), "aa:bb:cc:dd:ee:0f");
}
