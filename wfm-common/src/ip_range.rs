//! IP address range value object
//!
//! A known IP address record stores its bounds as plain strings. This module
//! turns them into a validated, inclusive range so handlers and the overlap
//! job can ask containment and overlap questions without re-parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Reasons a pair of strings cannot form an [`IpAddressRange`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpRangeError {
    /// The value is not an IPv4 or IPv6 address
    #[error("'{0}' is not a valid IP address")]
    InvalidAddress(String),

    /// Start and end are from different address families
    #[error("range mixes IPv4 and IPv6 addresses ({start} - {end})")]
    MixedFamilies { start: IpAddr, end: IpAddr },

    /// Start sorts after end
    #[error("range start {start} is greater than range end {end}")]
    StartAfterEnd { start: IpAddr, end: IpAddr },
}

/// Inclusive range of addresses within a single family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct IpAddressRange {
    start: IpAddr,
    end: IpAddr,
}

/// Unchecked bounds, validated on the way into [`IpAddressRange`]
#[derive(Deserialize)]
struct RawRange {
    start: IpAddr,
    end: IpAddr,
}

impl TryFrom<RawRange> for IpAddressRange {
    type Error = IpRangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Self::from_addrs(raw.start, raw.end)
    }
}

impl IpAddressRange {
    /// Parse and validate a range from its textual bounds
    pub fn new(start: &str, end: &str) -> Result<Self, IpRangeError> {
        let start = parse_addr(start)?;
        let end = parse_addr(end)?;
        Self::from_addrs(start, end)
    }

    /// Validate a range from already-parsed bounds
    pub fn from_addrs(start: IpAddr, end: IpAddr) -> Result<Self, IpRangeError> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err(IpRangeError::MixedFamilies { start, end });
        }
        if to_ordinal(start) > to_ordinal(end) {
            return Err(IpRangeError::StartAfterEnd { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    pub fn is_ipv4(&self) -> bool {
        self.start.is_ipv4()
    }

    /// True when `ip` is in the same family and within the bounds
    pub fn contains(&self, ip: IpAddr) -> bool {
        if ip.is_ipv4() != self.is_ipv4() {
            return false;
        }
        let value = to_ordinal(ip);
        to_ordinal(self.start) <= value && value <= to_ordinal(self.end)
    }

    /// True when both ranges share at least one address
    pub fn overlaps(&self, other: &IpAddressRange) -> bool {
        if self.is_ipv4() != other.is_ipv4() {
            return false;
        }
        to_ordinal(self.start) <= to_ordinal(other.end)
            && to_ordinal(other.start) <= to_ordinal(self.end)
    }

    /// Number of addresses covered, saturating for the full IPv6 space
    pub fn size(&self) -> u128 {
        (to_ordinal(self.end) - to_ordinal(self.start)).saturating_add(1)
    }
}

impl fmt::Display for IpAddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Parse one bound, tolerating surrounding whitespace
pub fn parse_addr(value: &str) -> Result<IpAddr, IpRangeError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| IpRangeError::InvalidAddress(value.to_string()))
}

fn to_ordinal(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_valid_ipv4_range() {
        let range = IpAddressRange::new("10.0.0.1", "10.0.0.255").unwrap();
        assert_eq!(range.start(), ip("10.0.0.1"));
        assert_eq!(range.end(), ip("10.0.0.255"));
        assert_eq!(range.size(), 255);
        assert!(range.is_ipv4());
    }

    #[test]
    fn test_single_address_range() {
        let range = IpAddressRange::new("192.168.1.1", "192.168.1.1").unwrap();
        assert_eq!(range.size(), 1);
        assert!(range.contains(ip("192.168.1.1")));
        assert!(!range.contains(ip("192.168.1.2")));
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        assert!(IpAddressRange::new(" 10.0.0.1 ", "10.0.0.2\n").is_ok());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = IpAddressRange::new("10.0.0.300", "10.0.1.0").unwrap_err();
        assert_eq!(err, IpRangeError::InvalidAddress("10.0.0.300".to_string()));
    }

    #[test]
    fn test_mixed_families_rejected() {
        let err = IpAddressRange::new("10.0.0.1", "::1").unwrap_err();
        assert!(matches!(err, IpRangeError::MixedFamilies { .. }));
    }

    #[test]
    fn test_start_after_end_rejected() {
        let err = IpAddressRange::new("10.0.1.0", "10.0.0.255").unwrap_err();
        assert!(matches!(err, IpRangeError::StartAfterEnd { .. }));
        assert!(err.to_string().contains("greater than"));
    }

    #[test]
    fn test_contains_ignores_other_family() {
        let range = IpAddressRange::new("0.0.0.0", "255.255.255.255").unwrap();
        assert!(range.contains(ip("8.8.8.8")));
        assert!(!range.contains(ip("::ffff:8.8.8.8")));
    }

    #[test]
    fn test_ipv6_contains() {
        let range = IpAddressRange::new("2001:db8::", "2001:db8::ffff").unwrap();
        assert!(range.contains(ip("2001:db8::1234")));
        assert!(!range.contains(ip("2001:db8::1:0")));
        assert_eq!(range.size(), 0x10000);
    }

    #[test]
    fn test_full_ipv6_space_size_saturates() {
        let range = IpAddressRange::new("::", "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff").unwrap();
        assert_eq!(range.size(), u128::MAX);
    }

    #[test]
    fn test_overlaps() {
        let a = IpAddressRange::new("10.0.0.0", "10.0.0.100").unwrap();
        let b = IpAddressRange::new("10.0.0.100", "10.0.0.200").unwrap();
        let c = IpAddressRange::new("10.0.0.101", "10.0.0.200").unwrap();
        let v6 = IpAddressRange::new("::", "::ffff").unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&v6));
    }

    #[test]
    fn test_deserialize_validates_bounds() {
        let range: IpAddressRange =
            serde_json::from_str(r#"{"start": "10.0.0.1", "end": "10.0.0.9"}"#).unwrap();
        assert_eq!(range.size(), 9);

        let reversed = serde_json::from_str::<IpAddressRange>(r#"{"start": "10.0.0.9", "end": "10.0.0.1"}"#);
        assert!(reversed.unwrap_err().to_string().contains("greater than"));

        let mixed = serde_json::from_str::<IpAddressRange>(r#"{"start": "10.0.0.1", "end": "::1"}"#);
        assert!(mixed.is_err());
    }

    #[test]
    fn test_display() {
        let range = IpAddressRange::new("10.0.0.1", "10.0.0.9").unwrap();
        assert_eq!(range.to_string(), "10.0.0.1 - 10.0.0.9");
    }
}
