//! Address and CIDR/range library.
//!
//! Grounded on `original_source/src/network/ipcalc.c`: bitwise mask
//! construction, `[lo, hi]` derivation from a CIDR prefix, and inclusive
//! range membership.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("not a valid address: {0}")]
    InvalidAddress(String),
    #[error("not a valid range: {0}")]
    InvalidRange(String),
    #[error("range endpoints belong to different address families")]
    FamilyMismatch,
}

/// Parses an IPv4/IPv6 literal, or the symbolic names `"any"` / `"loopback"`.
///
/// `"any"` resolves to the unspecified address and `"loopback"` to the
/// loopback address; both default to the IPv6 form unless the caller has
/// no use for it, matching the original's family-aware symbolic resolution
/// — callers that need the v4 form should use [`parse_address_v4_hint`].
pub fn parse_address(text: &str) -> Result<IpAddr, AddressError> {
    match text {
        "any" => return Ok(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        "loopback" => return Ok(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        _ => {}
    }
    if text.contains(':') {
        text.parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| AddressError::InvalidAddress(text.to_owned()))
    } else {
        parse_ipv4_strict(text)
            .map(IpAddr::V4)
            .ok_or_else(|| AddressError::InvalidAddress(text.to_owned()))
    }
}

/// Same as [`parse_address`] but resolves `"any"`/`"loopback"` to their
/// IPv4 forms.
pub fn parse_address_v4_hint(text: &str) -> Result<IpAddr, AddressError> {
    match text {
        "any" => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        "loopback" => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        _ => parse_address(text),
    }
}

/// Strict IPv4 dotted-quad validation: exactly three dots, each octet in
/// `0..=255`, each octet 1-3 digits (no sign, no whitespace).
fn parse_ipv4_strict(text: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let v: u32 = part.parse().ok()?;
        if v > 255 {
            return None;
        }
        octets[i] = v as u8;
    }
    Some(Ipv4Addr::from(octets))
}

/// An inclusive `[lo, hi]` address range; both endpoints share a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub lo: IpAddr,
    pub hi: IpAddr,
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    matches!(
        (a, b),
        (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_))
    )
}

fn mask_left_v4(bits: u32) -> u32 {
    if bits == 0 {
        0
    } else {
        u32::MAX << (32 - bits)
    }
}

fn mask_right_v4(bits: u32) -> u32 {
    if bits == 0 {
        0
    } else {
        u32::MAX >> (32 - bits)
    }
}

fn mask_left_v6(bits: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    let full_bytes = (bits / 8) as usize;
    let rem = bits % 8;
    for b in out.iter_mut().take(full_bytes) {
        *b = 0xff;
    }
    if rem > 0 && full_bytes < 16 {
        out[full_bytes] = 0xffu8 << (8 - rem);
    }
    out
}

fn mask_right_v6(bits: u32) -> [u8; 16] {
    let mut left = mask_left_v6(bits);
    for b in left.iter_mut() {
        *b = !*b;
    }
    left
}

/// Derives the inclusive `[lo, hi]` bounds of a CIDR prefix: `lo = addr &
/// mask_left(bits)`, `hi = lo | mask_right(maxbits - bits)`.
pub fn cidr_to_range(addr: IpAddr, bits: u32) -> Result<AddressRange, AddressError> {
    match addr {
        IpAddr::V4(v4) => {
            if bits > 32 {
                return Err(AddressError::InvalidRange(format!("/{bits}")));
            }
            let a = u32::from(v4);
            let lo = a & mask_left_v4(bits);
            let hi = lo | mask_right_v4(32 - bits);
            Ok(AddressRange {
                lo: IpAddr::V4(Ipv4Addr::from(lo)),
                hi: IpAddr::V4(Ipv4Addr::from(hi)),
            })
        }
        IpAddr::V6(v6) => {
            if bits > 128 {
                return Err(AddressError::InvalidRange(format!("/{bits}")));
            }
            let left = mask_left_v6(bits);
            let right = mask_right_v6(128 - bits);
            let octets = v6.octets();
            let mut lo = [0u8; 16];
            let mut hi = [0u8; 16];
            for i in 0..16 {
                lo[i] = octets[i] & left[i];
                hi[i] = lo[i] | right[i];
            }
            Ok(AddressRange {
                lo: IpAddr::V6(Ipv6Addr::from(lo)),
                hi: IpAddr::V6(Ipv6Addr::from(hi)),
            })
        }
    }
}

/// Accepts `<addr>/<bits>` (CIDR) or `<lo>-<hi>` (explicit range); a bare
/// address is treated as a single-address range (`lo == hi`).
pub fn parse_range(text: &str) -> Result<AddressRange, AddressError> {
    if let Some((addr_part, bits_part)) = text.rsplit_once('/') {
        let addr = parse_address(addr_part)?;
        let bits: u32 = bits_part
            .parse()
            .map_err(|_| AddressError::InvalidRange(text.to_owned()))?;
        return cidr_to_range(addr, bits);
    }
    if let Some((lo_part, hi_part)) = text.rsplit_once('-') {
        let lo = parse_address(lo_part)?;
        let hi = parse_address(hi_part)?;
        if !same_family(lo, hi) {
            return Err(AddressError::FamilyMismatch);
        }
        if compare_addresses(lo, hi) > std::cmp::Ordering::Equal {
            return Err(AddressError::InvalidRange(text.to_owned()));
        }
        return Ok(AddressRange { lo, hi });
    }
    let addr = parse_address(text)?;
    Ok(AddressRange { lo: addr, hi: addr })
}

/// Lexicographic comparison over network byte order; panics are avoided by
/// falling back to `Ordering::Equal` across mismatched families — callers
/// needing strict family checks should use [`same_family`] first.
pub fn compare_addresses(a: IpAddr, b: IpAddr) -> std::cmp::Ordering {
    match (a, b) {
        (IpAddr::V4(x), IpAddr::V4(y)) => x.octets().cmp(&y.octets()),
        (IpAddr::V6(x), IpAddr::V6(y)) => x.octets().cmp(&y.octets()),
        (IpAddr::V4(_), IpAddr::V6(_)) => std::cmp::Ordering::Less,
        (IpAddr::V6(_), IpAddr::V4(_)) => std::cmp::Ordering::Greater,
    }
}

/// Inclusive on both ends; same-family check happens implicitly since a
/// mismatched family can never compare as within range under
/// [`compare_addresses`]'s total order.
pub fn address_in_range(addr: IpAddr, range: &AddressRange) -> bool {
    if !same_family(addr, range.lo) {
        return false;
    }
    compare_addresses(range.lo, addr) != std::cmp::Ordering::Greater
        && compare_addresses(addr, range.hi) != std::cmp::Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_v4_and_v6() {
        assert!(parse_address("0.0.0.0").is_ok());
        assert!(parse_address("255.255.255.255").is_ok());
        assert!(parse_address("::").is_ok());
        assert!(parse_address("::1").is_ok());
        assert!(parse_address("2001::201:2ff:fefa:fffe").is_ok());
    }

    #[test]
    fn rejects_invalid_literals() {
        assert!(parse_address("123.45.67.890").is_err());
        assert!(parse_address("2001:").is_err());
        assert!(parse_address("::ffff:224.0.0.").is_err());
    }

    #[test]
    fn symbolic_any_and_loopback() {
        assert_eq!(
            parse_address_v4_hint("any").unwrap(),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
        assert_eq!(
            parse_address_v4_hint("loopback").unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn cidr_range_matches_example() {
        let addr = parse_address("10.18.1.100").unwrap();
        let range = cidr_to_range(addr, 30).unwrap();
        assert_eq!(range.lo, parse_address("10.18.1.100").unwrap());
        assert_eq!(range.hi, parse_address("10.18.1.103").unwrap());
    }

    #[test]
    fn parse_range_cidr_string() {
        let range = parse_range("10.18.1.100/30").unwrap();
        assert_eq!(range.lo, parse_address("10.18.1.100").unwrap());
        assert_eq!(range.hi, parse_address("10.18.1.103").unwrap());
    }

    #[test]
    fn rejects_mixed_family_range() {
        let err = parse_range("10.0.0.1-::1").unwrap_err();
        assert_eq!(err, AddressError::FamilyMismatch);
    }

    #[test]
    fn range_membership_is_inclusive() {
        let range = parse_range("10.18.1.100/30").unwrap();
        assert!(address_in_range(parse_address("10.18.1.100").unwrap(), &range));
        assert!(address_in_range(parse_address("10.18.1.103").unwrap(), &range));
        assert!(!address_in_range(parse_address("10.18.1.104").unwrap(), &range));
        assert!(!address_in_range(parse_address("10.18.1.99").unwrap(), &range));
    }

    #[test]
    fn single_address_range_is_degenerate() {
        let range = parse_range("192.168.1.1").unwrap();
        assert_eq!(range.lo, range.hi);
        assert!(address_in_range(parse_address("192.168.1.1").unwrap(), &range));
    }
}
