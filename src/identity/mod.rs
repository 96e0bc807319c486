//! Session identity primitives: the SID base32 codec/pool and the
//! address/CIDR library used for bans and per-address connection limits.

pub mod address;
pub mod sid;

pub use address::{
    address_in_range, cidr_to_range, parse_address, parse_address_v4_hint, parse_range, AddressError, AddressRange,
};
pub use sid::{base32_encode_bytes, sid_to_string, string_to_sid, PoolFull, Sid, SidPool};
