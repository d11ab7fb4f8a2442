//! KNX group addresses.
//!
//! Two rendering levels share the same 16-bit value:
//! - 3-level: main (5 bits) | middle (3 bits) | sub (8 bits), "M/M/S"
//! - 2-level: main (5 bits) | sub (11 bits), "M/S"
//!
//! Parsing auto-detects the level from the number of separators; formatting
//! picks the level explicitly so `parse` then `format` round-trips bit-exact
//! per chosen level.

use crate::error::{KnxError, Result};
use core::fmt;

/// KNX group address, the multicast target of group communication.
///
/// ```
/// use knx_link::addressing::GroupAddress;
///
/// let addr = GroupAddress::new(1, 1, 1)?;
/// assert_eq!(addr.raw(), 0x0901);
/// assert_eq!(addr.to_string(), "1/1/1");
///
/// let two_level: GroupAddress = "1/234".parse()?;
/// assert_eq!(two_level.format_2level().as_str(), "1/234");
/// # Ok::<(), knx_link::KnxError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Maximum main group (5 bits)
    pub const MAX_MAIN: u8 = 31;
    /// Maximum middle group (3 bits)
    pub const MAX_MIDDLE: u8 = 7;
    /// Maximum 2-level sub group (11 bits)
    pub const MAX_SUB_2LEVEL: u16 = 2047;

    /// Create a 3-level address (main/middle/sub).
    ///
    /// # Errors
    ///
    /// Fails with an argument error if `main` exceeds 31 or `middle`
    /// exceeds 7.
    pub fn new(main: u8, middle: u8, sub: u8) -> Result<Self> {
        if main > Self::MAX_MAIN || middle > Self::MAX_MIDDLE {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self {
            raw: (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub),
        })
    }

    /// Create a 2-level address (main/sub).
    ///
    /// # Errors
    ///
    /// Fails with an argument error if `main` exceeds 31 or `sub` exceeds
    /// 2047.
    pub fn two_level(main: u8, sub: u16) -> Result<Self> {
        if main > Self::MAX_MAIN || sub > Self::MAX_SUB_2LEVEL {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self {
            raw: (u16::from(main) << 11) | sub,
        })
    }

    /// The raw 16-bit value.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Main group (0-31), shared by both levels.
    #[inline]
    pub const fn main(self) -> u8 {
        (self.raw >> 11) as u8
    }

    /// Middle group of the 3-level form (0-7).
    #[inline]
    pub const fn middle(self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Sub group of the 3-level form (0-255).
    #[inline]
    pub const fn sub(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Sub group of the 2-level form (0-2047).
    #[inline]
    pub const fn sub_2level(self) -> u16 {
        self.raw & 0x07FF
    }

    /// Format as "Main/Middle/Sub".
    pub fn format_3level(&self) -> heapless::String<12> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        let _ = write!(s, "{}/{}/{}", self.main(), self.middle(), self.sub());
        s
    }

    /// Format as "Main/Sub".
    pub fn format_2level(&self) -> heapless::String<12> {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        let _ = write!(s, "{}/{}", self.main(), self.sub_2level());
        s
    }

    /// Big-endian wire form.
    #[inline]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }

    /// Read the address from the first two bytes of `buf` (big-endian).
    #[inline]
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            raw: u16::from_be_bytes([buf[0], buf[1]]),
        })
    }
}

impl From<u16> for GroupAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<GroupAddress> for u16 {
    #[inline]
    fn from(addr: GroupAddress) -> u16 {
        addr.raw
    }
}

impl fmt::Display for GroupAddress {
    /// 3-level form, the common rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl core::str::FromStr for GroupAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        let main = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(KnxError::invalid_address)?;
        let second = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(KnxError::invalid_address)?;

        let addr = match parts.next() {
            // 3-level: Main/Middle/Sub
            Some(third) => {
                let middle = u8::try_from(second).map_err(|_| KnxError::invalid_address())?;
                let sub = third.parse::<u8>().map_err(|_| KnxError::invalid_address())?;
                if parts.next().is_some() {
                    return Err(KnxError::invalid_address());
                }
                Self::new(main, middle, sub)
            }
            // 2-level: Main/Sub
            None => Self::two_level(main, second),
        };
        addr.map_err(|_| KnxError::invalid_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_level_packing() {
        let addr = GroupAddress::new(1, 2, 3).unwrap();
        assert_eq!(addr.raw(), 0x0A03);
        assert_eq!((addr.main(), addr.middle(), addr.sub()), (1, 2, 3));
    }

    #[test]
    fn two_level_packing() {
        let addr = GroupAddress::two_level(1, 234).unwrap();
        assert_eq!((addr.main(), addr.sub_2level()), (1, 234));
        // Same raw value reads back in 3-level components
        assert_eq!((addr.middle(), addr.sub()), (0, 234));
    }

    #[test]
    fn range_extremes_round_trip() {
        for (m, mi, s) in [(0, 0, 0), (31, 7, 255), (31, 0, 0), (0, 7, 255)] {
            let addr = GroupAddress::new(m, mi, s).unwrap();
            let back = GroupAddress::from_bytes(&addr.to_bytes()).unwrap();
            assert_eq!((back.main(), back.middle(), back.sub()), (m, mi, s));
        }
        for (m, s) in [(0u8, 0u16), (31, 2047), (0, 2047), (31, 0)] {
            let addr = GroupAddress::two_level(m, s).unwrap();
            assert_eq!((addr.main(), addr.sub_2level()), (m, s));
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(GroupAddress::new(32, 0, 0).is_err());
        assert!(GroupAddress::new(0, 8, 0).is_err());
        assert!(GroupAddress::two_level(0, 2048).is_err());
    }

    #[test]
    fn parse_detects_level() {
        let three: GroupAddress = "1/2/3".parse().unwrap();
        assert_eq!(three.raw(), 0x0A03);
        let two: GroupAddress = "1/234".parse().unwrap();
        assert_eq!(two.sub_2level(), 234);
    }

    #[test]
    fn parse_format_round_trips() {
        let three: GroupAddress = "31/7/255".parse().unwrap();
        assert_eq!(three.format_3level().as_str(), "31/7/255");
        let two: GroupAddress = "31/2047".parse().unwrap();
        assert_eq!(two.format_2level().as_str(), "31/2047");
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in ["", "1", "1/2/3/4", "32/0/0", "1/8/0", "1/2048", "a/b/c", "1.2.3"] {
            assert!(s.parse::<GroupAddress>().is_err(), "{s}");
        }
    }

    #[test]
    fn display_uses_three_level() {
        assert_eq!(format!("{}", GroupAddress::from(0x0901)), "1/1/1");
    }
}
