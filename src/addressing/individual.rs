//! KNX individual (physical) addresses.
//!
//! Layout: area (4 bits) | line (4 bits) | device (8 bits), rendered as
//! "Area.Line.Device" with ranges 0-15 / 0-15 / 0-255.

use crate::error::{KnxError, Result};
use core::fmt;

/// KNX individual address, identifying one physical device on the bus.
///
/// ```
/// use knx_link::addressing::IndividualAddress;
///
/// let addr = IndividualAddress::new(1, 1, 5)?;
/// assert_eq!(addr.raw(), 0x1105);
///
/// let parsed: IndividualAddress = "1.1.5".parse()?;
/// assert_eq!(parsed, addr);
/// # Ok::<(), knx_link::KnxError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Maximum area value (4 bits)
    pub const MAX_AREA: u8 = 15;
    /// Maximum line value (4 bits)
    pub const MAX_LINE: u8 = 15;

    /// The unassigned address 0.0.0, used as the source of client-built
    /// frames when the gateway fills in the real device address.
    pub const UNASSIGNED: Self = Self { raw: 0 };

    /// Create an address from its components.
    ///
    /// # Errors
    ///
    /// Fails with an argument error if `area` or `line` exceeds 15.
    pub fn new(area: u8, line: u8, device: u8) -> Result<Self> {
        if area > Self::MAX_AREA || line > Self::MAX_LINE {
            return Err(KnxError::address_out_of_range());
        }
        Ok(Self {
            raw: (u16::from(area) << 12) | (u16::from(line) << 8) | u16::from(device),
        })
    }

    /// The raw 16-bit value.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Area component (0-15).
    #[inline]
    pub const fn area(self) -> u8 {
        (self.raw >> 12) as u8
    }

    /// Line component (0-15).
    #[inline]
    pub const fn line(self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Device component (0-255).
    #[inline]
    pub const fn device(self) -> u8 {
        (self.raw & 0xFF) as u8
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

impl From<u16> for IndividualAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<IndividualAddress> for u16 {
    #[inline]
    fn from(addr: IndividualAddress) -> u16 {
        addr.raw
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl core::str::FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(KnxError::invalid_address)
        };
        let (area, line, device) = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(KnxError::invalid_address());
        }
        Self::new(area, line, device).map_err(|_| KnxError::invalid_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_packing() {
        let addr = IndividualAddress::new(1, 2, 3).unwrap();
        assert_eq!(addr.raw(), 0x1203);
        assert_eq!((addr.area(), addr.line(), addr.device()), (1, 2, 3));
    }

    #[test]
    fn range_extremes_round_trip() {
        for (a, l, d) in [(0, 0, 0), (15, 15, 255), (15, 0, 255), (0, 15, 0)] {
            let addr = IndividualAddress::new(a, l, d).unwrap();
            let back = IndividualAddress::from_bytes(&addr.to_bytes()).unwrap();
            assert_eq!((back.area(), back.line(), back.device()), (a, l, d));
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(IndividualAddress::new(16, 0, 0).is_err());
        assert!(IndividualAddress::new(0, 16, 0).is_err());
    }

    #[test]
    fn parse_and_display_round_trip() {
        let addr: IndividualAddress = "15.15.255".parse().unwrap();
        assert_eq!(format!("{addr}"), "15.15.255");
    }

    #[test]
    fn parse_rejects_malformed() {
        for s in ["", "1.2", "1.2.3.4", "16.0.0", "a.b.c", "1/2/3"] {
            assert!(s.parse::<IndividualAddress>().is_err(), "{s}");
        }
    }

    #[test]
    fn unassigned_is_zero() {
        assert_eq!(IndividualAddress::UNASSIGNED.raw(), 0);
        assert_eq!(format!("{}", IndividualAddress::UNASSIGNED), "0.0.0");
    }
}
