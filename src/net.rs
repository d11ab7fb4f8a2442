//! Network address types and the transport seam.
//!
//! The protocol engines never touch sockets directly; they go through the
//! [`transport::AsyncTransport`] trait so that embassy-net sockets, test
//! doubles and future transports stay interchangeable.

pub mod transport;

// Embassy adapters (only when running on an embassy-net stack)
#[cfg(feature = "embassy")]
pub mod embassy_adapter;

// Scripted transport for tests
pub mod mock_transport;

use core::fmt;

/// IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ipv4Addr {
    octets: [u8; 4],
}

impl Ipv4Addr {
    /// The unspecified address 0.0.0.0 (route-back / NAT mode).
    pub const UNSPECIFIED: Self = Self::new(0, 0, 0, 0);

    /// The KNXnet/IP routing multicast address 224.0.23.12.
    pub const KNX_MULTICAST: Self = Self::new(224, 0, 23, 12);

    /// An address from its octets.
    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self {
            octets: [a, b, c, d],
        }
    }

    /// The four octets.
    #[inline]
    pub const fn octets(&self) -> [u8; 4] {
        self.octets
    }

    /// Whether this is a multicast address (224.0.0.0/4).
    #[inline]
    pub const fn is_multicast(&self) -> bool {
        self.octets[0] >= 224 && self.octets[0] <= 239
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    #[inline]
    fn from(octets: [u8; 4]) -> Self {
        Self { octets }
    }
}

impl From<Ipv4Addr> for [u8; 4] {
    #[inline]
    fn from(addr: Ipv4Addr) -> [u8; 4] {
        addr.octets
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.octets[0], self.octets[1], self.octets[2], self.octets[3]
        )
    }
}

impl core::str::FromStr for Ipv4Addr {
    type Err = crate::error::KnxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut octets = [0u8; 4];
        for octet in &mut octets {
            *octet = parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(crate::error::KnxError::invalid_address)?;
        }
        if parts.next().is_some() {
            return Err(crate::error::KnxError::invalid_address());
        }
        Ok(Self { octets })
    }
}

/// IPv4 endpoint: address plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IpEndpoint {
    /// IP address
    pub addr: Ipv4Addr,
    /// Port number
    pub port: u16,
}

impl IpEndpoint {
    /// The unspecified endpoint 0.0.0.0:0.
    pub const UNSPECIFIED: Self = Self {
        addr: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    /// An endpoint from address and port.
    #[inline]
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl From<([u8; 4], u16)> for IpEndpoint {
    #[inline]
    fn from((octets, port): ([u8; 4], u16)) -> Self {
        Self {
            addr: Ipv4Addr::from(octets),
            port,
        }
    }
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}
