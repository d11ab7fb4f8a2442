//! KNXnet/IP frame envelope.
//!
//! Every service travels in a 6-byte header:
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────┐
//! │ Header Len   │ Protocol Ver │  Service Type ID    │
//! │   (0x06)     │   (0x10)     │     (2 bytes BE)    │
//! ├──────────────┴──────────────┴─────────────────────┤
//! │        Total Length (2 bytes BE, incl. header)    │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Over UDP one datagram is one frame; over TCP the [`FrameAssembler`]
//! re-slices the byte stream on the total-length field.

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, HEADER_SIZE_10, IPV4_TCP, IPV4_UDP, KNXNETIP_VERSION_10, MAX_FRAME_SIZE,
};

/// One owned KNXnet/IP frame, as sliced from a socket.
pub type RawFrame = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// KNXnet/IP frame header (6 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KnxnetIpHeader {
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total frame length including the header itself
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 6;

    /// Header for a frame with `body_length` bytes after the header.
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse and validate the fixed fields.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::truncated_frame());
        }
        if data[0] != HEADER_SIZE_10 {
            return Err(KnxError::bad_header());
        }
        if data[1] != KNXNETIP_VERSION_10 {
            return Err(KnxError::unsupported_version());
        }
        let service_type = ServiceType::from_u16(u16::from_be_bytes([data[2], data[3]]))
            .ok_or_else(KnxError::unknown_service_type)?;
        let total_length = u16::from_be_bytes([data[4], data[5]]);
        if (total_length as usize) < Self::SIZE {
            return Err(KnxError::bad_header());
        }
        Ok(Self {
            service_type,
            total_length,
        })
    }

    /// Encode the header into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = HEADER_SIZE_10;
        buf[1] = KNXNETIP_VERSION_10;
        buf[2..4].copy_from_slice(&self.service_type.to_u16().to_be_bytes());
        buf[4..6].copy_from_slice(&self.total_length.to_be_bytes());
        Ok(Self::SIZE)
    }

    /// Length of the body after the header.
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a received KNXnet/IP frame.
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    data: &'a [u8],
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a complete frame from `data`.
    ///
    /// # Errors
    ///
    /// Fails with a format error if the header is invalid or `data` is
    /// shorter than the declared total length.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;
        if data.len() < header.total_length as usize {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self { data, header })
    }

    /// The parsed header.
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Service type, for dispatch.
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// The body after the header, exactly `total_length - 6` bytes.
    pub fn body(&self) -> &'a [u8] {
        &self.data[KnxnetIpHeader::SIZE..self.header.total_length as usize]
    }
}

/// Builds a frame from a service type and body bytes.
#[derive(Debug)]
pub struct FrameBuilder<'a> {
    service_type: ServiceType,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    /// A builder for `service_type` carrying `body`.
    pub const fn new(service_type: ServiceType, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Encode header plus body into `buf`.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total = KnxnetIpHeader::SIZE + self.body.len();
        if total > MAX_FRAME_SIZE {
            return Err(KnxError::oversize_length());
        }
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }
        KnxnetIpHeader::new(self.service_type, self.body.len() as u16).encode(buf)?;
        buf[KnxnetIpHeader::SIZE..total].copy_from_slice(self.body);
        Ok(total)
    }
}

/// Host Protocol Address Information: transport protocol plus IPv4 endpoint.
///
/// The route-back form (0.0.0.0:0) tells the peer to reply to the source
/// address of the packet it received, which is what NAT'd clients want.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hpai {
    /// Host protocol code (0x01 UDP, 0x02 TCP)
    pub protocol: u8,
    /// IPv4 address
    pub ip: [u8; 4],
    /// Port number
    pub port: u16,
}

impl Hpai {
    /// Encoded size for IPv4.
    pub const SIZE: usize = 8;

    /// A UDP endpoint.
    pub const fn udp(ip: [u8; 4], port: u16) -> Self {
        Self {
            protocol: IPV4_UDP,
            ip,
            port,
        }
    }

    /// A TCP endpoint.
    pub const fn tcp(ip: [u8; 4], port: u16) -> Self {
        Self {
            protocol: IPV4_TCP,
            ip,
            port,
        }
    }

    /// The route-back endpoint 0.0.0.0:0.
    pub const fn route_back(protocol: u8) -> Self {
        Self {
            protocol,
            ip: [0, 0, 0, 0],
            port: 0,
        }
    }

    /// Whether this is the route-back form.
    pub const fn is_route_back(&self) -> bool {
        self.port == 0 && self.ip[0] == 0 && self.ip[1] == 0 && self.ip[2] == 0 && self.ip[3] == 0
    }

    /// Parse from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::truncated_frame());
        }
        if data[0] != Self::SIZE as u8 {
            return Err(KnxError::bad_header());
        }
        Ok(Self {
            protocol: data[1],
            ip: [data[2], data[3], data[4], data[5]],
            port: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Encode into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = Self::SIZE as u8;
        buf[1] = self.protocol;
        buf[2..6].copy_from_slice(&self.ip);
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());
        Ok(Self::SIZE)
    }
}

/// Reassembles KNXnet/IP frames from a TCP byte stream.
///
/// Bytes are appended as they arrive; complete frames are sliced off by
/// the total-length field at offset 4. A declared length below the header
/// size or above [`MAX_FRAME_SIZE`] means the stream is out of sync and
/// the connection must be dropped.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: heapless::Vec<u8, { 2 * MAX_FRAME_SIZE }>,
}

impl FrameAssembler {
    /// An empty assembler.
    pub const fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
        }
    }

    /// Append received bytes.
    ///
    /// # Errors
    ///
    /// Fails with a transport error if the backlog exceeds the buffer; the
    /// peer is sending faster than frames are drained.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer
            .extend_from_slice(bytes)
            .map_err(|_| KnxError::buffer_too_small())
    }

    /// Slice off the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Fails with a format error when the length field is implausible;
    /// the stream cannot be re-synchronized after that.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.buffer.len() < KnxnetIpHeader::SIZE {
            return Ok(None);
        }
        let total = u16::from_be_bytes([self.buffer[4], self.buffer[5]]) as usize;
        if total < KnxnetIpHeader::SIZE || total > MAX_FRAME_SIZE {
            return Err(KnxError::oversize_length());
        }
        if self.buffer.len() < total {
            return Ok(None);
        }
        let frame = RawFrame::from_slice(&self.buffer[..total])
            .map_err(|_| KnxError::oversize_length())?;
        let remainder_len = self.buffer.len() - total;
        for i in 0..remainder_len {
            self.buffer[i] = self.buffer[total + i];
        }
        self.buffer.truncate(remainder_len);
        Ok(Some(frame))
    }

    /// Discard any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
