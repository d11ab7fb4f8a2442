//! KNXnet/IP service frames for connection-oriented communication.
//!
//! Builders write complete frames (header included) into caller buffers;
//! parsers take the frame body, i.e. everything after the 6-byte header.
//!
//! ```text
//! Client                          Gateway
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |------ TUNNELLING_REQUEST ----->|
//!   |<------ TUNNELLING_ACK ---------|
//!   |--- CONNECTIONSTATE_REQUEST --->|   (every 60 s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, DEVICE_MGMT_CONNECTION, TUNNEL_CONNECTION, TUNNEL_LINKLAYER,
};
use crate::protocol::frame::{FrameBuilder, Hpai, KnxnetIpHeader};

/// Maximum feature value size carried by the feature services.
pub const FEATURE_VALUE_MAX: usize = 16;

/// Connection request information: which kind of channel to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cri {
    /// Tunnel connection (0x04) with a KNX layer code
    Tunnel {
        /// KNX layer, 0x02 = link layer
        layer: u8,
    },
    /// Device management connection (0x03)
    DeviceManagement,
}

impl Cri {
    /// The default tunnel CRI (link layer).
    pub const fn tunnel() -> Self {
        Self::Tunnel {
            layer: TUNNEL_LINKLAYER,
        }
    }

    /// Connection type code.
    pub const fn connection_type(self) -> u8 {
        match self {
            Self::Tunnel { .. } => TUNNEL_CONNECTION,
            Self::DeviceManagement => DEVICE_MGMT_CONNECTION,
        }
    }

    fn wire_len(self) -> usize {
        match self {
            Self::Tunnel { .. } => 4,
            Self::DeviceManagement => 2,
        }
    }

    fn encode(self, buf: &mut [u8]) -> Result<usize> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = len as u8;
        buf[1] = self.connection_type();
        if let Self::Tunnel { layer } = self {
            buf[2] = layer;
            buf[3] = 0x00;
        }
        Ok(len)
    }
}

/// Connection response data: the gateway's view of the opened channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Crd {
    /// Connection type code echoed by the gateway
    pub connection_type: u8,
    /// Individual address the gateway assigned to this tunnel, when present
    pub assigned_address: Option<IndividualAddress>,
}

impl Crd {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        let len = data[0] as usize;
        if len < 2 || data.len() < len {
            return Err(KnxError::truncated_frame());
        }
        let assigned_address = if len >= 4 {
            Some(IndividualAddress::from_bytes(&data[len - 2..len])?)
        } else {
            None
        };
        Ok(Self {
            connection_type: data[1],
            assigned_address,
        })
    }
}

/// `CONNECT_REQUEST` (0x0205).
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    /// Control endpoint HPAI
    pub control_endpoint: Hpai,
    /// Data endpoint HPAI
    pub data_endpoint: Hpai,
    /// Requested connection kind
    pub cri: Cri,
}

impl ConnectRequest {
    /// A request announcing the same endpoint for control and data.
    pub const fn new(endpoint: Hpai, cri: Cri) -> Self {
        Self {
            control_endpoint: endpoint,
            data_endpoint: endpoint,
            cri,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; 2 * Hpai::SIZE + 4];
        let mut offset = self.control_endpoint.encode(&mut body)?;
        offset += self.data_endpoint.encode(&mut body[offset..])?;
        offset += self.cri.encode(&mut body[offset..])?;
        FrameBuilder::new(ServiceType::ConnectRequest, &body[..offset]).build(buf)
    }
}

/// `CONNECT_RESPONSE` (0x0206).
#[derive(Debug, Clone, Copy)]
pub struct ConnectResponse {
    /// Channel id assigned by the gateway
    pub channel_id: u8,
    /// KNXnet/IP status byte
    pub status: u8,
    /// Gateway data endpoint, present on success
    pub data_endpoint: Option<Hpai>,
    /// Connection response data, present on success
    pub crd: Option<Crd>,
}

impl ConnectResponse {
    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        let channel_id = body[0];
        let status = body[1];
        if status != 0 || body.len() < 2 + Hpai::SIZE {
            return Ok(Self {
                channel_id,
                status,
                data_endpoint: None,
                crd: None,
            });
        }
        let data_endpoint = Hpai::parse(&body[2..])?;
        let crd = Crd::parse(&body[2 + Hpai::SIZE..])?;
        Ok(Self {
            channel_id,
            status,
            data_endpoint: Some(data_endpoint),
            crd: Some(crd),
        })
    }

    /// Whether the gateway accepted the connection.
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Builds the channel-id/status frames shared by the connection-state and
/// disconnect exchanges.
fn build_channel_frame(
    service: ServiceType,
    channel_id: u8,
    endpoint: Hpai,
    buf: &mut [u8],
) -> Result<usize> {
    let mut body = [0u8; 2 + Hpai::SIZE];
    body[0] = channel_id;
    body[1] = 0x00;
    endpoint.encode(&mut body[2..])?;
    FrameBuilder::new(service, &body).build(buf)
}

/// `CONNECTIONSTATE_REQUEST` (0x0207), the heartbeat probe.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStateRequest {
    /// Channel to probe
    pub channel_id: u8,
    /// Control endpoint HPAI
    pub control_endpoint: Hpai,
}

impl ConnectionStateRequest {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_channel_frame(
            ServiceType::ConnectionStateRequest,
            self.channel_id,
            self.control_endpoint,
            buf,
        )
    }

    /// Parse from the frame body (routers answer these from peers too).
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 + Hpai::SIZE {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            channel_id: body[0],
            control_endpoint: Hpai::parse(&body[2..])?,
        })
    }
}

/// `CONNECTIONSTATE_RESPONSE` (0x0208).
#[derive(Debug, Clone, Copy)]
pub struct ConnectionStateResponse {
    /// Channel the response refers to
    pub channel_id: u8,
    /// KNXnet/IP status byte
    pub status: u8,
}

impl ConnectionStateResponse {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        FrameBuilder::new(
            ServiceType::ConnectionStateResponse,
            &[self.channel_id, self.status],
        )
        .build(buf)
    }

    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            channel_id: body[0],
            status: body[1],
        })
    }

    /// Whether the channel is still alive.
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// `DISCONNECT_REQUEST` (0x0209).
#[derive(Debug, Clone, Copy)]
pub struct DisconnectRequest {
    /// Channel to tear down
    pub channel_id: u8,
    /// Control endpoint HPAI
    pub control_endpoint: Hpai,
}

impl DisconnectRequest {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        build_channel_frame(
            ServiceType::DisconnectRequest,
            self.channel_id,
            self.control_endpoint,
            buf,
        )
    }

    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 + Hpai::SIZE {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            channel_id: body[0],
            control_endpoint: Hpai::parse(&body[2..])?,
        })
    }
}

/// `DISCONNECT_RESPONSE` (0x020A).
#[derive(Debug, Clone, Copy)]
pub struct DisconnectResponse {
    /// Channel that was torn down
    pub channel_id: u8,
    /// KNXnet/IP status byte
    pub status: u8,
}

impl DisconnectResponse {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        FrameBuilder::new(
            ServiceType::DisconnectResponse,
            &[self.channel_id, self.status],
        )
        .build(buf)
    }

    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            channel_id: body[0],
            status: body[1],
        })
    }
}

/// The 4-byte connection header every data-channel frame carries between
/// the KNXnet/IP header and its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionHeader {
    /// Communication channel id
    pub channel_id: u8,
    /// Sequence counter (mod 256)
    pub sequence: u8,
}

impl ConnectionHeader {
    /// Encoded size.
    pub const SIZE: usize = 4;

    /// A header for `channel_id` at `sequence`.
    pub const fn new(channel_id: u8, sequence: u8) -> Self {
        Self {
            channel_id,
            sequence,
        }
    }

    fn encode(self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = Self::SIZE as u8;
        buf[1] = self.channel_id;
        buf[2] = self.sequence;
        buf[3] = 0x00;
        Ok(Self::SIZE)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            channel_id: data[1],
            sequence: data[2],
        })
    }
}

/// `TUNNELLING_REQUEST` (0x0420) or `DEVICE_CONFIGURATION_REQUEST`
/// (0x0310): connection header plus a cEMI body.
#[derive(Debug)]
pub struct TunnelingRequest<'a> {
    /// Which of the two data services this frame is
    pub service: ServiceType,
    /// Connection header
    pub header: ConnectionHeader,
    /// Encoded cEMI frame
    pub cemi: &'a [u8],
}

impl<'a> TunnelingRequest<'a> {
    /// A tunneling data request.
    pub const fn tunnel(header: ConnectionHeader, cemi: &'a [u8]) -> Self {
        Self {
            service: ServiceType::TunnelingRequest,
            header,
            cemi,
        }
    }

    /// A device-management data request.
    pub const fn device_config(header: ConnectionHeader, cemi: &'a [u8]) -> Self {
        Self {
            service: ServiceType::DeviceConfigurationRequest,
            header,
            cemi,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total = KnxnetIpHeader::SIZE + ConnectionHeader::SIZE + self.cemi.len();
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }
        KnxnetIpHeader::new(
            self.service,
            (ConnectionHeader::SIZE + self.cemi.len()) as u16,
        )
        .encode(buf)?;
        let mut offset = KnxnetIpHeader::SIZE;
        offset += self.header.encode(&mut buf[offset..])?;
        buf[offset..offset + self.cemi.len()].copy_from_slice(self.cemi);
        Ok(offset + self.cemi.len())
    }

    /// Parse from the frame body of `service`.
    pub fn parse(service: ServiceType, body: &'a [u8]) -> Result<Self> {
        Ok(Self {
            service,
            header: ConnectionHeader::decode(body)?,
            cemi: &body[ConnectionHeader::SIZE..],
        })
    }
}

/// `TUNNELLING_ACK` (0x0421) or `DEVICE_CONFIGURATION_ACK` (0x0311).
///
/// The status rides in the fourth connection-header byte, so the whole
/// frame is 10 bytes.
#[derive(Debug, Clone, Copy)]
pub struct TunnelingAck {
    /// Which of the two ack services this frame is
    pub service: ServiceType,
    /// Connection header echoing the acknowledged sequence
    pub header: ConnectionHeader,
    /// KNXnet/IP status byte
    pub status: u8,
}

impl TunnelingAck {
    /// A tunneling ack.
    pub const fn tunnel(header: ConnectionHeader, status: u8) -> Self {
        Self {
            service: ServiceType::TunnelingAck,
            header,
            status,
        }
    }

    /// A device-management ack.
    pub const fn device_config(header: ConnectionHeader, status: u8) -> Self {
        Self {
            service: ServiceType::DeviceConfigurationAck,
            header,
            status,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; ConnectionHeader::SIZE];
        self.header.encode(&mut body)?;
        body[3] = self.status;
        FrameBuilder::new(self.service, &body).build(buf)
    }

    /// Parse from the frame body of `service`.
    pub fn parse(service: ServiceType, body: &[u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            service,
            header: ConnectionHeader::decode(body)?,
            status: body[3],
        })
    }

    /// Whether the peer accepted the frame.
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Tunneling interface feature identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeatureId {
    /// Supported EMI types
    SupportedEmiTypes,
    /// Device descriptor type 0
    DeviceDescriptor,
    /// Bus connection status
    BusStatus,
    /// KNX individual address of the interface
    KnxAddress,
    /// Configuration flags
    ConfigFlags,
    /// Maximum APDU length
    MaxApduLength,
    /// Enhanced connection version
    EnhancedVersion,
    /// Any other identifier
    Other(u8),
}

impl FeatureId {
    /// Map a wire identifier.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::SupportedEmiTypes,
            0x02 => Self::DeviceDescriptor,
            0x03 => Self::BusStatus,
            0x04 => Self::KnxAddress,
            0x05 => Self::ConfigFlags,
            0x06 => Self::MaxApduLength,
            0x07 => Self::EnhancedVersion,
            other => Self::Other(other),
        }
    }

    /// The wire identifier.
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::SupportedEmiTypes => 0x01,
            Self::DeviceDescriptor => 0x02,
            Self::BusStatus => 0x03,
            Self::KnxAddress => 0x04,
            Self::ConfigFlags => 0x05,
            Self::MaxApduLength => 0x06,
            Self::EnhancedVersion => 0x07,
            Self::Other(value) => value,
        }
    }
}

/// `TUNNELLING_FEATURE_GET` (0x0422).
#[derive(Debug, Clone, Copy)]
pub struct FeatureGet {
    /// Connection header
    pub header: ConnectionHeader,
    /// Feature to read
    pub feature: FeatureId,
}

impl FeatureGet {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; ConnectionHeader::SIZE + 2];
        self.header.encode(&mut body)?;
        body[ConnectionHeader::SIZE] = self.feature.to_u8();
        FrameBuilder::new(ServiceType::TunnelingFeatureGet, &body).build(buf)
    }
}

/// `TUNNELLING_FEATURE_RESPONSE` (0x0423) and `TUNNELLING_FEATURE_INFO`
/// (0x0425): feature id, status, and the raw value bytes.
#[derive(Debug, Clone)]
pub struct FeatureValue {
    /// Connection header
    pub header: ConnectionHeader,
    /// Feature the value belongs to
    pub feature: FeatureId,
    /// KNXnet/IP status byte (0x00 on INFO frames)
    pub status: u8,
    /// Raw feature value
    pub value: heapless::Vec<u8, FEATURE_VALUE_MAX>,
}

impl FeatureValue {
    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < ConnectionHeader::SIZE + 2 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            header: ConnectionHeader::decode(body)?,
            feature: FeatureId::from_u8(body[ConnectionHeader::SIZE]),
            status: body[ConnectionHeader::SIZE + 1],
            value: heapless::Vec::from_slice(&body[ConnectionHeader::SIZE + 2..])
                .map_err(|_| KnxError::payload_too_large())?,
        })
    }

    /// Whether the interface reported success.
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}
