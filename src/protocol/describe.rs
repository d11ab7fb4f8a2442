//! Device discovery and description frames.
//!
//! `SEARCH_REQUEST` is multicast by clients; servers answer with a unicast
//! `SEARCH_RESPONSE` carrying their control endpoint and two description
//! information blocks: device information and supported service families.
//! `DESCRIPTION_REQUEST`/`RESPONSE` is the unicast variant of the same
//! exchange.

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, DIB_DEVICE_INFO, DIB_SUPPORTED_SERVICES, FAMILY_CORE, FAMILY_ROUTING, MEDIUM_IP,
};
use crate::protocol::frame::{FrameBuilder, Hpai};

/// Wire length of the friendly-name field.
const FRIENDLY_NAME_LEN: usize = 30;

/// Device information DIB (type 0x01, 54 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfoDib {
    /// KNX medium code (0x20 = IP)
    pub medium: u8,
    /// Device status (bit 0: programming mode)
    pub status: u8,
    /// The device's own individual address
    pub address: IndividualAddress,
    /// Project installation identifier
    pub project_installation_id: u16,
    /// KNX serial number
    pub serial: [u8; 6],
    /// Routing multicast address the device listens on
    pub multicast_address: [u8; 4],
    /// MAC address
    pub mac: [u8; 6],
    /// Friendly name (at most 30 bytes, NUL padded on the wire)
    pub friendly_name: heapless::String<FRIENDLY_NAME_LEN>,
}

impl DeviceInfoDib {
    /// Encoded size.
    pub const SIZE: usize = 54;

    /// A minimal IP-medium device record.
    pub fn new(address: IndividualAddress, multicast_address: [u8; 4], name: &str) -> Self {
        let mut friendly_name = heapless::String::new();
        for c in name.chars() {
            if friendly_name.push(c).is_err() {
                break;
            }
        }
        Self {
            medium: MEDIUM_IP,
            status: 0,
            address,
            project_installation_id: 0,
            serial: [0; 6],
            multicast_address,
            mac: [0; 6],
            friendly_name,
        }
    }

    /// Encode into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = Self::SIZE as u8;
        buf[1] = DIB_DEVICE_INFO;
        buf[2] = self.medium;
        buf[3] = self.status;
        buf[4..6].copy_from_slice(&self.address.to_bytes());
        buf[6..8].copy_from_slice(&self.project_installation_id.to_be_bytes());
        buf[8..14].copy_from_slice(&self.serial);
        buf[14..18].copy_from_slice(&self.multicast_address);
        buf[18..24].copy_from_slice(&self.mac);
        buf[24..54].fill(0);
        buf[24..24 + self.friendly_name.len()].copy_from_slice(self.friendly_name.as_bytes());
        Ok(Self::SIZE)
    }

    /// Parse from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::truncated_frame());
        }
        if data[0] as usize != Self::SIZE || data[1] != DIB_DEVICE_INFO {
            return Err(KnxError::bad_header());
        }
        let name_bytes = &data[24..54];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(30);
        let friendly_name = core::str::from_utf8(&name_bytes[..name_len])
            .ok()
            .and_then(|s| heapless::String::try_from(s).ok())
            .unwrap_or_default();
        Ok(Self {
            medium: data[2],
            status: data[3],
            address: IndividualAddress::from_bytes(&data[4..6])?,
            project_installation_id: u16::from_be_bytes([data[6], data[7]]),
            serial: data[8..14].try_into().unwrap_or_default(),
            multicast_address: data[14..18].try_into().unwrap_or_default(),
            mac: data[18..24].try_into().unwrap_or_default(),
            friendly_name,
        })
    }
}

/// Supported service families DIB (type 0x02).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceFamiliesDib {
    /// `(family id, version)` pairs
    pub families: heapless::Vec<(u8, u8), 8>,
}

impl ServiceFamiliesDib {
    /// The families a routing node announces: Core v1 and Routing v1.
    pub fn router() -> Self {
        let mut families = heapless::Vec::new();
        let _ = families.push((FAMILY_CORE, 1));
        let _ = families.push((FAMILY_ROUTING, 1));
        Self { families }
    }

    /// Encoded size.
    pub fn wire_len(&self) -> usize {
        2 + 2 * self.families.len()
    }

    /// Encode into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = len as u8;
        buf[1] = DIB_SUPPORTED_SERVICES;
        for (i, &(family, version)) in self.families.iter().enumerate() {
            buf[2 + 2 * i] = family;
            buf[3 + 2 * i] = version;
        }
        Ok(len)
    }

    /// Parse from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        let len = data[0] as usize;
        if data[1] != DIB_SUPPORTED_SERVICES || len < 2 || len % 2 != 0 || data.len() < len {
            return Err(KnxError::bad_header());
        }
        let mut families = heapless::Vec::new();
        for pair in data[2..len].chunks_exact(2) {
            families
                .push((pair[0], pair[1]))
                .map_err(|_| KnxError::oversize_length())?;
        }
        Ok(Self { families })
    }

    /// Whether a family is announced, at any version.
    pub fn supports(&self, family: u8) -> bool {
        self.families.iter().any(|&(f, _)| f == family)
    }
}

/// `SEARCH_REQUEST` (0x0201) and `DESCRIPTION_REQUEST` (0x0203): both are
/// a single HPAI naming where to send the response.
#[derive(Debug, Clone, Copy)]
pub struct EndpointRequest {
    /// Which of the two request services this frame is
    pub service: ServiceType,
    /// Where the response should go (route-back allowed)
    pub endpoint: Hpai,
}

impl EndpointRequest {
    /// A discovery multicast request.
    pub const fn search(endpoint: Hpai) -> Self {
        Self {
            service: ServiceType::SearchRequest,
            endpoint,
        }
    }

    /// A unicast description request.
    pub const fn description(endpoint: Hpai) -> Self {
        Self {
            service: ServiceType::DescriptionRequest,
            endpoint,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Hpai::SIZE];
        self.endpoint.encode(&mut body)?;
        FrameBuilder::new(self.service, &body).build(buf)
    }

    /// Parse from the frame body of `service`.
    pub fn parse(service: ServiceType, body: &[u8]) -> Result<Self> {
        Ok(Self {
            service,
            endpoint: Hpai::parse(body)?,
        })
    }
}

/// `SEARCH_RESPONSE` (0x0202) and `DESCRIPTION_RESPONSE` (0x0204).
///
/// A search response leads with the server's control endpoint; a
/// description response goes straight to the DIBs.
#[derive(Debug, Clone)]
pub struct DescribeResponse {
    /// Which of the two response services this frame is
    pub service: ServiceType,
    /// Control endpoint (search responses only)
    pub control_endpoint: Option<Hpai>,
    /// Device information DIB
    pub device: DeviceInfoDib,
    /// Supported service families DIB
    pub families: ServiceFamiliesDib,
}

impl DescribeResponse {
    /// A search response.
    pub const fn search(
        control_endpoint: Hpai,
        device: DeviceInfoDib,
        families: ServiceFamiliesDib,
    ) -> Self {
        Self {
            service: ServiceType::SearchResponse,
            control_endpoint: Some(control_endpoint),
            device,
            families,
        }
    }

    /// A description response.
    pub const fn description(device: DeviceInfoDib, families: ServiceFamiliesDib) -> Self {
        Self {
            service: ServiceType::DescriptionResponse,
            control_endpoint: None,
            device,
            families,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; Hpai::SIZE + DeviceInfoDib::SIZE + 2 + 16];
        let mut offset = 0;
        if let Some(endpoint) = self.control_endpoint {
            offset += endpoint.encode(&mut body)?;
        }
        offset += self.device.encode(&mut body[offset..])?;
        offset += self.families.encode(&mut body[offset..])?;
        FrameBuilder::new(self.service, &body[..offset]).build(buf)
    }

    /// Parse from the frame body of `service`.
    pub fn parse(service: ServiceType, body: &[u8]) -> Result<Self> {
        let (control_endpoint, dib_start) = if service == ServiceType::SearchResponse {
            (Some(Hpai::parse(body)?), Hpai::SIZE)
        } else {
            (None, 0)
        };
        let device = DeviceInfoDib::parse(&body[dib_start..])?;
        let families = ServiceFamiliesDib::parse(&body[dib_start + DeviceInfoDib::SIZE..])?;
        Ok(Self {
            service,
            control_endpoint,
            device,
            families,
        })
    }
}
