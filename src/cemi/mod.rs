//! Common External Message Interface (cEMI) frames.
//!
//! cEMI is the byte layout KNXnet/IP transports carry as payload. A frame
//! is a message code, an additional-information block, and the service
//! information of the variant the code names:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info TLVs (variable)          │
//! ├──────────────────────────────────────────┤
//! │ Service Information                      │
//! │  L_Data: CF1, CF2, source, destination,  │
//! │          LSDU length, TPDU               │
//! │  L_Poll_Data: CF1, CF2, source, dest,    │
//! │          slot count (+ poll data in .con)│
//! │  L_Raw: opaque payload                   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The variants are one sum type, [`CemiFrame`]; shared layout lives in
//! free-standing structs ([`LData`], [`LPollData`], [`LRaw`]) so a request
//! and the matching indication differ only in the message code.

pub mod add_info;
pub mod apdu;
pub mod control;

#[doc(inline)]
pub use add_info::{AddInfoBlock, AddInfoItem, AddInfoType};
#[doc(inline)]
pub use apdu::{Apci, Apdu, Tpci};
#[doc(inline)]
pub use control::{ControlField1, ControlField2, Priority};

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};

/// Maximum encoded cEMI frame this crate handles.
pub const CEMI_MAX: usize = 128;

/// Owned encoded cEMI bytes, sized for queueing.
pub type RawCemi = heapless::Vec<u8, CEMI_MAX>;

/// cEMI message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageCode {
    /// `L_Raw.req`
    RawRequest = 0x10,
    /// `L_Data.req`
    DataRequest = 0x11,
    /// `L_Poll_Data.req`
    PollRequest = 0x13,
    /// `L_Poll_Data.con`
    PollConfirm = 0x25,
    /// `L_Data.ind`
    DataIndication = 0x29,
    /// `L_Raw.ind`
    RawIndication = 0x2D,
    /// `L_Data.con`
    DataConfirm = 0x2E,
    /// `L_Raw.con`
    RawConfirm = 0x2F,
}

impl MessageCode {
    /// Map a wire byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::RawRequest),
            0x11 => Some(Self::DataRequest),
            0x13 => Some(Self::PollRequest),
            0x25 => Some(Self::PollConfirm),
            0x29 => Some(Self::DataIndication),
            0x2D => Some(Self::RawIndication),
            0x2E => Some(Self::DataConfirm),
            0x2F => Some(Self::RawConfirm),
            _ => None,
        }
    }

    /// The wire byte.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// An encoded group value, opaque to this crate.
///
/// Datapoint-type encoding (bool, percentages, floats, ...) belongs to an
/// external DPT library; the core only needs the bytes and whether a single
/// byte may ride inline in the APDU. The two helpers cover the values small
/// enough to never need a DPT table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupValue {
    bytes: heapless::Vec<u8, { apdu::APDU_DATA_MAX }>,
}

impl GroupValue {
    /// A one-bit value (DPT 1.x shape).
    pub fn bit(value: bool) -> Self {
        let mut bytes = heapless::Vec::new();
        let _ = bytes.push(u8::from(value));
        Self { bytes }
    }

    /// A value of at most six bits (DPT 2.x / 3.x shape).
    ///
    /// # Errors
    ///
    /// Fails with an argument error above 0x3F.
    pub fn six_bits(value: u8) -> Result<Self> {
        if value > 0x3F {
            return Err(KnxError::payload_too_large());
        }
        let mut bytes = heapless::Vec::new();
        let _ = bytes.push(value);
        Ok(Self { bytes })
    }

    /// Pre-encoded DPT bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            bytes: heapless::Vec::from_slice(bytes).map_err(|_| KnxError::payload_too_large())?,
        })
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// `L_Data` service information, shared by request, confirmation and
/// indication.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LData {
    /// Additional information block
    pub add_info: AddInfoBlock,
    /// Control field 1
    pub ctrl1: ControlField1,
    /// Control field 2
    pub ctrl2: ControlField2,
    /// Source (always an individual address)
    pub source: IndividualAddress,
    /// Raw destination; interpret via `ctrl2.is_group_address()`
    pub destination: u16,
    /// Transport and application PDU
    pub apdu: Apdu,
}

impl LData {
    /// Build a `GroupValue_Write` frame with the client defaults
    /// (CF1 = 0xBC, CF2 = 0xE0).
    pub fn group_write(
        source: IndividualAddress,
        destination: GroupAddress,
        value: &GroupValue,
    ) -> Result<Self> {
        Ok(Self {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source,
            destination: destination.raw(),
            apdu: Apdu::new(Tpci::UnnumberedData, Apci::GroupValueWrite, value.as_bytes())?,
        })
    }

    /// Build a `GroupValue_Read` frame with the client defaults.
    pub fn group_read(source: IndividualAddress, destination: GroupAddress) -> Result<Self> {
        Ok(Self {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source,
            destination: destination.raw(),
            apdu: Apdu::new(Tpci::UnnumberedData, Apci::GroupValueRead, &[])?,
        })
    }

    /// Build a `GroupValue_Response` frame with the client defaults.
    pub fn group_response(
        source: IndividualAddress,
        destination: GroupAddress,
        value: &GroupValue,
    ) -> Result<Self> {
        Ok(Self {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source,
            destination: destination.raw(),
            apdu: Apdu::new(
                Tpci::UnnumberedData,
                Apci::GroupValueResponse,
                value.as_bytes(),
            )?,
        })
    }

    /// Destination as a group address, when CF2 says so.
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination))
    }

    /// Destination as an individual address, when CF2 says so.
    pub fn destination_individual(&self) -> Option<IndividualAddress> {
        (!self.ctrl2.is_group_address()).then(|| IndividualAddress::from(self.destination))
    }

    fn wire_len(&self) -> usize {
        2 + self.add_info.wire_len() + 7 + self.apdu.wire_len()
    }

    fn encode_with(&self, code: MessageCode, buf: &mut [u8]) -> Result<usize> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = code.to_u8();
        buf[1] = self.add_info.wire_len() as u8;
        let mut offset = 2;
        offset += self.add_info.encode(&mut buf[offset..])?;
        buf[offset] = self.ctrl1.raw();
        buf[offset + 1] = self.ctrl2.raw();
        buf[offset + 2..offset + 4].copy_from_slice(&self.source.to_bytes());
        buf[offset + 4..offset + 6].copy_from_slice(&self.destination.to_be_bytes());
        buf[offset + 6] = self.apdu.lsdu_length();
        offset += 7;
        offset += self.apdu.encode(&mut buf[offset..])?;
        Ok(offset)
    }

    fn decode_service(add_info: AddInfoBlock, service: &[u8]) -> Result<Self> {
        if service.len() < 7 {
            return Err(KnxError::truncated_frame());
        }
        let ctrl1 = ControlField1::from(service[0]);
        let ctrl2 = ControlField2::from(service[1]);
        let source = IndividualAddress::from_bytes(&service[2..4])?;
        let destination = u16::from_be_bytes([service[4], service[5]]);
        let lsdu_len = service[6] as usize;
        let tpdu_end = 7 + lsdu_len + 1;
        if service.len() < tpdu_end {
            return Err(KnxError::truncated_frame());
        }
        let apdu = Apdu::decode(&service[7..tpdu_end])?;
        Ok(Self {
            add_info,
            ctrl1,
            ctrl2,
            source,
            destination,
            apdu,
        })
    }
}

/// `L_Poll_Data` service information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LPollData {
    /// Additional information block
    pub add_info: AddInfoBlock,
    /// Control field 1
    pub ctrl1: ControlField1,
    /// Control field 2
    pub ctrl2: ControlField2,
    /// Source (always an individual address)
    pub source: IndividualAddress,
    /// Polling group destination (raw)
    pub destination: u16,
    /// Number of polling slots (0-15)
    pub num_slots: u8,
    /// Poll data nibble, present in `.con` only (0-14)
    pub poll_data: Option<u8>,
}

impl LPollData {
    /// Validate the nibble ranges.
    ///
    /// # Errors
    ///
    /// `num_slots` above 15 or `poll_data` above 14 is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.num_slots > 15 {
            return Err(KnxError::poll_slots_range());
        }
        if matches!(self.poll_data, Some(d) if d > 14) {
            return Err(KnxError::poll_data_range());
        }
        Ok(())
    }

    fn wire_len(&self) -> usize {
        2 + self.add_info.wire_len() + 7 + usize::from(self.poll_data.is_some())
    }

    fn encode_with(&self, code: MessageCode, buf: &mut [u8]) -> Result<usize> {
        self.validate()?;
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = code.to_u8();
        buf[1] = self.add_info.wire_len() as u8;
        let mut offset = 2;
        offset += self.add_info.encode(&mut buf[offset..])?;
        buf[offset] = self.ctrl1.raw();
        buf[offset + 1] = self.ctrl2.raw();
        buf[offset + 2..offset + 4].copy_from_slice(&self.source.to_bytes());
        buf[offset + 4..offset + 6].copy_from_slice(&self.destination.to_be_bytes());
        buf[offset + 6] = self.num_slots & 0x0F;
        offset += 7;
        if let Some(data) = self.poll_data {
            buf[offset] = data & 0x0F;
            offset += 1;
        }
        Ok(offset)
    }

    fn decode_service(add_info: AddInfoBlock, service: &[u8], confirm: bool) -> Result<Self> {
        let need = 7 + usize::from(confirm);
        if service.len() < need {
            return Err(KnxError::truncated_frame());
        }
        let frame = Self {
            add_info,
            ctrl1: ControlField1::from(service[0]),
            ctrl2: ControlField2::from(service[1]),
            source: IndividualAddress::from_bytes(&service[2..4])?,
            destination: u16::from_be_bytes([service[4], service[5]]),
            num_slots: service[6],
            poll_data: confirm.then(|| service[7]),
        };
        frame.validate()?;
        Ok(frame)
    }
}

/// `L_Raw` service information: opaque link-layer bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LRaw {
    /// Additional information block
    pub add_info: AddInfoBlock,
    /// Opaque payload
    pub payload: heapless::Vec<u8, CEMI_MAX>,
}

impl LRaw {
    fn wire_len(&self) -> usize {
        2 + self.add_info.wire_len() + self.payload.len()
    }

    fn encode_with(&self, code: MessageCode, buf: &mut [u8]) -> Result<usize> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = code.to_u8();
        buf[1] = self.add_info.wire_len() as u8;
        let mut offset = 2;
        offset += self.add_info.encode(&mut buf[offset..])?;
        buf[offset..offset + self.payload.len()].copy_from_slice(&self.payload);
        Ok(offset + self.payload.len())
    }

    fn decode_service(add_info: AddInfoBlock, service: &[u8]) -> Result<Self> {
        Ok(Self {
            add_info,
            payload: heapless::Vec::from_slice(service)
                .map_err(|_| KnxError::payload_too_large())?,
        })
    }
}

/// A complete cEMI frame: message code plus service information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CemiFrame {
    /// `L_Data.req`
    DataRequest(LData),
    /// `L_Data.con`
    DataConfirm(LData),
    /// `L_Data.ind`
    DataIndication(LData),
    /// `L_Poll_Data.req`
    PollRequest(LPollData),
    /// `L_Poll_Data.con`
    PollConfirm(LPollData),
    /// `L_Raw.req`
    RawRequest(LRaw),
    /// `L_Raw.con`
    RawConfirm(LRaw),
    /// `L_Raw.ind`
    RawIndication(LRaw),
}

impl CemiFrame {
    /// The message code this variant encodes as.
    pub const fn message_code(&self) -> MessageCode {
        match self {
            Self::DataRequest(_) => MessageCode::DataRequest,
            Self::DataConfirm(_) => MessageCode::DataConfirm,
            Self::DataIndication(_) => MessageCode::DataIndication,
            Self::PollRequest(_) => MessageCode::PollRequest,
            Self::PollConfirm(_) => MessageCode::PollConfirm,
            Self::RawRequest(_) => MessageCode::RawRequest,
            Self::RawConfirm(_) => MessageCode::RawConfirm,
            Self::RawIndication(_) => MessageCode::RawIndication,
        }
    }

    /// The `L_Data` service information, for the three data variants.
    pub const fn as_ldata(&self) -> Option<&LData> {
        match self {
            Self::DataRequest(f) | Self::DataConfirm(f) | Self::DataIndication(f) => Some(f),
            _ => None,
        }
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let code = self.message_code();
        match self {
            Self::DataRequest(f) | Self::DataConfirm(f) | Self::DataIndication(f) => {
                f.encode_with(code, buf)
            }
            Self::PollRequest(f) | Self::PollConfirm(f) => f.encode_with(code, buf),
            Self::RawRequest(f) | Self::RawConfirm(f) | Self::RawIndication(f) => {
                f.encode_with(code, buf)
            }
        }
    }

    /// Encode into an owned buffer.
    pub fn encode_vec(&self) -> Result<RawCemi> {
        let mut buf = [0u8; CEMI_MAX];
        let n = self.encode(&mut buf)?;
        heapless::Vec::from_slice(&buf[..n]).map_err(|_| KnxError::payload_too_large())
    }

    /// Decode a frame, dispatching on the message code.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(KnxError::truncated_frame());
        }
        let code = MessageCode::from_u8(bytes[0]).ok_or_else(KnxError::invalid_message_code)?;
        let add_info_len = bytes[1] as usize;
        let service_start = 2 + add_info_len;
        if bytes.len() < service_start {
            return Err(KnxError::truncated_frame());
        }
        let add_info = AddInfoBlock::decode(&bytes[2..service_start])?;
        let service = &bytes[service_start..];

        Ok(match code {
            MessageCode::DataRequest => {
                Self::DataRequest(LData::decode_service(add_info, service)?)
            }
            MessageCode::DataConfirm => {
                Self::DataConfirm(LData::decode_service(add_info, service)?)
            }
            MessageCode::DataIndication => {
                Self::DataIndication(LData::decode_service(add_info, service)?)
            }
            MessageCode::PollRequest => {
                Self::PollRequest(LPollData::decode_service(add_info, service, false)?)
            }
            MessageCode::PollConfirm => {
                Self::PollConfirm(LPollData::decode_service(add_info, service, true)?)
            }
            MessageCode::RawRequest => Self::RawRequest(LRaw::decode_service(add_info, service)?),
            MessageCode::RawConfirm => Self::RawConfirm(LRaw::decode_service(add_info, service)?),
            MessageCode::RawIndication => {
                Self::RawIndication(LRaw::decode_service(add_info, service)?)
            }
        })
    }

    /// Decode a frame, failing with `InvalidMessageCode` when the code does
    /// not match `expected`.
    pub fn decode_expecting(bytes: &[u8], expected: MessageCode) -> Result<Self> {
        let frame = Self::decode(bytes)?;
        if frame.message_code() != expected {
            return Err(KnxError::invalid_message_code());
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ga;

    #[test]
    fn group_write_matches_reference_bytes() {
        // src 0.0.0, dst 1/1/1, boolean true
        let frame = CemiFrame::DataRequest(
            LData::group_write(
                IndividualAddress::UNASSIGNED,
                ga!(1 / 1 / 1),
                &GroupValue::bit(true),
            )
            .unwrap(),
        );
        let mut buf = [0u8; CEMI_MAX];
        let n = frame.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            &[0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x09, 0x01, 0x01, 0x00, 0x81]
        );
    }

    #[test]
    fn group_read_has_lsdu_one() {
        let frame = CemiFrame::DataRequest(
            LData::group_read(IndividualAddress::UNASSIGNED, ga!(5 / 6 / 7)).unwrap(),
        );
        let mut buf = [0u8; CEMI_MAX];
        let n = frame.encode(&mut buf).unwrap();
        // LSDU length counts bytes beyond the shared TPCI byte
        assert_eq!(buf[8], 0x01);
        assert_eq!(&buf[9..n], &[0x00, 0x00]);
    }

    #[test]
    fn data_round_trip_across_control_fields() {
        let value = GroupValue::from_slice(&[0x12, 0x34]).unwrap();
        for ctrl1 in [0x00u8, 0xBC, 0x94, 0xFF] {
            for ctrl2 in [0xE0u8, 0x60, 0x80, 0xF0] {
                let mut ldata = LData::group_write(
                    IndividualAddress::new(1, 1, 1).unwrap(),
                    ga!(31 / 7 / 255),
                    &value,
                )
                .unwrap();
                ldata.ctrl1 = ControlField1::from(ctrl1);
                ldata.ctrl2 = ControlField2::from(ctrl2);
                let frame = CemiFrame::DataRequest(ldata);
                let bytes = frame.encode_vec().unwrap();
                let back = CemiFrame::decode(&bytes).unwrap();
                assert_eq!(back, frame);
            }
        }
    }

    #[test]
    fn indication_round_trip_with_add_info() {
        let mut add_info = AddInfoBlock::empty();
        add_info
            .push(AddInfoItem::new(0x04, &[0xAB, 0xCD]).unwrap())
            .unwrap();
        let frame = CemiFrame::DataIndication(LData {
            add_info,
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::new(1, 2, 3).unwrap(),
            destination: ga!(1 / 2 / 3).raw(),
            apdu: Apdu::new(Tpci::UnnumberedData, Apci::GroupValueWrite, &[0x01]).unwrap(),
        });
        let bytes = frame.encode_vec().unwrap();
        assert_eq!(bytes[1], 4); // add-info length
        assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn decode_rejects_unknown_message_code() {
        assert!(matches!(
            CemiFrame::decode(&[0xFF, 0x00]),
            Err(e) if e.is_format()
        ));
    }

    #[test]
    fn decode_rejects_truncated_tpdu() {
        // Declares LSDU length 5 but the TPDU is cut short
        let bytes = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x05, 0x00, 0x80];
        assert!(CemiFrame::decode(&bytes).is_err());
    }

    #[test]
    fn decode_expecting_enforces_variant() {
        let frame = CemiFrame::DataRequest(
            LData::group_read(IndividualAddress::UNASSIGNED, ga!(1 / 1 / 1)).unwrap(),
        );
        let bytes = frame.encode_vec().unwrap();
        assert!(CemiFrame::decode_expecting(&bytes, MessageCode::DataRequest).is_ok());
        assert!(CemiFrame::decode_expecting(&bytes, MessageCode::DataIndication).is_err());
    }

    #[test]
    fn poll_request_round_trip() {
        let frame = CemiFrame::PollRequest(LPollData {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::new(1, 1, 1).unwrap(),
            destination: ga!(1 / 0 / 0).raw(),
            num_slots: 15,
            poll_data: None,
        });
        let bytes = frame.encode_vec().unwrap();
        assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn poll_confirm_round_trip() {
        let frame = CemiFrame::PollConfirm(LPollData {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::new(1, 1, 1).unwrap(),
            destination: ga!(1 / 0 / 0).raw(),
            num_slots: 4,
            poll_data: Some(14),
        });
        let bytes = frame.encode_vec().unwrap();
        assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn poll_ranges_are_rejected() {
        let mut poll = LPollData {
            add_info: AddInfoBlock::empty(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::UNASSIGNED,
            destination: 0,
            num_slots: 16,
            poll_data: None,
        };
        assert!(poll.validate().is_err());
        poll.num_slots = 15;
        poll.poll_data = Some(15);
        assert!(poll.validate().is_err());
        poll.poll_data = Some(14);
        assert!(poll.validate().is_ok());
    }

    #[test]
    fn raw_round_trip() {
        let frame = CemiFrame::RawIndication(LRaw {
            add_info: AddInfoBlock::empty(),
            payload: heapless::Vec::from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap(),
        });
        let bytes = frame.encode_vec().unwrap();
        assert_eq!(bytes[0], 0x2D);
        assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
    }
}
