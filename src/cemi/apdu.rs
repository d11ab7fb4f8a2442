//! TPDU/APDU bit packing.
//!
//! The transport and application control information share the first two
//! bytes of the TPDU:
//!
//! ```text
//! byte 0: [TPCI 6 bits | APCI bits 9-8]
//! byte 1: [APCI bits 7-0]  (low 6 bits double as inline data)
//! bytes 2..: long-form payload
//! ```
//!
//! A payload of a single value that fits in 6 bits is merged into byte 1
//! (short form); anything else follows as explicit data bytes. Connection
//! control TPDUs (T_Connect and friends) are a single byte with no APCI.

use crate::error::{KnxError, Result};

/// Maximum long-form payload carried by one APDU.
pub const APDU_DATA_MAX: usize = 112;

/// Transport layer protocol control information (high 6 bits of byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tpci {
    /// Unnumbered data (group and broadcast communication)
    UnnumberedData,
    /// Numbered data on a transport connection
    NumberedData {
        /// Transport sequence number (0-15)
        sequence: u8,
    },
    /// T_Connect control packet
    Connect,
    /// T_Disconnect control packet
    Disconnect,
    /// T_Ack control packet
    Ack {
        /// Transport sequence number (0-15)
        sequence: u8,
    },
    /// T_Nak control packet
    Nak {
        /// Transport sequence number (0-15)
        sequence: u8,
    },
}

impl Tpci {
    /// Decode from a TPDU first byte. All eight bits participate so the
    /// APCI high bits stay recoverable by the caller.
    pub const fn from_byte(byte: u8) -> Self {
        match byte >> 6 {
            0b00 => Self::UnnumberedData,
            0b01 => Self::NumberedData {
                sequence: (byte >> 2) & 0x0F,
            },
            0b10 => {
                if byte & 0x01 != 0 {
                    Self::Disconnect
                } else {
                    Self::Connect
                }
            }
            _ => {
                let sequence = (byte >> 2) & 0x0F;
                if byte & 0x01 != 0 {
                    Self::Nak { sequence }
                } else {
                    Self::Ack { sequence }
                }
            }
        }
    }

    /// Wire byte (APCI high bits zero).
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::UnnumberedData => 0x00,
            Self::NumberedData { sequence } => 0x40 | ((sequence & 0x0F) << 2),
            Self::Connect => 0x80,
            Self::Disconnect => 0x81,
            Self::Ack { sequence } => 0xC2 | ((sequence & 0x0F) << 2),
            Self::Nak { sequence } => 0xC3 | ((sequence & 0x0F) << 2),
        }
    }

    /// Whether the TPDU carries an APDU (data packets do, control does not).
    pub const fn is_data(self) -> bool {
        matches!(self, Self::UnnumberedData | Self::NumberedData { .. })
    }
}

/// Application layer protocol control information (10-bit command).
///
/// Most commands occupy the top four of the ten bits (0x40 granularity),
/// leaving byte 1's low six bits to inline data or command parameters. The
/// property commands live in the escape range and use all ten bits, so
/// decoding matches the exact value first and the 0x40-granular family
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Apci {
    /// `A_GroupValue_Read`
    GroupValueRead,
    /// `A_GroupValue_Response`
    GroupValueResponse,
    /// `A_GroupValue_Write`
    GroupValueWrite,
    /// `A_IndividualAddress_Write`
    IndividualAddressWrite,
    /// `A_IndividualAddress_Read`
    IndividualAddressRead,
    /// `A_IndividualAddress_Response`
    IndividualAddressResponse,
    /// `A_ADC_Read`
    AdcRead,
    /// `A_ADC_Response`
    AdcResponse,
    /// `A_Memory_Read`
    MemoryRead,
    /// `A_Memory_Response`
    MemoryResponse,
    /// `A_Memory_Write`
    MemoryWrite,
    /// `A_DeviceDescriptor_Read`
    DeviceDescriptorRead,
    /// `A_DeviceDescriptor_Response`
    DeviceDescriptorResponse,
    /// `A_Restart`
    Restart,
    /// `A_PropertyValue_Read`
    PropertyValueRead,
    /// `A_PropertyValue_Response`
    PropertyValueResponse,
    /// `A_PropertyValue_Write`
    PropertyValueWrite,
    /// `A_PropertyDescription_Read`
    PropertyDescriptionRead,
    /// `A_PropertyDescription_Response`
    PropertyDescriptionResponse,
    /// Any other 10-bit command
    Other(u16),
}

impl Apci {
    /// Commands that occupy all ten bits (escape range).
    const EXACT: [(u16, Apci); 5] = [
        (0x3D5, Apci::PropertyValueRead),
        (0x3D6, Apci::PropertyValueResponse),
        (0x3D7, Apci::PropertyValueWrite),
        (0x3D8, Apci::PropertyDescriptionRead),
        (0x3D9, Apci::PropertyDescriptionResponse),
    ];

    /// Decode a 10-bit command value.
    pub fn from_u10(value: u16) -> Self {
        let value = value & 0x3FF;
        for (code, apci) in Self::EXACT {
            if code == value {
                return apci;
            }
        }
        match value & 0x3C0 {
            0x000 if value == 0 => Self::GroupValueRead,
            0x040 => Self::GroupValueResponse,
            0x080 => Self::GroupValueWrite,
            0x0C0 => Self::IndividualAddressWrite,
            0x100 => Self::IndividualAddressRead,
            0x140 => Self::IndividualAddressResponse,
            0x180 => Self::AdcRead,
            0x1C0 => Self::AdcResponse,
            0x200 => Self::MemoryRead,
            0x240 => Self::MemoryResponse,
            0x280 => Self::MemoryWrite,
            0x300 => Self::DeviceDescriptorRead,
            0x340 => Self::DeviceDescriptorResponse,
            0x380 => Self::Restart,
            _ => Self::Other(value),
        }
    }

    /// The 10-bit command value.
    pub const fn to_u10(self) -> u16 {
        match self {
            Self::GroupValueRead => 0x000,
            Self::GroupValueResponse => 0x040,
            Self::GroupValueWrite => 0x080,
            Self::IndividualAddressWrite => 0x0C0,
            Self::IndividualAddressRead => 0x100,
            Self::IndividualAddressResponse => 0x140,
            Self::AdcRead => 0x180,
            Self::AdcResponse => 0x1C0,
            Self::MemoryRead => 0x200,
            Self::MemoryResponse => 0x240,
            Self::MemoryWrite => 0x280,
            Self::DeviceDescriptorRead => 0x300,
            Self::DeviceDescriptorResponse => 0x340,
            Self::Restart => 0x380,
            Self::PropertyValueRead => 0x3D5,
            Self::PropertyValueResponse => 0x3D6,
            Self::PropertyValueWrite => 0x3D7,
            Self::PropertyDescriptionRead => 0x3D8,
            Self::PropertyDescriptionResponse => 0x3D9,
            Self::Other(value) => value & 0x3FF,
        }
    }

    /// Whether the low six bits of byte 1 may carry this command's data
    /// (the GroupValue data family).
    pub const fn carries_inline_data(self) -> bool {
        matches!(self, Self::GroupValueResponse | Self::GroupValueWrite)
    }
}

/// One application protocol data unit, ready for a cEMI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Apdu {
    tpci: Tpci,
    apci: Apci,
    data: heapless::Vec<u8, APDU_DATA_MAX>,
    short: bool,
}

impl Apdu {
    /// Build an APDU, selecting the short form when the payload is a single
    /// value that fits in six bits and the command supports inlining.
    ///
    /// # Errors
    ///
    /// Fails with an argument error if `data` exceeds [`APDU_DATA_MAX`].
    pub fn new(tpci: Tpci, apci: Apci, data: &[u8]) -> Result<Self> {
        let short = data.len() == 1 && data[0] <= 0x3F && apci.carries_inline_data();
        let data = heapless::Vec::from_slice(data).map_err(|_| KnxError::payload_too_large())?;
        Ok(Self {
            tpci,
            apci,
            data,
            short,
        })
    }

    /// A single-byte connection-control TPDU (T_Connect, T_Ack, ...).
    pub fn control(tpci: Tpci) -> Self {
        Self {
            tpci,
            apci: Apci::Other(0),
            data: heapless::Vec::new(),
            short: false,
        }
    }

    /// Transport control information.
    #[inline]
    pub const fn tpci(&self) -> Tpci {
        self.tpci
    }

    /// Application command.
    #[inline]
    pub const fn apci(&self) -> Apci {
        self.apci
    }

    /// Payload bytes (the inline value for the short form).
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the payload rides in the low six bits of byte 1.
    #[inline]
    pub const fn is_short(&self) -> bool {
        self.short
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        if !self.tpci.is_data() {
            1
        } else if self.short || self.data.is_empty() {
            2
        } else {
            2 + self.data.len()
        }
    }

    /// The length value the enclosing cEMI frame reports: bytes beyond the
    /// shared TPCI byte.
    pub fn lsdu_length(&self) -> u8 {
        (self.wire_len() - 1) as u8
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(KnxError::buffer_too_small());
        }

        if !self.tpci.is_data() {
            buf[0] = self.tpci.to_byte();
            return Ok(1);
        }

        let apci = self.apci.to_u10();
        buf[0] = (self.tpci.to_byte() & 0xFC) | ((apci >> 8) as u8 & 0x03);
        buf[1] = (apci & 0xFF) as u8;
        if self.short {
            buf[1] |= self.data[0] & 0x3F;
        } else {
            buf[2..len].copy_from_slice(&self.data);
        }
        Ok(len)
    }

    /// Decode a TPDU slice.
    ///
    /// A two-byte TPDU always yields the inline six-bit value with the
    /// short flag set; whether that value is meaningful depends on the
    /// command (a `GroupValue_Read` carries zero there).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(&byte0) = bytes.first() else {
            return Err(KnxError::truncated_frame());
        };
        let tpci = Tpci::from_byte(byte0);

        if bytes.len() == 1 {
            if tpci.is_data() {
                return Err(KnxError::truncated_frame());
            }
            return Ok(Self::control(tpci));
        }

        let apci_raw = (u16::from(byte0 & 0x03) << 8) | u16::from(bytes[1]);
        let apci = Apci::from_u10(apci_raw);
        let (data, short) = if bytes.len() > 2 {
            let data =
                heapless::Vec::from_slice(&bytes[2..]).map_err(|_| KnxError::payload_too_large())?;
            (data, false)
        } else if !matches!(apci, Apci::Other(_)) && apci.to_u10() & 0x3F == 0 {
            // The command leaves byte 1's low six bits free, so they are
            // the inline value. Escape-range commands use all of byte 1
            // and never carry inline data.
            let mut inline = heapless::Vec::new();
            let _ = inline.push(bytes[1] & 0x3F);
            (inline, true)
        } else {
            (heapless::Vec::new(), false)
        };

        Ok(Self {
            tpci,
            apci,
            data,
            short,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpci_byte_round_trip() {
        let cases = [
            (0x00, Tpci::UnnumberedData),
            (0x4C, Tpci::NumberedData { sequence: 3 }),
            (0x80, Tpci::Connect),
            (0x81, Tpci::Disconnect),
            (0xC2, Tpci::Ack { sequence: 0 }),
            (0xFE, Tpci::Ack { sequence: 15 }),
            (0xC7, Tpci::Nak { sequence: 1 }),
        ];
        for (byte, tpci) in cases {
            assert_eq!(Tpci::from_byte(byte), tpci);
            assert_eq!(tpci.to_byte(), byte);
        }
    }

    #[test]
    fn apci_group_value_codes() {
        assert_eq!(Apci::GroupValueRead.to_u10(), 0x000);
        assert_eq!(Apci::GroupValueResponse.to_u10(), 0x040);
        assert_eq!(Apci::GroupValueWrite.to_u10(), 0x080);
        assert_eq!(Apci::from_u10(0x080), Apci::GroupValueWrite);
    }

    #[test]
    fn apci_escape_range_is_exact() {
        assert_eq!(Apci::from_u10(0x3D7), Apci::PropertyValueWrite);
        // A neighboring escape code is not folded into a family
        assert_eq!(Apci::from_u10(0x3D0), Apci::Other(0x3D0));
    }

    #[test]
    fn short_write_encodes_to_two_bytes() {
        let apdu = Apdu::new(Tpci::UnnumberedData, Apci::GroupValueWrite, &[0x01]).unwrap();
        assert!(apdu.is_short());
        assert_eq!(apdu.lsdu_length(), 1);
        let mut buf = [0u8; 4];
        let n = apdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x81]);
    }

    #[test]
    fn read_encodes_with_zero_data_bits() {
        let apdu = Apdu::new(Tpci::UnnumberedData, Apci::GroupValueRead, &[]).unwrap();
        assert!(!apdu.is_short());
        let mut buf = [0u8; 4];
        let n = apdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x00]);
    }

    #[test]
    fn long_form_appends_data_bytes() {
        let apdu = Apdu::new(
            Tpci::UnnumberedData,
            Apci::GroupValueWrite,
            &[0x12, 0x34],
        )
        .unwrap();
        assert!(!apdu.is_short());
        assert_eq!(apdu.lsdu_length(), 3);
        let mut buf = [0u8; 8];
        let n = apdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x80, 0x12, 0x34]);
    }

    #[test]
    fn one_byte_value_above_6_bits_stays_long() {
        let apdu = Apdu::new(Tpci::UnnumberedData, Apci::GroupValueWrite, &[0x40]).unwrap();
        assert!(!apdu.is_short());
        let mut buf = [0u8; 4];
        let n = apdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x80, 0x40]);
    }

    #[test]
    fn decode_short_form() {
        let apdu = Apdu::decode(&[0x00, 0x81]).unwrap();
        assert_eq!(apdu.tpci(), Tpci::UnnumberedData);
        assert_eq!(apdu.apci(), Apci::GroupValueWrite);
        assert_eq!(apdu.data(), &[0x01]);
        assert!(apdu.is_short());
    }

    #[test]
    fn decode_long_form() {
        let apdu = Apdu::decode(&[0x00, 0x80, 0x12, 0x34]).unwrap();
        assert_eq!(apdu.apci(), Apci::GroupValueWrite);
        assert_eq!(apdu.data(), &[0x12, 0x34]);
        assert!(!apdu.is_short());
    }

    #[test]
    fn round_trip_preserves_tuple() {
        let cases: &[(Tpci, Apci, &[u8])] = &[
            (Tpci::UnnumberedData, Apci::GroupValueWrite, &[0x3F]),
            (Tpci::UnnumberedData, Apci::GroupValueResponse, &[0x00]),
            (
                Tpci::NumberedData { sequence: 7 },
                Apci::MemoryRead,
                &[0x04, 0x10, 0x00],
            ),
            (Tpci::UnnumberedData, Apci::GroupValueWrite, &[0xAA, 0xBB]),
        ];
        for &(tpci, apci, data) in cases {
            let apdu = Apdu::new(tpci, apci, data).unwrap();
            let mut buf = [0u8; 16];
            let n = apdu.encode(&mut buf).unwrap();
            let back = Apdu::decode(&buf[..n]).unwrap();
            assert_eq!(back.tpci(), tpci);
            assert_eq!(back.apci(), apci);
            assert_eq!(back.data(), data);
            assert_eq!(back.is_short(), apdu.is_short());
        }
    }

    #[test]
    fn control_tpdu_is_one_byte() {
        let apdu = Apdu::control(Tpci::Connect);
        let mut buf = [0u8; 2];
        let n = apdu.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x80]);
        let back = Apdu::decode(&buf[..n]).unwrap();
        assert_eq!(back.tpci(), Tpci::Connect);
        assert_eq!(back.data(), &[]);
    }

    #[test]
    fn decode_rejects_empty() {
        assert!(Apdu::decode(&[]).is_err());
    }
}
