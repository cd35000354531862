//! Control-transfer setup packets
//!
//! The first byte of a setup packet (`bmRequestType`) packs three fields:
//!
//! ```text
//!   bit 7     bits 6..5     bits 4..0
//! ┌───────┬──────────────┬─────────────┐
//! │  dir  │     type     │  recipient  │
//! └───────┴──────────────┴─────────────┘
//! ```
//!
//! `dir` is set only for device-to-host transfers. The second byte is the
//! request code (`bRequest`); `wValue`, `wIndex` and `wLength` follow as
//! little-endian `u16`s.

/// Standard request codes (USB 2.0, table 9-4)
pub mod request {
    pub const GET_STATUS: u8 = 0x00;
    pub const CLEAR_FEATURE: u8 = 0x01;
    pub const SET_FEATURE: u8 = 0x03;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_DESCRIPTOR: u8 = 0x07;
    pub const GET_CONFIGURATION: u8 = 0x08;
    pub const SET_CONFIGURATION: u8 = 0x09;
    pub const GET_INTERFACE: u8 = 0x0a;
    pub const SET_INTERFACE: u8 = 0x0b;
    pub const SYNCH_FRAME: u8 = 0x0c;
}

const DIR_DEVICE_TO_HOST: u8 = 0x80;
const TYPE_SHIFT: u8 = 5;
const TYPE_MASK: u8 = 0x03;
const RECIPIENT_MASK: u8 = 0x1f;

/// Request type field of `bmRequestType` (bits 5-6)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

impl RequestKind {
    pub fn from_code(code: u8) -> Self {
        match code & TYPE_MASK {
            0 => Self::Standard,
            1 => Self::Class,
            2 => Self::Vendor,
            _ => Self::Reserved,
        }
    }
}

/// Recipient field of `bmRequestType` (bits 0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    /// Codes 4..=31 are reserved but still representable on the wire
    Reserved(u8),
}

impl Recipient {
    pub fn code(self) -> u8 {
        match self {
            Self::Device => 0,
            Self::Interface => 1,
            Self::Endpoint => 2,
            Self::Other => 3,
            Self::Reserved(code) => code & RECIPIENT_MASK,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code & RECIPIENT_MASK {
            0 => Self::Device,
            1 => Self::Interface,
            2 => Self::Endpoint,
            3 => Self::Other,
            code => Self::Reserved(code),
        }
    }
}

/// Compose a `bmRequestType` byte from raw field codes
///
/// Codes wider than their field are masked rather than allowed to spill
/// into the neighbouring bits.
pub fn request_type_byte(direction_in: bool, kind: u8, recipient: u8) -> u8 {
    let mut byte = recipient & RECIPIENT_MASK;
    byte |= (kind & TYPE_MASK) << TYPE_SHIFT;
    if direction_in {
        byte |= DIR_DEVICE_TO_HOST;
    }
    byte
}

/// An 8-byte control-transfer setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// Size of a setup packet on the wire
    pub const SIZE: usize = 8;

    /// Build a setup packet with only `bmRequestType` and `bRequest` filled in
    ///
    /// `wValue`, `wIndex` and `wLength` start at zero; use the `with_*`
    /// methods to set them.
    pub fn build(direction_in: bool, kind: RequestKind, recipient: Recipient, request: u8) -> Self {
        Self {
            request_type: request_type_byte(direction_in, kind as u8, recipient.code()),
            request,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: u16) -> Self {
        self.value = value;
        self
    }

    pub fn with_index(mut self, index: u16) -> Self {
        self.index = index;
        self
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    /// True when the data stage flows device-to-host
    pub fn is_device_to_host(&self) -> bool {
        self.request_type & DIR_DEVICE_TO_HOST != 0
    }

    pub fn kind(&self) -> RequestKind {
        RequestKind::from_code(self.request_type >> TYPE_SHIFT)
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::from_code(self.request_type)
    }

    /// Wire representation (`wValue`/`wIndex`/`wLength` little-endian)
    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }
}
