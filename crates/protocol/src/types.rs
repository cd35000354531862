//! Device request and reply types
//!
//! A [`Urb`] is everything the encoder needs to put one device request on
//! the wire; a [`UrbReply`] is what the remote side sends back for it.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::setup::SetupPacket;

/// USB/IP transfer direction
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// USBIP_DIR_OUT (host-to-device)
    Out = 0,
    /// USBIP_DIR_IN (device-to-host)
    In = 1,
}

impl Direction {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Out),
            1 => Ok(Self::In),
            other => Err(ProtocolError::InvalidDirection(other)),
        }
    }
}

/// A USB request block awaiting transport
///
/// `data` carries the OUT payload; for IN transfers it is empty and
/// `transfer_buffer_length` says how much the device may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urb {
    /// Remote device id (busnum << 16 | devnum)
    pub devid: u32,
    pub direction: Direction,
    /// Endpoint number without the direction bit
    pub endpoint: u8,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    /// Start frame for isochronous transfers
    pub start_frame: u32,
    /// Isochronous packet count, 0 for everything else
    pub number_of_packets: u32,
    /// Polling interval for interrupt/isochronous endpoints
    pub interval: u32,
    /// Setup packet; all zero unless this is a control transfer
    pub setup: SetupPacket,
    pub data: Bytes,
}

impl Urb {
    /// Control transfer on endpoint 0
    ///
    /// Direction and buffer length are taken from the setup packet; `data`
    /// is ignored for device-to-host requests.
    pub fn control(devid: u32, setup: SetupPacket, data: Bytes) -> Self {
        let direction = if setup.is_device_to_host() {
            Direction::In
        } else {
            Direction::Out
        };
        let data = match direction {
            Direction::In => Bytes::new(),
            Direction::Out => data,
        };
        Self {
            devid,
            direction,
            endpoint: 0,
            transfer_flags: 0,
            transfer_buffer_length: u32::from(setup.length),
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup,
            data,
        }
    }

    /// Bulk OUT transfer carrying `data`
    pub fn bulk_out(devid: u32, endpoint: u8, data: Bytes) -> Self {
        Self {
            devid,
            direction: Direction::Out,
            endpoint: endpoint & 0x0f,
            transfer_flags: 0,
            transfer_buffer_length: data.len() as u32,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: SetupPacket::default(),
            data,
        }
    }

    /// Bulk IN transfer of up to `length` bytes
    pub fn bulk_in(devid: u32, endpoint: u8, length: u32) -> Self {
        Self {
            devid,
            direction: Direction::In,
            endpoint: endpoint & 0x0f,
            transfer_flags: 0,
            transfer_buffer_length: length,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: SetupPacket::default(),
            data: Bytes::new(),
        }
    }

    /// Interrupt IN transfer polled every `interval` frames
    pub fn interrupt_in(devid: u32, endpoint: u8, length: u32, interval: u32) -> Self {
        Self {
            interval,
            ..Self::bulk_in(devid, endpoint, length)
        }
    }

    /// Number of payload bytes that follow the header on the wire
    pub fn out_payload_len(&self) -> usize {
        match self.direction {
            Direction::Out => self.data.len(),
            Direction::In => 0,
        }
    }

    pub fn is_isochronous(&self) -> bool {
        self.number_of_packets > 0
    }
}

/// Reply to a submitted URB, decoded from a `RET_SUBMIT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrbReply {
    /// Sequence number of the request this answers
    pub seqnum: u32,
    /// 0 on success, negative errno otherwise
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub error_count: u32,
    /// IN payload, empty for OUT transfers
    pub data: Bytes,
}

impl UrbReply {
    pub fn success(seqnum: u32, data: Bytes) -> Self {
        Self {
            seqnum,
            status: 0,
            actual_length: data.len() as u32,
            start_frame: 0,
            error_count: 0,
            data,
        }
    }

    pub fn error(seqnum: u32, status: i32) -> Self {
        Self {
            seqnum,
            status,
            actual_length: 0,
            start_frame: 0,
            error_count: 0,
            data: Bytes::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}
