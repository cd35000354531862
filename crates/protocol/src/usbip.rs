//! USB/IP wire protocol headers
//!
//! The protocol is documented in the Linux kernel:
//! drivers/usb/usbip/usbip_common.h
//!
//! # Protocol Overview
//!
//! - All integers are big-endian (network byte order)
//! - Every message starts with a 20-byte basic header followed by a
//!   28-byte command-specific block, 48 bytes in total
//! - `CMD_SUBMIT` carries OUT payload after the header, `RET_SUBMIT`
//!   carries IN payload after the header
//! - `seqnum` in the basic header is the only field used to match a reply
//!   to its request

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::{self, Read, Write};

use crate::error::{ProtocolError, Result};
use crate::types::{Direction, Urb, UrbReply};

/// Size of every USB/IP request/response header
pub const USBIP_HEADER_SIZE: usize = UsbIpHeader::SIZE + UsbIpCmdSubmit::SIZE;

/// USB/IP command codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbIpCommand {
    /// Submit a USB request (URB)
    CmdSubmit = 0x0001,
    /// Unlink a USB request
    CmdUnlink = 0x0002,
    /// Return from USB request
    RetSubmit = 0x0003,
    /// Return from unlink
    RetUnlink = 0x0004,
}

impl UsbIpCommand {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0x0001 => Ok(Self::CmdSubmit),
            0x0002 => Ok(Self::CmdUnlink),
            0x0003 => Ok(Self::RetSubmit),
            0x0004 => Ok(Self::RetUnlink),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// USB/IP basic header (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIpHeader {
    /// Command code
    pub command: u32,
    /// Sequence number for matching requests/responses
    pub seqnum: u32,
    /// Device ID
    pub devid: u32,
    /// Direction: 0 = USBIP_DIR_OUT, 1 = USBIP_DIR_IN
    pub direction: u32,
    /// Endpoint number
    pub ep: u32,
}

impl UsbIpHeader {
    /// Size of the basic header in bytes
    pub const SIZE: usize = 20;

    pub fn new(command: UsbIpCommand, seqnum: u32, devid: u32) -> Self {
        Self {
            command: command as u32,
            seqnum,
            devid,
            direction: 0,
            ep: 0,
        }
    }

    /// Header for a `CMD_SUBMIT` of `urb`
    pub fn cmd_submit(seqnum: u32, urb: &Urb) -> Self {
        Self {
            command: UsbIpCommand::CmdSubmit as u32,
            seqnum,
            devid: urb.devid,
            direction: urb.direction as u32,
            ep: u32::from(urb.endpoint),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            command: reader.read_u32::<BigEndian>()?,
            seqnum: reader.read_u32::<BigEndian>()?,
            devid: reader.read_u32::<BigEndian>()?,
            direction: reader.read_u32::<BigEndian>()?,
            ep: reader.read_u32::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.command)?;
        writer.write_u32::<BigEndian>(self.seqnum)?;
        writer.write_u32::<BigEndian>(self.devid)?;
        writer.write_u32::<BigEndian>(self.direction)?;
        writer.write_u32::<BigEndian>(self.ep)?;
        Ok(())
    }

    pub fn command_type(&self) -> Result<UsbIpCommand> {
        UsbIpCommand::from_u32(self.command)
    }

    fn expect(&self, expected: UsbIpCommand) -> Result<()> {
        if self.command != expected as u32 {
            return Err(ProtocolError::UnexpectedCommand {
                expected: expected as u32,
                actual: self.command,
            });
        }
        Ok(())
    }
}

/// USB/IP CMD_SUBMIT block (28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIpCmdSubmit {
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    /// Setup packet for control transfers (8 bytes)
    pub setup: [u8; 8],
}

impl UsbIpCmdSubmit {
    pub const SIZE: usize = 28;

    pub fn from_urb(urb: &Urb) -> Self {
        Self {
            transfer_flags: urb.transfer_flags,
            transfer_buffer_length: urb.transfer_buffer_length,
            start_frame: urb.start_frame,
            number_of_packets: urb.number_of_packets,
            interval: urb.interval,
            setup: urb.setup.to_bytes(),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let transfer_flags = reader.read_u32::<BigEndian>()?;
        let transfer_buffer_length = reader.read_u32::<BigEndian>()?;
        let start_frame = reader.read_u32::<BigEndian>()?;
        let number_of_packets = reader.read_u32::<BigEndian>()?;
        let interval = reader.read_u32::<BigEndian>()?;

        let mut setup = [0u8; 8];
        reader.read_exact(&mut setup)?;

        Ok(Self {
            transfer_flags,
            transfer_buffer_length,
            start_frame,
            number_of_packets,
            interval,
            setup,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.transfer_flags)?;
        writer.write_u32::<BigEndian>(self.transfer_buffer_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.interval)?;
        writer.write_all(&self.setup)?;
        Ok(())
    }
}

/// USB/IP RET_SUBMIT block (28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIpRetSubmit {
    /// Status code (0 = success, negative = error)
    pub status: i32,
    /// Actual length of data transferred
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
}

impl UsbIpRetSubmit {
    pub const SIZE: usize = 28;
    const PADDING: usize = 8;

    pub fn success(actual_length: u32) -> Self {
        Self {
            status: 0,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
        }
    }

    pub fn error(status: i32) -> Self {
        Self {
            status,
            actual_length: 0,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let status = reader.read_i32::<BigEndian>()?;
        let actual_length = reader.read_u32::<BigEndian>()?;
        let start_frame = reader.read_u32::<BigEndian>()?;
        let number_of_packets = reader.read_u32::<BigEndian>()?;
        let error_count = reader.read_u32::<BigEndian>()?;

        let mut padding = [0u8; Self::PADDING];
        reader.read_exact(&mut padding)?;

        Ok(Self {
            status,
            actual_length,
            start_frame,
            number_of_packets,
            error_count,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(self.status)?;
        writer.write_u32::<BigEndian>(self.actual_length)?;
        writer.write_u32::<BigEndian>(self.start_frame)?;
        writer.write_u32::<BigEndian>(self.number_of_packets)?;
        writer.write_u32::<BigEndian>(self.error_count)?;
        writer.write_all(&[0u8; Self::PADDING])?;
        Ok(())
    }
}

/// Read one `RET_SUBMIT` message into a [`UrbReply`]
///
/// The payload length is `actual_length` for IN requests and zero for OUT
/// requests; the wire does not say which, so the caller passes the
/// direction of the request it expects this reply to answer.
pub fn read_reply<R: Read>(reader: &mut R, direction: Direction) -> Result<UrbReply> {
    let header = UsbIpHeader::read_from(reader)?;
    header.expect(UsbIpCommand::RetSubmit)?;
    let ret = UsbIpRetSubmit::read_from(reader)?;

    let data = match direction {
        Direction::In if ret.actual_length > 0 => {
            // Grows with what actually arrives, not with the declared length
            let mut data = Vec::new();
            reader
                .by_ref()
                .take(u64::from(ret.actual_length))
                .read_to_end(&mut data)?;
            if data.len() != ret.actual_length as usize {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "RET_SUBMIT payload truncated: expected {} bytes, got {}",
                        ret.actual_length,
                        data.len()
                    ),
                )));
            }
            Bytes::from(data)
        }
        _ => Bytes::new(),
    };

    Ok(UrbReply {
        seqnum: header.seqnum,
        status: ret.status,
        actual_length: ret.actual_length,
        start_frame: ret.start_frame,
        error_count: ret.error_count,
        data,
    })
}

/// Write one `RET_SUBMIT` message for `reply`
///
/// Used by loopback peers and tests; the vhci side only ever reads these.
pub fn write_reply<W: Write>(writer: &mut W, devid: u32, reply: &UrbReply) -> Result<()> {
    UsbIpHeader::new(UsbIpCommand::RetSubmit, reply.seqnum, devid).write_to(writer)?;
    UsbIpRetSubmit {
        status: reply.status,
        actual_length: reply.actual_length,
        start_frame: reply.start_frame,
        number_of_packets: 0,
        error_count: reply.error_count,
    }
    .write_to(writer)?;
    writer.write_all(&reply.data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{Recipient, RequestKind, SetupPacket, request};
    use std::io::Cursor;

    #[test]
    fn test_header_sizes() {
        assert_eq!(USBIP_HEADER_SIZE, 48);

        let mut buf = Vec::new();
        UsbIpHeader::new(UsbIpCommand::CmdSubmit, 1, 2).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), UsbIpHeader::SIZE);

        let mut buf = Vec::new();
        UsbIpRetSubmit::success(0).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), UsbIpRetSubmit::SIZE);
    }

    #[test]
    fn test_cmd_submit_layout() {
        let setup = SetupPacket::build(true, RequestKind::Standard, Recipient::Device, request::GET_DESCRIPTOR)
            .with_value(0x0100)
            .with_length(18);
        let urb = Urb::control(0x0001_0003, setup, Bytes::new());

        let mut buf = Vec::new();
        UsbIpHeader::cmd_submit(42, &urb).write_to(&mut buf).unwrap();
        UsbIpCmdSubmit::from_urb(&urb).write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), USBIP_HEADER_SIZE);
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]); // CMD_SUBMIT
        assert_eq!(&buf[4..8], &[0, 0, 0, 42]); // seqnum
        assert_eq!(&buf[8..12], &[0, 1, 0, 3]); // devid
        assert_eq!(&buf[12..16], &[0, 0, 0, 1]); // USBIP_DIR_IN
        assert_eq!(&buf[16..20], &[0, 0, 0, 0]); // ep 0
        assert_eq!(&buf[24..28], &[0, 0, 0, 18]); // transfer_buffer_length
        assert_eq!(&buf[40..48], &[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);

        let mut cursor = Cursor::new(&buf[UsbIpHeader::SIZE..]);
        let decoded = UsbIpCmdSubmit::read_from(&mut cursor).unwrap();
        assert_eq!(decoded.setup, urb.setup.to_bytes());
        assert_eq!(decoded.transfer_buffer_length, 18);
    }

    #[test]
    fn test_unknown_command() {
        let header = UsbIpHeader {
            command: 0x99,
            seqnum: 0,
            devid: 0,
            direction: 0,
            ep: 0,
        };
        assert!(matches!(
            header.command_type(),
            Err(ProtocolError::UnknownCommand(0x99))
        ));
    }

    #[test]
    fn test_read_reply_with_in_payload() {
        let reply = UrbReply::success(7, Bytes::from_static(&[0x12, 0x01, 0x00, 0x02]));
        let mut buf = Vec::new();
        write_reply(&mut buf, 0x10002, &reply).unwrap();
        assert_eq!(buf.len(), USBIP_HEADER_SIZE + 4);

        let decoded = read_reply(&mut Cursor::new(buf), Direction::In).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_read_reply_out_has_no_payload() {
        let mut reply = UrbReply::success(8, Bytes::new());
        reply.actual_length = 31;
        let mut buf = Vec::new();
        write_reply(&mut buf, 1, &reply).unwrap();

        let decoded = read_reply(&mut Cursor::new(buf), Direction::Out).unwrap();
        assert_eq!(decoded.seqnum, 8);
        assert_eq!(decoded.actual_length, 31);
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_read_reply_rejects_other_commands() {
        let mut buf = Vec::new();
        UsbIpHeader::new(UsbIpCommand::CmdSubmit, 1, 1).write_to(&mut buf).unwrap();
        UsbIpRetSubmit::success(0).write_to(&mut buf).unwrap();

        let err = read_reply(&mut Cursor::new(buf), Direction::In).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedCommand { expected: 3, actual: 1 }
        ));
    }

    #[test]
    fn test_truncated_reply_is_io_error() {
        let buf = vec![0u8; 10];
        let err = read_reply(&mut Cursor::new(buf), Direction::In).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn test_oversized_actual_length_with_short_payload() {
        let mut buf = Vec::new();
        UsbIpHeader::new(UsbIpCommand::RetSubmit, 3, 1).write_to(&mut buf).unwrap();
        UsbIpRetSubmit {
            status: 0,
            actual_length: u32::MAX,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
        }
        .write_to(&mut buf)
        .unwrap();
        buf.extend_from_slice(b"short");

        let err = read_reply(&mut Cursor::new(buf), Direction::In).unwrap_err();
        match err {
            ProtocolError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected an I/O error, got {}", other),
        }
    }

    #[test]
    fn test_ret_submit_error() {
        let ret = UsbIpRetSubmit::error(-110); // ETIMEDOUT
        let mut buf = Vec::new();
        ret.write_to(&mut buf).unwrap();

        let decoded = UsbIpRetSubmit::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded.status, -110);
        assert_eq!(decoded.actual_length, 0);
    }
}
