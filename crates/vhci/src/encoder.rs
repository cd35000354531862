//! Encoding a paired request into the reader's buffer
//!
//! The controller calls the encoder without holding its lock, so an
//! encoder may take as long as it needs.

use bytes::{Bytes, BytesMut};
use std::io;
use thiserror::Error;

use protocol::{ProtocolError, USBIP_HEADER_SIZE, Urb, UsbIpCmdSubmit, UsbIpHeader};

/// Why a request could not be encoded
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Frame of {needed} bytes exceeds read buffer of {available} bytes")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Transfer buffer length {declared} does not match payload of {actual} bytes")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("Unsupported request: {0}")]
    Unsupported(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Bounded output buffer handed to an encoder
///
/// Writes past `limit` fail instead of growing the buffer.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: BytesMut,
    limit: usize,
}

impl ReadBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(USBIP_HEADER_SIZE * 4)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes that can still be written
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if data.len() > self.remaining() {
            return Err(EncodeError::BufferTooSmall {
                needed: self.buf.len() + data.len(),
                available: self.limit,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Discard a partially written frame
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for ReadBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(self.remaining());
        if n == 0 && !data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "read buffer full"));
        }
        self.buf.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Turns a numbered request into the bytes a reader transports
pub trait UrbEncoder: Send + Sync {
    /// Append the frame for `urb`, numbered `seqnum`, to `buf`
    ///
    /// On error the controller discards whatever was written.
    fn encode(&self, buf: &mut ReadBuffer, seqnum: u32, urb: &Urb) -> Result<(), EncodeError>;
}

impl<F> UrbEncoder for F
where
    F: Fn(&mut ReadBuffer, u32, &Urb) -> Result<(), EncodeError> + Send + Sync,
{
    fn encode(&self, buf: &mut ReadBuffer, seqnum: u32, urb: &Urb) -> Result<(), EncodeError> {
        self(buf, seqnum, urb)
    }
}

/// Encodes a `CMD_SUBMIT`: 48-byte header, then the OUT payload if any
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbIpEncoder;

impl UsbIpEncoder {
    /// Size of the frame `urb` encodes to
    pub fn frame_len(urb: &Urb) -> usize {
        USBIP_HEADER_SIZE + urb.out_payload_len()
    }
}

impl UrbEncoder for UsbIpEncoder {
    fn encode(&self, buf: &mut ReadBuffer, seqnum: u32, urb: &Urb) -> Result<(), EncodeError> {
        if urb.is_isochronous() {
            return Err(EncodeError::Unsupported("isochronous transfers"));
        }

        let payload = urb.out_payload_len();
        if payload > 0 && payload != urb.transfer_buffer_length as usize {
            return Err(EncodeError::LengthMismatch {
                declared: urb.transfer_buffer_length,
                actual: payload,
            });
        }

        let needed = Self::frame_len(urb);
        if needed > buf.remaining() {
            return Err(EncodeError::BufferTooSmall {
                needed,
                available: buf.remaining(),
            });
        }

        UsbIpHeader::cmd_submit(seqnum, urb).write_to(buf)?;
        UsbIpCmdSubmit::from_urb(urb).write_to(buf)?;
        if payload > 0 {
            buf.put_slice(&urb.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MOCK_DEVID, create_mock_bulk_out, create_mock_get_descriptor};
    use protocol::{Direction, SetupPacket, UsbIpCommand};
    use std::io::{Cursor, Write};

    #[test]
    fn test_read_buffer_enforces_limit() {
        let mut buf = ReadBuffer::new(4);
        buf.put_slice(&[1, 2, 3]).unwrap();
        assert_eq!(buf.remaining(), 1);

        let err = buf.put_slice(&[4, 5]).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::BufferTooSmall {
                needed: 5,
                available: 4
            }
        ));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_read_buffer_io_write_stops_at_limit() {
        let mut buf = ReadBuffer::new(2);
        assert!(buf.write_all(&[1, 2, 3]).is_err());
        assert_eq!(buf.freeze().as_ref(), &[1, 2]);
    }

    #[test]
    fn test_encode_control_in() {
        let urb = create_mock_get_descriptor(MOCK_DEVID);
        let mut buf = ReadBuffer::new(1024);
        UsbIpEncoder.encode(&mut buf, 9, &urb).unwrap();
        assert_eq!(buf.len(), USBIP_HEADER_SIZE);

        let frame = buf.freeze();
        let mut cursor = Cursor::new(frame.as_ref());
        let header = UsbIpHeader::read_from(&mut cursor).unwrap();
        assert_eq!(header.command_type().unwrap(), UsbIpCommand::CmdSubmit);
        assert_eq!(header.seqnum, 9);
        assert_eq!(header.devid, MOCK_DEVID);
        assert_eq!(header.direction, Direction::In as u32);
        assert_eq!(header.ep, 0);

        let submit = UsbIpCmdSubmit::read_from(&mut cursor).unwrap();
        assert_eq!(submit.transfer_buffer_length, 18);
        assert_eq!(SetupPacket::from_bytes(submit.setup), urb.setup);
    }

    #[test]
    fn test_encode_bulk_out_appends_payload() {
        let urb = create_mock_bulk_out(MOCK_DEVID, 2, 10, 0x5a);
        let mut buf = ReadBuffer::new(1024);
        UsbIpEncoder.encode(&mut buf, 1, &urb).unwrap();

        let frame = buf.freeze();
        assert_eq!(frame.len(), USBIP_HEADER_SIZE + 10);
        assert!(frame[USBIP_HEADER_SIZE..].iter().all(|b| *b == 0x5a));
    }

    #[test]
    fn test_encode_rejects_small_buffer() {
        let urb = create_mock_bulk_out(MOCK_DEVID, 2, 10, 0);
        let mut buf = ReadBuffer::new(USBIP_HEADER_SIZE + 9);
        let err = UsbIpEncoder.encode(&mut buf, 1, &urb).unwrap_err();

        assert!(matches!(
            err,
            EncodeError::BufferTooSmall { needed, .. } if needed == USBIP_HEADER_SIZE + 10
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_rejects_isochronous() {
        let mut urb = Urb::bulk_in(MOCK_DEVID, 3, 192);
        urb.number_of_packets = 8;
        let mut buf = ReadBuffer::new(1024);

        assert!(matches!(
            UsbIpEncoder.encode(&mut buf, 1, &urb),
            Err(EncodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_encode_rejects_length_mismatch() {
        let mut urb = create_mock_bulk_out(MOCK_DEVID, 2, 10, 0);
        urb.transfer_buffer_length = 12;
        let mut buf = ReadBuffer::new(1024);

        assert!(matches!(
            UsbIpEncoder.encode(&mut buf, 1, &urb),
            Err(EncodeError::LengthMismatch {
                declared: 12,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_closure_encoder() {
        let encoder = |buf: &mut ReadBuffer, seqnum: u32, _urb: &Urb| {
            buf.put_slice(&seqnum.to_be_bytes())
        };
        let mut buf = ReadBuffer::new(8);
        encoder
            .encode(&mut buf, 0x0102_0304, &create_mock_get_descriptor(MOCK_DEVID))
            .unwrap();
        assert_eq!(buf.freeze().as_ref(), &[1, 2, 3, 4]);
    }
}
