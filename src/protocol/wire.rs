//! Byte layout of the command and result datagrams.
//!
//! Command (7..=262 bytes): `[test_id:u32 LE][mask:u8][iterations:u8][payload_len:u8][payload]`
//! Result (exactly 6 bytes): `[test_id:u32 LE][peripheral:u8][outcome:u8]`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Outcome, PeripheralMask};

/// Fixed header length of a command datagram.
pub const COMMAND_HEADER_LEN: usize = 7;
/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
/// Length of every result datagram.
pub const RESULT_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed message: expected {expected} bytes, got {got}")]
    MalformedMessage { expected: usize, got: usize },

    #[error("command datagram too short: {got} bytes")]
    Truncated { got: usize },

    #[error("payload of {len} bytes exceeds the 255-byte limit")]
    PayloadTooLong { len: usize },
}

/// Outbound instruction for the UUT. One per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub test_id: u32,
    pub peripherals: PeripheralMask,
    pub iterations: u8,
    payload: Vec<u8>,
}

impl CommandMessage {
    pub fn new(
        test_id: u32,
        peripherals: PeripheralMask,
        iterations: u8,
        payload: &[u8],
    ) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLong { len: payload.len() });
        }
        Ok(Self {
            test_id,
            peripherals,
            iterations,
            payload: payload.to_vec(),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        COMMAND_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(self.test_id);
        buf.put_u8(self.peripherals.bits());
        buf.put_u8(self.iterations);
        // new() guarantees the length fits in one byte.
        buf.put_u8(self.payload.len() as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a command datagram, as the UUT does.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < COMMAND_HEADER_LEN {
            return Err(CodecError::Truncated { got: bytes.len() });
        }
        let mut buf = bytes;
        let test_id = buf.get_u32_le();
        let peripherals = PeripheralMask::from_bits(buf.get_u8());
        let iterations = buf.get_u8();
        let payload_len = buf.get_u8() as usize;
        if buf.remaining() != payload_len {
            return Err(CodecError::MalformedMessage {
                expected: COMMAND_HEADER_LEN + payload_len,
                got: bytes.len(),
            });
        }
        Ok(Self {
            test_id,
            peripherals,
            iterations,
            payload: buf.to_vec(),
        })
    }
}

/// Inbound verdict for one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultMessage {
    pub test_id: u32,
    pub peripheral_code: u8,
    pub outcome_code: u8,
}

impl ResultMessage {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_code(self.outcome_code)
    }

    pub fn encode(&self) -> [u8; RESULT_LEN] {
        let mut out = [0u8; RESULT_LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.test_id);
        buf.put_u8(self.peripheral_code);
        buf.put_u8(self.outcome_code);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != RESULT_LEN {
            return Err(CodecError::MalformedMessage {
                expected: RESULT_LEN,
                got: bytes.len(),
            });
        }
        let mut buf = bytes;
        Ok(Self {
            test_id: buf.get_u32_le(),
            peripheral_code: buf.get_u8(),
            outcome_code: buf.get_u8(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Peripheral;

    #[test]
    fn test_command_layout() {
        let mask = PeripheralMask::from_bits(0x02 | 0x08);
        let cmd = CommandMessage::new(0x0403_0201, mask, 5, b"hi").unwrap();
        let bytes = cmd.encode();
        assert_eq!(&bytes[..], &[0x01, 0x02, 0x03, 0x04, 0x0A, 5, 2, b'h', b'i']);
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = CommandMessage::new(77, PeripheralMask::all(), 255, b"Hello UART").unwrap();
        let decoded = CommandMessage::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.payload(), b"Hello UART");
    }

    #[test]
    fn test_empty_payload_is_seven_bytes() {
        let mask: PeripheralMask = [Peripheral::Spi].into_iter().collect();
        let cmd = CommandMessage::new(1, mask, 1, b"").unwrap();
        assert_eq!(cmd.encode().len(), COMMAND_HEADER_LEN);
    }

    #[test]
    fn test_payload_length_boundary() {
        let max = vec![0xAA; 255];
        let cmd = CommandMessage::new(1, PeripheralMask::all(), 1, &max).unwrap();
        assert_eq!(cmd.encode().len(), 262);

        let too_long = vec![0xAA; 256];
        assert_eq!(
            CommandMessage::new(1, PeripheralMask::all(), 1, &too_long),
            Err(CodecError::PayloadTooLong { len: 256 })
        );
    }

    #[test]
    fn test_command_decode_rejects_length_mismatch() {
        let cmd = CommandMessage::new(9, PeripheralMask::all(), 1, b"abc").unwrap();
        let bytes = cmd.encode();
        assert!(matches!(
            CommandMessage::decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::MalformedMessage { expected: 10, got: 9 })
        ));
        assert_eq!(
            CommandMessage::decode(&bytes[..3]),
            Err(CodecError::Truncated { got: 3 })
        );
    }

    #[test]
    fn test_result_decode() {
        let msg = ResultMessage::decode(&[0x2A, 0, 0, 0, 0x04, 0x01]).unwrap();
        assert_eq!(msg.test_id, 42);
        assert_eq!(msg.peripheral_code, Peripheral::Spi.code());
        assert_eq!(msg.outcome(), Outcome::Success);
        assert_eq!(msg.encode(), [0x2A, 0, 0, 0, 0x04, 0x01]);
    }

    #[test]
    fn test_result_decode_rejects_wrong_length() {
        assert_eq!(
            ResultMessage::decode(&[0; 5]),
            Err(CodecError::MalformedMessage { expected: 6, got: 5 })
        );
        assert_eq!(
            ResultMessage::decode(&[0; 8]),
            Err(CodecError::MalformedMessage { expected: 6, got: 8 })
        );
    }
}
