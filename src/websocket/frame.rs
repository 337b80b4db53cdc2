use bytes::{BufMut, BytesMut};

use super::WebSocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(opcode: u8) -> Result<Self, WebSocketError> {
        Ok(match opcode {
            0x0 => OpCode::Continuation,
            0x1 => OpCode::Text,
            0x2 => OpCode::Binary,
            0x8 => OpCode::Close,
            0x9 => OpCode::Ping,
            0xa => OpCode::Pong,
            other => return Err(WebSocketError::Protocol(format!("reserved opcode {:#x}", other))),
        })
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xa,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn new(opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload_len,
        }
    }

    /// Parses a frame header from the front of `buf`.
    ///
    /// Returns the header and its encoded length, or `Ok(None)` if `buf` is too short.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, WebSocketError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let first = buf[0];
        let second = buf[1];

        let fin = first & 0x80 != 0;
        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;
        let opcode = OpCode::from_u8(first & 0x0f)?;
        let masked = second & 0x80 != 0;

        let mut header_length = 2;
        let payload_len = match second & 0x7f {
            // 64-bit extended payload length
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                header_length += 8;
                let mut len = [0; 8];
                len.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(len);
                if len >> 63 != 0 {
                    return Err(WebSocketError::Protocol("payload length has its high bit set".to_string()));
                }
                len
            }
            // 16-bit extended payload length
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                header_length += 2;
                u16::from_be_bytes([buf[2], buf[3]]) as u64
            }
            len => len as u64,
        };

        let mask = if masked {
            if buf.len() < header_length + 4 {
                return Ok(None);
            }
            let mut key = [0; 4];
            key.copy_from_slice(&buf[header_length..header_length + 4]);
            header_length += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((
            Self {
                fin,
                rsv1,
                rsv2,
                rsv3,
                opcode,
                mask,
                payload_len,
            },
            header_length,
        )))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        if self.rsv2 {
            first |= 0x20;
        }
        if self.rsv3 {
            first |= 0x10;
        }
        buf.put_u8(first);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        match self.payload_len {
            len if len < 126 => buf.put_u8(mask_bit | len as u8),
            len if len <= u16::MAX as u64 => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(len);
            }
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_masked_text_frame() {
        // RFC 6455 section 5.7
        let raw = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (header, len) = FrameHeader::parse(&raw).unwrap().unwrap();

        assert_eq!(len, 6);
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.payload_len, 5);
    }

    #[test]
    fn parse_fragment_start() {
        let raw = [0x01, 0x03, b'H', b'e', b'l'];
        let (header, len) = FrameHeader::parse(&raw).unwrap().unwrap();

        assert_eq!(len, 2);
        assert!(!header.fin);
        assert_eq!(header.mask, None);
    }

    #[test]
    fn extended_lengths() {
        let mut buf = BytesMut::new();
        FrameHeader::new(OpCode::Binary, 256).encode(&mut buf);
        assert_eq!(&buf[..], &[0x82, 0x7e, 0x01, 0x00]);

        let mut buf = BytesMut::new();
        FrameHeader::new(OpCode::Binary, 65536).encode(&mut buf);
        assert_eq!(&buf[..], &[0x82, 0x7f, 0, 0, 0, 0, 0, 1, 0, 0]);
        let (header, len) = FrameHeader::parse(&buf).unwrap().unwrap();
        assert_eq!((header.payload_len, len), (65536, 10));
    }

    #[test]
    fn short_input_is_incomplete() {
        let mut header = FrameHeader::new(OpCode::Text, 300);
        header.mask = Some([1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), 8);

        for end in 0..buf.len() {
            assert_eq!(FrameHeader::parse(&buf[..end]).unwrap(), None);
        }
        assert_eq!(FrameHeader::parse(&buf).unwrap(), Some((header, 8)));
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        assert!(FrameHeader::parse(&[0x83, 0x00]).is_err());
        assert!(FrameHeader::parse(&[0x8b, 0x00]).is_err());
    }
}
