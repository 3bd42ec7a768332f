//! Diameter message header and message framing
//!
//! Message format (RFC 6733):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |                 Message Length                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | command flags |                  Command-Code                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Application-ID                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Hop-by-Hop Identifier                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      End-to-End Identifier                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  AVPs ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::avp::{self, Avp};
use crate::dictionary::base;
use crate::error::{DiameterError, DiameterResult};
use crate::DIAMETER_VERSION;

/// Diameter message header size
pub const DIAMETER_HEADER_SIZE: usize = 20;

/// Command flags
pub mod cmd_flags {
    /// Request bit
    pub const REQUEST: u8 = 0x80;
    /// Proxiable bit
    pub const PROXIABLE: u8 = 0x40;
    /// Error bit
    pub const ERROR: u8 = 0x20;
    /// Potentially re-transmitted bit
    pub const RETRANSMIT: u8 = 0x10;
}

/// Diameter message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiameterHeader {
    pub version: u8,
    /// Message length including the header; recomputed on encode
    pub length: u32,
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop_id: u32,
    pub end_to_end_id: u32,
}

impl DiameterHeader {
    pub fn new_request(command_code: u32, application_id: u32) -> Self {
        Self {
            version: DIAMETER_VERSION,
            length: DIAMETER_HEADER_SIZE as u32,
            flags: cmd_flags::REQUEST | cmd_flags::PROXIABLE,
            command_code,
            application_id,
            hop_by_hop_id: 0,
            end_to_end_id: 0,
        }
    }

    /// Answer header mirroring the identifiers of `request`
    pub fn new_answer(request: &DiameterHeader) -> Self {
        Self {
            version: DIAMETER_VERSION,
            length: DIAMETER_HEADER_SIZE as u32,
            flags: request.flags & cmd_flags::PROXIABLE,
            command_code: request.command_code,
            application_id: request.application_id,
            hop_by_hop_id: request.hop_by_hop_id,
            end_to_end_id: request.end_to_end_id,
        }
    }

    pub fn is_request(&self) -> bool {
        self.flags & cmd_flags::REQUEST != 0
    }

    pub fn is_answer(&self) -> bool {
        !self.is_request()
    }

    pub fn is_error(&self) -> bool {
        self.flags & cmd_flags::ERROR != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(((self.length >> 16) & 0xFF) as u8);
        buf.put_u16((self.length & 0xFFFF) as u16);
        buf.put_u8(self.flags);
        buf.put_u8(((self.command_code >> 16) & 0xFF) as u8);
        buf.put_u16((self.command_code & 0xFFFF) as u16);
        buf.put_u32(self.application_id);
        buf.put_u32(self.hop_by_hop_id);
        buf.put_u32(self.end_to_end_id);
    }

    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        if buf.remaining() < DIAMETER_HEADER_SIZE {
            return Err(DiameterError::BufferTooSmall {
                needed: DIAMETER_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let version = buf.get_u8();
        if version != DIAMETER_VERSION {
            return Err(DiameterError::UnsupportedVersion(version));
        }

        let len_high = buf.get_u8() as u32;
        let len_low = buf.get_u16() as u32;
        let length = (len_high << 16) | len_low;

        let flags = buf.get_u8();
        let cmd_high = buf.get_u8() as u32;
        let cmd_low = buf.get_u16() as u32;
        let command_code = (cmd_high << 16) | cmd_low;

        Ok(Self {
            version,
            length,
            flags,
            command_code,
            application_id: buf.get_u32(),
            hop_by_hop_id: buf.get_u32(),
            end_to_end_id: buf.get_u32(),
        })
    }
}

/// Diameter message (header + AVPs)
#[derive(Debug, Clone, PartialEq)]
pub struct DiameterMessage {
    pub header: DiameterHeader,
    pub avps: Vec<Avp>,
}

impl DiameterMessage {
    pub fn new_request(command_code: u32, application_id: u32) -> Self {
        Self {
            header: DiameterHeader::new_request(command_code, application_id),
            avps: Vec::new(),
        }
    }

    pub fn new_answer(request: &DiameterMessage) -> Self {
        Self {
            header: DiameterHeader::new_answer(&request.header),
            avps: Vec::new(),
        }
    }

    pub fn add_avp(&mut self, avp: Avp) {
        self.avps.push(avp);
    }

    pub fn find_avp(&self, code: u32) -> Option<&Avp> {
        avp::find_avp(&self.avps, code)
    }

    pub fn find_vendor_avp(&self, code: u32, vendor_id: u32) -> Option<&Avp> {
        avp::find_vendor_avp(&self.avps, code, vendor_id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.find_avp(base::SESSION_ID).and_then(Avp::as_utf8_string)
    }

    pub fn result_code(&self) -> Option<u32> {
        self.find_avp(base::RESULT_CODE).and_then(Avp::as_u32)
    }

    pub fn calculate_length(&self) -> u32 {
        let avp_len: usize = self.avps.iter().map(|a| a.encoded_len()).sum();
        (DIAMETER_HEADER_SIZE + avp_len) as u32
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.calculate_length() as usize);

        let mut header = self.header.clone();
        header.length = self.calculate_length();
        header.encode(&mut buf);

        for avp in &self.avps {
            avp.encode(&mut buf);
        }

        buf
    }

    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        let header = DiameterHeader::decode(buf)?;

        let length = header.length as usize;
        if length < DIAMETER_HEADER_SIZE {
            return Err(DiameterError::InvalidMessage(format!(
                "message length {} shorter than header",
                length
            )));
        }

        let avp_len = length - DIAMETER_HEADER_SIZE;
        if buf.remaining() < avp_len {
            return Err(DiameterError::BufferTooSmall {
                needed: avp_len,
                available: buf.remaining(),
            });
        }

        let avps = avp::decode_avps(buf.split_to(avp_len))?;
        Ok(Self { header, avps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CMD_CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID};

    #[test]
    fn test_message_round_trip() {
        let mut msg = DiameterMessage::new_request(CMD_CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID);
        msg.header.hop_by_hop_id = 0x1234;
        msg.add_avp(Avp::utf8(base::SESSION_ID, "scscf;1;1"));
        msg.add_avp(Avp::u32(base::RESULT_CODE, 2001));

        let mut bytes = msg.encode().freeze();
        assert_eq!(bytes.len() as u32, msg.calculate_length());

        let decoded = DiameterMessage::decode(&mut bytes).unwrap();
        assert!(decoded.header.is_request());
        assert_eq!(decoded.header.command_code, CMD_CREDIT_CONTROL);
        assert_eq!(decoded.header.hop_by_hop_id, 0x1234);
        assert_eq!(decoded.session_id(), Some("scscf;1;1"));
        assert_eq!(decoded.result_code(), Some(2001));
    }

    #[test]
    fn test_answer_mirrors_identifiers() {
        let mut request = DiameterMessage::new_request(CMD_CREDIT_CONTROL, CREDIT_CONTROL_APPLICATION_ID);
        request.header.end_to_end_id = 99;
        let answer = DiameterMessage::new_answer(&request);
        assert!(answer.header.is_answer());
        assert_eq!(answer.header.end_to_end_id, 99);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut buf = DiameterMessage::new_request(CMD_CREDIT_CONTROL, 4).encode();
        buf[0] = 2;
        assert!(matches!(
            DiameterMessage::decode(&mut buf.freeze()),
            Err(DiameterError::UnsupportedVersion(2))
        ));
    }
}
