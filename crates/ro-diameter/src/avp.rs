//! Diameter AVP (Attribute-Value Pair) encoding and decoding
//!
//! AVP format (RFC 6733):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           AVP Code                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V M P r r r r r|                  AVP Length                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Vendor-ID (opt)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Data ...
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Decoding keeps the payload as raw bytes; typed accessors interpret it on
//! demand, so unknown AVPs pass through untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{DiameterError, DiameterResult};
use crate::NTP_UNIX_OFFSET;

/// AVP flags
pub mod avp_flags {
    /// Vendor-Specific bit
    pub const VENDOR: u8 = 0x80;
    /// Mandatory bit
    pub const MANDATORY: u8 = 0x40;
    /// Protected bit
    pub const PROTECTED: u8 = 0x20;
}

/// AVP header size without vendor ID
pub const AVP_HEADER_SIZE: usize = 8;
/// AVP header size with vendor ID
pub const AVP_HEADER_SIZE_VENDOR: usize = 12;

/// Diameter AVP
#[derive(Debug, Clone, PartialEq)]
pub struct Avp {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub data: AvpData,
}

/// AVP payload
#[derive(Debug, Clone, PartialEq)]
pub enum AvpData {
    OctetString(Bytes),
    Integer32(i32),
    Integer64(i64),
    Unsigned32(u32),
    Unsigned64(u64),
    Utf8String(String),
    DiameterIdentity(String),
    /// Seconds since 1900-01-01 (NTP epoch)
    Time(u32),
    Grouped(Vec<Avp>),
    Enumerated(i32),
    /// Undecoded payload as received
    Raw(Bytes),
}

impl Avp {
    pub fn new(code: u32, flags: u8, vendor_id: Option<u32>, data: AvpData) -> Self {
        let flags = if vendor_id.is_some() {
            flags | avp_flags::VENDOR
        } else {
            flags & !avp_flags::VENDOR
        };
        Self {
            code,
            flags,
            vendor_id,
            data,
        }
    }

    /// Mandatory base-protocol AVP
    pub fn mandatory(code: u32, data: AvpData) -> Self {
        Self::new(code, avp_flags::MANDATORY, None, data)
    }

    /// Vendor-specific mandatory AVP
    pub fn vendor_mandatory(code: u32, vendor_id: u32, data: AvpData) -> Self {
        Self::new(code, avp_flags::MANDATORY, Some(vendor_id), data)
    }

    /// Vendor-specific AVP without the M bit
    pub fn vendor_optional(code: u32, vendor_id: u32, data: AvpData) -> Self {
        Self::new(code, 0, Some(vendor_id), data)
    }

    pub fn u32(code: u32, value: u32) -> Self {
        Self::mandatory(code, AvpData::Unsigned32(value))
    }

    pub fn u64(code: u32, value: u64) -> Self {
        Self::mandatory(code, AvpData::Unsigned64(value))
    }

    pub fn enumerated(code: u32, value: i32) -> Self {
        Self::mandatory(code, AvpData::Enumerated(value))
    }

    pub fn utf8(code: u32, value: impl Into<String>) -> Self {
        Self::mandatory(code, AvpData::Utf8String(value.into()))
    }

    pub fn identity(code: u32, value: impl Into<String>) -> Self {
        Self::mandatory(code, AvpData::DiameterIdentity(value.into()))
    }

    pub fn octets(code: u32, value: impl Into<Bytes>) -> Self {
        Self::mandatory(code, AvpData::OctetString(value.into()))
    }

    pub fn time(code: u32, at: DateTime<Utc>) -> Self {
        Self::mandatory(code, AvpData::Time(ntp_seconds(at)))
    }

    pub fn grouped(code: u32, children: Vec<Avp>) -> Self {
        Self::mandatory(code, AvpData::Grouped(children))
    }

    pub fn vendor_grouped(code: u32, vendor_id: u32, children: Vec<Avp>) -> Self {
        Self::vendor_mandatory(code, vendor_id, AvpData::Grouped(children))
    }

    pub fn is_vendor_specific(&self) -> bool {
        self.flags & avp_flags::VENDOR != 0
    }

    pub fn is_mandatory(&self) -> bool {
        self.flags & avp_flags::MANDATORY != 0
    }

    fn header_len(&self) -> usize {
        if self.is_vendor_specific() {
            AVP_HEADER_SIZE_VENDOR
        } else {
            AVP_HEADER_SIZE
        }
    }

    /// Encoded length of this AVP including padding
    pub fn encoded_len(&self) -> usize {
        let total = self.header_len() + self.data.encoded_len();
        (total + 3) & !3
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let data_len = self.data.encoded_len();
        let avp_len = self.header_len() + data_len;

        buf.put_u32(self.code);
        buf.put_u8(self.flags);
        buf.put_u8(((avp_len >> 16) & 0xFF) as u8);
        buf.put_u16((avp_len & 0xFFFF) as u16);

        if let Some(vendor_id) = self.vendor_id {
            buf.put_u32(vendor_id);
        }

        self.data.encode(buf);

        let padding = (4 - (data_len % 4)) % 4;
        buf.put_bytes(0, padding);
    }

    pub fn decode(buf: &mut Bytes) -> DiameterResult<Self> {
        if buf.remaining() < AVP_HEADER_SIZE {
            return Err(DiameterError::BufferTooSmall {
                needed: AVP_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let code = buf.get_u32();
        let flags = buf.get_u8();
        let len_high = buf.get_u8() as usize;
        let len_low = buf.get_u16() as usize;
        let avp_len = (len_high << 16) | len_low;

        let header_len = if flags & avp_flags::VENDOR != 0 {
            AVP_HEADER_SIZE_VENDOR
        } else {
            AVP_HEADER_SIZE
        };

        if avp_len < header_len {
            return Err(DiameterError::InvalidAvp(format!(
                "AVP {} length {} is less than header size {}",
                code, avp_len, header_len
            )));
        }

        let vendor_id = if header_len == AVP_HEADER_SIZE_VENDOR {
            if buf.remaining() < 4 {
                return Err(DiameterError::BufferTooSmall {
                    needed: 4,
                    available: buf.remaining(),
                });
            }
            Some(buf.get_u32())
        } else {
            None
        };

        let data_len = avp_len - header_len;
        if buf.remaining() < data_len {
            return Err(DiameterError::BufferTooSmall {
                needed: data_len,
                available: buf.remaining(),
            });
        }

        let data = buf.copy_to_bytes(data_len);

        // The last AVP of a message may arrive without its padding
        let padding = (4 - (data_len % 4)) % 4;
        buf.advance(padding.min(buf.remaining()));

        Ok(Self {
            code,
            flags,
            vendor_id,
            data: AvpData::Raw(data),
        })
    }

    pub fn as_u32(&self) -> Option<u32> {
        match &self.data {
            AvpData::Unsigned32(v) | AvpData::Time(v) => Some(*v),
            AvpData::Enumerated(v) | AvpData::Integer32(v) => u32::try_from(*v).ok(),
            AvpData::Raw(b) if b.len() == 4 => Some(b.clone().get_u32()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match &self.data {
            AvpData::Unsigned64(v) => Some(*v),
            AvpData::Unsigned32(v) => Some(u64::from(*v)),
            AvpData::Raw(b) if b.len() == 8 => Some(b.clone().get_u64()),
            AvpData::Raw(b) if b.len() == 4 => Some(u64::from(b.clone().get_u32())),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match &self.data {
            AvpData::Integer32(v) | AvpData::Enumerated(v) => Some(*v),
            AvpData::Raw(b) if b.len() == 4 => Some(b.clone().get_i32()),
            _ => None,
        }
    }

    pub fn as_utf8_string(&self) -> Option<&str> {
        match &self.data {
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => Some(s),
            AvpData::Raw(b) | AvpData::OctetString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        self.as_u32().and_then(datetime_from_ntp)
    }

    /// Children of a grouped AVP, decoding them when the AVP came off the wire
    pub fn children(&self) -> DiameterResult<Vec<Avp>> {
        match &self.data {
            AvpData::Grouped(avps) => Ok(avps.clone()),
            AvpData::Raw(b) => decode_avps(b.clone()),
            _ => Err(DiameterError::InvalidAvp(format!(
                "AVP {} is not a grouped AVP",
                self.code
            ))),
        }
    }
}

impl AvpData {
    pub fn encoded_len(&self) -> usize {
        match self {
            AvpData::OctetString(b) | AvpData::Raw(b) => b.len(),
            AvpData::Integer32(_)
            | AvpData::Unsigned32(_)
            | AvpData::Enumerated(_)
            | AvpData::Time(_) => 4,
            AvpData::Integer64(_) | AvpData::Unsigned64(_) => 8,
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => s.len(),
            AvpData::Grouped(avps) => avps.iter().map(|a| a.encoded_len()).sum(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            AvpData::OctetString(b) | AvpData::Raw(b) => buf.put_slice(b),
            AvpData::Integer32(v) | AvpData::Enumerated(v) => buf.put_i32(*v),
            AvpData::Integer64(v) => buf.put_i64(*v),
            AvpData::Unsigned32(v) | AvpData::Time(v) => buf.put_u32(*v),
            AvpData::Unsigned64(v) => buf.put_u64(*v),
            AvpData::Utf8String(s) | AvpData::DiameterIdentity(s) => buf.put_slice(s.as_bytes()),
            AvpData::Grouped(avps) => {
                for avp in avps {
                    avp.encode(buf);
                }
            }
        }
    }
}

/// Decode a sequence of AVPs filling the whole buffer
pub fn decode_avps(mut buf: Bytes) -> DiameterResult<Vec<Avp>> {
    let mut avps = Vec::new();
    while buf.has_remaining() {
        avps.push(Avp::decode(&mut buf)?);
    }
    Ok(avps)
}

/// First AVP with the given code, any vendor
pub fn find_avp(avps: &[Avp], code: u32) -> Option<&Avp> {
    avps.iter().find(|a| a.code == code)
}

/// First AVP with the given code and vendor
pub fn find_vendor_avp(avps: &[Avp], code: u32, vendor_id: u32) -> Option<&Avp> {
    avps.iter()
        .find(|a| a.code == code && a.vendor_id == Some(vendor_id))
}

/// All AVPs with the given code
pub fn find_all_avps(avps: &[Avp], code: u32) -> Vec<&Avp> {
    avps.iter().filter(|a| a.code == code).collect()
}

/// Diameter Time value for a wall-clock instant
pub fn ntp_seconds(at: DateTime<Utc>) -> u32 {
    // Time wraps in 2036 per RFC 6733; truncation matches that rule
    (at.timestamp() + NTP_UNIX_OFFSET) as u32
}

pub fn datetime_from_ntp(seconds: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(i64::from(seconds) - NTP_UNIX_OFFSET, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avp_encode_decode_u32() {
        let avp = Avp::u32(268, 2001);
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);
        assert_eq!(buf.len(), 12);

        let decoded = Avp::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.code, 268);
        assert!(decoded.is_mandatory());
        assert_eq!(decoded.as_u32(), Some(2001));
    }

    #[test]
    fn test_vendor_avp_sets_flag_and_pads() {
        let avp = Avp::vendor_mandatory(831, 10415, AvpData::Utf8String("sip:a".to_string()));
        assert!(avp.is_vendor_specific());
        // 12 header + 5 data, padded to 20
        assert_eq!(avp.encoded_len(), 20);

        let mut buf = BytesMut::new();
        avp.encode(&mut buf);
        assert_eq!(buf.len(), 20);

        let decoded = Avp::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.vendor_id, Some(10415));
        assert_eq!(decoded.as_utf8_string(), Some("sip:a"));
    }

    #[test]
    fn test_grouped_children_from_wire() {
        let group = Avp::grouped(446, vec![Avp::u32(420, 17)]);
        let mut buf = BytesMut::new();
        group.encode(&mut buf);

        let decoded = Avp::decode(&mut buf.freeze()).unwrap();
        let children = decoded.children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(find_avp(&children, 420).and_then(Avp::as_u32), Some(17));
    }

    #[test]
    fn test_truncated_avp_is_rejected() {
        let mut buf = BytesMut::new();
        Avp::utf8(263, "session;1;2").encode(&mut buf);
        let mut short = buf.freeze().slice(0..10);
        assert!(matches!(
            Avp::decode(&mut short),
            Err(DiameterError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_ntp_time_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        let avp = Avp::time(55, at);
        assert_eq!(avp.as_time(), Some(at));
        assert_eq!(ntp_seconds(Utc.timestamp_opt(0, 0).unwrap()), 2_208_988_800);
    }
}
