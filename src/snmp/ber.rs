//! BER encoding and decoding for SNMPv2c GET messages

use crate::{ScanError, ScanResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::Ipv4Addr;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_IP_ADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;
pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_GET_RESPONSE: u8 = 0xA2;

/// SNMP version field value for v2c
pub const VERSION_2C: i64 = 1;

/// A decoded varbind value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    ObjectId(Vec<u32>),
    IpAddress(Ipv4Addr),
    Opaque(Vec<u8>),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// True for NULL and the v2c exception values
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::Null | SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }

    /// Text view of the value; OCTET STRING is decoded as lossy UTF-8
    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Colon separated hex, used for hardware addresses
    pub fn as_hex(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) | SnmpValue::Opaque(bytes) => Some(
                bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
            _ => None,
        }
    }

    /// Numeric view of integer-like values
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Integer(v) => u64::try_from(*v).ok(),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => Some(u64::from(*v)),
            SnmpValue::Counter64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpValue::OctetString(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            SnmpValue::Integer(v) => write!(f, "{}", v),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => write!(f, "{}", v),
            SnmpValue::Counter64(v) => write!(f, "{}", v),
            SnmpValue::ObjectId(arcs) => write!(f, "{}", format_oid(arcs)),
            SnmpValue::IpAddress(ip) => write!(f, "{}", ip),
            SnmpValue::Opaque(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            SnmpValue::Null => write!(f, "null"),
            SnmpValue::NoSuchObject => write!(f, "noSuchObject"),
            SnmpValue::NoSuchInstance => write!(f, "noSuchInstance"),
            SnmpValue::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

/// A decoded SNMP message with its PDU fields
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpMessage {
    pub version: i64,
    pub community: String,
    pub pdu_type: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Vec<u32>, SnmpValue)>,
}

/// Parse dotted OID text (`1.3.6.1.2.1.1.1.0`, leading dot allowed)
pub fn parse_oid(text: &str) -> ScanResult<Vec<u32>> {
    let arcs = text
        .trim()
        .trim_start_matches('.')
        .split('.')
        .map(|arc| {
            arc.parse::<u32>()
                .map_err(|_| ScanError::ParseError(format!("invalid OID arc '{}' in {}", arc, text)))
        })
        .collect::<ScanResult<Vec<u32>>>()?;

    if arcs.len() < 2 {
        return Err(ScanError::ParseError(format!("OID {} needs at least two arcs", text)));
    }
    Ok(arcs)
}

pub fn format_oid(arcs: &[u32]) -> String {
    arcs.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(".")
}

/// Append a BER length, short form below 128
pub fn encode_length(len: usize, buf: &mut BytesMut) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.put_u8(0x80 | significant.len() as u8);
    buf.put_slice(significant);
}

fn encode_tlv(tag: u8, content: &[u8], buf: &mut BytesMut) {
    buf.put_u8(tag);
    encode_length(content.len(), buf);
    buf.put_slice(content);
}

/// Minimal two's complement encoding of a signed integer
fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Unsigned application types must not look negative
fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(bytes.len() - 1);
    let mut content = bytes[skip..].to_vec();
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    content
}

/// Encode OID arcs into BER content bytes
pub fn encode_oid(arcs: &[u32]) -> ScanResult<Vec<u8>> {
    if arcs.len() < 2 {
        return Err(ScanError::ProtocolError("OID needs at least two arcs".to_string()));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(ScanError::ProtocolError(format!(
            "invalid leading OID arcs {}.{}",
            arcs[0], arcs[1]
        )));
    }

    let mut content = Vec::with_capacity(arcs.len() + 4);
    push_base128(u64::from(arcs[0]) * 40 + u64::from(arcs[1]), &mut content);
    for &arc in &arcs[2..] {
        push_base128(u64::from(arc), &mut content);
    }
    Ok(content)
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.extend(groups.iter().rev());
}

/// Decode BER OID content bytes into arcs
pub fn decode_oid(bytes: &[u8]) -> ScanResult<Vec<u32>> {
    let mut values = Vec::new();
    let mut current: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        current = (current << 7) | u64::from(b & 0x7F);
        if current > u64::from(u32::MAX) * 128 {
            return Err(ScanError::ProtocolError("OID arc overflow".to_string()));
        }
        if b & 0x80 == 0 {
            values.push(current);
            current = 0;
        } else if i == bytes.len() - 1 {
            return Err(ScanError::ProtocolError("truncated OID arc".to_string()));
        }
    }

    let first = *values
        .first()
        .ok_or_else(|| ScanError::ProtocolError("empty OID".to_string()))?;
    let (a, b) = if first < 40 {
        (0, first)
    } else if first < 80 {
        (1, first - 40)
    } else {
        (2, first - 80)
    };

    let mut arcs = Vec::with_capacity(values.len() + 1);
    arcs.push(a as u32);
    for v in std::iter::once(b).chain(values.into_iter().skip(1)) {
        let arc = u32::try_from(v).map_err(|_| ScanError::ProtocolError("OID arc overflow".to_string()))?;
        arcs.push(arc);
    }
    Ok(arcs)
}

fn encode_value(value: &SnmpValue, buf: &mut BytesMut) -> ScanResult<()> {
    match value {
        SnmpValue::OctetString(bytes) => encode_tlv(TAG_OCTET_STRING, bytes, buf),
        SnmpValue::Integer(v) => encode_tlv(TAG_INTEGER, &integer_content(*v), buf),
        SnmpValue::Counter32(v) => encode_tlv(TAG_COUNTER32, &unsigned_content(u64::from(*v)), buf),
        SnmpValue::Gauge32(v) => encode_tlv(TAG_GAUGE32, &unsigned_content(u64::from(*v)), buf),
        SnmpValue::TimeTicks(v) => encode_tlv(TAG_TIMETICKS, &unsigned_content(u64::from(*v)), buf),
        SnmpValue::Counter64(v) => encode_tlv(TAG_COUNTER64, &unsigned_content(*v), buf),
        SnmpValue::ObjectId(arcs) => encode_tlv(TAG_OID, &encode_oid(arcs)?, buf),
        SnmpValue::IpAddress(ip) => encode_tlv(TAG_IP_ADDRESS, &ip.octets(), buf),
        SnmpValue::Opaque(bytes) => encode_tlv(TAG_OPAQUE, bytes, buf),
        SnmpValue::Null => encode_tlv(TAG_NULL, &[], buf),
        SnmpValue::NoSuchObject => encode_tlv(TAG_NO_SUCH_OBJECT, &[], buf),
        SnmpValue::NoSuchInstance => encode_tlv(TAG_NO_SUCH_INSTANCE, &[], buf),
        SnmpValue::EndOfMibView => encode_tlv(TAG_END_OF_MIB_VIEW, &[], buf),
    }
    Ok(())
}

fn build_message(
    community: &str,
    pdu_type: u8,
    request_id: i32,
    oid: &[u32],
    value: &SnmpValue,
) -> ScanResult<Bytes> {
    let mut varbind = BytesMut::new();
    encode_tlv(TAG_OID, &encode_oid(oid)?, &mut varbind);
    encode_value(value, &mut varbind)?;

    let mut varbind_seq = BytesMut::new();
    encode_tlv(TAG_SEQUENCE, &varbind, &mut varbind_seq);

    let mut pdu = BytesMut::new();
    encode_tlv(TAG_INTEGER, &integer_content(i64::from(request_id)), &mut pdu);
    encode_tlv(TAG_INTEGER, &[0], &mut pdu);
    encode_tlv(TAG_INTEGER, &[0], &mut pdu);
    encode_tlv(TAG_SEQUENCE, &varbind_seq, &mut pdu);

    let mut body = BytesMut::new();
    encode_tlv(TAG_INTEGER, &integer_content(VERSION_2C), &mut body);
    encode_tlv(TAG_OCTET_STRING, community.as_bytes(), &mut body);
    encode_tlv(pdu_type, &pdu, &mut body);

    let mut message = BytesMut::with_capacity(body.len() + 4);
    encode_tlv(TAG_SEQUENCE, &body, &mut message);
    Ok(message.freeze())
}

/// Build a v2c GetRequest for a single OID with a NULL value
pub fn build_get_request(community: &str, oid: &[u32], request_id: i32) -> ScanResult<Bytes> {
    build_message(community, PDU_GET_REQUEST, request_id, oid, &SnmpValue::Null)
}

/// Build a v2c GetResponse carrying one varbind
pub fn build_get_response(community: &str, request_id: i32, oid: &[u32], value: &SnmpValue) -> ScanResult<Bytes> {
    build_message(community, PDU_GET_RESPONSE, request_id, oid, value)
}

/// Cursor over BER TLVs
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> ScanResult<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| ScanError::ProtocolError("unexpected end of message".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> ScanResult<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7F);
        if count == 0 || count > 4 {
            return Err(ScanError::ProtocolError(format!("unsupported BER length form 0x{:02x}", first)));
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    /// Read one TLV, returning its tag and content
    fn tlv(&mut self) -> ScanResult<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| ScanError::ProtocolError(format!("TLV 0x{:02x} overruns message", tag)))?;
        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> ScanResult<&'a [u8]> {
        let (tag, content) = self.tlv()?;
        if tag != expected {
            return Err(ScanError::ProtocolError(format!(
                "expected tag 0x{:02x}, found 0x{:02x}",
                expected, tag
            )));
        }
        Ok(content)
    }

    fn integer(&mut self) -> ScanResult<i64> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }
}

fn decode_integer(content: &[u8]) -> ScanResult<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(ScanError::ProtocolError(format!("bad INTEGER length {}", content.len())));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        value = (value << 8) | i64::from(b);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> ScanResult<u64> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(ScanError::ProtocolError(format!("bad unsigned length {}", content.len())));
    }
    Ok(content.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn narrow(value: u64) -> ScanResult<u32> {
    u32::try_from(value).map_err(|_| ScanError::ProtocolError(format!("32-bit value overflow: {}", value)))
}

fn decode_value(tag: u8, content: &[u8]) -> ScanResult<SnmpValue> {
    let value = match tag {
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)?),
        TAG_COUNTER32 => SnmpValue::Counter32(narrow(decode_unsigned(content)?)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(narrow(decode_unsigned(content)?)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(narrow(decode_unsigned(content)?)?),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_OID => SnmpValue::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| ScanError::ProtocolError("IpAddress must be 4 bytes".to_string()))?;
            SnmpValue::IpAddress(Ipv4Addr::from(octets))
        }
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => {
            return Err(ScanError::ProtocolError(format!("unsupported value tag 0x{:02x}", other)));
        }
    };
    Ok(value)
}

/// Decode a full SNMP message
pub fn decode_message(bytes: &[u8]) -> ScanResult<SnmpMessage> {
    let mut outer = Reader::new(bytes);
    let mut message = Reader::new(outer.expect(TAG_SEQUENCE)?);

    let version = message.integer()?;
    let community = String::from_utf8_lossy(message.expect(TAG_OCTET_STRING)?).into_owned();

    let (pdu_type, pdu_content) = message.tlv()?;
    if pdu_type & 0xE0 != 0xA0 {
        return Err(ScanError::ProtocolError(format!("unexpected PDU tag 0x{:02x}", pdu_type)));
    }

    let mut pdu = Reader::new(pdu_content);
    let request_id = i32::try_from(pdu.integer()?)
        .map_err(|_| ScanError::ProtocolError("request-id out of range".to_string()))?;
    let error_status = pdu.integer()?;
    let error_index = pdu.integer()?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(varbind.expect(TAG_OID)?)?;
        let (tag, content) = varbind.tlv()?;
        varbinds.push((oid, decode_value(tag, content)?));
    }

    Ok(SnmpMessage {
        version,
        community,
        pdu_type,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

/// Decode a GetResponse and return its first varbind value.
///
/// Wrong request-id, non-zero error-status and NULL or exception values are
/// all protocol errors.
pub fn decode_response(bytes: &[u8], expected_request_id: i32) -> ScanResult<SnmpValue> {
    let message = decode_message(bytes)?;

    if message.pdu_type != PDU_GET_RESPONSE {
        return Err(ScanError::ProtocolError(format!(
            "expected GetResponse, got PDU 0x{:02x}",
            message.pdu_type
        )));
    }
    if message.request_id != expected_request_id {
        return Err(ScanError::ProtocolError(format!(
            "request-id mismatch: sent {}, received {}",
            expected_request_id, message.request_id
        )));
    }
    if message.error_status != 0 {
        return Err(ScanError::ProtocolError(format!(
            "agent returned error-status {} at index {}",
            message.error_status, message.error_index
        )));
    }

    let (oid, value) = message
        .varbinds
        .into_iter()
        .next()
        .ok_or_else(|| ScanError::ProtocolError("response has no varbinds".to_string()))?;

    if value.is_exception() {
        return Err(ScanError::ProtocolError(format!("{} for {}", value, format_oid(&oid))));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SYS_DESCR: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 1, 0];

    #[test]
    fn test_get_request_matches_reference_bytes() {
        let packet = build_get_request("public", &SYS_DESCR, 0x1234_5678).unwrap();
        let expected: [u8; 43] = [
            0x30, 0x29, 0x02, 0x01, 0x01, 0x04, 0x06, 0x70, 0x75, 0x62, 0x6c, 0x69, 0x63, 0xA0, 0x1C, 0x02,
            0x04, 0x12, 0x34, 0x56, 0x78, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E, 0x30, 0x0C, 0x06,
            0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
        ];
        assert_eq!(&packet[..], &expected[..]);
    }

    #[test]
    fn test_long_form_length() {
        let mut buf = BytesMut::new();
        encode_length(200, &mut buf);
        assert_eq!(&buf[..], &[0x81, 200]);

        let mut buf = BytesMut::new();
        encode_length(300, &mut buf);
        assert_eq!(&buf[..], &[0x82, 0x01, 0x2C]);
    }

    #[test]
    fn test_multibyte_oid_arc() {
        let encoded = encode_oid(&[1, 3, 6, 1, 4, 1, 9, 1, 1208]).unwrap();
        assert_eq!(&encoded[..], &[0x2B, 6, 1, 4, 1, 9, 1, 0x89, 0x38]);
        assert_eq!(decode_oid(&encoded).unwrap(), vec![1, 3, 6, 1, 4, 1, 9, 1, 1208]);
    }

    #[test]
    fn test_decode_octet_string_response_with_long_community() {
        let community = "c".repeat(150);
        let response =
            build_get_response(&community, 7, &SYS_DESCR, &SnmpValue::OctetString("Cisco IOS Software".into()))
                .unwrap();
        let value = decode_response(&response, 7).unwrap();
        assert_eq!(value, SnmpValue::OctetString("Cisco IOS Software".into()));
    }

    #[test]
    fn test_decode_numeric_types() {
        let cases = [
            SnmpValue::Integer(-5),
            SnmpValue::Integer(128),
            SnmpValue::Counter32(u32::MAX),
            SnmpValue::Gauge32(1_000_000_000),
            SnmpValue::TimeTicks(8_640_000),
            SnmpValue::Counter64(u64::MAX),
            SnmpValue::IpAddress(Ipv4Addr::new(10, 0, 0, 1)),
            SnmpValue::ObjectId(vec![1, 3, 6, 1, 4, 1, 9]),
        ];
        for value in cases {
            let response = build_get_response("public", 42, &SYS_DESCR, &value).unwrap();
            assert_eq!(decode_response(&response, 42).unwrap(), value);
        }
    }

    #[test]
    fn test_binary_octet_string() {
        let mac = SnmpValue::OctetString(vec![0x00, 0x1b, 0x54, 0xaa, 0x01, 0xff]);
        assert_eq!(mac.as_hex().as_deref(), Some("00:1b:54:aa:01:ff"));
        assert_eq!(SnmpValue::OctetString(b"router".to_vec()).as_text(), "router");
    }

    #[test]
    fn test_exception_value_is_protocol_error() {
        let response = build_get_response("public", 1, &SYS_DESCR, &SnmpValue::NoSuchObject).unwrap();
        assert!(matches!(decode_response(&response, 1), Err(ScanError::ProtocolError(_))));
    }

    #[test]
    fn test_request_id_mismatch() {
        let response = build_get_response("public", 1, &SYS_DESCR, &SnmpValue::Integer(1)).unwrap();
        assert!(matches!(decode_response(&response, 2), Err(ScanError::ProtocolError(_))));
    }

    #[test]
    fn test_truncated_message() {
        let response = build_get_response("public", 1, &SYS_DESCR, &SnmpValue::Integer(1)).unwrap();
        let truncated = &response[..response.len() - 3];
        assert!(decode_message(truncated).is_err());
    }

    #[test]
    fn test_parse_oid() {
        assert_eq!(parse_oid(".1.3.6.1.2.1.1.5.0").unwrap(), vec![1, 3, 6, 1, 2, 1, 1, 5, 0]);
        assert!(parse_oid("1").is_err());
        assert!(parse_oid("1.3.x").is_err());
    }

    proptest! {
        #[test]
        fn prop_oid_round_trip(first in 0u32..=2, second in 0u32..40, rest in proptest::collection::vec(any::<u32>(), 0..12)) {
            let mut arcs = vec![first, second];
            arcs.extend(rest);
            let encoded = encode_oid(&arcs).unwrap();
            prop_assert_eq!(decode_oid(&encoded).unwrap(), arcs);
        }
    }
}
