//! DNS query decoding and blocked-response synthesis
//!
//! Only the parts of RFC 1035 the filter needs: the header, the first
//! question (with compression pointers) and two canned response shapes.

use super::{read_u16, sizes, ParseError, MAX_HOSTNAME_LEN};
use bitflags::bitflags;
use std::net::Ipv4Addr;

/// Maximum compression pointer jumps followed while decoding a name
pub const MAX_POINTER_JUMPS: usize = 5;

/// TTL used for synthesized sinkhole answers
pub const SINKHOLE_TTL: u32 = 60;

/// Record types the filter cares about
pub mod record_type {
    /// IPv4 address
    pub const A: u16 = 1;
    /// IPv6 address
    pub const AAAA: u16 = 28;
}

/// `IN` class
pub const CLASS_IN: u16 = 1;

/// NXDOMAIN response code
pub const RCODE_NXDOMAIN: u16 = 3;

bitflags! {
    /// DNS header flags word (bytes 2..4)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DnsFlags: u16 {
        /// Message is a response
        const QR = 0x8000;
        /// Opcode field
        const OPCODE = 0x7800;
        /// Authoritative answer
        const AA = 0x0400;
        /// Truncated
        const TC = 0x0200;
        /// Recursion desired
        const RD = 0x0100;
        /// Recursion available
        const RA = 0x0080;
        /// Response code field
        const RCODE = 0x000F;
    }
}

/// A decoded DNS query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    /// Transaction ID (bytes 0..2)
    pub transaction_id: u16,
    /// First question name, dotted, without trailing dot
    pub queried_name: String,
    /// First question type
    pub query_type: u16,
    /// First question class
    pub query_class: u16,
    /// Offset just past the first question
    pub question_end: usize,
}

impl DnsQuery {
    /// Decode the header and first question of a DNS query payload
    pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < sizes::DNS_HEADER {
            return Err(ParseError::Truncated {
                needed: sizes::DNS_HEADER,
                actual: payload.len(),
            });
        }

        let transaction_id = read_u16(payload, 0)?;
        let flags = DnsFlags::from_bits_retain(read_u16(payload, 2)?);
        if flags.contains(DnsFlags::QR) {
            return Err(ParseError::Dns("message is a response"));
        }
        if read_u16(payload, 4)? == 0 {
            return Err(ParseError::Dns("no question"));
        }

        let (queried_name, pos) = read_name(payload, sizes::DNS_HEADER)?;
        let query_type = read_u16(payload, pos)?;
        let query_class = read_u16(payload, pos + 2)?;

        Ok(Self {
            transaction_id,
            queried_name,
            query_type,
            query_class,
            question_end: pos + 4,
        })
    }

    /// Whether this asks for an IPv4 address
    pub fn is_a_query(&self) -> bool {
        self.query_type == record_type::A && self.query_class == CLASS_IN
    }
}

/// Decode a possibly compressed name starting at `start`
///
/// Returns the name and the offset just past it in the original position.
fn read_name(msg: &[u8], start: usize) -> Result<(String, usize), ParseError> {
    let mut name = String::with_capacity(64);
    let mut pos = start;
    let mut resume_at: Option<usize> = None;
    let mut jumps = 0;

    loop {
        let len = *msg.get(pos).ok_or(ParseError::Dns("name runs past end"))?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let len = usize::from(len);
                let label = msg
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(ParseError::Dns("label runs past end"))?;

                let separator = usize::from(!name.is_empty());
                if name.len() + separator + len > MAX_HOSTNAME_LEN {
                    return Err(ParseError::Dns("name too long"));
                }
                if separator == 1 {
                    name.push('.');
                }
                for &b in label {
                    if !b.is_ascii_graphic() || b == b'.' {
                        return Err(ParseError::Dns("invalid label byte"));
                    }
                    name.push(char::from(b));
                }
                pos += 1 + len;
            }
            0xC0 => {
                let low = *msg
                    .get(pos + 1)
                    .ok_or(ParseError::Dns("pointer runs past end"))?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(ParseError::Dns("too many compression pointers"));
                }
                let target = (usize::from(len & 0x3F) << 8) | usize::from(low);
                if target >= pos {
                    return Err(ParseError::Dns("forward compression pointer"));
                }
                resume_at.get_or_insert(pos + 2);
                pos = target;
            }
            _ => return Err(ParseError::Dns("reserved label type")),
        }
    }

    Ok((name, resume_at.unwrap_or(pos)))
}

/// Transaction ID of any DNS message
pub fn transaction_id(msg: &[u8]) -> Option<u16> {
    read_u16(msg, 0).ok()
}

/// Whether a DNS message has the QR bit set
pub fn is_response(msg: &[u8]) -> bool {
    read_u16(msg, 2).is_ok_and(|flags| DnsFlags::from_bits_retain(flags).contains(DnsFlags::QR))
}

fn response_header(query_payload: &[u8], query: &DnsQuery, rcode: u16, answers: u16) -> Vec<u8> {
    let mut resp = Vec::with_capacity(query.question_end + 16);
    resp.extend_from_slice(&query_payload[..query.question_end]);

    let request = DnsFlags::from_bits_retain(u16::from_be_bytes([resp[2], resp[3]]));
    let flags = (request & (DnsFlags::OPCODE | DnsFlags::RD)) | DnsFlags::QR | DnsFlags::RA;
    let flags = flags.bits() | (rcode & DnsFlags::RCODE.bits());

    resp[2..4].copy_from_slice(&flags.to_be_bytes());
    resp[4..6].copy_from_slice(&1u16.to_be_bytes());
    resp[6..8].copy_from_slice(&answers.to_be_bytes());
    resp[8..12].fill(0);
    resp
}

/// NXDOMAIN answer for a blocked query
///
/// Echoes the transaction ID and the first question.
pub fn nxdomain_response(query_payload: &[u8], query: &DnsQuery) -> Vec<u8> {
    response_header(query_payload, query, RCODE_NXDOMAIN, 0)
}

/// Sinkhole answer pointing A queries at `addr`
///
/// Anything but an `IN A` question falls back to NXDOMAIN.
pub fn sinkhole_response(query_payload: &[u8], query: &DnsQuery, addr: Ipv4Addr) -> Vec<u8> {
    if !query.is_a_query() {
        return nxdomain_response(query_payload, query);
    }

    let mut resp = response_header(query_payload, query, 0, 1);
    resp.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
    resp.extend_from_slice(&record_type::A.to_be_bytes());
    resp.extend_from_slice(&CLASS_IN.to_be_bytes());
    resp.extend_from_slice(&SINKHOLE_TTL.to_be_bytes());
    resp.extend_from_slice(&4u16.to_be_bytes());
    resp.extend_from_slice(&addr.octets());
    resp
}
