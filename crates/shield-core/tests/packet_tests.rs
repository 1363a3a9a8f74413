//! Integration tests for the packet module
//!
//! Parse, build and answer whole datagrams through the public API.

use proptest::prelude::*;
use shield_core::packet::dns::{self, record_type};
use shield_core::packet::{parse, DnsQuery, PacketBuilder, ParseError, Protocol};
use std::net::{IpAddr, Ipv4Addr};

const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 111, 222, 3);
const RESOLVER: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 3);

fn encode_query(id: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut msg = id.to_be_bytes().to_vec();
    msg.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    for label in name.split('.') {
        msg.push(u8::try_from(label.len()).unwrap());
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg
}

fn dns_datagram(id: u16, name: &str) -> Vec<u8> {
    PacketBuilder::udp_v4()
        .src(CLIENT)
        .dst(RESOLVER)
        .src_port(51000)
        .dst_port(53)
        .payload(&encode_query(id, name, record_type::A))
        .build()
        .unwrap()
        .to_vec()
}

#[test]
fn test_dns_datagram_end_to_end() {
    let packet = dns_datagram(0x0A0B, "www.example.com");
    let view = parse(&packet).unwrap();

    assert!(view.is_dns_query());
    assert_eq!(view.protocol, Protocol::Udp);
    assert_eq!(view.source_addr, IpAddr::V4(CLIENT));

    let query = DnsQuery::parse(view.payload()).unwrap();
    assert_eq!(query.transaction_id, 0x0A0B);
    assert_eq!(query.queried_name, "www.example.com");
    assert!(query.is_a_query());
}

#[test]
fn test_nxdomain_reply_datagram() {
    let packet = dns_datagram(0x7777, "casino.example");
    let view = parse(&packet).unwrap();
    let query = DnsQuery::parse(view.payload()).unwrap();

    let answer = dns::nxdomain_response(view.payload(), &query);
    let reply = PacketBuilder::reply_to(&view)
        .unwrap()
        .payload(&answer)
        .build()
        .unwrap();

    let reply = parse(&reply).unwrap();
    assert_eq!(reply.source_addr, IpAddr::V4(RESOLVER));
    assert_eq!(reply.dest_addr, IpAddr::V4(CLIENT));
    assert_eq!(reply.source_port, 53);
    assert_eq!(reply.dest_port, 51000);
    assert!(!reply.is_dns_query());

    let payload = reply.payload();
    assert_eq!(&payload[..4], &[0x77, 0x77, 0x81, 0x83]);
    assert!(dns::is_response(payload));
}

#[test]
fn test_parser_robustness_cases() {
    assert!(matches!(parse(&[0x45]), Err(ParseError::Truncated { .. })));
    assert_eq!(parse(&[0x90; 20]).unwrap_err(), ParseError::UnknownVersion(9));

    // IHL of 15 words on a 20-byte buffer
    let mut packet = dns_datagram(1, "example.com");
    packet[0] = 0x4F;
    packet.truncate(20);
    assert!(matches!(parse(&packet), Err(ParseError::Truncated { .. })));
}

#[test]
fn test_non_dns_udp_not_a_query() {
    let packet = PacketBuilder::udp_v4()
        .src(CLIENT)
        .dst(RESOLVER)
        .src_port(51000)
        .dst_port(443)
        .payload(&[0u8; 32])
        .build()
        .unwrap();
    let view = parse(&packet).unwrap();
    assert!(view.is_udp());
    assert!(!view.is_dns_query());
}

proptest! {
    #[test]
    fn prop_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(view) = parse(&data) {
            prop_assert!(view.payload_offset + view.payload_length <= data.len());
        }
    }

    #[test]
    fn prop_dns_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = DnsQuery::parse(&data);
    }

    #[test]
    fn prop_query_name_survives_datagram(name in "[a-z]{1,20}\\.[a-z]{2,6}", id in any::<u16>()) {
        let packet = dns_datagram(id, &name);
        let view = parse(&packet).unwrap();
        let query = DnsQuery::parse(view.payload()).unwrap();
        prop_assert_eq!(query.queried_name, name);
        prop_assert_eq!(query.transaction_id, id);
    }
}
