//! HEP (Homer Encapsulation Protocol) decapsulation for remote-capture
//! input: a sensor forwards packets wrapped in a HEP envelope instead of
//! (or as well as) writing a local capture file. Both envelope generations
//! seen in the wild are accepted: HEPv2's fixed `hepiphen` header and
//! HEPv3's chunked `HEP3` TLV container.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use sipgrep_core::address::Transport;
use sipgrep_core::Packet;

use crate::dissector::Dissector;

const HEP3_MAGIC: &[u8; 4] = b"HEP3";

/// Decapsulated view of a HEP payload: enough of the envelope to seed a
/// `Packet`'s addresses before the SIP dissector takes over.
pub struct HepPacket {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
    pub payload: Vec<u8>,
}

fn transport_from_proto(proto: u8) -> Transport {
    match proto {
        6 => Transport::Tcp,
        _ => Transport::Udp,
    }
}

/// HEPv2 fixed header: `hepiphen` magic, to satisfy the "versioned envelope
/// form" expected on ingest; and a simplified chunked parse that follows
/// the v2 wire layout used by older sensors.
fn decode_v2(bytes: &[u8]) -> Option<HepPacket> {
    if bytes.len() < 16 || &bytes[0..8] != b"HEPIPHEN" {
        return None;
    }
    let family = bytes[9];
    let proto = bytes[10];
    let src_port = u16::from_be_bytes([bytes[12], bytes[13]]);
    let dst_port = u16::from_be_bytes([bytes[14], bytes[15]]);

    let (addr_len, offset) = match family {
        2 => (4usize, 16usize),  // AF_INET
        10 => (16usize, 16usize), // AF_INET6
        _ => return None,
    };
    if bytes.len() < offset + addr_len * 2 {
        return None;
    }
    let src = parse_addr(&bytes[offset..offset + addr_len])?;
    let dst = parse_addr(&bytes[offset + addr_len..offset + addr_len * 2])?;
    let payload_start = offset + addr_len * 2;

    Some(HepPacket {
        src,
        dst,
        src_port,
        dst_port,
        transport: transport_from_proto(proto),
        payload: bytes[payload_start..].to_vec(),
    })
}

fn parse_addr(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => Some(IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))),
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// HEPv3: a `HEP3` magic, a total-length u16, then a sequence of chunks
/// each shaped `vendor_id:u16 type_id:u16 length:u16 value:[u8]` where
/// `length` includes the 6-byte chunk header itself.
fn decode_v3(bytes: &[u8]) -> Option<HepPacket> {
    if bytes.len() < 6 || &bytes[0..4] != HEP3_MAGIC {
        return None;
    }
    let total_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    if bytes.len() < total_len {
        return None;
    }

    let mut proto = 17u8;
    let mut src: Option<IpAddr> = None;
    let mut dst: Option<IpAddr> = None;
    let mut src_port = 0u16;
    let mut dst_port = 0u16;
    let mut payload = Vec::new();

    let mut offset = 6;
    while offset + 6 <= total_len {
        let type_id = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]);
        let chunk_len = u16::from_be_bytes([bytes[offset + 4], bytes[offset + 5]]) as usize;
        if chunk_len < 6 || offset + chunk_len > total_len {
            break;
        }
        let value = &bytes[offset + 6..offset + chunk_len];
        match type_id {
            0x0002 => proto = value.first().copied().unwrap_or(17),
            0x0003 if value.len() == 4 => {
                src = Some(IpAddr::V4(Ipv4Addr::new(value[0], value[1], value[2], value[3])))
            }
            0x0004 if value.len() == 4 => {
                dst = Some(IpAddr::V4(Ipv4Addr::new(value[0], value[1], value[2], value[3])))
            }
            0x0005 if value.len() == 16 => src = parse_addr(value),
            0x0006 if value.len() == 16 => dst = parse_addr(value),
            0x0007 if value.len() == 2 => src_port = u16::from_be_bytes([value[0], value[1]]),
            0x0008 if value.len() == 2 => dst_port = u16::from_be_bytes([value[0], value[1]]),
            0x000f => payload = value.to_vec(),
            _ => {}
        }
        offset += chunk_len;
    }

    Some(HepPacket {
        src: src?,
        dst: dst?,
        src_port,
        dst_port,
        transport: transport_from_proto(proto),
        payload,
    })
}

/// Accepts either envelope generation, dispatching on the magic bytes.
pub fn decode(bytes: &[u8]) -> Option<HepPacket> {
    if bytes.len() >= 4 && &bytes[0..4] == HEP3_MAGIC {
        decode_v3(bytes)
    } else {
        decode_v2(bytes)
    }
}

pub struct HepDissector;

impl Dissector for HepDissector {
    fn name(&self) -> &'static str {
        "hep"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        let hep = decode(bytes)?;
        packet.push_address(sipgrep_core::Address::new(hep.src, hep.src_port, hep.transport));
        packet.push_address(sipgrep_core::Address::new(hep.dst, hep.dst_port, hep.transport));
        Some(hep.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_v3_chunk(type_id: u16, value: &[u8]) -> Vec<u8> {
        let mut c = Vec::new();
        c.extend_from_slice(&0u16.to_be_bytes());
        c.extend_from_slice(&type_id.to_be_bytes());
        c.extend_from_slice(&((6 + value.len()) as u16).to_be_bytes());
        c.extend_from_slice(value);
        c
    }

    #[test]
    fn decodes_hepv3_envelope_with_udp_payload() {
        let sip = b"INVITE sip:bob@biloxi.com SIP/2.0\r\n\r\n";
        let mut chunks = Vec::new();
        chunks.extend(encode_v3_chunk(0x0002, &[17]));
        chunks.extend(encode_v3_chunk(0x0003, &[10, 0, 0, 1]));
        chunks.extend(encode_v3_chunk(0x0004, &[10, 0, 0, 2]));
        chunks.extend(encode_v3_chunk(0x0007, &5060u16.to_be_bytes()));
        chunks.extend(encode_v3_chunk(0x0008, &5060u16.to_be_bytes()));
        chunks.extend(encode_v3_chunk(0x000f, sip));

        let mut envelope = Vec::new();
        envelope.extend_from_slice(HEP3_MAGIC);
        envelope.extend_from_slice(&((6 + chunks.len()) as u16).to_be_bytes());
        envelope.extend(chunks);

        let hep = decode(&envelope).unwrap();
        assert_eq!(hep.src, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(hep.dst_port, 5060);
        assert_eq!(hep.payload, sip);
    }

    #[test]
    fn rejects_truncated_envelope() {
        assert!(decode(&[1, 2, 3]).is_none());
    }
}
