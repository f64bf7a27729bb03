use sipgrep_core::packet::LinkRecord;
use sipgrep_core::Packet;

use crate::dissector::Dissector;

/// EtherType for IPv4, per RFC 894.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType for IPv6, per RFC 7042.
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

const ETHERNET_HEADER_LEN: usize = 14;

/// Strips Ethernet II framing and records the EtherType so the chain can
/// dispatch to the right next-layer dissector.
pub struct EthernetDissector;

impl Dissector for EthernetDissector {
    fn name(&self) -> &'static str {
        "eth"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < ETHERNET_HEADER_LEN {
            return None;
        }
        let ethertype = u16::from_be_bytes([bytes[12], bytes[13]]);
        packet.records.link = Some(LinkRecord { ethertype });
        Some(bytes[ETHERNET_HEADER_LEN..].to_vec())
    }
}

/// Linux "cooked" capture framing (DLT_LINUX_SLL), used when a capture was
/// taken on "any" interface. 16-byte fixed header; protocol field at the
/// same relative offset as Ethernet's EtherType.
pub struct LinuxSllDissector;

impl Dissector for LinuxSllDissector {
    fn name(&self) -> &'static str {
        "sll"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        const SLL_HEADER_LEN: usize = 16;
        if bytes.len() < SLL_HEADER_LEN {
            return None;
        }
        let ethertype = u16::from_be_bytes([bytes[14], bytes[15]]);
        packet.records.link = Some(LinkRecord { ethertype });
        Some(bytes[SLL_HEADER_LEN..].to_vec())
    }
}

/// BSD loopback framing: a 4-byte host-endian address-family header.
pub struct LoopbackDissector;

impl Dissector for LoopbackDissector {
    fn name(&self) -> &'static str {
        "lo"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 4 {
            return None;
        }
        let family = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        // AF_INET=2, AF_INET6=30 on most BSDs/Darwin; normalize to an
        // EtherType so downstream dispatch stays uniform.
        let ethertype = match family {
            2 => ETHERTYPE_IPV4,
            30 | 28 | 10 => ETHERTYPE_IPV6,
            _ => 0,
        };
        packet.records.link = Some(LinkRecord { ethertype });
        Some(bytes[4..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_strips_header_and_records_ethertype() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame.extend_from_slice(&[1, 2, 3]);
        let mut packet = Packet::new(0, frame.clone());
        let rest = EthernetDissector.dissect(&mut packet, &frame).unwrap();
        assert_eq!(rest, vec![1, 2, 3]);
        assert_eq!(packet.records.link.unwrap().ethertype, ETHERTYPE_IPV4);
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut packet = Packet::new(0, vec![]);
        assert!(EthernetDissector.dissect(&mut packet, &[0u8; 4]).is_none());
    }
}
