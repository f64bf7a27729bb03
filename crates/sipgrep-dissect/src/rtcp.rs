use sipgrep_core::packet::RtcpRecord;
use sipgrep_core::Packet;

use crate::dissector::Dissector;

/// Sender Report and Receiver Report packet type values (RFC 3550 §6.4).
pub const PT_SENDER_REPORT: u8 = 200;
pub const PT_RECEIVER_REPORT: u8 = 201;
pub const PT_SOURCE_DESCRIPTION: u8 = 202;
pub const PT_GOODBYE: u8 = 203;
pub const PT_APP: u8 = 204;

/// Classifies the first packet of a (possibly compound) RTCP packet.
/// Only Sender/Receiver Report and APP expose their SSRC at a fixed
/// offset; Source Description's per-chunk layout is not walked since
/// storage only needs the packet type to recognize RTCP traffic, not its
/// full report contents (media payloads are indexed, not decoded).
pub struct RtcpDissector;

impl Dissector for RtcpDissector {
    fn name(&self) -> &'static str {
        "rtcp"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 8 {
            return None;
        }
        let version = bytes[0] >> 6;
        if version != 2 {
            return None;
        }
        let packet_type = bytes[1];
        if !(PT_SENDER_REPORT..=PT_APP).contains(&packet_type) {
            return None;
        }
        let ssrc = match packet_type {
            PT_SENDER_REPORT | PT_RECEIVER_REPORT | PT_APP => {
                u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])
            }
            _ => 0,
        };

        packet.records.rtcp = Some(RtcpRecord { packet_type, ssrc });
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sender_report() {
        let mut bytes = vec![0u8; 8];
        bytes[0] = 0x80;
        bytes[1] = PT_SENDER_REPORT;
        bytes[4..8].copy_from_slice(&42u32.to_be_bytes());
        let mut packet = Packet::new(0, bytes.clone());
        assert!(RtcpDissector.dissect(&mut packet, &bytes).is_none());
        let record = packet.records.rtcp.unwrap();
        assert_eq!(record.packet_type, PT_SENDER_REPORT);
        assert_eq!(record.ssrc, 42);
    }
}
