use sipgrep_core::packet::RtpRecord;
use sipgrep_core::Packet;

use crate::dissector::Dissector;

/// Heuristically classifies and parses an RTP packet: version must be 2
/// (RFC 3550 §5.1) and the payload-type byte must not collide with the
/// 200-204 range RTCP reserves. Storage uses the decoded (ssrc, payload
/// type, sequence, timestamp) to attach a media stream to whichever call's
/// SDP advertised this (address, port) pair.
pub struct RtpDissector;

impl Dissector for RtpDissector {
    fn name(&self) -> &'static str {
        "rtp"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 12 {
            return None;
        }
        let version = bytes[0] >> 6;
        if version != 2 {
            return None;
        }
        let cc = (bytes[0] & 0x0f) as usize;
        let payload_type = bytes[1] & 0x7f;
        if (200..=204).contains(&payload_type) {
            return None; // looks like RTCP, not RTP
        }
        let header_len = 12 + cc * 4;
        if bytes.len() < header_len {
            return None;
        }
        let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
        let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ssrc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        packet.records.rtp = Some(RtpRecord {
            ssrc,
            payload_type,
            sequence,
            timestamp,
        });
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(pt: u8) -> Vec<u8> {
        let mut b = vec![0u8; 12];
        b[0] = 0x80; // version 2, no padding/extension/csrc
        b[1] = pt;
        b[2..4].copy_from_slice(&1u16.to_be_bytes());
        b[4..8].copy_from_slice(&1000u32.to_be_bytes());
        b[8..12].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        b
    }

    #[test]
    fn classifies_valid_rtp_header() {
        let bytes = rtp_packet(0);
        let mut packet = Packet::new(0, bytes.clone());
        assert!(RtpDissector.dissect(&mut packet, &bytes).is_none());
        let record = packet.records.rtp.unwrap();
        assert_eq!(record.ssrc, 0xdead_beef);
        assert_eq!(record.sequence, 1);
    }

    #[test]
    fn rejects_rtcp_payload_type_range() {
        let bytes = rtp_packet(200);
        let mut packet = Packet::new(0, bytes.clone());
        assert!(RtpDissector.dissect(&mut packet, &bytes).is_none());
        assert!(packet.records.rtp.is_none());
    }
}
