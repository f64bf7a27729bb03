use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sipgrep_core::address::Transport;
use sipgrep_core::packet::TransportRecord;
use sipgrep_core::Packet;

use crate::dissector::Dissector;

/// A TCP flow is discarded after this much idle time (§5: "TCP flow state: 60s idle").
pub const TCP_FLOW_TIMEOUT: Duration = Duration::from_secs(60);

/// Strips a UDP header and records ports. The next dissector (SIP, RTP,
/// RTCP, or STUN) is selected by the chain based on port/content sniffing,
/// not by this dissector itself.
pub struct UdpDissector;

impl Dissector for UdpDissector {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 8 {
            return None;
        }
        let src_port = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dst_port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        if len < 8 {
            return None;
        }
        let end = len.min(bytes.len());
        packet.records.transport = Some(TransportRecord {
            src_port,
            dst_port,
            transport: Transport::Udp,
        });
        Some(bytes[8..end].to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    src_ip: IpAddr,
    dst_ip: IpAddr,
    src_port: u16,
    dst_port: u16,
}

impl FlowKey {
    fn normalized(a: (IpAddr, u16), b: (IpAddr, u16)) -> Self {
        // Both directions of a flow share one reassembly buffer key so a
        // request and its response-direction traffic land in the same slot.
        if (a.0, a.1) <= (b.0, b.1) {
            FlowKey { src_ip: a.0, dst_ip: b.0, src_port: a.1, dst_port: b.1 }
        } else {
            FlowKey { src_ip: b.0, dst_ip: a.0, src_port: b.1, dst_port: a.1 }
        }
    }
}

struct FlowState {
    buffer: Vec<u8>,
    last_seen: Instant,
}

/// Per-flow TCP reassembly: buffers bytes keyed by 4-tuple and extracts
/// complete SIP messages using Content-Length framing when present, or
/// CRLFCRLF-delimited headers otherwise. Flow state is thread-confined to
/// the single worker thread that drives the dissector chain (§5).
#[derive(Default)]
pub struct TcpReassembler {
    flows: Mutex<HashMap<FlowKey, FlowState>>,
}

impl TcpReassembler {
    pub fn new() -> Self {
        TcpReassembler::default()
    }

    fn sweep(&self, map: &mut HashMap<FlowKey, FlowState>) {
        let now = Instant::now();
        map.retain(|_, f| now.duration_since(f.last_seen) < TCP_FLOW_TIMEOUT);
    }

    pub fn discard(&self, src: (IpAddr, u16), dst: (IpAddr, u16)) {
        let key = FlowKey::normalized(src, dst);
        self.flows.lock().unwrap().remove(&key);
    }

    /// Feeds new bytes into the flow's buffer and pulls out the first
    /// complete SIP message, if any, leaving the remainder buffered.
    fn feed(&self, src: (IpAddr, u16), dst: (IpAddr, u16), bytes: &[u8]) -> Option<Vec<u8>> {
        let key = FlowKey::normalized(src, dst);
        let mut map = self.flows.lock().unwrap();
        self.sweep(&mut map);

        let flow = map.entry(key).or_insert_with(|| FlowState {
            buffer: Vec::new(),
            last_seen: Instant::now(),
        });
        flow.buffer.extend_from_slice(bytes);
        flow.last_seen = Instant::now();

        let message_len = crate::sip::framed_message_len(&flow.buffer)?;
        let message = flow.buffer[..message_len].to_vec();
        flow.buffer.drain(..message_len);
        Some(message)
    }
}

/// TCP dissector. Sequence numbers are not used to reorder segments —
/// handling out-of-order TCP is out of scope (Non-goals: "lossless
/// reassembly of arbitrary TCP streams beyond what SIP framing requires");
/// segments are assumed to arrive in capture order, which holds for a
/// single local capture point.
pub struct TcpDissector<'r> {
    pub reassembler: &'r TcpReassembler,
}

impl<'r> Dissector for TcpDissector<'r> {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 20 {
            return None;
        }
        let src_port = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dst_port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let data_offset = ((bytes[12] >> 4) as usize) * 4;
        if data_offset < 20 || bytes.len() < data_offset {
            return None;
        }
        let flags = bytes[13];
        const FIN: u8 = 0x01;
        const RST: u8 = 0x04;

        let ip = packet.records.ip?;
        let src = (ip.src, src_port);
        let dst = (ip.dst, dst_port);

        if flags & (FIN | RST) != 0 {
            self.reassembler.discard(src, dst);
        }

        packet.records.transport = Some(TransportRecord {
            src_port,
            dst_port,
            transport: Transport::Tcp,
        });

        let payload = &bytes[data_offset..];
        if payload.is_empty() {
            return None;
        }
        self.reassembler.feed(src, dst, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_strips_header_and_records_ports() {
        let mut bytes = vec![0u8; 8];
        bytes[0..2].copy_from_slice(&5060u16.to_be_bytes());
        bytes[2..4].copy_from_slice(&5060u16.to_be_bytes());
        bytes[4..6].copy_from_slice(&12u16.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        let mut packet = Packet::new(0, bytes.clone());
        let rest = UdpDissector.dissect(&mut packet, &bytes).unwrap();
        assert_eq!(rest, vec![1, 2, 3, 4]);
        assert_eq!(packet.records.transport.unwrap().src_port, 5060);
    }

    #[test]
    fn tcp_flow_state_discarded_on_fin() {
        let reassembler = TcpReassembler::new();
        let src = ("10.0.0.1".parse().unwrap(), 5060u16);
        let dst = ("10.0.0.2".parse().unwrap(), 5061u16);
        reassembler.feed(src, dst, b"partial");
        assert!(!reassembler.flows.lock().unwrap().is_empty());
        reassembler.discard(src, dst);
        assert!(reassembler.flows.lock().unwrap().is_empty());
    }
}
