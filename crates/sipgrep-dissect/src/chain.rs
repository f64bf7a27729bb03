//! The dissector tree: a fixed root keyed by link type, branching by
//! EtherType, then IP protocol number, then a transport-port/content-sniff
//! trigger that picks among SIP, TLS, WebSocket, RTP and RTCP. Every branch
//! point is plain Rust control flow rather than a generic registry, since
//! the tree shape is fixed for the lifetime of a capture.

use sipgrep_core::address::Transport;
use sipgrep_core::{Address, Packet};

use crate::dissector::{DissectStats, Dissector};
use crate::hep::HepDissector;
use crate::ip::{FragmentCache, IP_PROTO_TCP, IP_PROTO_UDP, Ipv4Dissector, Ipv6Dissector};
use crate::link::{EthernetDissector, LinuxSllDissector, LoopbackDissector, ETHERTYPE_IPV4, ETHERTYPE_IPV6};
use crate::rtcp::RtcpDissector;
use crate::rtp::RtpDissector;
use crate::sip::SipDissector;
use crate::tls::{TlsDecryptor, TlsDissector};
use crate::transport::{TcpDissector, TcpReassembler, UdpDissector};
use crate::ws::WebSocketDissector;

/// Capture link-layer framing, mirroring the subset of pcap `DLT_*` values
/// a capture input can hand the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    LinuxSll,
    Loopback,
    /// No link layer at all; the frame starts at the IP header (pcap
    /// `DLT_RAW`, and the synthetic frames HEP decapsulation produces).
    Raw,
}

const SIP_PORTS: [u16; 2] = [5060, 5061];
const TLS_PORT: u16 = 5061;

fn looks_like_sip(bytes: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(&bytes[..bytes.len().min(32)]) else {
        return false;
    };
    text.starts_with("SIP/2.0") || text.split_whitespace().nth(2).map(|w| w.starts_with("SIP/")).unwrap_or(false)
}

/// Owns every piece of dissector state that must survive across packets:
/// the IP fragment cache and the TCP reassembler. Stateless dissectors
/// (SIP, SDP, RTP, RTCP, link-layer) are constructed fresh per call.
pub struct DissectorChain {
    fragments: FragmentCache,
    tcp: TcpReassembler,
    stats: DissectStats,
    tls_decryptor: Option<Box<dyn TlsDecryptor>>,
}

impl Default for DissectorChain {
    fn default() -> Self {
        DissectorChain {
            fragments: FragmentCache::new(),
            tcp: TcpReassembler::new(),
            stats: DissectStats::default(),
            tls_decryptor: None,
        }
    }
}

impl DissectorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls_decryptor(mut self, decryptor: Box<dyn TlsDecryptor>) -> Self {
        self.tls_decryptor = Some(decryptor);
        self
    }

    pub fn stats(&self) -> &DissectStats {
        &self.stats
    }

    /// Runs `raw` through the full tree, returning the decoded [`Packet`].
    /// A packet that never reaches the SIP layer still comes back with
    /// whatever `ProtocolRecords` earlier layers attached — storage simply
    /// ignores frames with no `message`.
    pub fn process(&self, link_type: LinkType, timestamp_us: u64, raw: Vec<u8>) -> Packet {
        let mut packet = Packet::new(timestamp_us, raw.clone());

        let after_link = match link_type {
            LinkType::Ethernet => EthernetDissector.dissect(&mut packet, &raw),
            LinkType::LinuxSll => LinuxSllDissector.dissect(&mut packet, &raw),
            LinkType::Loopback => LoopbackDissector.dissect(&mut packet, &raw),
            LinkType::Raw => Some(raw.clone()),
        };
        let Some(after_link) = after_link else {
            self.stats.record_skipped();
            return packet;
        };

        let ethertype = packet.records.link.map(|l| l.ethertype);
        let after_ip = match (link_type, ethertype) {
            (LinkType::Raw, _) => self.dissect_ip_version_sniffed(&mut packet, &after_link),
            (_, Some(ETHERTYPE_IPV4)) => {
                let ipv4 = Ipv4Dissector { fragments: &self.fragments };
                ipv4.dissect(&mut packet, &after_link)
            }
            (_, Some(ETHERTYPE_IPV6)) => Ipv6Dissector.dissect(&mut packet, &after_link),
            _ => None,
        };
        let Some(after_ip) = after_ip else {
            self.stats.record_skipped();
            return packet;
        };

        let ip = match packet.records.ip {
            Some(ip) => ip,
            None => {
                self.stats.record_skipped();
                return packet;
            }
        };

        let after_transport = match ip.ip_proto {
            IP_PROTO_UDP => UdpDissector.dissect(&mut packet, &after_ip),
            IP_PROTO_TCP => {
                let tcp = TcpDissector { reassembler: &self.tcp };
                tcp.dissect(&mut packet, &after_ip)
            }
            _ => None,
        };
        let Some(after_transport) = after_transport else {
            self.stats.record_skipped();
            return packet;
        };

        let transport_record = match packet.records.transport {
            Some(t) => t,
            None => {
                self.stats.record_skipped();
                return packet;
            }
        };
        packet.push_address(Address::new(ip.src, transport_record.src_port, transport_record.transport));
        packet.push_address(Address::new(ip.dst, transport_record.dst_port, transport_record.transport));

        self.dissect_payload(&mut packet, transport_record.transport, transport_record.dst_port, &after_transport);
        packet
    }

    /// Entry point for the remote-encapsulation capture input: `envelope`
    /// is a whole HEP datagram rather than a link frame, so the chain skips
    /// straight to the transport-triggered branch using the addresses and
    /// transport HEP itself carries.
    pub fn process_hep(&self, timestamp_us: u64, envelope: &[u8]) -> Packet {
        let mut packet = Packet::new(timestamp_us, envelope.to_vec());
        match HepDissector.dissect(&mut packet, envelope) {
            Some(inner) => {
                let transport = packet.src().map(|a| a.transport()).unwrap_or(Transport::Udp);
                let dst_port = packet.dst().map(|a| a.port()).unwrap_or(0);
                self.dissect_payload(&mut packet, transport, dst_port, &inner);
            }
            None => self.stats.record_skipped(),
        }
        packet
    }

    fn dissect_ip_version_sniffed(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.is_empty() {
            return None;
        }
        match bytes[0] >> 4 {
            4 => {
                let ipv4 = Ipv4Dissector { fragments: &self.fragments };
                ipv4.dissect(packet, bytes)
            }
            6 => Ipv6Dissector.dissect(packet, bytes),
            _ => None,
        }
    }

    fn dissect_payload(&self, packet: &mut Packet, transport: Transport, dst_port: u16, bytes: &[u8]) {
        let application = if transport == Transport::Tcp && dst_port == TLS_PORT {
            let tls = TlsDissector { decryptor: self.tls_decryptor.as_deref() };
            match tls.dissect(packet, bytes) {
                Some(plaintext) => plaintext,
                None => {
                    self.stats.record_skipped();
                    return;
                }
            }
        } else if transport == Transport::Tcp && looks_like_ws_handshake_response(bytes) {
            match WebSocketDissector.dissect(packet, bytes) {
                Some(payload) => payload,
                None => {
                    self.stats.record_skipped();
                    return;
                }
            }
        } else {
            bytes.to_vec()
        };

        packet.payload = application.clone();

        if looks_like_sip(&application) || SIP_PORTS.contains(&dst_port) {
            if SipDissector.dissect(packet, &application).is_none() && packet.message.is_some() {
                self.stats.record_accepted();
                return;
            }
        }

        if RtcpDissector.dissect(packet, &application).is_none() && packet.records.rtcp.is_some() {
            self.stats.record_accepted();
            return;
        }
        if RtpDissector.dissect(packet, &application).is_none() && packet.records.rtp.is_some() {
            self.stats.record_accepted();
            return;
        }
        self.stats.record_skipped();
    }
}

/// `ws.rs` unmasks already-framed WebSocket frames; the opening handshake
/// (an HTTP Upgrade exchange) never reaches it, so TCP payloads are only
/// handed to the WebSocket dissector once they look like a masked frame
/// header rather than an HTTP request/response line.
fn looks_like_ws_handshake_response(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[1] & 0x80 != 0 && matches!(bytes[0] & 0x0f, 0x1 | 0x2 | 0x0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_in_ipv4_eth(sip: &[u8], src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut udp = Vec::new();
        udp.extend_from_slice(&src_port.to_be_bytes());
        udp.extend_from_slice(&dst_port.to_be_bytes());
        udp.extend_from_slice(&((8 + sip.len()) as u16).to_be_bytes());
        udp.extend_from_slice(&0u16.to_be_bytes());
        udp.extend_from_slice(sip);

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&((20 + udp.len()) as u16).to_be_bytes());
        ip[9] = IP_PROTO_UDP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        ip.extend_from_slice(&udp);

        let mut eth = vec![0u8; 14];
        eth[12] = 0x08;
        eth[13] = 0x00;
        eth.extend_from_slice(&ip);
        eth
    }

    #[test]
    fn full_chain_decodes_sip_over_udp_over_ethernet() {
        let sip = b"INVITE sip:bob@biloxi.com SIP/2.0\r\nCall-ID: abc@x\r\nFrom: <sip:a@x>;tag=1\r\nTo: <sip:b@x>\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        let frame = udp_in_ipv4_eth(sip, 5060, 5060);
        let chain = DissectorChain::new();
        let packet = chain.process(LinkType::Ethernet, 0, frame);
        let message = packet.message.expect("sip message decoded");
        assert_eq!(message.call_id.to_string(), "abc@x");
        assert_eq!(chain.stats().accepted(), 1);
    }

    #[test]
    fn full_chain_classifies_rtp_over_udp() {
        let mut rtp = vec![0u8; 12];
        rtp[0] = 0x80;
        rtp[1] = 0;
        let frame = udp_in_ipv4_eth(&rtp, 40000, 40000);
        let chain = DissectorChain::new();
        let packet = chain.process(LinkType::Ethernet, 0, frame);
        assert!(packet.records.rtp.is_some());
        assert!(packet.message.is_none());
    }
}
