use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::address::{Address, Transport};
use crate::message::Message;

/// Decoded link-layer metadata. Only the piece of information later
/// dissectors need (the next-protocol selector) is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub ethertype: u16,
}

/// Decoded IPv4/IPv6 metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub ip_proto: u8,
    pub fragmented: bool,
}

/// Decoded transport-layer metadata (UDP or TCP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRecord {
    pub src_port: u16,
    pub dst_port: u16,
    pub transport: Transport,
}

/// Decoded RTP header fields, heuristically classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpRecord {
    pub ssrc: u32,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
}

/// Decoded RTCP packet header (first packet of a compound packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpRecord {
    pub packet_type: u8,
    pub ssrc: u32,
}

/// Fixed, enum-keyed table of typed per-protocol records attached to a
/// packet as it passes down the dissector chain. Unknown/unregistered
/// protocols are not stored — this replaces a type-erased protocol map
/// with one slot per known protocol id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolRecords {
    pub link: Option<LinkRecord>,
    pub ip: Option<IpRecord>,
    pub transport: Option<TransportRecord>,
    pub rtp: Option<RtpRecord>,
    pub rtcp: Option<RtcpRecord>,
}

/// One decoded frame. Owns its raw bytes and the chain of addresses at
/// each transport layer it passed through, plus the fixed protocol
/// record table dissectors attach to as they run.
///
/// Created by a capture input, handed to the dissector chain, then to
/// storage (which retains it only if a SIP message was decoded from it);
/// outputs observe it in passing without retaining ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub timestamp_us: u64,
    pub raw: Vec<u8>,
    pub addresses: Vec<Address>,
    pub records: ProtocolRecords,
    /// Present once the SIP dissector successfully parses this frame.
    pub message: Option<Message>,
    /// The application-layer bytes handed to the SIP/RTP/RTCP dissectors,
    /// i.e. `raw` with link/IP/transport/TLS/WebSocket framing stripped.
    /// Empty until a transport-triggered dissect runs. This, not `raw`, is
    /// what a HEP forwarder re-encapsulates as the correlation payload.
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(timestamp_us: u64, raw: Vec<u8>) -> Self {
        Packet {
            timestamp_us,
            raw,
            addresses: Vec::new(),
            records: ProtocolRecords::default(),
            message: None,
            payload: Vec::new(),
        }
    }

    pub fn push_address(&mut self, addr: Address) {
        self.addresses.push(addr);
    }

    pub fn src(&self) -> Option<&Address> {
        self.addresses.first()
    }

    pub fn dst(&self) -> Option<&Address> {
        self.addresses.get(1)
    }
}
