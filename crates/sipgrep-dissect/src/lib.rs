//! The dissector chain: turns raw captured bytes into a [`sipgrep_core::Packet`]
//! carrying a decoded SIP [`sipgrep_core::Message`] (and its SDP media, if
//! any), walking link, IP, transport, TLS/WebSocket and SIP/RTP/RTCP layers
//! in turn. See [`chain::DissectorChain`] for the entry point.

pub mod chain;
pub mod dissector;
pub mod hep;
pub mod ip;
pub mod link;
pub mod rtcp;
pub mod rtp;
pub mod sdp;
pub mod sip;
pub mod tls;
pub mod transport;
pub mod ws;

pub use chain::{DissectorChain, LinkType};
pub use dissector::{DissectStats, Dissector};
