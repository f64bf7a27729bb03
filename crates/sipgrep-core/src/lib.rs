//! Shared value types for the sipgrep workspace: endpoint addresses, the
//! decoded packet frame, and the SIP message/SDP media types that flow out
//! of the dissector chain into storage.

pub mod address;
pub mod error;
pub mod message;
pub mod packet;

pub use address::{Address, Transport};
pub use error::{Error, Result};
pub use message::{CSeq, CallId, MediaDescriptor, Message, Method, StartLine};
pub use packet::{IpRecord, LinkRecord, Packet, ProtocolRecords, RtcpRecord, RtpRecord, TransportRecord};
