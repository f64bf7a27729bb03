use std::fmt;

use serde::{Deserialize, Serialize};

/// SIP Call-ID header value; the key that groups [`Message`]s into a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId(s)
    }
}

/// SIP request method or response-class method echo (from CSeq).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Refer,
    Notify,
    Subscribe,
    Update,
    Prack,
    Message,
    Other,
}

impl Method {
    pub fn parse(s: &str) -> Method {
        match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            "REFER" => Method::Refer,
            "NOTIFY" => Method::Notify,
            "SUBSCRIBE" => Method::Subscribe,
            "UPDATE" => Method::Update,
            "PRACK" => Method::Prack,
            "MESSAGE" => Method::Message,
            _ => Method::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Refer => "REFER",
            Method::Notify => "NOTIFY",
            Method::Subscribe => "SUBSCRIBE",
            Method::Update => "UPDATE",
            Method::Prack => "PRACK",
            Method::Message => "MESSAGE",
            Method::Other => "OTHER",
        }
    }
}

/// `CSeq` header: a sequence number paired with the method it orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub number: u32,
    pub method: Method,
}

/// Either a request's method+target, or a response's status code, as
/// carried on the SIP start line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartLine {
    Request { method: Method, request_uri: String },
    Response { status_code: u16 },
}

impl StartLine {
    pub fn method(&self) -> Option<Method> {
        match self {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            StartLine::Request { .. } => None,
            StartLine::Response { status_code } => Some(*status_code),
        }
    }
}

/// One SDP media stream as attached to an [`Message`] from its body.
/// The source/destination address pair is filled once the `c=`/`m=` lines
/// are resolved; it seeds the RTP-stream expectation storage registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub media_type: String,
    pub connection_addr: Option<std::net::IpAddr>,
    pub port: u16,
    pub transport: String,
    /// (payload-type, encoding-name) pairs; encoding name is `None` until
    /// an `a=rtpmap` line fills it in, so later RTP frames still match on
    /// payload-type alone.
    pub formats: Vec<(u8, Option<String>)>,
    pub rtcp_port: Option<u16>,
    pub mrcp_channel: Option<String>,
}

/// A successfully parsed SIP request or response.
///
/// Retained for the lifetime of its owning [`crate::CallId`]'s call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub timestamp_us: u64,
    pub start_line: StartLine,
    pub call_id: CallId,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    /// User part of the From URI (`sip:alice@atlanta.com` → `alice`), when present.
    pub from_user: Option<String>,
    /// User part of the To URI, when present.
    pub to_user: Option<String>,
    pub cseq: CSeq,
    /// Other Call-ID referenced via Replaces / Refer-To, if any.
    pub xlink_call_id: Option<CallId>,
    pub media: Vec<MediaDescriptor>,
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn method(&self) -> Method {
        self.start_line.method().unwrap_or(self.cseq.method)
    }
}
