//! SIP message framing and parsing (RFC 3261 §7, trimmed to what storage
//! needs to key and state-machine a call: start line, Call-ID, From/To
//! tags, CSeq, and a Content-Type hand-off to the SDP dissector).

use nom::bytes::complete::{tag, take_until};
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{map, map_res, opt};
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use sipgrep_core::message::{CSeq, CallId, Message, Method, StartLine};
use sipgrep_core::Packet;

use crate::dissector::Dissector;

const CRLFCRLF: &[u8] = b"\r\n\r\n";

/// Returns the length, in bytes, of the first complete SIP message at the
/// front of `buf`, or `None` if more data is needed.
///
/// Content-Length is honored when present; otherwise the message is
/// assumed to end at the header/body separator (no body), per §4.1.
pub fn framed_message_len(buf: &[u8]) -> Option<usize> {
    let header_end = find_subslice(buf, CRLFCRLF)? + CRLFCRLF.len();
    let header_block = std::str::from_utf8(&buf[..header_end]).ok()?;
    let content_length = header_block
        .lines()
        .find_map(|line| parse_content_length_line(line));

    match content_length {
        Some(len) => {
            let total = header_end + len;
            if buf.len() >= total {
                Some(total)
            } else {
                None
            }
        }
        None => Some(header_end),
    }
}

fn parse_content_length_line(line: &str) -> Option<usize> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("l") {
        value.trim().parse::<usize>().ok()
    } else {
        None
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_request_line(input: &str) -> IResult<&str, (Method, String)> {
    map(
        tuple((
            terminated(take_until(" "), space1),
            terminated(take_until(" "), space1),
            preceded(tag("SIP/"), digit1),
        )),
        |(method, uri, _version): (&str, &str, &str)| (Method::parse(method), uri.to_string()),
    )(input)
}

fn parse_status_line(input: &str) -> IResult<&str, u16> {
    map_res(
        preceded(
            tuple((tag("SIP/"), digit1, char('.'), digit1, space1)),
            terminated(digit1, space0),
        ),
        |code: &str| code.parse::<u16>(),
    )(input)
}

fn parse_start_line(line: &str) -> Option<StartLine> {
    if let Ok((_, code)) = parse_status_line(line) {
        return Some(StartLine::Response { status_code: code });
    }
    if let Ok((_, (method, uri))) = parse_request_line(line) {
        return Some(StartLine::Request { method, request_uri: uri });
    }
    None
}

fn header_value<'a>(headers: &'a [(&str, &str)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

fn split_headers(block: &str) -> Vec<(&str, &str)> {
    block
        .lines()
        .skip(1) // start line
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim(), v.trim()))
        .collect()
}

/// Extracts `tag=...` from a From/To header value, if present.
fn extract_tag(value: &str) -> Option<String> {
    value.split(';').find_map(|param| {
        let param = param.trim();
        param.strip_prefix("tag=").map(|t| t.trim().to_string())
    })
}

/// Extracts the user part of a `sip:`/`sips:` URI embedded in a From/To
/// header value (`"Alice" <sip:alice@atlanta.com>;tag=..."` → `"alice"`).
fn extract_uri_user(value: &str) -> Option<String> {
    let scheme_at = value.find("sip:").or_else(|| value.find("sips:"))?;
    let after_scheme = &value[scheme_at..];
    let uri_start = after_scheme.find(':')? + 1;
    let uri = &after_scheme[uri_start..];
    let uri = uri.split(|c| c == '>' || c == ';' || c == ' ').next().unwrap_or(uri);
    let user = uri.split('@').next()?;
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

fn parse_cseq(value: &str) -> Option<CSeq> {
    let mut parts = value.split_whitespace();
    let number = parts.next()?.parse::<u32>().ok()?;
    let method = Method::parse(parts.next()?);
    Some(CSeq { number, method })
}

/// Parses a Replaces or Refer-To header value for a cross-linked Call-ID.
/// `Replaces: <call-id>;to-tag=...;from-tag=...` and a `Refer-To` carrying
/// a `Replaces=` URI parameter are both handled, covering the attended
/// transfer scenario (§8 concrete scenario 3).
fn extract_xlink_call_id(headers: &[(&str, &str)]) -> Option<CallId> {
    if let Some(replaces) = header_value(headers, "Replaces") {
        let call_id = replaces.split(';').next()?.trim();
        if !call_id.is_empty() {
            return Some(CallId::from(call_id));
        }
    }
    if let Some(refer_to) = header_value(headers, "Refer-To") {
        if let Some(idx) = refer_to.find("Replaces=") {
            let rest = &refer_to[idx + "Replaces=".len()..];
            let encoded = rest.split(['&', '>']).next().unwrap_or(rest);
            let decoded = encoded.replace("%3B", ";").replace("%3D", "=");
            let call_id = decoded.split(';').next()?.trim();
            if !call_id.is_empty() {
                return Some(CallId::from(call_id));
            }
        }
    }
    None
}

/// Parses a complete, already-framed SIP message (headers + optional body).
pub fn parse_message(timestamp_us: u64, bytes: &[u8]) -> Option<Message> {
    let text = std::str::from_utf8(bytes).ok()?;
    let header_end = text.find("\r\n\r\n").map(|i| i + 4).unwrap_or(text.len());
    let header_block = &text[..header_end];
    let body = &text[header_end.min(text.len())..];

    let start_line = parse_start_line(header_block.lines().next()?)?;
    let headers = split_headers(header_block);

    let call_id = header_value(&headers, "Call-ID")
        .or_else(|| header_value(&headers, "i"))
        .map(CallId::from)?;
    let from = header_value(&headers, "From").or_else(|| header_value(&headers, "f"))?;
    let to = header_value(&headers, "To").or_else(|| header_value(&headers, "t"))?;
    let cseq = header_value(&headers, "CSeq").and_then(parse_cseq).or_else(|| {
        // Responses to a request we never saw can still carry CSeq; if it's
        // entirely absent, fall back to the start line's own method.
        start_line.method().map(|m| CSeq { number: 0, method: m })
    })?;

    let media = if let Some(content_type) = header_value(&headers, "Content-Type") {
        if content_type.to_ascii_lowercase().starts_with("application/sdp") && !body.is_empty() {
            crate::sdp::parse_sdp(body)
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };

    Some(Message {
        timestamp_us,
        start_line,
        call_id,
        from_tag: extract_tag(from),
        to_tag: extract_tag(to),
        from_user: extract_uri_user(from),
        to_user: extract_uri_user(to),
        cseq,
        xlink_call_id: extract_xlink_call_id(&headers),
        media,
    })
}

/// Parses start-line + headers + body and, when `Content-Type` indicates
/// SDP, hands the body to the SDP dissector. Malformed SIP is dropped
/// silently; the chain never sees a partial/garbage `Message`.
pub struct SipDissector;

impl Dissector for SipDissector {
    fn name(&self) -> &'static str {
        "sip"
    }

    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        let message = parse_message(packet.timestamp_us, bytes)?;
        packet.message = Some(message);
        None
    }
}
