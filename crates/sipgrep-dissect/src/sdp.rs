//! SDP (RFC 4566) parsing, trimmed to the lines storage needs to seed RTP
//! stream expectations: `c=`, `m=`, `a=rtpmap`, `a=rtcp`, `a=channel`.
//! Every other line type is accepted and ignored — SDP is permissive by
//! design and unknown attributes must not abort the parse.

use std::net::IpAddr;

use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, digit1, space1};
use nom::combinator::map_res;
use nom::multi::separated_list1;
use nom::sequence::tuple;
use nom::IResult;

use sipgrep_core::message::MediaDescriptor;

fn parse_connection_addr(value: &str) -> Option<IpAddr> {
    // c=<nettype> <addrtype> <connection-address>
    let mut parts = value.split_whitespace();
    let _nettype = parts.next()?;
    let _addrtype = parts.next()?;
    let addr = parts.next()?;
    // Strip multicast TTL/count suffixes (addr/ttl[/count]).
    let addr = addr.split('/').next()?;
    addr.parse().ok()
}

fn parse_media_line(value: &str) -> IResult<&str, (String, u16, String, Vec<u8>)> {
    // m=<media> <port>[/<count>] <proto> <fmt> [<fmt>]*
    map_res(
        tuple((
            alpha1,
            space1,
            digit1,
            space1,
            nom::branch::alt((tag("RTP/AVP"), tag("RTP/SAVP"), tag("UDP/TLS/RTP/SAVP"), tag("udptl"), tag("TCP"))),
            space1,
            separated_list1(space1, digit1),
        )),
        |(media, _, port, _, proto, _, formats): (&str, &str, &str, &str, &str, &str, Vec<&str>)| {
            let port: u16 = port.parse().map_err(|_| "bad port")?;
            let formats: Result<Vec<u8>, _> = formats.iter().map(|f| f.parse::<u8>()).collect();
            let formats = formats.map_err(|_| "bad format")?;
            Ok::<_, &str>((media.to_string(), port, proto.to_string(), formats))
        },
    )(value)
}

fn parse_rtpmap(value: &str) -> Option<(u8, String)> {
    // a=rtpmap:<payload-type> <encoding>/<clock-rate>[/<params>]
    let (pt, rest) = value.split_once(' ')?;
    let pt: u8 = pt.trim().parse().ok()?;
    Some((pt, rest.trim().to_string()))
}

/// Parses an SDP body into its media descriptors. `c=` sets the session
/// (or, once inside a media block, the per-media) connection address;
/// `m=` opens a new descriptor; `a=rtpmap` fills in the encoding name for
/// a payload-type code already listed on the `m=` line; `a=rtcp` and
/// `a=channel` attach to whichever media block is currently open.
pub fn parse_sdp(body: &str) -> Vec<MediaDescriptor> {
    let mut session_addr: Option<IpAddr> = None;
    let mut media: Vec<MediaDescriptor> = Vec::new();

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let (kind, value) = (line.as_bytes()[0], &line[2..]);
        match kind {
            b'c' => {
                let addr = parse_connection_addr(value);
                if let Some(last) = media.last_mut() {
                    last.connection_addr = addr;
                } else {
                    session_addr = addr;
                }
            }
            b'm' => {
                if let Ok((_, (media_type, port, transport, formats))) = parse_media_line(value) {
                    media.push(MediaDescriptor {
                        media_type,
                        connection_addr: session_addr,
                        port,
                        transport,
                        formats: formats.into_iter().map(|pt| (pt, None)).collect(),
                        rtcp_port: None,
                        mrcp_channel: None,
                    });
                }
            }
            b'a' => {
                if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                    if let Some((pt, name)) = parse_rtpmap(rtpmap) {
                        if let Some(last) = media.last_mut() {
                            if let Some(fmt) = last.formats.iter_mut().find(|(p, _)| *p == pt) {
                                fmt.1 = Some(name);
                            }
                        }
                    }
                } else if let Some(rtcp) = value.strip_prefix("rtcp:") {
                    if let Some(last) = media.last_mut() {
                        last.rtcp_port = rtcp.split_whitespace().next().and_then(|p| p.parse().ok());
                    }
                } else if let Some(channel) = value.strip_prefix("channel:") {
                    if let Some(last) = media.last_mut() {
                        last.mrcp_channel = Some(channel.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    media
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_audio_media_with_rtpmap() {
        let body = "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 4000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\n";
        let media = parse_sdp(body);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].media_type, "audio");
        assert_eq!(media[0].port, 4000);
        assert_eq!(media[0].connection_addr, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(media[0].formats, vec![(0, Some("PCMU/8000".to_string())), (8, None)]);
    }

    #[test]
    fn per_media_connection_overrides_session() {
        let body = "v=0\r\nc=IN IP4 10.0.0.1\r\nm=audio 4000 RTP/AVP 0\r\nc=IN IP4 10.0.0.9\r\na=rtcp:4001\r\n";
        let media = parse_sdp(body);
        assert_eq!(media[0].connection_addr, Some("10.0.0.9".parse().unwrap()));
        assert_eq!(media[0].rtcp_port, Some(4001));
    }

    #[test]
    fn unknown_payload_code_defaults_to_id_only() {
        let body = "m=audio 4000 RTP/AVP 101\r\n";
        let media = parse_sdp(body);
        assert_eq!(media[0].formats, vec![(101, None)]);
    }
}
