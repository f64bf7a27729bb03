//! Cross-cutting ingestion scenarios (concrete scenarios from the testable
//! properties list): a call built from several packets in sequence,
//! exercising `Storage::append` the way the capture/worker thread would.

use sipgrep_core::address::Transport;
use sipgrep_core::message::{CSeq, MediaDescriptor, Method, StartLine};
use sipgrep_core::{Address, Message, Packet};
use sipgrep_storage::{CallState, Storage, StorageConfig};

fn packet(call_id: &str, start: StartLine, cseq: u32, ts: u64, xlink: Option<&str>, media: Vec<MediaDescriptor>) -> Packet {
    let mut packet = Packet::new(ts, b"raw-bytes".to_vec());
    packet.push_address(Address::new("203.0.113.10".parse().unwrap(), 5060, Transport::Udp));
    packet.push_address(Address::new("198.51.100.20".parse().unwrap(), 5060, Transport::Udp));
    packet.message = Some(Message {
        timestamp_us: ts,
        start_line: start,
        call_id: call_id.into(),
        from_tag: Some("1".into()),
        to_tag: Some("2".into()),
        from_user: Some("alice".into()),
        to_user: Some("bob".into()),
        cseq: CSeq { number: cseq, method: Method::Invite },
        xlink_call_id: xlink.map(|x| x.into()),
        media,
    });
    packet
}

#[test]
fn attended_transfer_links_both_dialogs_and_carries_sdp() {
    let storage = Storage::new(StorageConfig::default());

    let media = vec![MediaDescriptor {
        media_type: "audio".into(),
        connection_addr: Some("10.0.0.1".parse().unwrap()),
        port: 4000,
        transport: "RTP/AVP".into(),
        formats: vec![(0, Some("PCMU/8000".into())), (8, None)],
        rtcp_port: None,
        mrcp_channel: None,
    }];

    // Dialog B established first.
    storage.append(&packet(
        "B@x",
        StartLine::Request { method: Method::Invite, request_uri: "sip:carol@x".into() },
        1,
        0,
        None,
        Vec::new(),
    ));

    // Dialog A carries SDP and a Replaces reference to B.
    storage.append(&packet(
        "A@x",
        StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() },
        1,
        10,
        Some("B@x"),
        media,
    ));

    assert!(storage.xcalls_of(&"A@x".into()).contains(&"B@x".into()));
    assert!(storage.xcalls_of(&"B@x".into()).contains(&"A@x".into()));

    let call_a = storage.get(&"A@x".into()).unwrap();
    let sdp = &call_a.messages[0].message.media;
    assert_eq!(sdp.len(), 1);
    assert_eq!(sdp[0].media_type, "audio");
    assert_eq!(sdp[0].port, 4000);
    assert_eq!(sdp[0].formats[0].1.as_deref(), Some("PCMU/8000"));

    let group = storage.call_group_from_anchor(&"A@x".into());
    assert_eq!(group.count(), 2);
    assert!(group.contains(&"B@x".into()));
}

#[test]
fn full_call_flow_reaches_send_bye_with_expected_durations() {
    let storage = Storage::new(StorageConfig::default());
    storage.append(&packet("abc@x", StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() }, 1, 0, None, Vec::new()));
    storage.append(&packet("abc@x", StartLine::Response { status_code: 180 }, 1, 5, None, Vec::new()));
    storage.append(&packet("abc@x", StartLine::Response { status_code: 200 }, 1, 10, None, Vec::new()));
    storage.append(&packet("abc@x", StartLine::Request { method: Method::Ack, request_uri: "sip:bob@x".into() }, 1, 12, None, Vec::new()));
    storage.append(&packet("abc@x", StartLine::Request { method: Method::Bye, request_uri: "sip:bob@x".into() }, 2, 50, None, Vec::new()));

    let call = storage.get(&"abc@x".into()).unwrap();
    assert_eq!(call.state, CallState::SendBye);
    assert_eq!(call.msgcnt(), 5);
    assert_eq!(call.convdur_us(), Some(40));
}
