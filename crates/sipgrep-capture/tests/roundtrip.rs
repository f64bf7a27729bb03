//! Writing decoded packets to a capture file and reading that file back
//! through the same dissector chain must reproduce the same call table:
//! the pcap sink is a lossless record of what was seen on ingest.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use sipgrep_capture::input::CapturedFrame;
use sipgrep_capture::{CaptureInput, CaptureOutput, FileOutput, OfflineInput};
use sipgrep_dissect::chain::LinkType;
use sipgrep_dissect::DissectorChain;
use sipgrep_storage::{CallState, Storage, StorageConfig};

const IP_PROTO_UDP: u8 = 17;

fn udp_in_ipv4_eth(payload: &[u8], src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut udp = Vec::new();
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    udp.extend_from_slice(&0u16.to_be_bytes());
    udp.extend_from_slice(payload);

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&((20 + udp.len()) as u16).to_be_bytes());
    ip[9] = IP_PROTO_UDP;
    ip[12..16].copy_from_slice(&[203, 0, 113, 10]);
    ip[16..20].copy_from_slice(&[198, 51, 100, 20]);
    ip.extend_from_slice(&udp);

    let mut eth = vec![0u8; 14];
    eth[12] = 0x08;
    eth[13] = 0x00;
    eth.extend_from_slice(&ip);
    eth
}

fn temp_pcap_path(name: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("sipgrep-roundtrip-{name}-{}.pcap", std::process::id()));
    path
}

#[test]
fn file_output_then_offline_input_reproduces_the_same_call() {
    let invite = b"INVITE sip:bob@biloxi.com SIP/2.0\r\nCall-ID: roundtrip@x\r\nFrom: <sip:alice@x>;tag=1\r\nTo: <sip:bob@x>\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
    let frame = udp_in_ipv4_eth(invite, 5060, 5060);

    let chain = DissectorChain::new();
    let original = chain.process(LinkType::Ethernet, 1_000, frame);
    assert!(original.message.is_some(), "fixture frame must decode as SIP");

    let path = temp_pcap_path("basic");
    {
        let mut sink = FileOutput::create(path.clone()).expect("create pcap file");
        sink.write(&original).expect("write packet to pcap file");
    }

    let (tx, rx) = mpsc::channel::<CapturedFrame>();
    let mut input = OfflineInput::new(path.clone());
    input.start(tx).expect("reopen pcap file for reading");

    let frame = rx.recv_timeout(Duration::from_secs(5)).expect("offline input yields the written frame");
    let CapturedFrame::Link { link_type, timestamp_us, bytes } = frame else {
        panic!("file-backed input always yields Link frames");
    };

    let replayed_chain = DissectorChain::new();
    let replayed = replayed_chain.process(link_type, timestamp_us, bytes);

    let storage = Storage::new(StorageConfig::default());
    storage.append(&original);
    let original_calls = storage.displayed_calls();

    let replayed_storage = Storage::new(StorageConfig::default());
    replayed_storage.append(&replayed);
    let replayed_calls = replayed_storage.displayed_calls();

    assert_eq!(original_calls.len(), 1);
    assert_eq!(replayed_calls.len(), 1);
    assert_eq!(original_calls[0].call_id, replayed_calls[0].call_id);
    assert_eq!(original_calls[0].state, CallState::Calling);
    assert_eq!(replayed_calls[0].state, CallState::Calling);
    assert_eq!(original_calls[0].source_user(), replayed_calls[0].source_user());
    assert_eq!(original_calls[0].destination_user(), replayed_calls[0].destination_user());

    let _ = std::fs::remove_file(&path);
}
