//! Property tests for the two invariants in SPEC_FULL §8 that no
//! example-based test covers: per-call timestamp monotonicity and
//! `displayed <= retained <= total`. Both are checked against an
//! independent oracle built alongside `Storage` from the same op stream,
//! over arbitrary call/method/timestamp combinations `proptest` generates.

use std::collections::HashMap;

use proptest::prelude::*;
use sipgrep_core::address::Transport;
use sipgrep_core::message::{CSeq, Method, StartLine};
use sipgrep_core::{Address, Message, Packet};
use sipgrep_storage::{Storage, StorageConfig};

#[derive(Debug, Clone, Copy)]
enum Op {
    Invite,
    Provisional,
    Ok,
    Bye,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Invite),
        Just(Op::Provisional),
        Just(Op::Ok),
        Just(Op::Bye),
    ]
}

fn packet_for(call_id: &str, op: Op, cseq: u32, ts: u64) -> Packet {
    let start_line = match op {
        Op::Invite => StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() },
        Op::Bye => StartLine::Request { method: Method::Bye, request_uri: "sip:bob@x".into() },
        Op::Provisional => StartLine::Response { status_code: 180 },
        Op::Ok => StartLine::Response { status_code: 200 },
    };
    let mut packet = Packet::new(ts, b"raw".to_vec());
    packet.push_address(Address::new("10.0.0.1".parse().unwrap(), 5060, Transport::Udp));
    packet.push_address(Address::new("10.0.0.2".parse().unwrap(), 5060, Transport::Udp));
    packet.message = Some(Message {
        timestamp_us: ts,
        start_line,
        call_id: call_id.into(),
        from_tag: Some("1".into()),
        to_tag: Some("2".into()),
        from_user: Some("alice".into()),
        to_user: Some("bob".into()),
        cseq: CSeq { number: cseq, method: Method::Invite },
        xlink_call_id: None,
        media: Vec::new(),
    });
    packet
}

proptest! {
    /// A call's first/last timestamp, as reported by `Storage`, always
    /// match the min/max of the timestamps actually fed for that call-id —
    /// regardless of how many other calls interleave, or whether this
    /// call's own timestamps arrive out of order.
    #[test]
    fn per_call_timestamps_match_an_independent_oracle(
        ops in prop::collection::vec((0u8..4, op_strategy(), 0u64..10_000), 0..200)
    ) {
        let storage = Storage::new(StorageConfig::default());
        let mut oracle: HashMap<String, (u64, u64)> = HashMap::new();

        for (call_idx, op, ts) in ops {
            let call_id = format!("call{call_idx}@x");
            storage.append(&packet_for(&call_id, op, 1, ts));
            oracle
                .entry(call_id)
                .and_modify(|(first, last)| *last = (*last).max(ts))
                .or_insert((ts, ts));
        }

        for (call_id, (expected_first, expected_last)) in &oracle {
            // Already-evicted calls (none here: unbounded config) would be
            // the one legitimate reason `get` returns `None`.
            if let Some(call) = storage.get(&call_id.as_str().into()) {
                prop_assert_eq!(call.first_timestamp_us, *expected_first);
                prop_assert_eq!(call.last_timestamp_us, *expected_last);
                prop_assert!(call.first_timestamp_us <= call.last_timestamp_us);
            }
        }
    }

    /// `displayed <= retained <= total` holds after any sequence of
    /// appends, independent of the memory/capture caps or which calls were
    /// actually evicted.
    #[test]
    fn displayed_le_retained_le_total(
        ops in prop::collection::vec((0u8..6, op_strategy(), 0u64..10_000), 0..200),
        memory_limit in prop::sample::select(vec![0u64, 256, 1024]),
        capture_limit in prop::sample::select(vec![0u64, 1, 3]),
    ) {
        let mut config = StorageConfig::default();
        config.memory_limit = memory_limit;
        config.capture_limit = capture_limit;
        let storage = Storage::new(config);

        for (call_idx, op, ts) in ops {
            let call_id = format!("call{call_idx}@x");
            storage.append(&packet_for(&call_id, op, 1, ts));
        }

        let stats = storage.stats();
        prop_assert!(stats.displayed <= stats.retained);
        prop_assert!(stats.retained <= stats.total);
    }
}
