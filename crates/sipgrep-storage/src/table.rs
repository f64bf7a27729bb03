//! The call table (§4.5): keyed storage of `Call`s, an insertion-ordered
//! presentation list, the pending cross-link table for forward-referenced
//! Call-IDs, and the `append()` ingestion algorithm.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sipgrep_core::message::CallId;
use sipgrep_core::Packet;
use tracing::{debug, warn};

use crate::call::{Call, CallState, StoredMessage};
use crate::config::StorageConfig;
use crate::filter::FilterCache;
use crate::group::CallGroup;

/// Snapshot of store-wide counters (§3 DATA MODEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total: u64,
    pub retained: u64,
    pub displayed: u64,
    pub memory_bytes: u64,
    pub memory_limit: u64,
}

/// Sortable call attribute, §4.5 "Sort. Configurable (attr, asc|desc)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortAttr {
    FirstTimestamp,
    SourceUser,
    DestinationUser,
    State,
    Method,
    MsgCount,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Num(u64),
    Text(String),
}

fn sort_key(call: &Call, attr: SortAttr) -> SortKey {
    match attr {
        SortAttr::FirstTimestamp => SortKey::Num(call.first_timestamp_us),
        SortAttr::SourceUser => SortKey::Text(call.source_user().unwrap_or("").to_string()),
        SortAttr::DestinationUser => SortKey::Text(call.destination_user().unwrap_or("").to_string()),
        SortAttr::State => SortKey::Text(call.state.as_str().to_string()),
        SortAttr::Method => SortKey::Text(call.method().map(|m| m.as_str().to_string()).unwrap_or_default()),
        SortAttr::MsgCount => SortKey::Num(call.msgcnt() as u64),
    }
}

struct CallTable {
    calls: HashMap<CallId, Call>,
    /// Insertion order, re-sorted in place whenever the sort key changes;
    /// subsequent single-call insertions use binary insertion against it.
    order: Vec<CallId>,
    pending_xlinks: HashMap<CallId, Vec<CallId>>,
    /// (address, port) -> owning Call-ID, populated from SDP `m=`/`c=`
    /// lines so a later RTP/RTCP classifier can attribute a stream to a
    /// call; storage itself never ingests RTP packets (§4.5 step 1: no SIP
    /// record, drop), so nothing else in this crate reads the index yet.
    rtp_streams: HashMap<(IpAddr, u16), CallId>,
    total_ever_seen: u64,
    sort: Option<(SortAttr, bool)>,
}

impl CallTable {
    fn new() -> Self {
        CallTable {
            calls: HashMap::new(),
            order: Vec::new(),
            pending_xlinks: HashMap::new(),
            rtp_streams: HashMap::new(),
            total_ever_seen: 0,
            sort: None,
        }
    }

    fn insert_ordered(&mut self, call_id: CallId) {
        match self.sort {
            None => self.order.push(call_id),
            Some((attr, ascending)) => {
                let key = sort_key(&self.calls[&call_id], attr);
                let pos = self.order.partition_point(|existing| {
                    let existing_key = sort_key(&self.calls[existing], attr);
                    if ascending {
                        existing_key <= key
                    } else {
                        existing_key >= key
                    }
                });
                self.order.insert(pos, call_id);
            }
        }
    }

    fn resort(&mut self, attr: SortAttr, ascending: bool) {
        self.sort = Some((attr, ascending));
        let calls = &self.calls;
        self.order.sort_by(|a, b| {
            let ka = sort_key(&calls[a], attr);
            let kb = sort_key(&calls[b], attr);
            if ascending {
                ka.cmp(&kb)
            } else {
                kb.cmp(&ka)
            }
        });
    }

    /// Evicts oldest-terminal calls first until both the memory cap
    /// (`memory_limit` bytes, 0 = unbounded) and the call-count cap
    /// (`capture_limit` calls, 0 = unbounded) are satisfied. The two caps
    /// share one oldest-terminal-first pass rather than two separate
    /// loops, since evicting for one cap also helps satisfy the other.
    fn evict_terminal_until_under(&mut self, memory_limit: u64, capture_limit: u64) {
        let mut memory: u64 = self.calls.values().map(|c| c.approx_size() as u64).sum();
        let mut retained: u64 = self.calls.len() as u64;
        let over_memory = |m: u64| memory_limit != 0 && m > memory_limit;
        let over_capture = |r: u64| capture_limit != 0 && r > capture_limit;
        if !over_memory(memory) && !over_capture(retained) {
            return;
        }

        let mut terminal_by_age: Vec<CallId> = self
            .calls
            .values()
            .filter(|c| c.state.is_terminal())
            .map(|c| c.call_id.clone())
            .collect();
        terminal_by_age.sort_by_key(|id| self.calls[id].first_timestamp_us);

        for call_id in terminal_by_age {
            if !over_memory(memory) && !over_capture(retained) {
                break;
            }
            if let Some(call) = self.calls.remove(&call_id) {
                memory = memory.saturating_sub(call.approx_size() as u64);
                retained -= 1;
                self.order.retain(|id| id != &call_id);
                for peer in &call.xcalls {
                    if let Some(peer_call) = self.calls.get_mut(peer) {
                        peer_call.xcalls.remove(&call_id);
                    }
                }
                debug!(call_id = %call_id, "evicted terminal call to respect storage cap");
            }
        }

        if over_memory(memory) || over_capture(retained) {
            warn!(memory, memory_limit, retained, capture_limit, "resource exhausted: no terminal calls left to evict");
        }
    }
}

/// Owns the call table behind a single mutex (§5): the capture/worker
/// thread appends through `append()`, the presentation thread reads
/// through the snapshot methods below.
pub struct Storage {
    config: StorageConfig,
    table: Mutex<CallTable>,
    generation: AtomicU64,
    paused: AtomicBool,
    filter_cache: FilterCache,
    active_filter: Mutex<String>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Storage {
            config,
            table: Mutex::new(CallTable::new()),
            generation: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            filter_cache: FilterCache::new(),
            active_filter: Mutex::new(String::new()),
        }
    }

    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn toggle_pause(&self) -> bool {
        let was = self.paused.fetch_xor(true, Ordering::SeqCst);
        !was
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn calls_changed(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The sole ingestion entry point (§4.5 `append(packet)`), steps 1-7.
    pub fn append(&self, packet: &Packet) {
        // Step 1: drop if paused or no SIP record.
        if self.is_paused() {
            return;
        }
        let Some(message) = packet.message.clone() else {
            return;
        };

        if !self.config.filter_methods.is_empty() {
            let method = message.method().as_str();
            if !self.config.filter_methods.iter().any(|m| m == method) {
                return;
            }
        }
        if let Some(pattern) = &self.config.filter_payload {
            if let Ok(re) = regex::Regex::new(pattern) {
                let text = String::from_utf8_lossy(&packet.raw);
                if !re.is_match(&text) {
                    return;
                }
            }
        }

        let mut table = self.table.lock().unwrap();

        // Step 2: resolve Call-ID; look up or create Call.
        let call_id = message.call_id.clone();
        let is_new_call = !table.calls.contains_key(&call_id);
        if is_new_call {
            if self.config.match_invite && !matches!(message.start_line, sipgrep_core::message::StartLine::Request { method: sipgrep_core::message::Method::Invite, .. }) {
                return;
            }
            table.calls.insert(call_id.clone(), Call::new(call_id.clone()));
            table.total_ever_seen += 1;
        }

        // Step 3: create Message; append; update timestamps and state.
        let stored = StoredMessage {
            approx_size: packet.raw.len() + std::mem::size_of::<sipgrep_core::Message>(),
            src: packet.src().copied(),
            dst: packet.dst().copied(),
            message: message.clone(),
        };
        {
            let call = table.calls.get_mut(&call_id).expect("call created above");
            call.push(stored);
        }
        if is_new_call {
            table.insert_ordered(call_id.clone());
        }

        // Step 4: SDP media -> register RTP-stream expectations.
        for media in &message.media {
            if let Some(addr) = media.connection_addr {
                table.rtp_streams.insert((addr, media.port), call_id.clone());
            }
        }

        // Step 5: cross-link xcalls, parking forward references.
        if let Some(peer_id) = message.xlink_call_id.clone() {
            if table.calls.contains_key(&peer_id) {
                table.calls.get_mut(&call_id).unwrap().xcalls.insert(peer_id.clone());
                table.calls.get_mut(&peer_id).unwrap().xcalls.insert(call_id.clone());
            } else {
                table.pending_xlinks.entry(peer_id).or_default().push(call_id.clone());
            }
        }
        if is_new_call {
            if let Some(referrers) = table.pending_xlinks.remove(&call_id) {
                for referrer_id in referrers {
                    if table.calls.contains_key(&referrer_id) {
                        table.calls.get_mut(&call_id).unwrap().xcalls.insert(referrer_id.clone());
                        table.calls.get_mut(&referrer_id).unwrap().xcalls.insert(call_id.clone());
                    }
                }
            }
        }

        // Step 6: memory-cap / call-count-cap eviction.
        table.evict_terminal_until_under(self.config.memory_limit, self.config.capture_limit);

        drop(table);
        // Step 7: bump the generation counter.
        self.bump_generation();
    }

    pub fn set_sort(&self, attr: SortAttr, ascending: bool) {
        let mut table = self.table.lock().unwrap();
        table.resort(attr, ascending);
        self.bump_generation();
    }

    pub fn set_filter(&self, source: &str) {
        *self.active_filter.lock().unwrap() = source.to_string();
        self.filter_cache.compiled(source); // warm the cache
        self.bump_generation();
    }

    pub fn get(&self, call_id: &CallId) -> Option<Call> {
        self.table.lock().unwrap().calls.get(call_id).cloned()
    }

    pub fn xcalls_of(&self, call_id: &CallId) -> HashSet<CallId> {
        self.table.lock().unwrap().calls.get(call_id).map(|c| c.xcalls.clone()).unwrap_or_default()
    }

    /// Calls currently satisfying the active display filter, in
    /// presentation order (§4.5: "displayed iff at least one of its
    /// messages satisfies the post-dissector predicates" — evaluated here
    /// against the call's computed attributes, which derive from its
    /// messages).
    pub fn displayed_calls(&self) -> Vec<Call> {
        let filter_source = self.active_filter.lock().unwrap().clone();
        let predicate = self.filter_cache.compiled(&filter_source);
        let table = self.table.lock().unwrap();
        table
            .order
            .iter()
            .filter_map(|id| table.calls.get(id))
            .filter(|call| predicate.eval(call))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> StorageStats {
        let table = self.table.lock().unwrap();
        let filter_source = self.active_filter.lock().unwrap().clone();
        let predicate = self.filter_cache.compiled(&filter_source);
        let memory_bytes: u64 = table.calls.values().map(|c| c.approx_size() as u64).sum();
        let displayed = table.calls.values().filter(|c| predicate.eval(c)).count() as u64;
        StorageStats {
            total: table.total_ever_seen,
            retained: table.calls.len() as u64,
            displayed,
            memory_bytes,
            memory_limit: self.config.memory_limit,
        }
    }

    /// Removes calls not in the current displayed set.
    pub fn soft_clear(&self) {
        let filter_source = self.active_filter.lock().unwrap().clone();
        let predicate = self.filter_cache.compiled(&filter_source);
        let mut table = self.table.lock().unwrap();
        let keep: HashSet<CallId> = table
            .calls
            .iter()
            .filter(|(_, call)| predicate.eval(call))
            .map(|(id, _)| id.clone())
            .collect();
        table.calls.retain(|id, _| keep.contains(id));
        table.order.retain(|id| keep.contains(id));
        drop(table);
        self.bump_generation();
    }

    /// Removes every call.
    pub fn hard_clear(&self) {
        let mut table = self.table.lock().unwrap();
        table.calls.clear();
        table.order.clear();
        table.pending_xlinks.clear();
        table.rtp_streams.clear();
        drop(table);
        self.bump_generation();
    }

    pub fn call_group_from_anchor(&self, anchor: &CallId) -> CallGroup {
        let table = self.table.lock().unwrap();
        let mut group = CallGroup::with_anchor(anchor.clone());
        if let Some(call) = table.calls.get(anchor) {
            group.add_calls(call.xcalls.iter().cloned());
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipgrep_core::address::Transport;
    use sipgrep_core::message::{CSeq, Method, StartLine};
    use sipgrep_core::{Address, Message};

    fn sip_packet(call_id: &str, start: StartLine, cseq: u32, ts: u64, xlink: Option<&str>) -> Packet {
        let mut packet = Packet::new(ts, b"raw".to_vec());
        packet.push_address(Address::new("10.0.0.1".parse().unwrap(), 5060, Transport::Udp));
        packet.push_address(Address::new("10.0.0.2".parse().unwrap(), 5060, Transport::Udp));
        packet.message = Some(Message {
            timestamp_us: ts,
            start_line: start,
            call_id: call_id.into(),
            from_tag: Some("1".into()),
            to_tag: None,
            from_user: Some("alice".into()),
            to_user: Some("bob".into()),
            cseq: CSeq { number: cseq, method: Method::Invite },
            xlink_call_id: xlink.map(|x| x.into()),
            media: Vec::new(),
        });
        packet
    }

    #[test]
    fn append_creates_one_call_and_progresses_state() {
        let storage = Storage::new(StorageConfig::default());
        storage.append(&sip_packet("abc@x", StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() }, 1, 0, None));
        storage.append(&sip_packet("abc@x", StartLine::Response { status_code: 200 }, 1, 10, None));
        storage.append(&sip_packet("abc@x", StartLine::Request { method: Method::Bye, request_uri: "sip:bob@x".into() }, 2, 20, None));

        let stats = storage.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.retained, 1);
        let call = storage.get(&"abc@x".into()).unwrap();
        assert_eq!(call.msgcnt(), 3);
    }

    #[test]
    fn paused_storage_drops_ingress() {
        let storage = Storage::new(StorageConfig::default());
        storage.pause(true);
        storage.append(&sip_packet("abc@x", StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() }, 1, 0, None));
        assert_eq!(storage.stats().total, 0);
        storage.pause(false);
        storage.append(&sip_packet("abc@x", StartLine::Request { method: Method::Invite, request_uri: "sip:bob@x".into() }, 1, 0, None));
        assert_eq!(storage.stats().total, 1);
    }

    #[test]
    fn xcalls_are_linked_symmetrically_even_when_peer_arrives_first() {
        let storage = Storage::new(StorageConfig::default());
        // A references B via xlink before B exists: parked, then flushed.
        storage.append(&sip_packet("A", StartLine::Request { method: Method::Invite, request_uri: "sip:x".into() }, 1, 0, Some("B")));
        assert!(storage.xcalls_of(&"A".into()).is_empty());
        storage.append(&sip_packet("B", StartLine::Request { method: Method::Invite, request_uri: "sip:x".into() }, 1, 0, None));

        assert!(storage.xcalls_of(&"A".into()).contains(&"B".into()));
        assert!(storage.xcalls_of(&"B".into()).contains(&"A".into()));
    }

    #[test]
    fn memory_cap_evicts_oldest_terminal_calls_first() {
        let mut config = StorageConfig::default();
        config.memory_limit = 1;
        let storage = Storage::new(config);
        for i in 0..5 {
            let id = format!("call{i}@x");
            storage.append(&sip_packet(&id, StartLine::Request { method: Method::Invite, request_uri: "sip:x".into() }, 1, i, None));
            storage.append(&sip_packet(&id, StartLine::Request { method: Method::Bye, request_uri: "sip:x".into() }, 2, i + 1, None));
        }
        let stats = storage.stats();
        assert_eq!(stats.total, 5);
        assert!(stats.retained < 5);
    }

    #[test]
    fn capture_limit_evicts_oldest_terminal_calls_to_stay_at_or_under_cap() {
        let mut config = StorageConfig::default();
        config.capture_limit = 2;
        let storage = Storage::new(config);
        for i in 0..5 {
            let id = format!("call{i}@x");
            storage.append(&sip_packet(&id, StartLine::Request { method: Method::Invite, request_uri: "sip:x".into() }, 1, i, None));
            storage.append(&sip_packet(&id, StartLine::Request { method: Method::Bye, request_uri: "sip:x".into() }, 2, i + 1, None));
        }
        let stats = storage.stats();
        assert_eq!(stats.total, 5);
        assert!(stats.retained <= 2, "retained {} exceeds capture_limit", stats.retained);
    }

    #[test]
    fn idempotent_re_feed_of_unique_call_ids() {
        let packets: Vec<Packet> = (0..5)
            .map(|i| {
                let id = format!("call{i}@x");
                sip_packet(&id, StartLine::Request { method: Method::Invite, request_uri: "sip:x".into() }, 1, i, None)
            })
            .collect();

        let once = Storage::new(StorageConfig::default());
        for p in &packets {
            once.append(p);
        }
        let twice = Storage::new(StorageConfig::default());
        for p in packets.iter().chain(packets.iter()) {
            twice.append(p);
        }
        // Re-feeding duplicates every message once more doubles msgcnt per
        // call but not the call count, since Call-IDs are unique per dialog.
        assert_eq!(once.stats().retained, twice.stats().retained);
        assert_eq!(once.stats().total, twice.stats().total);
    }
}
