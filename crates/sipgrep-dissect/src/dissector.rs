use std::sync::atomic::{AtomicU64, Ordering};

use sipgrep_core::Packet;

/// A single layer of the dissector chain.
///
/// `dissect` consumes `bytes`, attaches whatever it decodes to `packet`
/// (keyed by a fixed slot in [`sipgrep_core::ProtocolRecords`] or, for SIP
/// itself, `packet.message`), and returns the residual slice the next
/// dissector should consume. Returning `None` means this layer is terminal
/// for the packet — either it fully consumed the bytes, or the bytes were
/// malformed and the packet should be dropped here.
///
/// Dissector errors are never returned as `Result::Err`: a malformed layer
/// simply yields `None`, exactly like "fully terminal". Counting and
/// debug-logging happen at the call site via [`DissectStats`].
pub trait Dissector {
    /// Name used in stats and log lines, e.g. `"sip"`, `"tcp"`.
    fn name(&self) -> &'static str;

    /// Returns the residual bytes the next dissector should consume.
    /// `Vec<u8>` rather than a borrowed slice because stateful layers
    /// (TCP reassembly in particular) hand forward bytes assembled from an
    /// internal buffer spanning more than one input packet, not a slice of
    /// `bytes` itself.
    fn dissect(&self, packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>>;

    /// Releases any dissector-owned out-of-band state associated with
    /// `packet` (e.g. reassembly buffers keyed by flow). Most dissectors
    /// need no action here since Rust drops `Packet`'s owned fields
    /// automatically; flow-keyed state lives in the chain, not the packet,
    /// and is reclaimed by its own timeout instead of this hook.
    fn free(&self, _packet: &Packet) {}
}

/// Per-protocol accepted/skipped counters, read by the presentation layer
/// for a decode-summary view. Supplements the distilled spec's "counters
/// may be incremented" with a concrete, queryable surface.
#[derive(Debug, Default)]
pub struct DissectStats {
    accepted: AtomicU64,
    skipped: AtomicU64,
}

impl DissectStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
