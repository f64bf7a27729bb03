//! Call group (§4.7): a thin, presentation-owned aggregation of Call-IDs.
//! Never outlives the Calls it references — it stores identifiers, not
//! borrowed Calls, so the presentation layer resolves them through
//! `Storage` at render time.

use std::collections::HashSet;

use sipgrep_core::message::CallId;

#[derive(Debug, Clone, Default)]
pub struct CallGroup {
    members: Vec<CallId>,
    seen: HashSet<CallId>,
    anchor: Option<CallId>,
}

impl CallGroup {
    pub fn new() -> Self {
        CallGroup::default()
    }

    pub fn with_anchor(anchor: CallId) -> Self {
        let mut group = CallGroup::new();
        group.add(anchor.clone());
        group.anchor = Some(anchor);
        group
    }

    pub fn anchor(&self) -> Option<&CallId> {
        self.anchor.as_ref()
    }

    pub fn add(&mut self, call_id: CallId) -> bool {
        if self.seen.insert(call_id.clone()) {
            self.members.push(call_id);
            true
        } else {
            false
        }
    }

    pub fn add_calls<I: IntoIterator<Item = CallId>>(&mut self, calls: I) {
        for call_id in calls {
            self.add(call_id);
        }
    }

    pub fn remove(&mut self, call_id: &CallId) -> bool {
        if self.seen.remove(call_id) {
            self.members.retain(|c| c != call_id);
            if self.anchor.as_ref() == Some(call_id) {
                self.anchor = None;
            }
            true
        } else {
            false
        }
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.seen.contains(call_id)
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallId> {
        self.members.iter()
    }
}
