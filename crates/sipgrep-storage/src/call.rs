//! A `Call` is the set of [`Message`]s sharing a Call-ID, plus the derived
//! state the distilled spec's §4.5 state machine and computed-attribute
//! list describe.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sipgrep_core::message::{CallId, Method, StartLine};
use sipgrep_core::{Address, Message};

/// Call state, §4.5. `is_terminal` drives both eviction order and the
/// filter engine's "completed calls" predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Calling,
    Incoming,
    Outgoing,
    InCall,
    Completed,
    Cancelled,
    Rejected,
    BusyLine,
    Diverted,
    RecvBye,
    SendBye,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed
                | CallState::Cancelled
                | CallState::Rejected
                | CallState::BusyLine
                | CallState::Diverted
                | CallState::RecvBye
                | CallState::SendBye
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Calling => "CALL SETUP",
            CallState::Incoming => "INCOMING",
            CallState::Outgoing => "OUTGOING",
            CallState::InCall => "IN CALL",
            CallState::Completed => "COMPLETED",
            CallState::Cancelled => "CANCELLED",
            CallState::Rejected => "REJECTED",
            CallState::BusyLine => "BUSY",
            CallState::Diverted => "DIVERTED",
            CallState::RecvBye => "RECV-BYE",
            CallState::SendBye => "SEND-BYE",
        }
    }
}

/// RFC 1918 + loopback + link-local ranges, used by the direction heuristic
/// below. A real deployment would take an explicit local-address list; the
/// distilled configuration surface (§6) names no such key, so a private/
/// loopback-address heuristic stands in (documented as a resolved Open
/// Question in the design notes).
fn is_local_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// One message plus the transport-level context storage needs that the
/// parsed `Message` itself doesn't carry: which address sent it, and an
/// approximate byte cost for memory accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: Message,
    pub src: Option<Address>,
    pub dst: Option<Address>,
    pub approx_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub call_id: CallId,
    pub messages: Vec<StoredMessage>,
    pub first_timestamp_us: u64,
    pub last_timestamp_us: u64,
    pub answer_time_us: Option<u64>,
    pub end_time_us: Option<u64>,
    pub state: CallState,
    pub xcalls: HashSet<CallId>,
    initiator: Option<Address>,
}

impl Call {
    pub fn new(call_id: CallId) -> Self {
        Call {
            call_id,
            messages: Vec::new(),
            first_timestamp_us: 0,
            last_timestamp_us: 0,
            answer_time_us: None,
            end_time_us: None,
            state: CallState::Calling,
            xcalls: HashSet::new(),
            initiator: None,
        }
    }

    /// Appends `msg`, updates timestamps, and drives the state machine
    /// (§4.5). Retransmissions (identical CSeq number+method as the most
    /// recent message of the same direction) never change state.
    pub fn push(&mut self, stored: StoredMessage) {
        if self.messages.is_empty() {
            self.first_timestamp_us = stored.message.timestamp_us;
            self.initiator = stored.src;
        }
        self.last_timestamp_us = self.last_timestamp_us.max(stored.message.timestamp_us);

        let is_retransmission = self
            .messages
            .last()
            .map(|last| {
                last.message.cseq.number == stored.message.cseq.number
                    && last.message.cseq.method == stored.message.cseq.method
                    && last.message.is_request() == stored.message.is_request()
                    && last.message.start_line == stored.message.start_line
            })
            .unwrap_or(false);

        if !is_retransmission {
            self.advance_state(&stored);
        }
        self.messages.push(stored);
    }

    fn advance_state(&mut self, stored: &StoredMessage) {
        let ts = stored.message.timestamp_us;
        match &stored.message.start_line {
            StartLine::Request { method: Method::Invite, .. } => {
                if self.messages.is_empty() {
                    self.state = CallState::Calling;
                }
            }
            StartLine::Request { method: Method::Cancel, .. } => {
                self.state = CallState::Cancelled;
                self.end_time_us = Some(ts);
            }
            StartLine::Request { method: Method::Bye, .. } => {
                // Direction relative to the call's initiator: the BYE sender
                // being the original caller means the caller hung up.
                let from_initiator = self.initiator.is_some() && stored.src == self.initiator;
                self.state = if from_initiator { CallState::SendBye } else { CallState::RecvBye };
                self.end_time_us = Some(ts);
            }
            StartLine::Response { status_code } => {
                let code = *status_code;
                if (100..200).contains(&code) {
                    let outgoing = self.initiator.map(is_local_address_of).unwrap_or(false);
                    self.state = if outgoing { CallState::Outgoing } else { CallState::Incoming };
                } else if (200..300).contains(&code) {
                    self.state = CallState::InCall;
                    self.answer_time_us.get_or_insert(ts);
                } else if code == 487 {
                    self.state = CallState::Cancelled;
                    self.end_time_us = Some(ts);
                } else if code == 486 || code == 600 {
                    self.state = CallState::BusyLine;
                    self.end_time_us = Some(ts);
                } else if (300..400).contains(&code) {
                    self.state = CallState::Diverted;
                    self.end_time_us = Some(ts);
                } else if (400..600).contains(&code) {
                    self.state = CallState::Rejected;
                    self.end_time_us = Some(ts);
                }
            }
            _ => {}
        }
    }

    pub fn msgcnt(&self) -> usize {
        self.messages.len()
    }

    pub fn method(&self) -> Option<Method> {
        self.messages.first().map(|m| m.message.method())
    }

    pub fn source_user(&self) -> Option<&str> {
        self.messages.first()?.message.from_user.as_deref()
    }

    pub fn destination_user(&self) -> Option<&str> {
        self.messages.first()?.message.to_user.as_deref()
    }

    pub fn totaldur_us(&self) -> u64 {
        self.last_timestamp_us.saturating_sub(self.first_timestamp_us)
    }

    pub fn convdur_us(&self) -> Option<u64> {
        let (answer, end) = (self.answer_time_us?, self.end_time_us?);
        Some(end.saturating_sub(answer))
    }

    pub fn approx_size(&self) -> usize {
        self.messages.iter().map(|m| m.approx_size).sum()
    }
}

fn is_local_address_of(addr: Address) -> bool {
    is_local_address(addr.ip())
}
