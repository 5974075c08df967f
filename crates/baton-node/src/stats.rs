//! Per-node traffic counters.

use std::collections::BTreeMap;

use baton_protocol::{unix_timestamp, PeerId};
use serde::Serialize;

/// Counters updated by the node's activities.
///
/// `dropped` is the total of every discard; the more specific counters
/// (`duplicates`, `hop_limit_drops`, ...) break it down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStatistics {
    pub sent: u64,
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    /// Messages handed to a registered handler
    pub delivered: u64,
    pub duplicates: u64,
    pub hop_limit_drops: u64,
    pub queue_full_drops: u64,
    pub decode_failures: u64,
    pub errors: u64,
    pub token_received: u64,
    pub token_passed: u64,
    pub token_requests_sent: u64,
    /// Unix seconds of the last send or receive
    pub last_activity: i64,
    /// Unix seconds of the last heartbeat seen from each peer
    pub last_heartbeat: BTreeMap<PeerId, i64>,
}

impl NodeStatistics {
    pub(crate) fn touch(&mut self) {
        self.last_activity = unix_timestamp();
    }

    pub(crate) fn record_sent(&mut self) {
        self.sent += 1;
        self.touch();
    }

    pub(crate) fn record_received(&mut self) {
        self.received += 1;
        self.touch();
    }

    pub(crate) fn record_duplicate(&mut self) {
        self.duplicates += 1;
        self.dropped += 1;
    }

    pub(crate) fn record_hop_limit(&mut self) {
        self.hop_limit_drops += 1;
        self.dropped += 1;
    }

    pub(crate) fn record_queue_full(&mut self) {
        self.queue_full_drops += 1;
        self.dropped += 1;
    }

    pub(crate) fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
        self.dropped += 1;
    }

    pub(crate) fn record_heartbeat(&mut self, peer: PeerId) {
        self.last_heartbeat.insert(peer, unix_timestamp());
    }
}
