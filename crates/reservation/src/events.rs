//! Best-effort event log for hold state transitions.
//!
//! The log is observability only; it is never consulted to make a
//! reservation decision.

use chrono::{DateTime, Utc};
use common::{HoldId, Sku};
use serde::{Deserialize, Serialize};

/// Kind of hold transition recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldEventKind {
    HoldCreated,
    HoldCommitted,
    HoldReleased,
}

impl HoldEventKind {
    /// Wire/storage name of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldEventKind::HoldCreated => "hold_created",
            HoldEventKind::HoldCommitted => "hold_committed",
            HoldEventKind::HoldReleased => "hold_released",
        }
    }

    /// Parses a storage name back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold_created" => Some(HoldEventKind::HoldCreated),
            "hold_committed" => Some(HoldEventKind::HoldCommitted),
            "hold_released" => Some(HoldEventKind::HoldReleased),
            _ => None,
        }
    }
}

impl std::fmt::Display for HoldEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One appended event. `id` is a store-assigned, monotonically increasing
/// sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub kind: HoldEventKind,
    pub hold_id: HoldId,
    pub sku: Sku,
    pub qty: i64,
    pub at: DateTime<Utc>,
}
