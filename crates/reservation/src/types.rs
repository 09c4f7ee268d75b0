//! Core data model for the reservation protocol.

use chrono::{DateTime, Duration, Utc};
use common::{CartId, HoldId, Sku};
use serde::{Deserialize, Serialize};

/// Who owns the authoritative total for a SKU.
///
/// The two policies share one hold lifecycle and one set of operation
/// contracts; only the admission check and the commit path's
/// system-of-record step differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalSource {
    /// The engine owns both `available` and `reserved`. Stock is conserved
    /// between the two fields and hold expiry is enforced by the store
    /// itself.
    SelfManaged,
    /// An external system of record owns `total`, mirrored into the ledger
    /// by a CDC feed. The engine owns only `reserved`; `available` is
    /// derived as `total - reserved` and a reaper sweeps expired holds.
    ExternallyFed,
}

/// An active hold: quantity temporarily reserved by one cart for one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub hold_id: HoldId,
    pub sku: Sku,
    pub qty: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A validated reserve request, ready for the store transaction.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub sku: Sku,
    pub cart_id: CartId,
    pub qty: i64,
    pub ttl: Duration,
}

impl HoldRequest {
    /// The deterministic hold ID for this request's `(cart, sku)` pair.
    pub fn hold_id(&self) -> HoldId {
        HoldId::for_cart_sku(&self.cart_id, &self.sku)
    }
}

/// Point-in-time counter view for one SKU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub available: i64,
    pub reserved: i64,
    /// Present only under [`TotalSource::ExternallyFed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Outcome of a reserve operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A new hold was taken; `available` is the post-reservation count.
    Reserved {
        hold_id: HoldId,
        expires_at: DateTime<Utc>,
        available: i64,
    },
    /// A hold already exists for this `(cart, sku)`. The stored hold wins,
    /// even if the requested quantity differs.
    AlreadyHeld {
        hold_id: HoldId,
        expires_at: DateTime<Utc>,
    },
    /// Not enough stock; nothing was mutated.
    Insufficient { available: i64 },
}

/// Outcome of resolving a hold at the store, shared by the commit and
/// release transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved { qty: i64 },
    NoHold,
}

/// Outcome of a commit operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { qty: i64 },
    /// No active hold. Signals idempotent replay or a hold that already
    /// expired; callers treat it as a terminal no-op, not a failure.
    NoHold,
    /// The system of record refused the conditional debit; the hold was
    /// released so no reserved quantity is leaked.
    SorConflict { qty: i64 },
}

/// Outcome of a release operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { qty: i64 },
    NoHold,
}

/// Outcome of an extend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended { expires_at: DateTime<Utc> },
    NoHold,
}
