use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, Sku};

use crate::Result;
use crate::events::EventRecord;
use crate::types::{
    ExtendOutcome, Hold, HoldRequest, ReserveOutcome, ResolveOutcome, StockSnapshot, TotalSource,
};

/// The atomic transaction boundary of the reservation protocol.
///
/// Every mutating operation executes as a single indivisible transaction
/// against the backing store: existence check, counter read, counter
/// mutation, hold write, lease write and event append either all apply or
/// none do. Concurrent calls for the same SKU serialize at exactly this
/// boundary, which is what makes the engine safe without client-side locks.
///
/// The `policy` argument selects which counter fields carry meaning; the
/// store itself works the same way under either policy. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically takes a hold.
    ///
    /// In order, within one transaction: if a hold already exists for the
    /// request's `(cart, sku)`, returns `AlreadyHeld` without touching any
    /// counter. Otherwise checks admission (`available < qty` returns
    /// `Insufficient`), mutates the counters, writes the hold record with
    /// `expires_at = now + ttl`, inserts the lease index entry (externally
    /// fed policy only) and appends a `hold_created` event.
    async fn reserve(
        &self,
        policy: TotalSource,
        req: &HoldRequest,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome>;

    /// Atomically finalizes a hold: decrements `reserved` by the hold's
    /// quantity, deletes the hold, removes its lease entry and appends a
    /// `hold_committed` event. Returns `NoHold` if no active hold exists.
    async fn commit(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome>;

    /// Atomically undoes a hold: decrements `reserved` (and restores
    /// `available` under the self-managed policy), deletes the hold,
    /// removes its lease entry and appends a `hold_released` event.
    ///
    /// When no hold exists the lease entry is still removed, so a stray
    /// index entry self-heals; the second release of a hold is a safe
    /// no-op and never drives a counter negative.
    async fn release(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome>;

    /// Atomically pushes a hold's deadline out to
    /// `max(current_expiry, now) + add`, updating the hold record and its
    /// lease entry together. Never shortens an existing deadline.
    async fn extend(
        &self,
        policy: TotalSource,
        hold_id: &HoldId,
        add: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome>;

    /// Read-only counter view for one SKU. Eventually consistent with the
    /// latest completed transaction; an unknown SKU reads as all zeroes.
    async fn snapshot(&self, policy: TotalSource, sku: &Sku) -> Result<StockSnapshot>;

    /// Reads an active hold record, if any.
    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>>;

    /// Lease index scan: IDs of holds whose deadline is at or before `now`,
    /// oldest first, bounded by `limit`.
    async fn due_leases(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<HoldId>>;

    /// Drops a lease index entry without touching counters or holds. Used
    /// for orphaned entries that cannot be resolved to a SKU.
    async fn remove_lease(&self, hold_id: &HoldId) -> Result<()>;

    /// Seeds the counters for one SKU (`reserved` resets to zero).
    async fn seed_counters(&self, policy: TotalSource, sku: &Sku, qty: i64) -> Result<()>;

    /// CDC feed ingress: overwrites the authoritative `total` for a SKU.
    ///
    /// This is the feed's exclusive write path; the engine never calls it,
    /// and the feed never writes `reserved` or any hold/lease record.
    async fn apply_total(&self, sku: &Sku, total: i64) -> Result<()>;

    /// Reads the newest `limit` events, newest first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>>;
}
