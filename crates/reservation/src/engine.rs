//! The reservation engine: one protocol, two total-source policies.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{CartId, HoldId, Sku};

use crate::authority::StockAuthority;
use crate::error::{ReservationError, Result};
use crate::events::EventRecord;
use crate::store::LedgerStore;
use crate::types::{
    CommitOutcome, ExtendOutcome, HoldRequest, ReleaseOutcome, ReserveOutcome, ResolveOutcome,
    StockSnapshot, TotalSource,
};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hold TTL applied when a reserve request carries none (or a
    /// non-positive one).
    pub default_hold_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_hold_ttl: Duration::seconds(600),
        }
    }
}

/// Drives the hold lifecycle against an injected ledger store.
///
/// Constructed with either [`ReservationEngine::self_managed`] or
/// [`ReservationEngine::externally_fed`]; the latter requires a
/// [`StockAuthority`], so an externally-fed engine without a system of
/// record cannot be built. All operations delegate their atomicity to the
/// store; the engine adds validation, the commit-time reconciliation and
/// observability.
pub struct ReservationEngine {
    store: Arc<dyn LedgerStore>,
    authority: Option<Arc<dyn StockAuthority>>,
    policy: TotalSource,
    config: EngineConfig,
}

impl ReservationEngine {
    /// Engine that owns both counters and enforces expiry in the store.
    pub fn self_managed(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self {
            store,
            authority: None,
            policy: TotalSource::SelfManaged,
            config,
        }
    }

    /// Engine whose `total` is fed by CDC and reconciled against the given
    /// system of record at commit time.
    pub fn externally_fed(
        store: Arc<dyn LedgerStore>,
        authority: Arc<dyn StockAuthority>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            authority: Some(authority),
            policy: TotalSource::ExternallyFed,
            config,
        }
    }

    /// The total-source policy this engine was constructed with.
    pub fn policy(&self) -> TotalSource {
        self.policy
    }

    /// Takes a hold of `qty` units of `sku` for `cart_id`.
    ///
    /// Idempotent per `(cart, sku)`: while a hold is active, repeat calls
    /// return [`ReserveOutcome::AlreadyHeld`] and change nothing.
    #[tracing::instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn reserve(
        &self,
        sku: &Sku,
        qty: i64,
        cart_id: &CartId,
        ttl_seconds: Option<i64>,
    ) -> Result<ReserveOutcome> {
        if qty <= 0 {
            return Err(ReservationError::InvalidQuantity(qty));
        }
        let ttl = match ttl_seconds {
            Some(secs) if secs > 0 => Duration::seconds(secs),
            _ => self.config.default_hold_ttl,
        };
        let req = HoldRequest {
            sku: sku.clone(),
            cart_id: cart_id.clone(),
            qty,
            ttl,
        };

        let outcome = self.store.reserve(self.policy, &req, Utc::now()).await?;
        match &outcome {
            ReserveOutcome::Reserved { .. } => {
                metrics::counter!("holds_created_total").increment(1);
            }
            ReserveOutcome::Insufficient { available } => {
                tracing::debug!(%sku, qty, available, "reservation rejected");
                metrics::counter!("holds_rejected_total").increment(1);
            }
            ReserveOutcome::AlreadyHeld { .. } => {}
        }
        Ok(outcome)
    }

    /// Finalizes a hold.
    ///
    /// Under the externally-fed policy the system of record is debited
    /// first; a refused debit means the optimistic admission went stale,
    /// so the hold is released and the conflict reported. A missing hold
    /// is a terminal no-op (idempotent replay or an expired hold).
    #[tracing::instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn commit(&self, sku: &Sku, hold_id: &HoldId) -> Result<CommitOutcome> {
        if let Some(authority) = &self.authority {
            let Some(hold) = self.store.get_hold(hold_id).await? else {
                return Ok(CommitOutcome::NoHold);
            };
            let debited = authority.conditional_debit(sku, hold.qty).await?;
            if !debited {
                // Never leave `reserved` elevated for stock that was never
                // allocated at the system of record.
                let released = self
                    .store
                    .release(self.policy, sku, hold_id, Utc::now())
                    .await?;
                let qty = match released {
                    ResolveOutcome::Resolved { qty } => qty,
                    ResolveOutcome::NoHold => hold.qty,
                };
                tracing::warn!(%sku, %hold_id, qty, "authoritative stock insufficient at commit; hold released");
                metrics::counter!("commit_conflicts_total").increment(1);
                return Ok(CommitOutcome::SorConflict { qty });
            }
        }

        match self.store.commit(self.policy, sku, hold_id, Utc::now()).await? {
            ResolveOutcome::Resolved { qty } => {
                metrics::counter!("holds_committed_total").increment(1);
                Ok(CommitOutcome::Committed { qty })
            }
            ResolveOutcome::NoHold => Ok(CommitOutcome::NoHold),
        }
    }

    /// Returns a hold's quantity to the pool. Safe to call twice; the
    /// second call reports [`ReleaseOutcome::NoHold`] and changes nothing.
    #[tracing::instrument(skip(self), fields(policy = ?self.policy))]
    pub async fn release(&self, sku: &Sku, hold_id: &HoldId) -> Result<ReleaseOutcome> {
        match self
            .store
            .release(self.policy, sku, hold_id, Utc::now())
            .await?
        {
            ResolveOutcome::Resolved { qty } => {
                metrics::counter!("holds_released_total").increment(1);
                Ok(ReleaseOutcome::Released { qty })
            }
            ResolveOutcome::NoHold => Ok(ReleaseOutcome::NoHold),
        }
    }

    /// Pushes a hold's deadline out by `add_seconds`, never shortening it.
    #[tracing::instrument(skip(self))]
    pub async fn extend(
        &self,
        cart_id: &CartId,
        sku: &Sku,
        add_seconds: i64,
    ) -> Result<ExtendOutcome> {
        if add_seconds <= 0 {
            return Err(ReservationError::InvalidExtension(add_seconds));
        }
        let hold_id = HoldId::for_cart_sku(cart_id, sku);
        self.store
            .extend(
                self.policy,
                &hold_id,
                Duration::seconds(add_seconds),
                Utc::now(),
            )
            .await
    }

    /// Read-only counter view for a SKU.
    pub async fn snapshot(&self, sku: &Sku) -> Result<StockSnapshot> {
        self.store.snapshot(self.policy, sku).await
    }

    /// Newest `limit` hold events, newest first.
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.store.recent_events(limit).await
    }

    /// Seeds the ledger counters for one SKU, resetting `reserved`.
    pub async fn seed(&self, sku: &Sku, qty: i64) -> Result<()> {
        self.store.seed_counters(self.policy, sku, qty).await
    }

    /// One reaper sweep: releases every hold whose lease is due at `now`,
    /// bounded by `limit`. Returns the number of holds released.
    ///
    /// The release goes through the same atomic path as a client call, so
    /// a sweep racing a commit on the same hold cannot double-free.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<usize> {
        let due = self.store.due_leases(now, limit).await?;
        let mut released = 0usize;
        for hold_id in due {
            let sku = match hold_id.sku_part() {
                Some(sku) => Sku::new(sku),
                None => match self.store.get_hold(&hold_id).await? {
                    Some(hold) => hold.sku,
                    None => {
                        // No way to resolve the SKU; drop the orphaned
                        // entry rather than retrying it forever.
                        self.store.remove_lease(&hold_id).await?;
                        continue;
                    }
                },
            };
            if let ResolveOutcome::Resolved { qty } = self
                .store
                .release(self.policy, &sku, &hold_id, now)
                .await?
            {
                tracing::info!(%sku, %hold_id, qty, "expired hold released");
                released += 1;
            }
        }
        if released > 0 {
            metrics::counter!("holds_reaped_total").increment(released as u64);
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::InMemoryStockAuthority;
    use crate::memory::InMemoryLedgerStore;
    use crate::types::ReserveOutcome;

    fn sku() -> Sku {
        Sku::new("sku-123")
    }

    async fn self_managed_engine(initial: i64) -> ReservationEngine {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = ReservationEngine::self_managed(store, EngineConfig::default());
        engine.seed(&sku(), initial).await.unwrap();
        engine
    }

    async fn externally_fed_engine(
        ledger_total: i64,
        authority_total: i64,
    ) -> (ReservationEngine, Arc<InMemoryLedgerStore>, Arc<InMemoryStockAuthority>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let authority = Arc::new(InMemoryStockAuthority::new());
        authority.set_stock(&sku(), authority_total).await;
        let engine = ReservationEngine::externally_fed(
            store.clone(),
            authority.clone(),
            EngineConfig::default(),
        );
        engine.seed(&sku(), ledger_total).await.unwrap();
        (engine, store, authority)
    }

    fn hold_for(cart: &str) -> HoldId {
        HoldId::for_cart_sku(&CartId::new(cart), &sku())
    }

    async fn counters(engine: &ReservationEngine) -> (i64, i64) {
        let snap = engine.snapshot(&sku()).await.unwrap();
        (snap.available, snap.reserved)
    }

    #[tokio::test]
    async fn shop_flow_over_shared_stock() {
        let engine = self_managed_engine(10).await;

        // Two carts reserve, a third finds the shelf too empty.
        let first = engine
            .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();
        assert!(matches!(first, ReserveOutcome::Reserved { available: 6, .. }));
        assert_eq!(counters(&engine).await, (6, 4));

        engine
            .reserve(&sku(), 4, &CartId::new("cart-b"), Some(60))
            .await
            .unwrap();
        assert_eq!(counters(&engine).await, (2, 8));

        let third = engine
            .reserve(&sku(), 3, &CartId::new("cart-c"), Some(60))
            .await
            .unwrap();
        assert_eq!(third, ReserveOutcome::Insufficient { available: 2 });
        assert_eq!(counters(&engine).await, (2, 8));

        // Cart A buys, cart B walks away.
        let commit = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(commit, CommitOutcome::Committed { qty: 4 });
        assert_eq!(counters(&engine).await, (2, 4));

        let release = engine.release(&sku(), &hold_for("cart-b")).await.unwrap();
        assert_eq!(release, ReleaseOutcome::Released { qty: 4 });
        assert_eq!(counters(&engine).await, (6, 0));

        // Replayed commit is a terminal no-op.
        let replay = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(replay, CommitOutcome::NoHold);
        assert_eq!(counters(&engine).await, (6, 0));
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_quantity() {
        let engine = self_managed_engine(10).await;
        let err = engine
            .reserve(&sku(), 0, &CartId::new("cart-a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidQuantity(0)));
        assert_eq!(counters(&engine).await, (10, 0));
    }

    #[tokio::test]
    async fn missing_ttl_falls_back_to_default() {
        let engine = self_managed_engine(10).await;
        let before = Utc::now();
        let outcome = engine
            .reserve(&sku(), 1, &CartId::new("cart-a"), None)
            .await
            .unwrap();
        let ReserveOutcome::Reserved { expires_at, .. } = outcome else {
            panic!("expected a new hold");
        };
        assert!(expires_at >= before + Duration::seconds(599));

        // A non-positive TTL gets the same fallback.
        let outcome = engine
            .reserve(&sku(), 1, &CartId::new("cart-b"), Some(-5))
            .await
            .unwrap();
        let ReserveOutcome::Reserved { expires_at, .. } = outcome else {
            panic!("expected a new hold");
        };
        assert!(expires_at >= before + Duration::seconds(599));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let engine = self_managed_engine(10).await;
        engine
            .reserve(&sku(), 5, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();

        engine.release(&sku(), &hold_for("cart-a")).await.unwrap();
        let again = engine.release(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(again, ReleaseOutcome::NoHold);
        assert_eq!(counters(&engine).await, (10, 0));
    }

    #[tokio::test]
    async fn successful_commit_debits_the_authority() {
        let (engine, _, authority) = externally_fed_engine(10, 10).await;
        engine
            .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();

        let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed { qty: 4 });
        assert_eq!(authority.stock(&sku()).await, 6);
        assert_eq!(counters(&engine).await, (10, 0));
    }

    #[tokio::test]
    async fn stale_admission_is_caught_at_commit() {
        // Ledger still believes in 10 units, the authority has only 2.
        let (engine, store, authority) = externally_fed_engine(10, 2).await;
        engine
            .reserve(&sku(), 4, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();

        let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(outcome, CommitOutcome::SorConflict { qty: 4 });

        // The hold was released, nothing stays reserved, no lease leaks,
        // and the authority was not debited.
        assert_eq!(counters(&engine).await, (10, 0));
        assert_eq!(store.hold_count().await, 0);
        assert_eq!(store.lease_count().await, 0);
        assert_eq!(authority.stock(&sku()).await, 2);
    }

    #[tokio::test]
    async fn commit_of_unknown_hold_skips_the_authority() {
        let (engine, _, authority) = externally_fed_engine(10, 10).await;
        let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(outcome, CommitOutcome::NoHold);
        assert_eq!(authority.stock(&sku()).await, 10);
    }

    #[tokio::test]
    async fn cdc_shrink_leaves_available_negative_until_commit() {
        let (engine, store, authority) = externally_fed_engine(10, 10).await;
        engine
            .reserve(&sku(), 8, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();

        // The feed mirrors an out-of-band sale: total drops below reserved.
        store.apply_total(&sku(), 5).await.unwrap();
        authority.set_stock(&sku(), 5).await;

        let snap = engine.snapshot(&sku()).await.unwrap();
        assert_eq!((snap.available, snap.reserved, snap.total), (-3, 8, Some(5)));

        // Admission is closed while oversold.
        let refused = engine
            .reserve(&sku(), 1, &CartId::new("cart-b"), Some(60))
            .await
            .unwrap();
        assert_eq!(refused, ReserveOutcome::Insufficient { available: -3 });

        // Commit-time reconciliation resolves it by releasing the hold.
        let outcome = engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();
        assert_eq!(outcome, CommitOutcome::SorConflict { qty: 8 });
        assert_eq!(counters(&engine).await, (5, 0));
    }

    #[tokio::test]
    async fn sweep_matches_client_release_exactly() {
        let (engine, store, _) = externally_fed_engine(10, 10).await;
        engine
            .reserve(&sku(), 5, &CartId::new("cart-d"), Some(1))
            .await
            .unwrap();
        assert_eq!(counters(&engine).await, (5, 5));

        // Nothing due yet.
        assert_eq!(engine.sweep_expired(Utc::now(), 100).await.unwrap(), 0);

        let past_deadline = Utc::now() + Duration::seconds(2);
        assert_eq!(engine.sweep_expired(past_deadline, 100).await.unwrap(), 1);
        assert_eq!(counters(&engine).await, (10, 0));
        assert_eq!(store.hold_count().await, 0);
        assert_eq!(store.lease_count().await, 0);

        // A second sweep finds nothing; release-on-absent is a no-op.
        assert_eq!(engine.sweep_expired(past_deadline, 100).await.unwrap(), 0);
        assert_eq!(counters(&engine).await, (10, 0));
    }

    #[tokio::test]
    async fn sweep_honors_batch_limit() {
        let (engine, store, _) = externally_fed_engine(10, 10).await;
        for cart in ["cart-a", "cart-b", "cart-c"] {
            engine
                .reserve(&sku(), 1, &CartId::new(cart), Some(1))
                .await
                .unwrap();
        }

        let later = Utc::now() + Duration::seconds(2);
        assert_eq!(engine.sweep_expired(later, 2).await.unwrap(), 2);
        assert_eq!(store.hold_count().await, 1);
        // The backlog drains on the next sweep.
        assert_eq!(engine.sweep_expired(later, 2).await.unwrap(), 1);
        assert_eq!(store.hold_count().await, 0);
    }

    #[tokio::test]
    async fn sweep_drops_unresolvable_lease_entries() {
        let (engine, store, _) = externally_fed_engine(10, 10).await;
        let now = Utc::now();
        // Drift left behind by another process: a due entry whose id
        // carries no SKU part and has no hold record.
        let orphan = HoldId::from_raw("corrupt-entry");
        store.inject_lease(&orphan, now - Duration::seconds(5)).await;
        assert_eq!(store.lease_count().await, 1);

        assert_eq!(engine.sweep_expired(now, 10).await.unwrap(), 0);
        assert_eq!(store.lease_count().await, 0);
        assert_eq!(counters(&engine).await, (10, 0));
    }

    #[tokio::test]
    async fn extend_updates_deadline_and_lease_together() {
        let (engine, store, _) = externally_fed_engine(10, 10).await;
        engine
            .reserve(&sku(), 2, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();
        let original = store
            .get_hold(&hold_for("cart-a"))
            .await
            .unwrap()
            .unwrap()
            .expires_at;

        let outcome = engine
            .extend(&CartId::new("cart-a"), &sku(), 120)
            .await
            .unwrap();
        let ExtendOutcome::Extended { expires_at } = outcome else {
            panic!("expected extension");
        };
        assert_eq!(expires_at, original + Duration::seconds(120));

        // The old deadline no longer reaps the hold.
        assert_eq!(engine.sweep_expired(original, 10).await.unwrap(), 0);
        assert_eq!(store.hold_count().await, 1);
    }

    #[tokio::test]
    async fn extend_rejects_non_positive_seconds() {
        let (engine, _, _) = externally_fed_engine(10, 10).await;
        let err = engine
            .extend(&CartId::new("cart-a"), &sku(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidExtension(0)));
    }

    #[tokio::test]
    async fn extend_of_unknown_hold_reports_no_hold() {
        let (engine, _, _) = externally_fed_engine(10, 10).await;
        let outcome = engine
            .extend(&CartId::new("cart-a"), &sku(), 60)
            .await
            .unwrap();
        assert_eq!(outcome, ExtendOutcome::NoHold);
    }

    #[tokio::test]
    async fn event_log_records_the_lifecycle() {
        let engine = self_managed_engine(10).await;
        engine
            .reserve(&sku(), 2, &CartId::new("cart-a"), Some(60))
            .await
            .unwrap();
        engine.commit(&sku(), &hold_for("cart-a")).await.unwrap();

        let events = engine.recent_events(20).await.unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        use crate::events::HoldEventKind::*;
        assert_eq!(kinds, vec![HoldCommitted, HoldCreated]);
        assert!(events.iter().all(|e| e.qty == 2));
    }

    #[tokio::test]
    async fn concurrent_reserves_cannot_oversell_the_last_unit() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let engine = Arc::new(ReservationEngine::self_managed(
            store,
            EngineConfig::default(),
        ));
        engine.seed(&sku(), 1).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine
                    .reserve(&sku(), 1, &CartId::new(format!("cart-{i}")), Some(60))
                    .await
                    .unwrap()
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), ReserveOutcome::Reserved { .. }) {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(counters(&engine).await, (0, 1));
    }
}
