use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, Sku};
use tokio::sync::RwLock;

use crate::Result;
use crate::events::{EventRecord, HoldEventKind};
use crate::store::LedgerStore;
use crate::types::{
    ExtendOutcome, Hold, HoldRequest, ReserveOutcome, ResolveOutcome, StockSnapshot, TotalSource,
};

/// Retained event log entries before the oldest are dropped.
const EVENT_LOG_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    available: i64,
    reserved: i64,
    total: i64,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<Sku, Counters>,
    holds: HashMap<HoldId, Hold>,
    // Ordered by deadline; the (expires_at, hold_id) pair keeps entries
    // unique per hold.
    leases: BTreeSet<(DateTime<Utc>, HoldId)>,
    events: VecDeque<EventRecord>,
    next_event_id: i64,
}

/// In-memory ledger store.
///
/// Each operation runs to completion under a single write-guard
/// acquisition, which is the serialization point that makes the operation
/// one indivisible transaction. Provides the same interface as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active holds.
    pub async fn hold_count(&self) -> usize {
        self.inner.read().await.holds.len()
    }

    /// Number of lease index entries.
    pub async fn lease_count(&self) -> usize {
        self.inner.read().await.leases.len()
    }

    /// Test hook: plants a lease index entry with no backing hold,
    /// simulating drift left behind by another process.
    #[cfg(test)]
    pub(crate) async fn inject_lease(&self, hold_id: &HoldId, expires_at: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .leases
            .insert((expires_at, hold_id.clone()));
    }

    fn push_event(
        inner: &mut Inner,
        kind: HoldEventKind,
        hold_id: &HoldId,
        sku: &Sku,
        qty: i64,
        at: DateTime<Utc>,
    ) {
        inner.next_event_id += 1;
        inner.events.push_back(EventRecord {
            id: inner.next_event_id,
            kind,
            hold_id: hold_id.clone(),
            sku: sku.clone(),
            qty,
            at,
        });
        if inner.events.len() > EVENT_LOG_CAP {
            inner.events.pop_front();
        }
    }

    /// Self-managed native expiry: a hold whose deadline has passed is
    /// folded back into the counters before the operation proceeds, inside
    /// the same transaction. The externally fed policy leaves expiry to
    /// the reaper.
    fn expire_if_due(
        inner: &mut Inner,
        policy: TotalSource,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) {
        if policy != TotalSource::SelfManaged {
            return;
        }
        let due = inner
            .holds
            .get(hold_id)
            .is_some_and(|h| h.expires_at <= now);
        if !due {
            return;
        }
        if let Some(hold) = inner.holds.remove(hold_id) {
            let counters = inner.counters.entry(hold.sku.clone()).or_default();
            counters.available += hold.qty;
            counters.reserved -= hold.qty;
            Self::push_event(
                inner,
                HoldEventKind::HoldReleased,
                hold_id,
                &hold.sku,
                hold.qty,
                now,
            );
        }
    }

    fn remove_lease_entry(inner: &mut Inner, hold_id: &HoldId) {
        inner.leases.retain(|(_, id)| id != hold_id);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn reserve(
        &self,
        policy: TotalSource,
        req: &HoldRequest,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let mut inner = self.inner.write().await;
        let hold_id = req.hold_id();

        Self::expire_if_due(&mut inner, policy, &hold_id, now);

        // Idempotency: an existing hold wins, whatever qty was requested.
        if let Some(hold) = inner.holds.get(&hold_id) {
            return Ok(ReserveOutcome::AlreadyHeld {
                hold_id: hold.hold_id.clone(),
                expires_at: hold.expires_at,
            });
        }

        let counters = inner.counters.entry(req.sku.clone()).or_default();
        let available = match policy {
            TotalSource::SelfManaged => counters.available,
            TotalSource::ExternallyFed => counters.total - counters.reserved,
        };
        if available < req.qty {
            return Ok(ReserveOutcome::Insufficient { available });
        }

        counters.reserved += req.qty;
        if policy == TotalSource::SelfManaged {
            counters.available -= req.qty;
        }
        let available_after = available - req.qty;

        let expires_at = now + req.ttl;
        inner.holds.insert(
            hold_id.clone(),
            Hold {
                hold_id: hold_id.clone(),
                sku: req.sku.clone(),
                qty: req.qty,
                created_at: now,
                expires_at,
            },
        );
        if policy == TotalSource::ExternallyFed {
            inner.leases.insert((expires_at, hold_id.clone()));
        }
        Self::push_event(
            &mut inner,
            HoldEventKind::HoldCreated,
            &hold_id,
            &req.sku,
            req.qty,
            now,
        );

        Ok(ReserveOutcome::Reserved {
            hold_id,
            expires_at,
            available: available_after,
        })
    }

    async fn commit(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, policy, hold_id, now);

        let Some(hold) = inner.holds.remove(hold_id) else {
            return Ok(ResolveOutcome::NoHold);
        };
        let qty = hold.qty;
        inner.counters.entry(sku.clone()).or_default().reserved -= qty;
        Self::remove_lease_entry(&mut inner, hold_id);
        Self::push_event(&mut inner, HoldEventKind::HoldCommitted, hold_id, sku, qty, now);
        Ok(ResolveOutcome::Resolved { qty })
    }

    async fn release(
        &self,
        policy: TotalSource,
        sku: &Sku,
        hold_id: &HoldId,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, policy, hold_id, now);

        let Some(hold) = inner.holds.remove(hold_id) else {
            // Stray index entries self-heal here.
            Self::remove_lease_entry(&mut inner, hold_id);
            return Ok(ResolveOutcome::NoHold);
        };
        let qty = hold.qty;
        let counters = inner.counters.entry(sku.clone()).or_default();
        counters.reserved -= qty;
        if policy == TotalSource::SelfManaged {
            counters.available += qty;
        }
        Self::remove_lease_entry(&mut inner, hold_id);
        Self::push_event(&mut inner, HoldEventKind::HoldReleased, hold_id, sku, qty, now);
        Ok(ResolveOutcome::Resolved { qty })
    }

    async fn extend(
        &self,
        policy: TotalSource,
        hold_id: &HoldId,
        add: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome> {
        let mut inner = self.inner.write().await;
        Self::expire_if_due(&mut inner, policy, hold_id, now);

        let Some(current) = inner.holds.get(hold_id).map(|h| h.expires_at) else {
            return Ok(ExtendOutcome::NoHold);
        };
        let expires_at = current.max(now) + add;
        if let Some(hold) = inner.holds.get_mut(hold_id) {
            hold.expires_at = expires_at;
        }
        if policy == TotalSource::ExternallyFed {
            inner.leases.remove(&(current, hold_id.clone()));
            inner.leases.insert((expires_at, hold_id.clone()));
        }
        Ok(ExtendOutcome::Extended { expires_at })
    }

    async fn snapshot(&self, policy: TotalSource, sku: &Sku) -> Result<StockSnapshot> {
        let inner = self.inner.read().await;
        let counters = inner.counters.get(sku).copied().unwrap_or_default();
        Ok(match policy {
            TotalSource::SelfManaged => StockSnapshot {
                available: counters.available,
                reserved: counters.reserved,
                total: None,
            },
            TotalSource::ExternallyFed => StockSnapshot {
                available: counters.total - counters.reserved,
                reserved: counters.reserved,
                total: Some(counters.total),
            },
        })
    }

    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>> {
        Ok(self.inner.read().await.holds.get(hold_id).cloned())
    }

    async fn due_leases(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<HoldId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .leases
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .take(limit)
            .map(|(_, hold_id)| hold_id.clone())
            .collect())
    }

    async fn remove_lease(&self, hold_id: &HoldId) -> Result<()> {
        let mut inner = self.inner.write().await;
        Self::remove_lease_entry(&mut inner, hold_id);
        Ok(())
    }

    async fn seed_counters(&self, policy: TotalSource, sku: &Sku, qty: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let counters = inner.counters.entry(sku.clone()).or_default();
        *counters = match policy {
            TotalSource::SelfManaged => Counters {
                available: qty,
                reserved: 0,
                total: qty,
            },
            TotalSource::ExternallyFed => Counters {
                available: 0,
                reserved: 0,
                total: qty,
            },
        };
        Ok(())
    }

    async fn apply_total(&self, sku: &Sku, total: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.counters.entry(sku.clone()).or_default().total = total;
        Ok(())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.events.iter().rev().take(limit).cloned().collect())
    }
}
