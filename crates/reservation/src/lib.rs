//! Lock-free inventory reservation engine.
//!
//! Guarantees that the sum of reserved quantities never exceeds available
//! stock under concurrent cart activity, without client-side locks. Safety
//! is delegated to the backing [`LedgerStore`]'s capacity for atomic
//! multi-field transactions; the engine layers the hold lifecycle, the
//! system-of-record reconciliation and the expiry reaper on top.

pub mod authority;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod postgres;
pub mod reaper;
pub mod store;
pub mod types;

pub use authority::{InMemoryStockAuthority, PostgresStockAuthority, StockAuthority};
pub use common::{CartId, HoldId, Sku};
pub use engine::{EngineConfig, ReservationEngine};
pub use error::{ReservationError, Result};
pub use events::{EventRecord, HoldEventKind};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use reaper::{ReaperConfig, ReaperHandle, spawn_reaper};
pub use store::LedgerStore;
pub use types::{
    CommitOutcome, ExtendOutcome, Hold, HoldRequest, ReleaseOutcome, ReserveOutcome,
    ResolveOutcome, StockSnapshot, TotalSource,
};
