//! Order collaborator, specified at its interface boundary.
//!
//! The reservation engine never mutates orders; the API layer enumerates an
//! order's line items to drive per-SKU hold operations.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use common::OrderId;
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
pub use types::{OrderLine, OrderStatus};
