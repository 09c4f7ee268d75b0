pub mod types;

pub use types::{CartId, HoldId, OrderId, Sku};
