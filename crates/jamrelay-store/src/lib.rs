//! jamrelay-store: SQLite persistence for node channel assignments and
//! channel quality estimates. Shared by the relay (writer) and the snapshot
//! reader.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{SeedPlan, Store};
