mod filters;
mod redb_storage;
pub(crate) mod tables;
mod traits;
mod txn;

pub use filters::{Page, StoreStats, MAX_PAGE_SIZE};
pub use redb_storage::GraphStore;
pub use tables::{NameKind, CURRENT_SCHEMA_VERSION};
pub use traits::GraphView;
pub use txn::{GraphSnapshot, GraphTxn};
