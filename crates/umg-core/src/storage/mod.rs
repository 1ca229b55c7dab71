pub mod filters;
pub mod redb_storage;
pub mod traits;

pub use filters::{EdgeFilter, EntityFilter, EventFilter, InsightFilter, StorageStats};
pub use redb_storage::RedbStorage;
pub use traits::Storage;
