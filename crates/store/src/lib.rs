pub mod compact;
pub mod device_log;
pub mod identity;
pub mod merge;
pub mod migrate;
pub mod paths;
pub mod shared_state;
pub mod storage;

pub use compact::{CompactOutcome, compact};
pub use device_log::DeviceLogStore;
pub use identity::{DeviceIdentity, LocalDeviceStore, slugify};
pub use merge::merge_increments;
pub use migrate::{MigrationReport, SCHEMA_VERSION, run_migrations};
pub use shared_state::SharedStateStore;
pub use storage::{FsStorage, MemoryStorage, Storage, StorageError};
