// Базовые модули
pub mod user;
pub mod store;
pub mod snapshot;
pub mod config;
pub mod metrics;

// Обвязка процесса: HTTP и сигналы завершения
pub mod server;
pub mod interrupt;

// Удобные реэкспорты
pub use config::UsersConfig;
pub use snapshot::{
    load, save, stage, FlushReport, LoadOutcome, Loaded, ManagerState, SnapshotManager,
    StagedSnapshot,
};
pub use store::{Dataset, Drained, Store, StoreError};
pub use user::{User, UserAttrs, UserId, MAX_USER_ID};
