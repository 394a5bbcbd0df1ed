/// 数据持久化相关模块

/// SeaORM + SQLite 快照存储
pub mod sqlite_orm_snapshot_store;

/// 内存快照存储（开发和测试）
pub mod in_memory_snapshot_store;

/// 采集运行时设置的JSON持久化
pub mod capture_settings_service;

#[cfg(test)]
mod tests;

pub use sqlite_orm_snapshot_store::SqliteOrmSnapshotStore;
pub use in_memory_snapshot_store::InMemorySnapshotStore;
pub use capture_settings_service::{CaptureSettings, ICaptureSettingsService, JsonCaptureSettingsService};
