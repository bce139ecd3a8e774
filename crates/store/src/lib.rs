//! # `shingo-store` - 持久化适配层
//!
//! `shingo-core` 中各存储端口的具体实现：
//! - [`queue::SqliteQueueStore`]：SQLite 单库三表 (signals / dispatches / trades)，
//!   以单事务 CAS 保证认领与状态迁移的原子性。
//! - [`mem::MemoryQueueStore`]：进程内实现，用单把互斥锁串行化认领
//!   (单一仲裁者语义)，供测试与嵌入场景替换。

pub mod config;
pub mod mem;
pub mod queue;
