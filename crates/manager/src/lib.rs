//! # `shingo-manager` - 应用服务层
//!
//! 调度引擎的门面与后台任务：
//! - [`dispatch::DispatchManager`]：生产者摄入、Worker 认领/心跳/状态迁移、
//!   成交对账与运维查询的统一入口。
//! - [`lease::LeaseMonitor`]：独立于请求流量的租约回收定时器，
//!   系统的主要故障恢复机制。
//!
//! 编译期仅依赖 `shingo-core` 中的 Trait 定义，所有具体实现通过构造函数注入。

pub mod dispatch;
pub mod lease;
