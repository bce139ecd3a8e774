//! # `shingo-core` - 领域核心
//!
//! 信号调度引擎的纯领域层：实体、端口 (Trait) 与错误分类，不包含任何 I/O。
//! 所有具体的存储、调度与网关实现都依赖本 crate 中的抽象，
//! 并在 `crates/app` 的 DI 容器中完成装配。

pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod signal;
pub mod trade;
