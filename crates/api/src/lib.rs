//! # `shingo-api` - HTTP API 网关
//!
//! 本 crate 是信号调度引擎的 HTTP/REST 服务入口。
//! 使用 `axum` 构建路由与控制器，通过 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 接收来自信号生产者 (策略管线)、执行 Worker 与运维端的 HTTP 请求
//! - 执行 Bearer Token 鉴权后分发至对应路由组
//! - 调用下层 `DispatchManager` 完成业务操作
//! - 将领域模型转换为 DTO 返回给调用方

pub mod types;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
