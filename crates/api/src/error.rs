//! # API 统一错误处理
//!
//! 将下层调度队列的错误分类统一映射到 HTTP 状态码与 JSON 响应体。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::types::ApiErrorResponse;
use shingo_core::error::QueueError;
use shingo_manager::dispatch::ManagerError;

/// API 层统一错误枚举
#[derive(Error, Debug)]
pub enum ApiError {
    /// 认证失败 (401)
    #[error("认证失败: {0}")]
    Unauthorized(String),

    /// 请求参数错误 (400)
    #[error("请求参数错误: {0}")]
    BadRequest(String),

    /// 资源未找到 (404)
    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 幂等键或状态迁移冲突 (409)
    #[error("冲突: {0}")]
    Conflict(String),

    /// 租约已被回收 (410)，调用方必须停止处理对应信号
    #[error("租约已失效: {0}")]
    LeaseGone(String),

    /// 下层业务错误 (500)
    #[error("内部服务错误: {0}")]
    Internal(String),
}

/// 将 `ApiError` 转换为 axum 的 HTTP 响应
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::LeaseGone(msg) => (StatusCode::GONE, msg.clone()),
            ApiError::Internal(msg) => {
                // 内部错误只记录日志，不向客户端透传细节
                tracing::error!("内部服务错误: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "服务器内部错误".to_string(),
                )
            }
        };

        let body = Json(ApiErrorResponse::from_msg(message));
        (status, body).into_response()
    }
}

/// 从 `ManagerError` 转换
impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::Queue(queue_err) => match &queue_err {
                QueueError::Validation(msg) => ApiError::BadRequest(msg.clone()),
                QueueError::NotFound(msg) => ApiError::NotFound(msg.clone()),
                QueueError::Conflict(msg) => ApiError::Conflict(msg.clone()),
                QueueError::LeaseExpired(msg) => ApiError::LeaseGone(msg.clone()),
                QueueError::Database(_) => ApiError::Internal(queue_err.to_string()),
            },
        }
    }
}
