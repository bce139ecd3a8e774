//! # 鉴权中间件
//!
//! 基于静态 Bearer Token 的访问控制。生产者、Worker 与运维端共享同一个
//! 部署级令牌，由配置注入；用户体系与细粒度角色不在本系统范围内。

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::server::AppState;

/// 提取并验证 Authorization: Bearer <token>
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req.headers().get(axum::http::header::AUTHORIZATION);

    let token = match auth_header {
        Some(header_val) => {
            let s = header_val
                .to_str()
                .map_err(|_| ApiError::Unauthorized("Invalid auth header".into()))?;
            if !s.starts_with("Bearer ") {
                tracing::warn!("Invalid Bearer format");
                return Err(ApiError::Unauthorized("Invalid Bearer format".into()));
            }
            s[7..].to_string()
        }
        None => {
            tracing::warn!("Missing Authorization header");
            return Err(ApiError::Unauthorized("Missing Authorization header".into()));
        }
    };

    if token != state.api_token.as_str() {
        tracing::warn!("Rejected request with invalid api token");
        return Err(ApiError::Unauthorized("Invalid or expired token".into()));
    }

    Ok(next.run(req).await)
}
