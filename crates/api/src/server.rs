//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 的 DI 容器持有并调用。

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use shingo_manager::dispatch::DispatchManager;

use crate::routes::{signal, trade, worker};

// ============================================================
//  共享应用状态
// ============================================================

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - `manager` 与 `api_token` 在服务启动前由 DI 容器注入，生命周期与进程等同。
#[derive(Clone)]
pub struct AppState {
    /// 调度管理器 (Facade)
    pub manager: Arc<DispatchManager>,
    /// 部署级静态访问令牌
    pub api_token: Arc<String>,
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Shingo 信号调度 API",
        version = "0.1.0",
        description = "Shingo 信号调度引擎的 RESTful API 网关。提供交易信号摄入、Worker 认领/心跳、状态迁移与成交对账功能。",
        contact(name = "Shingo Team"),
        license(name = "MIT")
    ),
    tags(
        (name = "信号 (Signal)", description = "信号摄入、状态迁移与运维查询 API"),
        (name = "执行 (Worker)", description = "Worker 认领、心跳续租与执行回报 API"),
        (name = "成交 (Trade)", description = "成交台账只读查询 API")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入全局 Bearer Token 鉴权方案。
///
/// 注册后，Swagger UI 页面顶部将显示 🔒 Authorize 按钮，
/// 填入部署令牌即可对所有标记了 `security` 的接口进行调试。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        // 若 components 不存在则创建
        let components = openapi.components.get_or_insert_with(Default::default);

        components.add_security_scheme(
            "bearer_token",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("在此处填入部署配置中的 api_token（无需 'Bearer ' 前缀）"))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// 健康检查，供编排系统探活，不要求鉴权
async fn healthz() -> &'static str {
    "ok"
}

/// 构建完整的 axum 应用路由树。
///
/// 独立于端口绑定，便于集成测试在随机端口上挂载同一棵路由树。
pub fn build_router(state: AppState) -> Router {
    // 所有业务路由共享同一个 Bearer Token 鉴权中间件
    let protected_router = OpenApiRouter::new()
        .routes(routes!(signal::submit_signal))
        .routes(routes!(signal::list_signals))
        .routes(routes!(signal::get_signal))
        .routes(routes!(signal::list_signal_dispatches))
        .routes(routes!(signal::transition_signal))
        .routes(routes!(worker::claim))
        .routes(routes!(worker::heartbeat))
        .routes(routes!(worker::record_execution))
        .routes(routes!(trade::list_trades))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(protected_router)
        .with_state(state)
        .split_for_parts();

    // CORS (运维面板跨域访问)
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .route("/healthz", axum::routing::get(healthz))
        .layer(cors)
}

/// 构建路由树并启动 HTTP 监听。
///
/// # Arguments
/// * `state` - 由外部 DI 容器注入的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
pub async fn start_server(
    state: AppState,
    bind_addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    tracing::info!("🚀 Shingo API Server listening on {}", bind_addr);
    tracing::info!("📖 Swagger UI: http://{}/swagger-ui/", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
