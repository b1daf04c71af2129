//! Web服务器

use axum::{
    routing::{get, post},
    Router,
};
use screening_core::Result;
use screening_workflow::WorkflowEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{
    api_root, attach_image, begin_review, create_episode, discard_episode, finalize_diagnosis,
    get_episode, get_episode_history, health, query_audit, reject_diagnosis, release_review,
    request_reanalysis, run_analysis, verify_audit,
};

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, engine: Arc<WorkflowEngine>) -> Self {
        let app = Self::create_app(engine);
        Self { addr, app }
    }

    fn create_app(engine: Arc<WorkflowEngine>) -> Router {
        Router::new()
            // 根路径
            .route("/", get(api_root))

            // 健康检查
            .route("/health", get(health))

            // API路由
            .nest("/api/v1", api_routes())
            .with_state(engine)

            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| screening_core::ScreeningError::Internal(format!(
                "Web server exited: {}",
                e
            )))?;

        Ok(())
    }
}

/// API v1 路由
fn api_routes() -> Router<Arc<WorkflowEngine>> {
    Router::new()
        // 筛查周期操作
        .route("/episodes", post(create_episode))
        .route("/episodes/:id", get(get_episode))
        .route("/episodes/:id/images", post(attach_image))
        .route("/episodes/:id/analysis", post(run_analysis))
        .route("/episodes/:id/reanalysis", post(request_reanalysis))
        .route("/episodes/:id/discard", post(discard_episode))
        .route("/episodes/:id/history", get(get_episode_history))

        // 诊断评审操作
        .route("/diagnoses/:id/review", post(begin_review))
        .route("/diagnoses/:id/finalize", post(finalize_diagnosis))
        .route("/diagnoses/:id/reject", post(reject_diagnosis))
        .route("/diagnoses/:id/release", post(release_review))

        // 合规审计
        .route("/audit", get(query_audit))
        .route("/audit/verify", get(verify_audit))
}
