//! 筛查工作流服务器主程序

mod config;

use clap::Parser;
use screening_core::Result;
use screening_database::{DatabasePool, DatabaseQueries};
use screening_web::WebServer;
use screening_workflow::{
    AnalysisGateway, GatewayConfig, HttpScorerClient, ReviewConfig, ScorerClient, SimulatedScorer,
    WorkflowConfig, WorkflowEngine,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::ScreeningConfig;

/// 筛查服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "screening-server")]
#[command(about = "宫颈癌筛查工作流与审计服务器")]
struct Args {
    /// 服务器端口
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .init();

    info!("启动筛查工作流服务器...");

    let mut config = ScreeningConfig::load(args.config.as_deref())?;
    config.server.port = args.port;
    config.validate()?;

    info!("筛查服务器配置:");
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  评审锁超时: {}s", config.workflow.review_lock_timeout_secs);
    info!(
        "  评分服务: {}",
        config.scorer.endpoint.as_deref().unwrap_or("内置模拟评分器")
    );

    // 按需初始化持久化层
    if config.database.enabled {
        let pool =
            DatabasePool::connect(&config.database.url, config.database.max_connections).await?;
        DatabaseQueries::new(&pool).create_tables().await?;
        pool.ping().await?;
        info!("数据库持久化已启用");
    }

    // 组装评分客户端与工作流引擎
    let scorer: Arc<dyn ScorerClient> = match &config.scorer.endpoint {
        Some(endpoint) => Arc::new(HttpScorerClient::new(
            endpoint.clone(),
            config.scorer.api_key.clone(),
        )),
        None => Arc::new(SimulatedScorer {
            latency: Duration::from_millis(config.scorer.simulated_latency_ms),
            model_version: "1.0.0".into(),
        }),
    };
    let gateway = AnalysisGateway::new(
        scorer,
        GatewayConfig {
            request_timeout: Duration::from_secs(config.workflow.analyze_timeout_secs),
        },
    );
    let engine = Arc::new(WorkflowEngine::new(
        gateway,
        WorkflowConfig {
            review: ReviewConfig {
                lock_timeout: Duration::from_secs(config.workflow.review_lock_timeout_secs),
            },
            analyze_retry_attempts: config.workflow.analyze_retry_attempts,
            analyze_retry_backoff: Duration::from_millis(config.workflow.analyze_retry_backoff_ms),
        },
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| screening_core::ScreeningError::Config(format!("监听地址无效: {}", e)))?;

    // 启动Web服务器
    let server = WebServer::new(addr, engine);
    if let Err(e) = server.run().await {
        error!("服务器运行失败: {}", e);
        return Err(e);
    }

    Ok(())
}
