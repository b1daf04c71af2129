//! # 筛查工作流模块
//!
//! 提供宫颈癌筛查周期的完整工作流管理功能，包括：
//! - 周期状态机：管理筛查周期从影像采集到最终诊断的生命周期
//! - 评审协调器：保证诊断评审的互斥与签署的原子性
//! - AI分析网关：调用外部评分服务并规范化其输出
//! - 工作流引擎：以工作单元方式串联状态变更与审计写入

pub mod gateway;
pub mod orchestrator;
pub mod review;
pub mod state_machine;
pub mod store;

// 重新导出主要类型
pub use gateway::{
    AnalysisGateway, GatewayConfig, HttpScorerClient, ScoreRequest, ScoreResponse, ScorerClient,
    SimulatedScorer,
};
pub use orchestrator::{
    events, EpisodeDetail, NewImageUpload, WorkflowConfig, WorkflowEngine,
};
pub use review::{FinalizeRequest, ReviewConfig, ReviewCoordinator, ReviewLock};
pub use state_machine::{EpisodeEvent, EpisodeStateMachine};
pub use store::EpisodeStore;
