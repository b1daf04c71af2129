//! 错误定义模块

use thiserror::Error;

/// 筛查系统统一错误类型
#[derive(Error, Debug)]
pub enum ScreeningError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("校验错误: {0}")]
    Validation(String),

    #[error("未授权操作: {0}")]
    Unauthorized(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效状态转换: 状态 {from} 不接受事件 {event}, 当前可用事件: [{allowed}]")]
    InvalidTransition {
        from: String,
        event: String,
        allowed: String,
    },

    #[error("并发修改冲突: {0}")]
    ConcurrentModification(String),

    #[error("诊断已被其他医生锁定评审: {0}")]
    AlreadyUnderReview(String),

    #[error("当前用户未持有评审锁: {0}")]
    NotLockHolder(String),

    #[error("诊断状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("AI分析服务暂时不可用: {0}")]
    AnalysisUnavailable(String),

    #[error("AI分析请求被拒绝: {0}")]
    AnalysisRejected(String),

    #[error("审计日志写入失败: {0}")]
    AuditWriteFailure(String),

    #[error("患者已存在进行中的筛查周期: {0}")]
    ActiveEpisodeExists(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl ScreeningError {
    /// 判断错误是否可以自动重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScreeningError::AnalysisUnavailable(_) | ScreeningError::ConcurrentModification(_)
        )
    }
}

/// 筛查系统统一结果类型
pub type Result<T> = std::result::Result<T, ScreeningError>;
