//! 审计条目定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 审计事件严重程度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,     // 常规操作
    Warning,  // 被拒绝的尝试、可重试失败
    Critical, // 合规审查重点事件
}

/// 审计条目
///
/// 一旦写入不再更新或删除；按 entry_id 排序可重建筛查周期的完整历史
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: u64, // 全局单调递增计数器，与墙上时钟无关
    pub episode_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub event: String, // 点分事件名，如 "episode.created"
    pub severity: AuditSeverity,
    pub payload: serde_json::Value, // 转换前后状态的结构化快照
    pub prev_hash: String,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>, // 仅供展示，排序不依赖它
}

/// 待写入的审计记录
///
/// 计数器与链哈希由审计日志在写入时补全
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub episode_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub event: String,
    pub severity: AuditSeverity,
    pub payload: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(
        episode_id: Uuid,
        actor_id: Option<Uuid>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            episode_id,
            actor_id,
            event: event.into(),
            severity: AuditSeverity::Info,
            payload,
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}
