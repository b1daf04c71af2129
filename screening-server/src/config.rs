//! 配置管理
//!
//! 支持配置文件与 SCREENING_* 环境变量覆盖，未提供时使用内置默认值

use config::{Config, Environment, File};
use screening_core::{Result, ScreeningError};
use serde::{Deserialize, Serialize};

/// 筛查系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 工作流配置
    pub workflow: WorkflowSettings,
    /// 评分服务配置
    pub scorer: ScorerSettings,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 是否启用持久化
    pub enabled: bool,
    /// 连接字符串
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "postgres://localhost/screening".into(),
            max_connections: 10,
        }
    }
}

/// 工作流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// 评审锁超时（秒），到期后锁可被回收
    pub review_lock_timeout_secs: u64,
    /// 单次评分请求超时（秒）
    pub analyze_timeout_secs: u64,
    /// AI分析暂时性失败的最大尝试次数
    pub analyze_retry_attempts: u32,
    /// 重试退避起始间隔（毫秒）
    pub analyze_retry_backoff_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            review_lock_timeout_secs: 15 * 60,
            analyze_timeout_secs: 30,
            analyze_retry_attempts: 3,
            analyze_retry_backoff_ms: 500,
        }
    }
}

/// 评分服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerSettings {
    /// 外部评分服务地址，缺省时使用内置模拟评分器
    pub endpoint: Option<String>,
    /// 评分服务凭证
    pub api_key: Option<String>,
    /// 模拟评分器延迟（毫秒）
    pub simulated_latency_ms: u64,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            simulated_latency_ms: 50,
        }
    }
}

impl ScreeningConfig {
    /// 加载配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Config::try_from(&ScreeningConfig::default())
            .map_err(|e| ScreeningError::Config(e.to_string()))?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(Environment::with_prefix("SCREENING").separator("__"));

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ScreeningError::Config(e.to_string()))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ScreeningError::Config("监听端口不能为0".into()));
        }
        if self.workflow.review_lock_timeout_secs == 0 {
            return Err(ScreeningError::Config("评审锁超时必须大于0".into()));
        }
        if self.workflow.analyze_retry_attempts == 0 {
            return Err(ScreeningError::Config("分析尝试次数至少为1".into()));
        }
        if self.database.enabled && self.database.url.trim().is_empty() {
            return Err(ScreeningError::Config("启用持久化时必须提供数据库连接串".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScreeningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.workflow.analyze_retry_attempts, 3);
        assert!(config.scorer.endpoint.is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ScreeningConfig::default();
        config.workflow.analyze_retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ScreeningConfig::default();
        config.database.enabled = true;
        config.database.url = " ".into();
        assert!(config.validate().is_err());
    }
}
