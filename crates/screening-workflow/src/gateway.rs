//! AI分析网关
//!
//! 调用外部评分服务并将其输出规范化为AI分析结论；
//! 超时与暂时性故障返回可重试错误，畸形响应返回永久性错误

use async_trait::async_trait;
use chrono::Utc;
use screening_core::utils::is_valid_risk_score;
use screening_core::{
    DiagnosisCategory, Finding, ImageModality, ImageRecord, RegionAnnotation, Result,
    ScreeningError,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 单次评分请求的超时时间
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// 评分请求
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRequest {
    pub image_id: Uuid,
    pub storage_reference: String, // 网关是唯一解引用此句柄的组件
    pub modality: ImageModality,
}

/// 评分服务响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub risk_score: f64,
    pub category_scores: HashMap<DiagnosisCategory, f64>,
    #[serde(default)]
    pub regions: Vec<RegionAnnotation>,
    pub model_name: String,
    pub model_version: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// 评分服务客户端接口
#[async_trait]
pub trait ScorerClient: Send + Sync {
    /// 对一张影像评分
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse>;
}

/// AI分析网关
pub struct AnalysisGateway {
    client: Arc<dyn ScorerClient>,
    config: GatewayConfig,
}

impl AnalysisGateway {
    pub fn new(client: Arc<dyn ScorerClient>, config: GatewayConfig) -> Self {
        Self { client, config }
    }

    /// 分析一张影像
    ///
    /// 设计为幂等：对同一影像重复调用总是产生新的分析结论，不改写历史
    pub async fn analyze(&self, image: &ImageRecord) -> Result<Finding> {
        let request = ScoreRequest {
            image_id: image.id,
            storage_reference: image.storage_reference.clone(),
            modality: image.modality.clone(),
        };

        tracing::debug!("Requesting score for image {}", image.id);

        let response = tokio::time::timeout(self.config.request_timeout, self.client.score(&request))
            .await
            .map_err(|_| {
                ScreeningError::AnalysisUnavailable(format!(
                    "影像 {} 评分超时 ({:?})",
                    image.id, self.config.request_timeout
                ))
            })??;

        let predicted_category = validate_response(image.id, &response)?;

        Ok(Finding {
            id: Uuid::new_v4(),
            image_id: image.id,
            risk_score: response.risk_score,
            predicted_category,
            category_scores: response.category_scores,
            regions: response.regions,
            model_name: response.model_name,
            model_version: response.model_version,
            notes: response.notes,
            created_at: Utc::now(),
        })
    }
}

/// 校验评分响应并返回置信度最高的分类
fn validate_response(image_id: Uuid, response: &ScoreResponse) -> Result<DiagnosisCategory> {
    if !is_valid_risk_score(response.risk_score) {
        return Err(ScreeningError::AnalysisRejected(format!(
            "影像 {} 的风险评分 {} 超出 [0,1]",
            image_id, response.risk_score
        )));
    }

    for (category, score) in &response.category_scores {
        if !is_valid_risk_score(*score) {
            return Err(ScreeningError::AnalysisRejected(format!(
                "影像 {} 的分类 {} 置信度 {} 超出 [0,1]",
                image_id, category, score
            )));
        }
    }

    for region in &response.regions {
        if !is_valid_risk_score(region.confidence) {
            return Err(ScreeningError::AnalysisRejected(format!(
                "影像 {} 的区域标注置信度 {} 超出 [0,1]",
                image_id, region.confidence
            )));
        }
    }

    response
        .category_scores
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(category, _)| *category)
        .ok_or_else(|| {
            ScreeningError::AnalysisRejected(format!("影像 {} 的响应缺少分类置信度", image_id))
        })
}

/// HTTP评分服务客户端
pub struct HttpScorerClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpScorerClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ScorerClient for HttpScorerClient {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse> {
        let url = format!("{}/score", self.endpoint.trim_end_matches('/'));
        let mut http_request = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await.map_err(|e| {
            ScreeningError::AnalysisUnavailable(format!("评分服务请求失败: {}", e))
        })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScreeningError::AnalysisRejected(format!(
                "评分服务拒绝请求 ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(ScreeningError::AnalysisUnavailable(format!(
                "评分服务返回 {}",
                status
            )));
        }

        response.json::<ScoreResponse>().await.map_err(|e| {
            ScreeningError::AnalysisRejected(format!("评分服务响应无法解析: {}", e))
        })
    }
}

/// 内置模拟评分器
///
/// 从存储句柄哈希派生确定性的评分结果，用于本地运行和测试；
/// 偏向良性分布，与真实筛查人群一致
pub struct SimulatedScorer {
    pub latency: Duration,
    pub model_version: String,
}

impl Default for SimulatedScorer {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(50),
            model_version: "1.0.0".into(),
        }
    }
}

impl SimulatedScorer {
    fn derive(&self, reference: &str) -> (DiagnosisCategory, f64, f64) {
        let digest = Sha256::digest(reference.as_bytes());

        let category = match digest[0] % 100 {
            0..=54 => DiagnosisCategory::Nilm,
            55..=69 => DiagnosisCategory::AscUs,
            70..=79 => DiagnosisCategory::Lsil,
            80..=86 => DiagnosisCategory::AscH,
            87..=92 => DiagnosisCategory::Hsil,
            93..=95 => DiagnosisCategory::Agc,
            96..=97 => DiagnosisCategory::Scc,
            98 => DiagnosisCategory::Adenocarcinoma,
            _ => DiagnosisCategory::Unsatisfactory,
        };

        let confidence = 0.70 + (digest[1] as f64 / 255.0) * 0.28;
        let risk_base = match category {
            DiagnosisCategory::Nilm | DiagnosisCategory::Unsatisfactory => 0.05,
            DiagnosisCategory::AscUs => 0.30,
            DiagnosisCategory::Lsil | DiagnosisCategory::Agc => 0.50,
            DiagnosisCategory::AscH => 0.65,
            DiagnosisCategory::Hsil => 0.80,
            DiagnosisCategory::Scc | DiagnosisCategory::Adenocarcinoma => 0.92,
        };
        let risk = (risk_base + (digest[2] as f64 / 255.0) * 0.07).min(1.0);

        (category, confidence, risk)
    }
}

#[async_trait]
impl ScorerClient for SimulatedScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse> {
        tokio::time::sleep(self.latency).await;

        let (category, confidence, risk) = self.derive(&request.storage_reference);

        let mut category_scores = HashMap::new();
        category_scores.insert(category, confidence);
        if category != DiagnosisCategory::Nilm {
            category_scores.insert(DiagnosisCategory::Nilm, (1.0 - confidence) * 0.8);
        }
        if category != DiagnosisCategory::AscUs {
            category_scores.insert(DiagnosisCategory::AscUs, (1.0 - confidence) * 0.2);
        }

        let digest = Sha256::digest(request.storage_reference.as_bytes());
        let regions = if risk > 0.5 {
            vec![RegionAnnotation {
                x: digest[3] as f64 / 255.0 * 0.8,
                y: digest[4] as f64 / 255.0 * 0.8,
                width: 0.1 + digest[5] as f64 / 255.0 * 0.1,
                height: 0.1 + digest[6] as f64 / 255.0 * 0.1,
                confidence,
                label: Some(category.as_str().to_string()),
            }]
        } else {
            vec![]
        };

        let mut notes = format!(
            "Simulated inference complete. Primary finding: {} ({:.1}% confidence).",
            category.as_str().to_uppercase(),
            confidence * 100.0
        );
        if confidence < 0.75 {
            notes.push_str(" Low confidence - manual review recommended.");
        }

        Ok(ScoreResponse {
            risk_score: risk,
            category_scores,
            regions,
            model_name: "sim-triage".into(),
            model_version: self.model_version.clone(),
            notes: Some(notes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(reference: &str) -> ImageRecord {
        ImageRecord {
            id: Uuid::new_v4(),
            episode_id: Uuid::new_v4(),
            modality: ImageModality::PapSmear,
            storage_reference: reference.into(),
            original_filename: None,
            file_size: None,
            mime_type: None,
            uploaded_at: Utc::now(),
        }
    }

    struct SlowScorer {
        delay: Duration,
    }

    #[async_trait]
    impl ScorerClient for SlowScorer {
        async fn score(&self, request: &ScoreRequest) -> Result<ScoreResponse> {
            tokio::time::sleep(self.delay).await;
            SimulatedScorer::default().score(request).await
        }
    }

    struct BadScorer;

    #[async_trait]
    impl ScorerClient for BadScorer {
        async fn score(&self, _request: &ScoreRequest) -> Result<ScoreResponse> {
            Ok(ScoreResponse {
                risk_score: 1.7,
                category_scores: HashMap::from([(DiagnosisCategory::Nilm, 0.9)]),
                regions: vec![],
                model_name: "bad".into(),
                model_version: "0".into(),
                notes: None,
            })
        }
    }

    #[tokio::test]
    async fn test_repeat_analysis_appends_new_findings() {
        let gateway = AnalysisGateway::new(
            Arc::new(SimulatedScorer::default()),
            GatewayConfig::default(),
        );
        let image = sample_image("blob://pap/0001");

        let first = gateway.analyze(&image).await.unwrap();
        let second = gateway.analyze(&image).await.unwrap();

        // 两次分析产生两条独立结论，互不覆盖
        assert_ne!(first.id, second.id);
        assert_eq!(first.image_id, second.image_id);
        assert_eq!(first.risk_score, second.risk_score);
        assert!(is_valid_risk_score(first.risk_score));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable_unavailable() {
        let gateway = AnalysisGateway::new(
            Arc::new(SlowScorer {
                delay: Duration::from_secs(120),
            }),
            GatewayConfig {
                request_timeout: Duration::from_secs(5),
            },
        );

        let err = gateway.analyze(&sample_image("blob://pap/0002")).await.unwrap_err();
        assert!(matches!(err, ScreeningError::AnalysisUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_rejected() {
        let gateway = AnalysisGateway::new(Arc::new(BadScorer), GatewayConfig::default());

        let err = gateway.analyze(&sample_image("blob://pap/0003")).await.unwrap_err();
        assert!(matches!(err, ScreeningError::AnalysisRejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_simulated_scores_are_deterministic() {
        let scorer = SimulatedScorer::default();
        let request = ScoreRequest {
            image_id: Uuid::new_v4(),
            storage_reference: "blob://pap/0004".into(),
            modality: ImageModality::PapSmear,
        };

        let first = scorer.score(&request).await.unwrap();
        let second = scorer.score(&request).await.unwrap();
        assert_eq!(first.risk_score, second.risk_score);
        assert!(!first.category_scores.is_empty());
    }
}
