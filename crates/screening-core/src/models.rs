//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 筛查周期
///
/// 一名患者从影像采集到最终诊断的一次完整筛查流程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub accession_number: String, // 筛查登记号
    pub status: EpisodeStatus,
    pub reason: Option<String>,         // 筛查原因
    pub clinical_notes: Option<String>, // 临床背景说明
    pub version: u64,                   // 乐观并发版本号
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// 周期是否处于活动状态（未最终化且未作废）
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// 筛查周期状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EpisodeStatus {
    Created,          // 已创建
    ImagesPending,    // 等待影像上传
    AnalysisReady,    // 可进行AI分析
    AnalysisComplete, // AI分析完成
    ReviewPending,    // 等待医生评审
    Finalized,        // 已最终化
    Rejected,         // AI结果被驳回
    Discarded,        // 已作废
}

impl EpisodeStatus {
    /// 终止状态不再接受任何事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Finalized | EpisodeStatus::Discarded)
    }
}

/// 筛查影像类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImageModality {
    PapSmear,   // 宫颈涂片
    Colposcopy, // 阴道镜
    Other,      // 其他
}

/// 诊断影像记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub modality: ImageModality,
    pub storage_reference: String, // 外部对象存储的不透明句柄
    pub original_filename: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// 感兴趣区域标注
///
/// 与渲染方式无关的矩形区域描述，任何前端都可以据此绘制热力图叠加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionAnnotation {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64, // [0,1]
    pub label: Option<String>,
}

/// AI分析结论
///
/// 单张影像的一次AI风险评估结果，创建后不可修改；
/// 重新分析总是产生新的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub image_id: Uuid,
    pub risk_score: f64, // [0,1]
    pub predicted_category: DiagnosisCategory,
    pub category_scores: HashMap<DiagnosisCategory, f64>, // 各分类的置信度
    pub regions: Vec<RegionAnnotation>,
    pub model_name: String,
    pub model_version: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 宫颈细胞学分类 (Bethesda系统)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisCategory {
    Nilm,           // 未见上皮内病变或恶性病变
    AscUs,          // 意义不明的非典型鳞状细胞
    AscH,           // 不除外高级别病变的非典型鳞状细胞
    Lsil,           // 低级别鳞状上皮内病变
    Hsil,           // 高级别鳞状上皮内病变
    Scc,            // 鳞状细胞癌
    Agc,            // 非典型腺细胞
    Adenocarcinoma, // 腺癌
    Unsatisfactory, // 标本不满意
}

impl DiagnosisCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisCategory::Nilm => "nilm",
            DiagnosisCategory::AscUs => "asc_us",
            DiagnosisCategory::AscH => "asc_h",
            DiagnosisCategory::Lsil => "lsil",
            DiagnosisCategory::Hsil => "hsil",
            DiagnosisCategory::Scc => "scc",
            DiagnosisCategory::Agc => "agc",
            DiagnosisCategory::Adenocarcinoma => "adenocarcinoma",
            DiagnosisCategory::Unsatisfactory => "unsatisfactory",
        }
    }

    /// 高级别异常需要紧急复核
    pub fn is_high_grade(&self) -> bool {
        matches!(
            self,
            DiagnosisCategory::Hsil
                | DiagnosisCategory::Scc
                | DiagnosisCategory::Adenocarcinoma
        )
    }
}

impl std::fmt::Display for DiagnosisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 诊断状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiagnosisStatus {
    PendingReview, // 等待评审
    UnderReview,   // 评审中
    Finalized,     // 已最终化
    Rejected,      // 已驳回
}

impl DiagnosisStatus {
    /// 已做出决定的诊断不可再修改
    pub fn is_decided(&self) -> bool {
        matches!(self, DiagnosisStatus::Finalized | DiagnosisStatus::Rejected)
    }
}

/// 诊断记录
///
/// 一个筛查周期的权威临床结论，必须经医生签署才能最终化；
/// 最终化或驳回后不可修改，修订以追加新诊断的方式进行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub status: DiagnosisStatus,
    pub source_findings: Vec<Uuid>, // 引用的AI分析结论

    // AI初筛快照
    pub ai_category: Option<DiagnosisCategory>,
    pub ai_risk_score: Option<f64>,
    pub ai_notes: Option<String>,

    // 医生评审结论
    pub reviewer_id: Option<Uuid>,
    pub agrees_with_ai: Option<bool>,
    pub final_category: Option<DiagnosisCategory>,
    pub clinical_note: Option<String>,
    pub follow_up_recommended: bool,
    pub follow_up_notes: Option<String>,

    // 评审锁快照（到期时间由评审协调器管理）
    pub lock_holder: Option<Uuid>,
    pub lock_acquired_at: Option<DateTime<Utc>>,

    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 操作者身份
///
/// 由外部身份系统签发，角色声明已在边界处验证
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

/// 操作者角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,       // 系统管理员
    Pathologist, // 病理医生
    Clinician,   // 临床医生
    Technician,  // 技师
    Viewer,      // 只读用户
}

impl ActorRole {
    /// 评审操作仅限临床医生和病理医生
    pub fn can_review(&self) -> bool {
        matches!(self, ActorRole::Clinician | ActorRole::Pathologist)
    }

    /// 创建、作废筛查周期和发起分析的权限
    pub fn can_manage_episodes(&self) -> bool {
        matches!(self, ActorRole::Clinician | ActorRole::Pathologist)
    }

    /// 上传影像的权限（技师在采集工作站上传）
    pub fn can_upload_images(&self) -> bool {
        matches!(
            self,
            ActorRole::Technician | ActorRole::Clinician | ActorRole::Pathologist
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Pathologist => "pathologist",
            ActorRole::Clinician => "clinician",
            ActorRole::Technician => "technician",
            ActorRole::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for ActorRole {
    type Err = crate::error::ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(ActorRole::Admin),
            "pathologist" => Ok(ActorRole::Pathologist),
            "clinician" => Ok(ActorRole::Clinician),
            "technician" => Ok(ActorRole::Technician),
            "viewer" => Ok(ActorRole::Viewer),
            other => Err(crate::error::ScreeningError::Validation(format!(
                "未知角色: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_active() {
        let statuses = [
            (EpisodeStatus::Created, true),
            (EpisodeStatus::ReviewPending, true),
            (EpisodeStatus::Rejected, true),
            (EpisodeStatus::Finalized, false),
            (EpisodeStatus::Discarded, false),
        ];

        for (status, active) in statuses {
            assert_eq!(!status.is_terminal(), active, "{:?}", status);
        }
    }

    #[test]
    fn test_review_roles() {
        assert!(ActorRole::Clinician.can_review());
        assert!(ActorRole::Pathologist.can_review());
        assert!(!ActorRole::Admin.can_review());
        assert!(!ActorRole::Technician.can_review());
        assert!(!ActorRole::Viewer.can_review());
    }

    #[test]
    fn test_category_serde_roundtrip() {
        let json = serde_json::to_string(&DiagnosisCategory::AscUs).unwrap();
        assert_eq!(json, "\"asc_us\"");

        let back: DiagnosisCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DiagnosisCategory::AscUs);
    }

    #[test]
    fn test_high_grade_categories() {
        assert!(DiagnosisCategory::Hsil.is_high_grade());
        assert!(DiagnosisCategory::Scc.is_high_grade());
        assert!(!DiagnosisCategory::Nilm.is_high_grade());
        assert!(!DiagnosisCategory::Lsil.is_high_grade());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("pathologist".parse::<ActorRole>().unwrap(), ActorRole::Pathologist);
        assert!("surgeon".parse::<ActorRole>().is_err());
    }
}
