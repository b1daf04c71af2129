//! 数据库模型

use chrono::{DateTime, Utc};
use screening_audit::{AuditEntry, AuditSeverity};
use screening_core::models::*;
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 周期状态与数据库字符串的映射
pub fn episode_status_to_db(status: &EpisodeStatus) -> &'static str {
    match status {
        EpisodeStatus::Created => "CREATED",
        EpisodeStatus::ImagesPending => "IMAGES_PENDING",
        EpisodeStatus::AnalysisReady => "ANALYSIS_READY",
        EpisodeStatus::AnalysisComplete => "ANALYSIS_COMPLETE",
        EpisodeStatus::ReviewPending => "REVIEW_PENDING",
        EpisodeStatus::Finalized => "FINALIZED",
        EpisodeStatus::Rejected => "REJECTED",
        EpisodeStatus::Discarded => "DISCARDED",
    }
}

pub fn episode_status_from_db(status: &str) -> EpisodeStatus {
    match status {
        "CREATED" => EpisodeStatus::Created,
        "IMAGES_PENDING" => EpisodeStatus::ImagesPending,
        "ANALYSIS_READY" => EpisodeStatus::AnalysisReady,
        "ANALYSIS_COMPLETE" => EpisodeStatus::AnalysisComplete,
        "REVIEW_PENDING" => EpisodeStatus::ReviewPending,
        "FINALIZED" => EpisodeStatus::Finalized,
        "REJECTED" => EpisodeStatus::Rejected,
        "DISCARDED" => EpisodeStatus::Discarded,
        _ => EpisodeStatus::Created, // 默认状态
    }
}

pub fn diagnosis_status_to_db(status: &DiagnosisStatus) -> &'static str {
    match status {
        DiagnosisStatus::PendingReview => "PENDING_REVIEW",
        DiagnosisStatus::UnderReview => "UNDER_REVIEW",
        DiagnosisStatus::Finalized => "FINALIZED",
        DiagnosisStatus::Rejected => "REJECTED",
    }
}

pub fn diagnosis_status_from_db(status: &str) -> DiagnosisStatus {
    match status {
        "PENDING_REVIEW" => DiagnosisStatus::PendingReview,
        "UNDER_REVIEW" => DiagnosisStatus::UnderReview,
        "FINALIZED" => DiagnosisStatus::Finalized,
        "REJECTED" => DiagnosisStatus::Rejected,
        _ => DiagnosisStatus::PendingReview,
    }
}

pub fn modality_to_db(modality: &ImageModality) -> &'static str {
    match modality {
        ImageModality::PapSmear => "pap_smear",
        ImageModality::Colposcopy => "colposcopy",
        ImageModality::Other => "other",
    }
}

pub fn modality_from_db(modality: &str) -> ImageModality {
    match modality {
        "pap_smear" => ImageModality::PapSmear,
        "colposcopy" => ImageModality::Colposcopy,
        _ => ImageModality::Other,
    }
}

pub fn category_to_db(category: &DiagnosisCategory) -> &'static str {
    category.as_str()
}

pub fn category_from_db(category: &str) -> Option<DiagnosisCategory> {
    match category {
        "nilm" => Some(DiagnosisCategory::Nilm),
        "asc_us" => Some(DiagnosisCategory::AscUs),
        "asc_h" => Some(DiagnosisCategory::AscH),
        "lsil" => Some(DiagnosisCategory::Lsil),
        "hsil" => Some(DiagnosisCategory::Hsil),
        "scc" => Some(DiagnosisCategory::Scc),
        "agc" => Some(DiagnosisCategory::Agc),
        "adenocarcinoma" => Some(DiagnosisCategory::Adenocarcinoma),
        "unsatisfactory" => Some(DiagnosisCategory::Unsatisfactory),
        _ => None,
    }
}

pub fn severity_to_db(severity: &AuditSeverity) -> &'static str {
    match severity {
        AuditSeverity::Info => "info",
        AuditSeverity::Warning => "warning",
        AuditSeverity::Critical => "critical",
    }
}

pub fn severity_from_db(severity: &str) -> AuditSeverity {
    match severity {
        "warning" => AuditSeverity::Warning,
        "critical" => AuditSeverity::Critical,
        _ => AuditSeverity::Info,
    }
}

/// 数据库筛查周期表
#[derive(Debug, FromRow)]
pub struct DbEpisode {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub accession_number: String,
    pub status: String, // 存储为字符串，转换为EpisodeStatus枚举
    pub reason: Option<String>,
    pub clinical_notes: Option<String>,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbEpisode> for Episode {
    fn from(db_episode: DbEpisode) -> Self {
        Episode {
            id: db_episode.id,
            patient_id: db_episode.patient_id,
            accession_number: db_episode.accession_number,
            status: episode_status_from_db(&db_episode.status),
            reason: db_episode.reason,
            clinical_notes: db_episode.clinical_notes,
            version: db_episode.version as u64,
            created_at: db_episode.created_at,
            updated_at: db_episode.updated_at,
        }
    }
}

/// 数据库影像表
#[derive(Debug, FromRow)]
pub struct DbImage {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub modality: String,
    pub storage_reference: String,
    pub original_filename: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<DbImage> for ImageRecord {
    fn from(db_image: DbImage) -> Self {
        ImageRecord {
            id: db_image.id,
            episode_id: db_image.episode_id,
            modality: modality_from_db(&db_image.modality),
            storage_reference: db_image.storage_reference,
            original_filename: db_image.original_filename,
            file_size: db_image.file_size,
            mime_type: db_image.mime_type,
            uploaded_at: db_image.uploaded_at,
        }
    }
}

/// 数据库AI分析结论表
#[derive(Debug, FromRow)]
pub struct DbFinding {
    pub id: Uuid,
    pub image_id: Uuid,
    pub risk_score: f64,
    pub predicted_category: String,
    pub category_scores: serde_json::Value, // JSONB
    pub regions: serde_json::Value,         // JSONB
    pub model_name: String,
    pub model_version: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbFinding> for Finding {
    fn from(db_finding: DbFinding) -> Self {
        Finding {
            id: db_finding.id,
            image_id: db_finding.image_id,
            risk_score: db_finding.risk_score,
            predicted_category: category_from_db(&db_finding.predicted_category)
                .unwrap_or(DiagnosisCategory::Unsatisfactory),
            category_scores: serde_json::from_value(db_finding.category_scores)
                .unwrap_or_default(),
            regions: serde_json::from_value(db_finding.regions).unwrap_or_default(),
            model_name: db_finding.model_name,
            model_version: db_finding.model_version,
            notes: db_finding.notes,
            created_at: db_finding.created_at,
        }
    }
}

/// 数据库诊断表
#[derive(Debug, FromRow)]
pub struct DbDiagnosis {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub status: String,
    pub source_findings: serde_json::Value, // JSONB uuid数组
    pub ai_category: Option<String>,
    pub ai_risk_score: Option<f64>,
    pub ai_notes: Option<String>,
    pub reviewer_id: Option<Uuid>,
    pub agrees_with_ai: Option<bool>,
    pub final_category: Option<String>,
    pub clinical_note: Option<String>,
    pub follow_up_recommended: bool,
    pub follow_up_notes: Option<String>,
    pub lock_holder: Option<Uuid>,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDiagnosis> for Diagnosis {
    fn from(db_diagnosis: DbDiagnosis) -> Self {
        Diagnosis {
            id: db_diagnosis.id,
            episode_id: db_diagnosis.episode_id,
            status: diagnosis_status_from_db(&db_diagnosis.status),
            source_findings: serde_json::from_value(db_diagnosis.source_findings)
                .unwrap_or_default(),
            ai_category: db_diagnosis.ai_category.as_deref().and_then(category_from_db),
            ai_risk_score: db_diagnosis.ai_risk_score,
            ai_notes: db_diagnosis.ai_notes,
            reviewer_id: db_diagnosis.reviewer_id,
            agrees_with_ai: db_diagnosis.agrees_with_ai,
            final_category: db_diagnosis.final_category.as_deref().and_then(category_from_db),
            clinical_note: db_diagnosis.clinical_note,
            follow_up_recommended: db_diagnosis.follow_up_recommended,
            follow_up_notes: db_diagnosis.follow_up_notes,
            lock_holder: db_diagnosis.lock_holder,
            lock_acquired_at: db_diagnosis.lock_acquired_at,
            finalized_at: db_diagnosis.finalized_at,
            created_at: db_diagnosis.created_at,
        }
    }
}

/// 数据库审计条目表
#[derive(Debug, FromRow)]
pub struct DbAuditEntry {
    pub entry_id: i64,
    pub episode_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub event: String,
    pub severity: String,
    pub payload: serde_json::Value,
    pub prev_hash: String,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl From<DbAuditEntry> for AuditEntry {
    fn from(db_entry: DbAuditEntry) -> Self {
        AuditEntry {
            entry_id: db_entry.entry_id as u64,
            episode_id: db_entry.episode_id,
            actor_id: db_entry.actor_id,
            event: db_entry.event,
            severity: severity_from_db(&db_entry.severity),
            payload: db_entry.payload,
            prev_hash: db_entry.prev_hash,
            entry_hash: db_entry.entry_hash,
            timestamp: db_entry.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_status_roundtrip() {
        for status in [
            EpisodeStatus::Created,
            EpisodeStatus::ImagesPending,
            EpisodeStatus::AnalysisReady,
            EpisodeStatus::AnalysisComplete,
            EpisodeStatus::ReviewPending,
            EpisodeStatus::Finalized,
            EpisodeStatus::Rejected,
            EpisodeStatus::Discarded,
        ] {
            assert_eq!(episode_status_from_db(episode_status_to_db(&status)), status);
        }
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(category_from_db("hsil"), Some(DiagnosisCategory::Hsil));
        assert_eq!(category_from_db("unknown"), None);
        assert_eq!(category_to_db(&DiagnosisCategory::AscUs), "asc_us");
    }

    #[test]
    fn test_db_episode_conversion() {
        let db_episode = DbEpisode {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            accession_number: "SCR-20260115-0A1B2C3D".into(),
            status: "REVIEW_PENDING".into(),
            reason: None,
            clinical_notes: None,
            is_active: true,
            version: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let episode: Episode = db_episode.into();
        assert_eq!(episode.status, EpisodeStatus::ReviewPending);
        assert_eq!(episode.version, 5);
    }
}
