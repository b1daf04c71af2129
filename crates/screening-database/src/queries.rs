//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use screening_audit::AuditEntry;
use screening_core::{
    Diagnosis, Episode, EpisodeStatus, Finding, ImageRecord, Result, ScreeningError,
};
use uuid::Uuid;

/// 患者活动周期唯一性约束对应的索引名
const ACTIVE_EPISODE_INDEX: &str = "idx_episodes_active_patient";

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建筛查周期表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                accession_number VARCHAR(64) UNIQUE NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'CREATED',
                reason VARCHAR(255),
                clinical_notes TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScreeningError::Database(e.to_string()))?;

        // 创建影像表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS images (
                id UUID PRIMARY KEY,
                episode_id UUID NOT NULL REFERENCES episodes(id),
                modality VARCHAR(20) NOT NULL,
                storage_reference VARCHAR(512) NOT NULL,
                original_filename VARCHAR(255),
                file_size BIGINT,
                mime_type VARCHAR(50),
                uploaded_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScreeningError::Database(e.to_string()))?;

        // 创建AI分析结论表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS findings (
                id UUID PRIMARY KEY,
                image_id UUID NOT NULL REFERENCES images(id),
                risk_score DOUBLE PRECISION NOT NULL,
                predicted_category VARCHAR(20) NOT NULL,
                category_scores JSONB NOT NULL DEFAULT '{}',
                regions JSONB NOT NULL DEFAULT '[]',
                model_name VARCHAR(100) NOT NULL,
                model_version VARCHAR(100) NOT NULL,
                notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScreeningError::Database(e.to_string()))?;

        // 创建诊断表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS diagnoses (
                id UUID PRIMARY KEY,
                episode_id UUID NOT NULL REFERENCES episodes(id),
                status VARCHAR(20) NOT NULL DEFAULT 'PENDING_REVIEW',
                source_findings JSONB NOT NULL DEFAULT '[]',
                ai_category VARCHAR(20),
                ai_risk_score DOUBLE PRECISION,
                ai_notes TEXT,
                reviewer_id UUID,
                agrees_with_ai BOOLEAN,
                final_category VARCHAR(20),
                clinical_note TEXT,
                follow_up_recommended BOOLEAN NOT NULL DEFAULT FALSE,
                follow_up_notes TEXT,
                lock_holder UUID,
                lock_acquired_at TIMESTAMP WITH TIME ZONE,
                finalized_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScreeningError::Database(e.to_string()))?;

        // 创建审计条目表（计数器由审计日志分配，与墙上时钟无关）
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS audit_entries (
                entry_id BIGINT PRIMARY KEY,
                episode_id UUID NOT NULL,
                actor_id UUID,
                event VARCHAR(100) NOT NULL,
                severity VARCHAR(20) NOT NULL DEFAULT 'info',
                payload JSONB NOT NULL DEFAULT '{}',
                prev_hash CHAR(64) NOT NULL,
                entry_hash CHAR(64) NOT NULL,
                timestamp TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(|e| ScreeningError::Database(e.to_string()))?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            // 同一患者同时只允许一个活动周期，写入时由该唯一索引保证
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_episodes_active_patient ON episodes(patient_id) WHERE is_active",
            "CREATE INDEX IF NOT EXISTS idx_episodes_patient_id ON episodes(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status)",
            "CREATE INDEX IF NOT EXISTS idx_images_episode_id ON images(episode_id)",
            "CREATE INDEX IF NOT EXISTS idx_findings_image_id ON findings(image_id)",
            "CREATE INDEX IF NOT EXISTS idx_diagnoses_episode_id ON diagnoses(episode_id)",
            // 按周期顺序回放审计历史
            "CREATE INDEX IF NOT EXISTS idx_audit_episode_entry ON audit_entries(episode_id, entry_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_event ON audit_entries(event)",
            "CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_entries(actor_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| ScreeningError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    // ========== 筛查周期相关操作 ==========

    /// 写入新筛查周期
    ///
    /// 患者唯一活动周期约束由部分唯一索引在写入时强制
    pub async fn insert_episode(&self, episode: &Episode) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            INSERT INTO episodes (id, patient_id, accession_number, status, reason, clinical_notes, is_active, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#)
        .bind(episode.id)
        .bind(episode.patient_id)
        .bind(&episode.accession_number)
        .bind(episode_status_to_db(&episode.status))
        .bind(&episode.reason)
        .bind(&episode.clinical_notes)
        .bind(episode.is_active())
        .bind(episode.version as i64)
        .bind(episode.created_at)
        .bind(episode.updated_at)
        .execute(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.constraint() == Some(ACTIVE_EPISODE_INDEX) => {
                ScreeningError::ActiveEpisodeExists(format!(
                    "患者 {} 已有进行中的筛查周期",
                    episode.patient_id
                ))
            }
            _ => ScreeningError::Database(e.to_string()),
        })?;

        Ok(())
    }

    /// 根据ID查找筛查周期
    pub async fn get_episode_by_id(&self, id: &Uuid) -> Result<Option<Episode>> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbEpisode>("SELECT * FROM episodes WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(result.map(Episode::from))
    }

    /// 条件写入周期状态
    ///
    /// 版本号不匹配时不更新任何行，返回 ConcurrentModification
    pub async fn update_episode_status(
        &self,
        id: &Uuid,
        new_status: &EpisodeStatus,
        expected_version: u64,
    ) -> Result<()> {
        let pool = self.pool.pool();

        let result = sqlx::query(r#"
            UPDATE episodes
            SET status = $2, is_active = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4
        "#)
        .bind(id)
        .bind(episode_status_to_db(new_status))
        .bind(!new_status.is_terminal())
        .bind(expected_version as i64)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ScreeningError::ConcurrentModification(format!(
                "筛查周期 {} 的版本已不是 {}",
                id, expected_version
            )));
        }

        Ok(())
    }

    // ========== 影像相关操作 ==========

    /// 写入影像记录
    pub async fn insert_image(&self, image: &ImageRecord) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            INSERT INTO images (id, episode_id, modality, storage_reference, original_filename, file_size, mime_type, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#)
        .bind(image.id)
        .bind(image.episode_id)
        .bind(modality_to_db(&image.modality))
        .bind(&image.storage_reference)
        .bind(&image.original_filename)
        .bind(image.file_size)
        .bind(&image.mime_type)
        .bind(image.uploaded_at)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(())
    }

    /// 查询周期的全部影像
    pub async fn get_images_for_episode(&self, episode_id: &Uuid) -> Result<Vec<ImageRecord>> {
        let pool = self.pool.pool();

        let rows = sqlx::query_as::<_, DbImage>(
            "SELECT * FROM images WHERE episode_id = $1 ORDER BY uploaded_at",
        )
        .bind(episode_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(ImageRecord::from).collect())
    }

    // ========== AI分析结论相关操作 ==========

    /// 写入AI分析结论（仅追加，不存在更新路径）
    pub async fn insert_finding(&self, finding: &Finding) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            INSERT INTO findings (id, image_id, risk_score, predicted_category, category_scores, regions, model_name, model_version, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#)
        .bind(finding.id)
        .bind(finding.image_id)
        .bind(finding.risk_score)
        .bind(category_to_db(&finding.predicted_category))
        .bind(serde_json::to_value(&finding.category_scores)?)
        .bind(serde_json::to_value(&finding.regions)?)
        .bind(&finding.model_name)
        .bind(&finding.model_version)
        .bind(&finding.notes)
        .bind(finding.created_at)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(())
    }

    /// 查询影像的全部AI分析结论
    pub async fn get_findings_for_image(&self, image_id: &Uuid) -> Result<Vec<Finding>> {
        let pool = self.pool.pool();

        let rows = sqlx::query_as::<_, DbFinding>(
            "SELECT * FROM findings WHERE image_id = $1 ORDER BY created_at",
        )
        .bind(image_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Finding::from).collect())
    }

    // ========== 诊断相关操作 ==========

    /// 写入诊断记录
    pub async fn insert_diagnosis(&self, diagnosis: &Diagnosis) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            INSERT INTO diagnoses (id, episode_id, status, source_findings, ai_category, ai_risk_score, ai_notes,
                reviewer_id, agrees_with_ai, final_category, clinical_note, follow_up_recommended, follow_up_notes,
                lock_holder, lock_acquired_at, finalized_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#)
        .bind(diagnosis.id)
        .bind(diagnosis.episode_id)
        .bind(diagnosis_status_to_db(&diagnosis.status))
        .bind(serde_json::to_value(&diagnosis.source_findings)?)
        .bind(diagnosis.ai_category.as_ref().map(category_to_db))
        .bind(diagnosis.ai_risk_score)
        .bind(&diagnosis.ai_notes)
        .bind(diagnosis.reviewer_id)
        .bind(diagnosis.agrees_with_ai)
        .bind(diagnosis.final_category.as_ref().map(category_to_db))
        .bind(&diagnosis.clinical_note)
        .bind(diagnosis.follow_up_recommended)
        .bind(&diagnosis.follow_up_notes)
        .bind(diagnosis.lock_holder)
        .bind(diagnosis.lock_acquired_at)
        .bind(diagnosis.finalized_at)
        .bind(diagnosis.created_at)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(())
    }

    /// 根据ID查找诊断
    pub async fn get_diagnosis_by_id(&self, id: &Uuid) -> Result<Option<Diagnosis>> {
        let pool = self.pool.pool();

        let result = sqlx::query_as::<_, DbDiagnosis>("SELECT * FROM diagnoses WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(result.map(Diagnosis::from))
    }

    /// 原子获取评审锁
    ///
    /// 对 lock_holder + lock_acquired_at 的比较交换在一条UPDATE内完成；
    /// 两个并发调用恰好一个更新到行。超过超时时间的锁视为可回收
    pub async fn acquire_review_lock(
        &self,
        diagnosis_id: &Uuid,
        reviewer_id: &Uuid,
        lock_timeout_secs: f64,
    ) -> Result<()> {
        let pool = self.pool.pool();

        let result = sqlx::query(r#"
            UPDATE diagnoses
            SET lock_holder = $2, lock_acquired_at = NOW(), status = 'UNDER_REVIEW'
            WHERE id = $1
              AND status IN ('PENDING_REVIEW', 'UNDER_REVIEW')
              AND (lock_holder IS NULL
                   OR lock_holder = $2
                   OR lock_acquired_at < NOW() - make_interval(secs => $3))
        "#)
        .bind(diagnosis_id)
        .bind(reviewer_id)
        .bind(lock_timeout_secs)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ScreeningError::AlreadyUnderReview(format!(
                "诊断 {} 的评审锁已被占用",
                diagnosis_id
            )));
        }

        Ok(())
    }

    /// 释放评审锁
    pub async fn release_review_lock(&self, diagnosis_id: &Uuid, reviewer_id: &Uuid) -> Result<()> {
        let pool = self.pool.pool();

        let result = sqlx::query(r#"
            UPDATE diagnoses
            SET lock_holder = NULL, lock_acquired_at = NULL, status = 'PENDING_REVIEW'
            WHERE id = $1 AND lock_holder = $2 AND status = 'UNDER_REVIEW'
        "#)
        .bind(diagnosis_id)
        .bind(reviewer_id)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ScreeningError::NotLockHolder(format!(
                "医生 {} 未持有诊断 {} 的评审锁",
                reviewer_id, diagnosis_id
            )));
        }

        Ok(())
    }

    /// 整行更新诊断（评审决定写入）
    pub async fn update_diagnosis(&self, diagnosis: &Diagnosis) -> Result<()> {
        let pool = self.pool.pool();

        let result = sqlx::query(r#"
            UPDATE diagnoses
            SET status = $2, reviewer_id = $3, agrees_with_ai = $4, final_category = $5,
                clinical_note = $6, follow_up_recommended = $7, follow_up_notes = $8,
                lock_holder = $9, lock_acquired_at = $10, finalized_at = $11
            WHERE id = $1
        "#)
        .bind(diagnosis.id)
        .bind(diagnosis_status_to_db(&diagnosis.status))
        .bind(diagnosis.reviewer_id)
        .bind(diagnosis.agrees_with_ai)
        .bind(diagnosis.final_category.as_ref().map(category_to_db))
        .bind(&diagnosis.clinical_note)
        .bind(diagnosis.follow_up_recommended)
        .bind(&diagnosis.follow_up_notes)
        .bind(diagnosis.lock_holder)
        .bind(diagnosis.lock_acquired_at)
        .bind(diagnosis.finalized_at)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ScreeningError::NotFound(format!("诊断 {} 不存在", diagnosis.id)));
        }

        Ok(())
    }

    // ========== 审计条目相关操作 ==========

    /// 追加审计条目（计数器与链哈希由审计日志生成）
    pub async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let pool = self.pool.pool();

        sqlx::query(r#"
            INSERT INTO audit_entries (entry_id, episode_id, actor_id, event, severity, payload, prev_hash, entry_hash, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#)
        .bind(entry.entry_id as i64)
        .bind(entry.episode_id)
        .bind(entry.actor_id)
        .bind(&entry.event)
        .bind(severity_to_db(&entry.severity))
        .bind(&entry.payload)
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .bind(entry.timestamp)
        .execute(pool)
        .await
        .map_err(|e| ScreeningError::AuditWriteFailure(e.to_string()))?;

        Ok(())
    }

    /// 按序读取周期的审计历史
    pub async fn get_audit_entries(&self, episode_id: &Uuid) -> Result<Vec<AuditEntry>> {
        let pool = self.pool.pool();

        let rows = sqlx::query_as::<_, DbAuditEntry>(
            "SELECT * FROM audit_entries WHERE episode_id = $1 ORDER BY entry_id",
        )
        .bind(episode_id)
        .fetch_all(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// 读取整条审计链（用于端到端校验）
    pub async fn get_all_audit_entries(&self) -> Result<Vec<AuditEntry>> {
        let pool = self.pool.pool();

        let rows = sqlx::query_as::<_, DbAuditEntry>(
            "SELECT * FROM audit_entries ORDER BY entry_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| ScreeningError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}
