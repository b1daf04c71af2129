//! 工作流引擎
//!
//! 协调状态机、审计日志、评审协调器与AI分析网关的核心引擎，
//! 对外暴露筛查周期的全部操作；每个操作是一个工作单元，
//! 状态变更与审计写入一起生效或一起放弃

use chrono::Utc;
use screening_audit::{AuditEntry, AuditLog, AuditQuery, AuditSeverity, NewAuditEntry};
use screening_core::utils::generate_accession_number;
use screening_core::{
    Actor, Diagnosis, DiagnosisStatus, Episode, EpisodeStatus, Finding, ImageModality,
    ImageRecord, Result, ScreeningError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::gateway::AnalysisGateway;
use crate::review::{FinalizeRequest, ReviewConfig, ReviewCoordinator};
use crate::state_machine::{EpisodeEvent, EpisodeStateMachine};
use crate::store::EpisodeStore;

/// 审计事件名
pub mod events {
    pub const EPISODE_CREATED: &str = "episode.created";
    pub const CAPTURE_STARTED: &str = "episode.capture_started";
    pub const IMAGE_ATTACHED: &str = "image.attached";
    pub const ANALYSIS_COMPLETED: &str = "analysis.completed";
    pub const ANALYSIS_FAILED: &str = "analysis.failed";
    pub const DIAGNOSIS_DRAFTED: &str = "diagnosis.drafted";
    pub const REVIEW_STARTED: &str = "review.started";
    pub const REVIEW_RELEASED: &str = "review.released";
    pub const DIAGNOSIS_FINALIZED: &str = "diagnosis.finalized";
    pub const DIAGNOSIS_REJECTED: &str = "diagnosis.rejected";
    pub const REANALYSIS_REQUESTED: &str = "episode.reanalysis_requested";
    pub const EPISODE_DISCARDED: &str = "episode.discarded";
    pub const TRANSITION_REJECTED: &str = "transition.rejected";
}

/// 工作流配置
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub review: ReviewConfig,
    /// AI分析暂时性失败的最大尝试次数
    pub analyze_retry_attempts: u32,
    /// 重试退避起始间隔，每次加倍
    pub analyze_retry_backoff: std::time::Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            review: ReviewConfig::default(),
            analyze_retry_attempts: 3,
            analyze_retry_backoff: std::time::Duration::from_millis(500),
        }
    }
}

/// 影像上传参数
#[derive(Debug, Clone, Deserialize)]
pub struct NewImageUpload {
    pub modality: ImageModality,
    pub storage_reference: String,
    pub original_filename: Option<String>,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

/// 筛查周期详情视图
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeDetail {
    pub episode: Episode,
    pub images: Vec<ImageRecord>,
    pub findings: Vec<Finding>,
    pub diagnoses: Vec<Diagnosis>,
}

/// 工作单元内部状态
///
/// 单一互斥锁保证同一实体上的冲突操作被串行化，
/// 审计写入与状态变更处于同一临界区
struct EngineInner {
    store: EpisodeStore,
    audit: AuditLog,
    coordinator: ReviewCoordinator,
}

/// 工作流引擎
pub struct WorkflowEngine {
    inner: Mutex<EngineInner>,
    state_machine: EpisodeStateMachine,
    gateway: AnalysisGateway,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    /// 创建新的工作流引擎
    pub fn new(gateway: AnalysisGateway, config: WorkflowConfig) -> Self {
        Self::with_audit_log(gateway, config, AuditLog::new())
    }

    /// 在指定审计日志上创建引擎
    pub fn with_audit_log(gateway: AnalysisGateway, config: WorkflowConfig, audit: AuditLog) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                store: EpisodeStore::new(),
                audit,
                coordinator: ReviewCoordinator::new(config.review.clone()),
            }),
            state_machine: EpisodeStateMachine::new(),
            gateway,
            config,
        }
    }

    /// 创建筛查周期
    ///
    /// 创建后立即进入影像采集阶段，两次转换各记录一条审计
    pub async fn create_episode(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        reason: Option<String>,
        clinical_notes: Option<String>,
    ) -> Result<Episode> {
        self.authorize(actor, actor.role.can_manage_episodes(), "创建筛查周期")?;

        let mut inner = self.inner.lock().await;
        if inner.store.has_active_episode(patient_id) {
            return Err(ScreeningError::ActiveEpisodeExists(format!(
                "患者 {} 已有进行中的筛查周期",
                patient_id
            )));
        }

        let now = Utc::now();
        let episode = Episode {
            id: Uuid::new_v4(),
            patient_id,
            accession_number: generate_accession_number(),
            status: EpisodeStatus::Created,
            reason,
            clinical_notes,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let next = self
            .state_machine
            .transition(&EpisodeStatus::Created, &EpisodeEvent::CaptureStarted)?;

        inner.audit.append(NewAuditEntry::new(
            episode.id,
            Some(actor.id),
            events::EPISODE_CREATED,
            json!({
                "patient_id": patient_id,
                "accession_number": episode.accession_number,
                "from": null,
                "to": format!("{:?}", EpisodeStatus::Created),
            }),
        ))?;
        inner.audit.append(NewAuditEntry::new(
            episode.id,
            Some(actor.id),
            events::CAPTURE_STARTED,
            json!({
                "from": format!("{:?}", EpisodeStatus::Created),
                "to": format!("{:?}", next),
            }),
        ))?;

        let episode_id = episode.id;
        inner.store.insert_episode(episode)?;
        inner.store.apply_episode_transition(episode_id, 0, next)
    }

    /// 挂接诊断影像
    ///
    /// 第一张影像使周期进入可分析状态
    pub async fn attach_image(
        &self,
        actor: &Actor,
        episode_id: Uuid,
        upload: NewImageUpload,
    ) -> Result<ImageRecord> {
        self.authorize(actor, actor.role.can_upload_images(), "上传影像")?;
        if upload.storage_reference.trim().is_empty() {
            return Err(ScreeningError::Validation("影像存储句柄不能为空".into()));
        }

        let mut inner = self.inner.lock().await;
        let episode = inner.store.get_episode(episode_id)?;
        let event = EpisodeEvent::ImageAttached;
        if !self.state_machine.can_transition(&episode.status, &event) {
            self.audit_rejected(&mut inner, &episode, actor, &event);
            return Err(self.state_machine.invalid_transition(&episode.status, &event));
        }
        let next = self.state_machine.transition(&episode.status, &event)?;

        let image = ImageRecord {
            id: Uuid::new_v4(),
            episode_id,
            modality: upload.modality,
            storage_reference: upload.storage_reference,
            original_filename: upload.original_filename,
            file_size: upload.file_size,
            mime_type: upload.mime_type,
            uploaded_at: Utc::now(),
        };

        inner.audit.append(NewAuditEntry::new(
            episode_id,
            Some(actor.id),
            events::IMAGE_ATTACHED,
            json!({
                "image_id": image.id,
                "modality": image.modality,
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", next),
            }),
        ))?;

        inner.store.attach_image(image.clone())?;
        inner
            .store
            .apply_episode_transition(episode_id, episode.version, next)?;
        Ok(image)
    }

    /// 运行AI分析
    ///
    /// 评分请求发生在引擎锁外；提交前重新校验版本号，
    /// 分析期间被并发修改的周期返回 ConcurrentModification 由调用方重试。
    /// 全部影像评分成功才推进状态并生成诊断草稿；
    /// 部分失败记录可重试的审计事件，周期停留在可分析状态
    pub async fn run_analysis(&self, actor: &Actor, episode_id: Uuid) -> Result<Episode> {
        self.authorize(actor, actor.role.can_manage_episodes(), "发起AI分析")?;

        let (episode, images) = {
            let mut inner = self.inner.lock().await;
            let episode = inner.store.get_episode(episode_id)?;
            let event = EpisodeEvent::AnalysisSucceeded;
            if !self.state_machine.can_transition(&episode.status, &event) {
                self.audit_rejected(&mut inner, &episode, actor, &event);
                return Err(self.state_machine.invalid_transition(&episode.status, &event));
            }
            let images = inner.store.images_for_episode(episode_id);
            (episode, images)
        };

        tracing::info!("Running analysis for episode {} over {} images", episode_id, images.len());

        let mut findings = Vec::new();
        let mut failures: Vec<(Uuid, ScreeningError)> = Vec::new();
        for image in &images {
            match self.analyze_with_retry(image).await {
                Ok(finding) => findings.push(finding),
                Err(err) => {
                    tracing::warn!("Analysis failed for image {}: {}", image.id, err);
                    failures.push((image.id, err));
                }
            }
        }

        let mut inner = self.inner.lock().await;
        let current = inner.store.get_episode(episode_id)?;
        if current.version != episode.version {
            return Err(ScreeningError::ConcurrentModification(format!(
                "筛查周期 {} 在分析期间被其他操作修改",
                episode_id
            )));
        }

        if !failures.is_empty() {
            let errors: Vec<String> = failures
                .iter()
                .map(|(image_id, err)| format!("{}: {}", image_id, err))
                .collect();
            inner.audit.append(
                NewAuditEntry::new(
                    episode_id,
                    Some(actor.id),
                    events::ANALYSIS_FAILED,
                    json!({
                        "succeeded": findings.len(),
                        "failed": failures.len(),
                        "errors": errors,
                        "status": format!("{:?}", current.status),
                    }),
                )
                .with_severity(AuditSeverity::Warning),
            )?;
            inner
                .store
                .apply_episode_transition(episode_id, current.version, EpisodeStatus::AnalysisReady)?;

            let permanent = failures
                .iter()
                .any(|(_, err)| matches!(err, ScreeningError::AnalysisRejected(_)));
            let detail = failures
                .into_iter()
                .map(|(_, err)| err.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(if permanent {
                ScreeningError::AnalysisRejected(detail)
            } else {
                ScreeningError::AnalysisUnavailable(detail)
            });
        }

        // 全部成功：写入分析结论并推进状态
        let next = self
            .state_machine
            .transition(&current.status, &EpisodeEvent::AnalysisSucceeded)?;
        let finding_ids: Vec<Uuid> = findings.iter().map(|f| f.id).collect();
        inner.audit.append(NewAuditEntry::new(
            episode_id,
            Some(actor.id),
            events::ANALYSIS_COMPLETED,
            json!({
                "finding_ids": finding_ids,
                "from": format!("{:?}", current.status),
                "to": format!("{:?}", next),
            }),
        ))?;
        for finding in findings {
            inner.store.insert_finding(finding);
        }
        let episode = inner
            .store
            .apply_episode_transition(episode_id, current.version, next)?;

        // 生成诊断草稿，引用当前全部分析结论，周期进入等待评审
        let all_findings = inner.store.findings_for_episode(episode_id);
        let top = all_findings
            .iter()
            .max_by(|a, b| a.risk_score.total_cmp(&b.risk_score));
        let diagnosis = Diagnosis {
            id: Uuid::new_v4(),
            episode_id,
            status: DiagnosisStatus::PendingReview,
            source_findings: all_findings.iter().map(|f| f.id).collect(),
            ai_category: top.map(|f| f.predicted_category),
            ai_risk_score: top.map(|f| f.risk_score),
            ai_notes: top.and_then(|f| f.notes.clone()),
            reviewer_id: None,
            agrees_with_ai: None,
            final_category: None,
            clinical_note: None,
            follow_up_recommended: false,
            follow_up_notes: None,
            lock_holder: None,
            lock_acquired_at: None,
            finalized_at: None,
            created_at: Utc::now(),
        };
        let review_status = self
            .state_machine
            .transition(&episode.status, &EpisodeEvent::DiagnosisDrafted)?;
        inner.audit.append(NewAuditEntry::new(
            episode_id,
            Some(actor.id),
            events::DIAGNOSIS_DRAFTED,
            json!({
                "diagnosis_id": diagnosis.id,
                "source_findings": diagnosis.source_findings.len(),
                "ai_category": diagnosis.ai_category,
                "ai_risk_score": diagnosis.ai_risk_score,
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", review_status),
            }),
        ))?;
        inner.store.insert_diagnosis(diagnosis);
        inner
            .store
            .apply_episode_transition(episode_id, episode.version, review_status)
    }

    /// 开始评审
    pub async fn begin_review(&self, actor: &Actor, diagnosis_id: Uuid) -> Result<Diagnosis> {
        self.authorize(actor, actor.role.can_review(), "评审诊断")?;

        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.get_diagnosis(diagnosis_id)?;
        let lock_snapshot = inner.coordinator.lock_snapshot(diagnosis_id);

        let diagnosis = {
            let EngineInner { store, coordinator, .. } = &mut *inner;
            coordinator.begin_review(store, diagnosis_id, actor)?
        };

        if let Err(err) = inner.audit.append(NewAuditEntry::new(
            diagnosis.episode_id,
            Some(actor.id),
            events::REVIEW_STARTED,
            json!({
                "diagnosis_id": diagnosis_id,
                "reviewer_id": actor.id,
            }),
        )) {
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }
        Ok(diagnosis)
    }

    /// 签署诊断
    ///
    /// 仅评审锁持有者可签署；同时将筛查周期推进到最终化
    pub async fn finalize_diagnosis(
        &self,
        actor: &Actor,
        diagnosis_id: Uuid,
        request: FinalizeRequest,
    ) -> Result<Diagnosis> {
        self.authorize(actor, actor.role.can_review(), "签署诊断")?;

        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.get_diagnosis(diagnosis_id)?;
        let episode = inner.store.get_episode(snapshot.episode_id)?;
        let event = EpisodeEvent::ReviewFinalized;
        if !self.state_machine.can_transition(&episode.status, &event) {
            self.audit_rejected(&mut inner, &episode, actor, &event);
            return Err(self.state_machine.invalid_transition(&episode.status, &event));
        }
        let next = self.state_machine.transition(&episode.status, &event)?;
        let lock_snapshot = inner.coordinator.lock_snapshot(diagnosis_id);

        let diagnosis = {
            let EngineInner { store, coordinator, .. } = &mut *inner;
            coordinator.finalize(store, diagnosis_id, actor, request)?
        };

        if let Err(err) = inner
            .store
            .apply_episode_transition(episode.id, episode.version, next.clone())
        {
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }

        if let Err(err) = inner.audit.append(NewAuditEntry::new(
            episode.id,
            Some(actor.id),
            events::DIAGNOSIS_FINALIZED,
            json!({
                "diagnosis_id": diagnosis_id,
                "reviewer_id": actor.id,
                "final_category": diagnosis.final_category,
                "follow_up_recommended": diagnosis.follow_up_recommended,
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", next),
            }),
        )) {
            inner.store.restore_episode(episode);
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }
        Ok(diagnosis)
    }

    /// 驳回诊断
    ///
    /// 医生认为AI结果不可采信；周期进入被驳回状态，
    /// 可通过 request_reanalysis 重新开放分析
    pub async fn reject_diagnosis(
        &self,
        actor: &Actor,
        diagnosis_id: Uuid,
        note: String,
    ) -> Result<Diagnosis> {
        self.authorize(actor, actor.role.can_review(), "驳回诊断")?;

        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.get_diagnosis(diagnosis_id)?;
        let episode = inner.store.get_episode(snapshot.episode_id)?;
        let event = EpisodeEvent::ReviewRejected;
        if !self.state_machine.can_transition(&episode.status, &event) {
            self.audit_rejected(&mut inner, &episode, actor, &event);
            return Err(self.state_machine.invalid_transition(&episode.status, &event));
        }
        let next = self.state_machine.transition(&episode.status, &event)?;
        let lock_snapshot = inner.coordinator.lock_snapshot(diagnosis_id);

        let diagnosis = {
            let EngineInner { store, coordinator, .. } = &mut *inner;
            coordinator.reject(store, diagnosis_id, actor, note)?
        };

        if let Err(err) = inner
            .store
            .apply_episode_transition(episode.id, episode.version, next.clone())
        {
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }

        if let Err(err) = inner.audit.append(NewAuditEntry::new(
            episode.id,
            Some(actor.id),
            events::DIAGNOSIS_REJECTED,
            json!({
                "diagnosis_id": diagnosis_id,
                "reviewer_id": actor.id,
                "note": diagnosis.clinical_note,
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", next),
            }),
        )) {
            inner.store.restore_episode(episode);
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }
        Ok(diagnosis)
    }

    /// 主动释放评审锁
    pub async fn release_review(&self, actor: &Actor, diagnosis_id: Uuid) -> Result<Diagnosis> {
        self.authorize(actor, actor.role.can_review(), "释放评审锁")?;

        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.get_diagnosis(diagnosis_id)?;
        let lock_snapshot = inner.coordinator.lock_snapshot(diagnosis_id);

        let diagnosis = {
            let EngineInner { store, coordinator, .. } = &mut *inner;
            coordinator.release(store, diagnosis_id, actor)?
        };

        if let Err(err) = inner.audit.append(NewAuditEntry::new(
            diagnosis.episode_id,
            Some(actor.id),
            events::REVIEW_RELEASED,
            json!({
                "diagnosis_id": diagnosis_id,
                "reviewer_id": actor.id,
            }),
        )) {
            inner.store.put_diagnosis(snapshot);
            inner.coordinator.restore_lock(diagnosis_id, lock_snapshot);
            return Err(err);
        }
        Ok(diagnosis)
    }

    /// 重新开放分析
    ///
    /// 被驳回的周期回到可分析状态；原诊断保持不可变，
    /// 下一次成功分析会追加新的诊断草稿
    pub async fn request_reanalysis(&self, actor: &Actor, episode_id: Uuid) -> Result<Episode> {
        self.authorize(actor, actor.role.can_manage_episodes(), "重新开放分析")?;

        let mut inner = self.inner.lock().await;
        let episode = inner.store.get_episode(episode_id)?;
        let event = EpisodeEvent::ReanalysisRequested;
        if !self.state_machine.can_transition(&episode.status, &event) {
            self.audit_rejected(&mut inner, &episode, actor, &event);
            return Err(self.state_machine.invalid_transition(&episode.status, &event));
        }
        let next = self.state_machine.transition(&episode.status, &event)?;

        inner.audit.append(NewAuditEntry::new(
            episode_id,
            Some(actor.id),
            events::REANALYSIS_REQUESTED,
            json!({
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", next),
            }),
        ))?;
        inner
            .store
            .apply_episode_transition(episode_id, episode.version, next)
    }

    /// 行政作废筛查周期
    pub async fn discard_episode(
        &self,
        actor: &Actor,
        episode_id: Uuid,
        reason: Option<String>,
    ) -> Result<Episode> {
        self.authorize(actor, actor.role.can_manage_episodes(), "作废筛查周期")?;

        let mut inner = self.inner.lock().await;
        let episode = inner.store.get_episode(episode_id)?;
        let event = EpisodeEvent::Discarded;
        if !self.state_machine.can_transition(&episode.status, &event) {
            self.audit_rejected(&mut inner, &episode, actor, &event);
            return Err(self.state_machine.invalid_transition(&episode.status, &event));
        }
        let next = self.state_machine.transition(&episode.status, &event)?;

        inner.audit.append(NewAuditEntry::new(
            episode_id,
            Some(actor.id),
            events::EPISODE_DISCARDED,
            json!({
                "reason": reason,
                "from": format!("{:?}", episode.status),
                "to": format!("{:?}", next),
            }),
        ))?;
        inner
            .store
            .apply_episode_transition(episode_id, episode.version, next)
    }

    /// 查询筛查周期详情
    pub async fn get_episode(&self, _actor: &Actor, episode_id: Uuid) -> Result<EpisodeDetail> {
        let inner = self.inner.lock().await;
        let episode = inner.store.get_episode(episode_id)?;
        Ok(EpisodeDetail {
            images: inner.store.images_for_episode(episode_id),
            findings: inner.store.findings_for_episode(episode_id),
            diagnoses: inner.store.diagnoses_for_episode(episode_id),
            episode,
        })
    }

    /// 读取筛查周期的完整审计历史
    pub async fn get_episode_history(
        &self,
        _actor: &Actor,
        episode_id: Uuid,
    ) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        inner.store.get_episode(episode_id)?;
        Ok(inner.audit.read(episode_id))
    }

    /// 合规审计查询
    pub async fn query_audit(&self, _actor: &Actor, filter: &AuditQuery) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner.audit.query(filter)
    }

    /// 端到端校验审计链
    pub async fn verify_audit_chain(&self) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.audit.verify()
    }

    fn authorize(&self, actor: &Actor, allowed: bool, action: &str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(ScreeningError::Unauthorized(format!(
                "角色 {:?} 无权{}",
                actor.role, action
            )))
        }
    }

    /// 记录被拒绝的转换尝试
    ///
    /// 审计失败不改变返回给调用方的 InvalidTransition
    fn audit_rejected(
        &self,
        inner: &mut EngineInner,
        episode: &Episode,
        actor: &Actor,
        event: &EpisodeEvent,
    ) {
        let allowed: Vec<String> = self
            .state_machine
            .possible_events(&episode.status)
            .iter()
            .map(|e| format!("{:?}", e))
            .collect();
        let record = NewAuditEntry::new(
            episode.id,
            Some(actor.id),
            events::TRANSITION_REJECTED,
            json!({
                "status": format!("{:?}", episode.status),
                "event": format!("{:?}", event),
                "allowed": allowed,
            }),
        )
        .with_severity(AuditSeverity::Warning);

        if let Err(err) = inner.audit.append(record) {
            tracing::error!(
                "Failed to audit rejected transition for episode {}: {}",
                episode.id,
                err
            );
        }
    }

    async fn analyze_with_retry(&self, image: &ImageRecord) -> Result<Finding> {
        let mut backoff = self.config.analyze_retry_backoff;
        let mut attempt = 1;
        loop {
            match self.gateway.analyze(image).await {
                Ok(finding) => return Ok(finding),
                Err(err @ ScreeningError::AnalysisUnavailable(_))
                    if attempt < self.config.analyze_retry_attempts =>
                {
                    tracing::warn!(
                        "Retryable analysis failure for image {} (attempt {}/{}): {}",
                        image.id,
                        attempt,
                        self.config.analyze_retry_attempts,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayConfig, SimulatedScorer};
    use screening_core::ActorRole;
    use std::sync::Arc;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(
            AnalysisGateway::new(Arc::new(SimulatedScorer::default()), GatewayConfig::default()),
            WorkflowConfig::default(),
        )
    }

    fn actor(role: ActorRole) -> Actor {
        Actor {
            id: Uuid::new_v4(),
            role,
        }
    }

    fn upload(reference: &str) -> NewImageUpload {
        NewImageUpload {
            modality: ImageModality::PapSmear,
            storage_reference: reference.into(),
            original_filename: Some("slide.png".into()),
            file_size: Some(1024),
            mime_type: Some("image/png".into()),
        }
    }

    #[tokio::test]
    async fn test_create_episode_enters_images_pending() {
        let engine = engine();
        let clinician = actor(ActorRole::Clinician);

        let episode = engine
            .create_episode(&clinician, Uuid::new_v4(), Some("常规筛查".into()), None)
            .await
            .unwrap();

        assert_eq!(episode.status, EpisodeStatus::ImagesPending);
        assert_eq!(episode.version, 1);

        let history = engine.get_episode_history(&clinician, episode.id).await.unwrap();
        let event_names: Vec<&str> = history.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(event_names, vec![events::EPISODE_CREATED, events::CAPTURE_STARTED]);
    }

    #[tokio::test]
    async fn test_duplicate_active_episode_is_refused() {
        let engine = engine();
        let clinician = actor(ActorRole::Clinician);
        let patient = Uuid::new_v4();

        engine.create_episode(&clinician, patient, None, None).await.unwrap();
        let err = engine
            .create_episode(&clinician, patient, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeningError::ActiveEpisodeExists(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_operation_has_no_effects() {
        let engine = engine();
        let clinician = actor(ActorRole::Clinician);
        let viewer = actor(ActorRole::Viewer);

        let episode = engine
            .create_episode(&clinician, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        let err = engine
            .attach_image(&viewer, episode.id, upload("blob://pap/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeningError::Unauthorized(_)));

        // 无状态变化，也无审计痕迹
        let detail = engine.get_episode(&clinician, episode.id).await.unwrap();
        assert!(detail.images.is_empty());
        assert_eq!(detail.episode.version, 1);
        let history = engine.get_episode_history(&clinician, episode.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_transition_is_audited() {
        let engine = engine();
        let clinician = actor(ActorRole::Clinician);

        let episode = engine
            .create_episode(&clinician, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        // 尚无影像，不能发起分析
        let err = engine.run_analysis(&clinician, episode.id).await.unwrap_err();
        assert!(matches!(err, ScreeningError::InvalidTransition { .. }));

        let history = engine.get_episode_history(&clinician, episode.id).await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.event, events::TRANSITION_REJECTED);
        assert_eq!(last.severity, AuditSeverity::Warning);

        // 被拒绝的尝试也通过链校验
        engine.verify_audit_chain().await.unwrap();
    }

    #[tokio::test]
    async fn test_technician_can_upload_but_not_analyze() {
        let engine = engine();
        let clinician = actor(ActorRole::Clinician);
        let technician = actor(ActorRole::Technician);

        let episode = engine
            .create_episode(&clinician, Uuid::new_v4(), None, None)
            .await
            .unwrap();

        engine
            .attach_image(&technician, episode.id, upload("blob://pap/t1"))
            .await
            .unwrap();

        let err = engine.run_analysis(&technician, episode.id).await.unwrap_err();
        assert!(matches!(err, ScreeningError::Unauthorized(_)));
    }
}
