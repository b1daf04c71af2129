//! 评审协调器
//!
//! 保证同一诊断同时最多一名医生评审，签署与驳回是单次原子决定；
//! 评审锁为带超时的咨询锁，会话崩溃后到期可被回收

use chrono::Utc;
use screening_core::{
    Actor, Diagnosis, DiagnosisCategory, DiagnosisStatus, Result, ScreeningError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::store::EpisodeStore;

/// 评审配置
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// 评审锁超时时间，到期后锁可被其他医生回收
    pub lock_timeout: Duration,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// 评审锁
#[derive(Debug, Clone)]
pub struct ReviewLock {
    pub holder: Uuid,
    pub acquired_at: chrono::DateTime<Utc>,
    pub deadline: Instant,
}

/// 签署请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub final_category: DiagnosisCategory,
    pub note: String,
    #[serde(default)]
    pub agrees_with_ai: Option<bool>,
    #[serde(default)]
    pub follow_up_recommended: bool,
    #[serde(default)]
    pub follow_up_notes: Option<String>,
}

/// 评审协调器
#[derive(Debug)]
pub struct ReviewCoordinator {
    config: ReviewConfig,
    locks: HashMap<Uuid, ReviewLock>, // diagnosis_id -> 锁
}

impl ReviewCoordinator {
    pub fn new(config: ReviewConfig) -> Self {
        Self {
            config,
            locks: HashMap::new(),
        }
    }

    /// 开始评审
    ///
    /// 对锁的检查与占用在同一次调用内完成；并发调用由引擎互斥串行化，
    /// 恰好一个成功，其余收到 AlreadyUnderReview
    pub fn begin_review(
        &mut self,
        store: &mut EpisodeStore,
        diagnosis_id: Uuid,
        reviewer: &Actor,
    ) -> Result<Diagnosis> {
        let mut diagnosis = store.get_diagnosis(diagnosis_id)?;

        if diagnosis.status.is_decided() {
            return Err(ScreeningError::InvalidState(format!(
                "诊断 {} 已处于 {:?}, 不能再次评审",
                diagnosis_id, diagnosis.status
            )));
        }

        if let Some(lock) = self.active_lock(diagnosis_id) {
            if lock.holder != reviewer.id {
                return Err(ScreeningError::AlreadyUnderReview(format!(
                    "诊断 {} 正在由 {} 评审",
                    diagnosis_id, lock.holder
                )));
            }
            // 同一医生重复进入，刷新锁期限
        }

        let now = Utc::now();
        self.locks.insert(
            diagnosis_id,
            ReviewLock {
                holder: reviewer.id,
                acquired_at: now,
                deadline: Instant::now() + self.config.lock_timeout,
            },
        );

        diagnosis.status = DiagnosisStatus::UnderReview;
        diagnosis.lock_holder = Some(reviewer.id);
        diagnosis.lock_acquired_at = Some(now);
        store.put_diagnosis(diagnosis.clone());

        tracing::info!("Reviewer {} began review of diagnosis {}", reviewer.id, diagnosis_id);
        Ok(diagnosis)
    }

    /// 签署诊断
    ///
    /// 仅锁持有者可以签署；要求非空临床意见和至少一条AI分析结论
    pub fn finalize(
        &mut self,
        store: &mut EpisodeStore,
        diagnosis_id: Uuid,
        reviewer: &Actor,
        request: FinalizeRequest,
    ) -> Result<Diagnosis> {
        let mut diagnosis = self.checked_under_review(store, diagnosis_id, reviewer)?;

        if request.note.trim().is_empty() {
            return Err(ScreeningError::Validation("签署必须附带临床意见".into()));
        }
        if diagnosis.source_findings.is_empty() {
            return Err(ScreeningError::InvalidState(format!(
                "诊断 {} 没有引用任何AI分析结论, 不能签署",
                diagnosis_id
            )));
        }

        let agrees = request
            .agrees_with_ai
            .or_else(|| diagnosis.ai_category.map(|ai| ai == request.final_category));

        diagnosis.status = DiagnosisStatus::Finalized;
        diagnosis.reviewer_id = Some(reviewer.id);
        diagnosis.final_category = Some(request.final_category);
        diagnosis.clinical_note = Some(request.note);
        diagnosis.agrees_with_ai = agrees;
        diagnosis.follow_up_recommended = request.follow_up_recommended;
        diagnosis.follow_up_notes = request.follow_up_notes;
        diagnosis.finalized_at = Some(Utc::now());
        diagnosis.lock_holder = None;
        diagnosis.lock_acquired_at = None;

        self.locks.remove(&diagnosis_id);
        store.put_diagnosis(diagnosis.clone());

        tracing::info!(
            "Diagnosis {} finalized by reviewer {} as {:?}",
            diagnosis_id,
            reviewer.id,
            diagnosis.final_category
        );
        Ok(diagnosis)
    }

    /// 驳回诊断
    ///
    /// 与签署对称：医生认为AI结果不可采信
    pub fn reject(
        &mut self,
        store: &mut EpisodeStore,
        diagnosis_id: Uuid,
        reviewer: &Actor,
        note: String,
    ) -> Result<Diagnosis> {
        let mut diagnosis = self.checked_under_review(store, diagnosis_id, reviewer)?;

        if note.trim().is_empty() {
            return Err(ScreeningError::Validation("驳回必须附带理由".into()));
        }

        diagnosis.status = DiagnosisStatus::Rejected;
        diagnosis.reviewer_id = Some(reviewer.id);
        diagnosis.agrees_with_ai = Some(false);
        diagnosis.clinical_note = Some(note);
        diagnosis.lock_holder = None;
        diagnosis.lock_acquired_at = None;

        self.locks.remove(&diagnosis_id);
        store.put_diagnosis(diagnosis.clone());

        tracing::warn!("Diagnosis {} rejected by reviewer {}", diagnosis_id, reviewer.id);
        Ok(diagnosis)
    }

    /// 主动释放评审锁（医生暂缓决定），诊断回到等待评审
    pub fn release(
        &mut self,
        store: &mut EpisodeStore,
        diagnosis_id: Uuid,
        reviewer: &Actor,
    ) -> Result<Diagnosis> {
        let mut diagnosis = self.checked_under_review(store, diagnosis_id, reviewer)?;

        diagnosis.status = DiagnosisStatus::PendingReview;
        diagnosis.lock_holder = None;
        diagnosis.lock_acquired_at = None;

        self.locks.remove(&diagnosis_id);
        store.put_diagnosis(diagnosis.clone());

        tracing::info!("Reviewer {} released diagnosis {}", reviewer.id, diagnosis_id);
        Ok(diagnosis)
    }

    /// 回滚辅助：读取当前锁条目
    pub fn lock_snapshot(&self, diagnosis_id: Uuid) -> Option<ReviewLock> {
        self.locks.get(&diagnosis_id).cloned()
    }

    /// 回滚辅助：恢复锁条目
    pub fn restore_lock(&mut self, diagnosis_id: Uuid, lock: Option<ReviewLock>) {
        match lock {
            Some(lock) => {
                self.locks.insert(diagnosis_id, lock);
            }
            None => {
                self.locks.remove(&diagnosis_id);
            }
        }
    }

    /// 未过期的锁；过期锁视为不存在（可回收）
    fn active_lock(&self, diagnosis_id: Uuid) -> Option<&ReviewLock> {
        self.locks
            .get(&diagnosis_id)
            .filter(|lock| Instant::now() < lock.deadline)
    }

    /// 校验诊断处于评审中且调用者持有有效锁
    fn checked_under_review(
        &self,
        store: &EpisodeStore,
        diagnosis_id: Uuid,
        reviewer: &Actor,
    ) -> Result<Diagnosis> {
        let diagnosis = store.get_diagnosis(diagnosis_id)?;

        if diagnosis.status != DiagnosisStatus::UnderReview {
            return Err(ScreeningError::InvalidState(format!(
                "诊断 {} 当前为 {:?}, 需要先开始评审",
                diagnosis_id, diagnosis.status
            )));
        }

        match self.active_lock(diagnosis_id) {
            Some(lock) if lock.holder == reviewer.id => Ok(diagnosis),
            Some(_) | None => Err(ScreeningError::NotLockHolder(format!(
                "医生 {} 未持有诊断 {} 的有效评审锁",
                reviewer.id, diagnosis_id
            ))),
        }
    }
}
