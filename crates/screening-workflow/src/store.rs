//! 筛查实体存储
//!
//! 内存实体存储，提供乐观并发的条件写入；
//! 同一患者同时只允许一个活动筛查周期，由写入时检查保证

use chrono::Utc;
use screening_core::{
    Diagnosis, Episode, EpisodeStatus, Finding, ImageRecord, Result, ScreeningError,
};
use std::collections::HashMap;
use uuid::Uuid;

/// 实体存储
#[derive(Debug, Default)]
pub struct EpisodeStore {
    episodes: HashMap<Uuid, Episode>,
    active_by_patient: HashMap<Uuid, Uuid>, // patient_id -> 活动周期id
    images: HashMap<Uuid, ImageRecord>,
    episode_images: HashMap<Uuid, Vec<Uuid>>, // episode_id -> image_ids
    findings: HashMap<Uuid, Finding>,
    image_findings: HashMap<Uuid, Vec<Uuid>>, // image_id -> finding_ids
    diagnoses: HashMap<Uuid, Diagnosis>,
    episode_diagnoses: HashMap<Uuid, Vec<Uuid>>, // episode_id -> diagnosis_ids
}

impl EpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 患者是否已有活动筛查周期
    pub fn has_active_episode(&self, patient_id: Uuid) -> bool {
        self.active_by_patient.contains_key(&patient_id)
    }

    /// 写入新筛查周期
    ///
    /// 写入时检查患者唯一活动周期约束
    pub fn insert_episode(&mut self, episode: Episode) -> Result<()> {
        if let Some(existing) = self.active_by_patient.get(&episode.patient_id) {
            return Err(ScreeningError::ActiveEpisodeExists(format!(
                "患者 {} 的活动周期为 {}",
                episode.patient_id, existing
            )));
        }

        self.active_by_patient.insert(episode.patient_id, episode.id);
        tracing::info!("Episode {} created for patient {}", episode.id, episode.patient_id);
        self.episodes.insert(episode.id, episode);
        Ok(())
    }

    pub fn get_episode(&self, episode_id: Uuid) -> Result<Episode> {
        self.episodes
            .get(&episode_id)
            .cloned()
            .ok_or_else(|| ScreeningError::NotFound(format!("筛查周期 {} 不存在", episode_id)))
    }

    /// 条件写入筛查周期状态
    ///
    /// 版本号不匹配时返回 ConcurrentModification，由调用方重读后重试
    pub fn apply_episode_transition(
        &mut self,
        episode_id: Uuid,
        expected_version: u64,
        new_status: EpisodeStatus,
    ) -> Result<Episode> {
        let episode = self
            .episodes
            .get_mut(&episode_id)
            .ok_or_else(|| ScreeningError::NotFound(format!("筛查周期 {} 不存在", episode_id)))?;

        if episode.version != expected_version {
            return Err(ScreeningError::ConcurrentModification(format!(
                "筛查周期 {} 版本已从 {} 变为 {}",
                episode_id, expected_version, episode.version
            )));
        }

        let old_status = episode.status.clone();
        episode.status = new_status;
        episode.version += 1;
        episode.updated_at = Utc::now();

        if episode.status.is_terminal() {
            self.active_by_patient.remove(&episode.patient_id);
        }

        tracing::info!(
            "Episode {} transitioned from {:?} to {:?} (version {})",
            episode_id,
            old_status,
            episode.status,
            episode.version
        );
        Ok(episode.clone())
    }

    /// 回滚辅助：整体替换周期记录
    pub fn restore_episode(&mut self, episode: Episode) {
        if episode.is_active() {
            self.active_by_patient.insert(episode.patient_id, episode.id);
        } else {
            self.active_by_patient.remove(&episode.patient_id);
        }
        self.episodes.insert(episode.id, episode);
    }

    pub fn attach_image(&mut self, image: ImageRecord) -> Result<()> {
        let image_id = image.id;
        let episode_id = image.episode_id;

        if !self.episodes.contains_key(&episode_id) {
            return Err(ScreeningError::NotFound(format!("筛查周期 {} 不存在", episode_id)));
        }

        self.episode_images.entry(episode_id).or_default().push(image_id);
        self.images.insert(image_id, image);

        tracing::info!("Image {} attached to episode {}", image_id, episode_id);
        Ok(())
    }

    pub fn get_image(&self, image_id: Uuid) -> Result<ImageRecord> {
        self.images
            .get(&image_id)
            .cloned()
            .ok_or_else(|| ScreeningError::NotFound(format!("影像 {} 不存在", image_id)))
    }

    pub fn images_for_episode(&self, episode_id: Uuid) -> Vec<ImageRecord> {
        self.episode_images
            .get(&episode_id)
            .map(|ids| ids.iter().filter_map(|id| self.images.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert_finding(&mut self, finding: Finding) {
        self.image_findings
            .entry(finding.image_id)
            .or_default()
            .push(finding.id);
        self.findings.insert(finding.id, finding);
    }

    pub fn findings_for_image(&self, image_id: Uuid) -> Vec<Finding> {
        self.image_findings
            .get(&image_id)
            .map(|ids| ids.iter().filter_map(|id| self.findings.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// 一个筛查周期全部影像的全部AI分析结论
    pub fn findings_for_episode(&self, episode_id: Uuid) -> Vec<Finding> {
        self.episode_images
            .get(&episode_id)
            .map(|image_ids| {
                image_ids
                    .iter()
                    .flat_map(|image_id| self.findings_for_image(*image_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn insert_diagnosis(&mut self, diagnosis: Diagnosis) {
        self.episode_diagnoses
            .entry(diagnosis.episode_id)
            .or_default()
            .push(diagnosis.id);
        tracing::info!(
            "Diagnosis {} drafted for episode {}",
            diagnosis.id,
            diagnosis.episode_id
        );
        self.diagnoses.insert(diagnosis.id, diagnosis);
    }

    pub fn get_diagnosis(&self, diagnosis_id: Uuid) -> Result<Diagnosis> {
        self.diagnoses
            .get(&diagnosis_id)
            .cloned()
            .ok_or_else(|| ScreeningError::NotFound(format!("诊断 {} 不存在", diagnosis_id)))
    }

    /// 整体替换诊断记录（评审协调器更新及回滚使用）
    pub fn put_diagnosis(&mut self, diagnosis: Diagnosis) {
        self.diagnoses.insert(diagnosis.id, diagnosis);
    }

    pub fn diagnoses_for_episode(&self, episode_id: Uuid) -> Vec<Diagnosis> {
        self.episode_diagnoses
            .get(&episode_id)
            .map(|ids| ids.iter().filter_map(|id| self.diagnoses.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// 最新追加的诊断（修订以追加方式进行，最后一条为当前诊断）
    pub fn latest_diagnosis_for_episode(&self, episode_id: Uuid) -> Option<Diagnosis> {
        self.episode_diagnoses
            .get(&episode_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.diagnoses.get(id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screening_core::utils::generate_accession_number;

    fn make_episode(patient_id: Uuid) -> Episode {
        Episode {
            id: Uuid::new_v4(),
            patient_id,
            accession_number: generate_accession_number(),
            status: EpisodeStatus::Created,
            reason: None,
            clinical_notes: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_single_active_episode_per_patient() {
        let mut store = EpisodeStore::new();
        let patient = Uuid::new_v4();

        store.insert_episode(make_episode(patient)).unwrap();

        let err = store.insert_episode(make_episode(patient)).unwrap_err();
        assert!(matches!(err, ScreeningError::ActiveEpisodeExists(_)));

        // 其他患者不受影响
        store.insert_episode(make_episode(Uuid::new_v4())).unwrap();
    }

    #[test]
    fn test_terminal_transition_frees_patient_slot() {
        let mut store = EpisodeStore::new();
        let patient = Uuid::new_v4();
        let episode = make_episode(patient);
        let episode_id = episode.id;

        store.insert_episode(episode).unwrap();
        store
            .apply_episode_transition(episode_id, 0, EpisodeStatus::Discarded)
            .unwrap();

        assert!(!store.has_active_episode(patient));
        store.insert_episode(make_episode(patient)).unwrap();
    }

    #[test]
    fn test_version_mismatch_is_concurrent_modification() {
        let mut store = EpisodeStore::new();
        let episode = make_episode(Uuid::new_v4());
        let episode_id = episode.id;
        store.insert_episode(episode).unwrap();

        let updated = store
            .apply_episode_transition(episode_id, 0, EpisodeStatus::ImagesPending)
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = store
            .apply_episode_transition(episode_id, 0, EpisodeStatus::AnalysisReady)
            .unwrap_err();
        assert!(matches!(err, ScreeningError::ConcurrentModification(_)));
    }

    #[test]
    fn test_findings_for_episode_spans_images() {
        let mut store = EpisodeStore::new();
        let episode = make_episode(Uuid::new_v4());
        let episode_id = episode.id;
        store.insert_episode(episode).unwrap();

        for _ in 0..2 {
            let image = ImageRecord {
                id: Uuid::new_v4(),
                episode_id,
                modality: screening_core::ImageModality::PapSmear,
                storage_reference: "blob://sample".into(),
                original_filename: None,
                file_size: None,
                mime_type: None,
                uploaded_at: Utc::now(),
            };
            let image_id = image.id;
            store.attach_image(image).unwrap();

            store.insert_finding(Finding {
                id: Uuid::new_v4(),
                image_id,
                risk_score: 0.1,
                predicted_category: screening_core::DiagnosisCategory::Nilm,
                category_scores: Default::default(),
                regions: vec![],
                model_name: "model".into(),
                model_version: "1".into(),
                notes: None,
                created_at: Utc::now(),
            });
        }

        assert_eq!(store.findings_for_episode(episode_id).len(), 2);
    }
}
