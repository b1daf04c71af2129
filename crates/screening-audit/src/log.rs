//! 审计日志
//!
//! 仅追加的事件序列，按全局单调计数器排序，支持按筛查周期回放和合规查询

use chrono::{DateTime, Utc};
use screening_core::{Result, ScreeningError};
use uuid::Uuid;

use crate::chain::{compute_entry_hash, verify_chain, GENESIS_HASH};
use crate::entry::{AuditEntry, AuditSeverity, NewAuditEntry};

/// 审计存储接口
///
/// 写入失败必须返回 AuditWriteFailure，由触发操作整体回滚
pub trait AuditStore: Send {
    fn append(&mut self, entry: &AuditEntry) -> Result<()>;
    fn entries(&self) -> &[AuditEntry];
}

/// 内存审计存储
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Vec<AuditEntry>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }
}

/// 审计查询过滤器
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub episode_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub event: Option<String>,
    pub severity: Option<AuditSeverity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// 审计日志
pub struct AuditLog {
    store: Box<dyn AuditStore>,
    next_entry_id: u64,
    head_hash: String,
}

impl AuditLog {
    /// 创建基于内存存储的审计日志
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryAuditStore::new()))
    }

    /// 在指定存储上打开审计日志
    ///
    /// 存储中已有条目时从链尾继续编号
    pub fn with_store(store: Box<dyn AuditStore>) -> Self {
        let (next_entry_id, head_hash) = match store.entries().last() {
            Some(last) => (last.entry_id + 1, last.entry_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };

        Self {
            store,
            next_entry_id,
            head_hash,
        }
    }

    /// 追加一条审计记录
    ///
    /// 计数器与链头仅在存储确认写入后推进，失败时日志状态不变
    pub fn append(&mut self, record: NewAuditEntry) -> Result<AuditEntry> {
        let mut entry = AuditEntry {
            entry_id: self.next_entry_id,
            episode_id: record.episode_id,
            actor_id: record.actor_id,
            event: record.event,
            severity: record.severity,
            payload: record.payload,
            prev_hash: self.head_hash.clone(),
            entry_hash: String::new(),
            timestamp: Utc::now(),
        };
        entry.entry_hash = compute_entry_hash(&entry)?;

        self.store.append(&entry).map_err(|e| match e {
            ScreeningError::AuditWriteFailure(_) => e,
            other => ScreeningError::AuditWriteFailure(other.to_string()),
        })?;

        self.next_entry_id += 1;
        self.head_hash = entry.entry_hash.clone();

        tracing::debug!("Audit entry {} appended: {}", entry.entry_id, entry.event);
        Ok(entry)
    }

    /// 按序读取一个筛查周期的全部审计条目
    pub fn read(&self, episode_id: Uuid) -> Vec<AuditEntry> {
        self.store
            .entries()
            .iter()
            .filter(|e| e.episode_id == episode_id)
            .cloned()
            .collect()
    }

    /// 合规查询
    pub fn query(&self, filter: &AuditQuery) -> Vec<AuditEntry> {
        let matched = self.store.entries().iter().filter(|e| {
            filter.episode_id.map_or(true, |id| e.episode_id == id)
                && filter.actor_id.map_or(true, |id| e.actor_id == Some(id))
                && filter.event.as_ref().map_or(true, |ev| &e.event == ev)
                && filter.severity.map_or(true, |s| e.severity == s)
                && filter.from.map_or(true, |t| e.timestamp >= t)
                && filter.to.map_or(true, |t| e.timestamp <= t)
        });

        matched
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// 端到端校验整条审计链
    pub fn verify(&self) -> Result<()> {
        verify_chain(self.store.entries())
    }

    pub fn len(&self) -> usize {
        self.store.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.entries().is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_for(episode_id: Uuid, event: &str) -> NewAuditEntry {
        NewAuditEntry::new(episode_id, Some(Uuid::new_v4()), event, json!({"k": "v"}))
    }

    #[test]
    fn test_append_assigns_monotonic_ids() {
        let mut log = AuditLog::new();
        let episode = Uuid::new_v4();

        let first = log.append(record_for(episode, "episode.created")).unwrap();
        let second = log.append(record_for(episode, "episode.capture_started")).unwrap();

        assert_eq!(first.entry_id, 1);
        assert_eq!(second.entry_id, 2);
        assert_eq!(second.prev_hash, first.entry_hash);
    }

    #[test]
    fn test_read_returns_ordered_episode_history() {
        let mut log = AuditLog::new();
        let episode_a = Uuid::new_v4();
        let episode_b = Uuid::new_v4();

        log.append(record_for(episode_a, "episode.created")).unwrap();
        log.append(record_for(episode_b, "episode.created")).unwrap();
        log.append(record_for(episode_a, "image.attached")).unwrap();

        let history = log.read(episode_a);
        assert_eq!(history.len(), 2);
        assert!(history[0].entry_id < history[1].entry_id);
        assert!(history.iter().all(|e| e.episode_id == episode_a));
    }

    #[test]
    fn test_verify_detects_tampered_payload() {
        let mut log = AuditLog::new();
        let episode = Uuid::new_v4();
        for event in ["episode.created", "image.attached", "analysis.completed"] {
            log.append(record_for(episode, event)).unwrap();
        }
        assert!(log.verify().is_ok());

        let mut entries = log.read(episode);
        entries[1].payload = json!({"k": "forged"});
        assert!(verify_chain(&entries).is_err());

        // 替换单条哈希无法自洽，链条仍然断裂
        entries[1].entry_hash = compute_entry_hash(&entries[1]).unwrap();
        assert!(verify_chain(&entries).is_err());
    }

    #[test]
    fn test_query_filters() {
        let mut log = AuditLog::new();
        let episode = Uuid::new_v4();
        let reviewer = Uuid::new_v4();

        log.append(record_for(episode, "episode.created")).unwrap();
        log.append(
            NewAuditEntry::new(episode, Some(reviewer), "review.started", json!({}))
                .with_severity(AuditSeverity::Info),
        )
        .unwrap();
        log.append(
            NewAuditEntry::new(episode, Some(reviewer), "transition.rejected", json!({}))
                .with_severity(AuditSeverity::Warning),
        )
        .unwrap();

        let by_actor = log.query(&AuditQuery {
            actor_id: Some(reviewer),
            ..Default::default()
        });
        assert_eq!(by_actor.len(), 2);

        let warnings = log.query(&AuditQuery {
            severity: Some(AuditSeverity::Warning),
            ..Default::default()
        });
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].event, "transition.rejected");

        let paged = log.query(&AuditQuery {
            episode_id: Some(episode),
            offset: 1,
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].event, "review.started");
    }

    struct FailingStore {
        inner: MemoryAuditStore,
        fail: bool,
    }

    impl AuditStore for FailingStore {
        fn append(&mut self, entry: &AuditEntry) -> Result<()> {
            if self.fail {
                return Err(ScreeningError::AuditWriteFailure("store offline".into()));
            }
            self.inner.append(entry)
        }

        fn entries(&self) -> &[AuditEntry] {
            self.inner.entries()
        }
    }

    #[test]
    fn test_failed_write_does_not_advance_chain() {
        let mut log = AuditLog::with_store(Box::new(FailingStore {
            inner: MemoryAuditStore::new(),
            fail: true,
        }));
        let episode = Uuid::new_v4();

        let err = log.append(record_for(episode, "episode.created")).unwrap_err();
        assert!(matches!(err, ScreeningError::AuditWriteFailure(_)));
        assert!(log.is_empty());

        // 失败未消耗计数器，链条无空洞
        let mut log = AuditLog::with_store(Box::new(FailingStore {
            inner: MemoryAuditStore::new(),
            fail: false,
        }));
        let entry = log.append(record_for(episode, "episode.created")).unwrap();
        assert_eq!(entry.entry_id, 1);
        assert!(log.verify().is_ok());
    }

    #[test]
    fn test_reopen_resumes_from_chain_tail() {
        let mut store = MemoryAuditStore::new();
        let episode = Uuid::new_v4();

        {
            let mut log = AuditLog::new();
            log.append(record_for(episode, "episode.created")).unwrap();
            let entries = log.read(episode);
            for entry in &entries {
                store.append(entry).unwrap();
            }
        }

        let mut reopened = AuditLog::with_store(Box::new(store));
        let next = reopened.append(record_for(episode, "image.attached")).unwrap();
        assert_eq!(next.entry_id, 2);
        assert!(reopened.verify().is_ok());
    }
}
