//! 审计链哈希计算与校验
//!
//! 每个条目的哈希覆盖上一条目的哈希，链条可在不信任存储层的前提下端到端校验

use screening_core::{Result, ScreeningError};
use sha2::{Digest, Sha256};

use crate::entry::AuditEntry;

/// 链首前驱哈希
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// 计算SHA-256哈希
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// 计算条目哈希
///
/// 哈希材料为规范化JSON（serde_json默认按键排序），覆盖除 entry_hash 外的全部字段
pub fn compute_entry_hash(entry: &AuditEntry) -> Result<String> {
    let material = serde_json::json!({
        "entry_id": entry.entry_id,
        "episode_id": entry.episode_id,
        "actor_id": entry.actor_id,
        "event": entry.event,
        "severity": entry.severity,
        "payload": entry.payload,
        "timestamp": entry.timestamp.to_rfc3339(),
        "prev_hash": entry.prev_hash,
    });

    Ok(hash_data(serde_json::to_string(&material)?.as_bytes()))
}

/// 端到端校验一段审计链
///
/// 检查计数器严格递增、前驱哈希衔接、存储哈希与重算哈希一致
pub fn verify_chain(entries: &[AuditEntry]) -> Result<()> {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut prev_id: Option<u64> = None;

    for entry in entries {
        if let Some(prev) = prev_id {
            if entry.entry_id <= prev {
                return Err(ScreeningError::Validation(format!(
                    "审计链计数器未递增: {} 之后出现 {}",
                    prev, entry.entry_id
                )));
            }
        }

        if entry.prev_hash != prev_hash {
            return Err(ScreeningError::Validation(format!(
                "审计链断裂: 条目 {} 的前驱哈希不匹配",
                entry.entry_id
            )));
        }

        let recomputed = compute_entry_hash(entry)?;
        if recomputed != entry.entry_hash {
            return Err(ScreeningError::Validation(format!(
                "审计条目 {} 哈希与内容不一致, 可能被篡改",
                entry.entry_id
            )));
        }

        prev_hash = entry.entry_hash.clone();
        prev_id = Some(entry.entry_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let hash1 = hash_data(b"audit entry");
        let hash2 = hash_data(b"audit entry");
        assert_eq!(hash1, hash2);

        // SHA-256 输出64个十六进制字符
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_data(b"audit entry?"));
    }

    #[test]
    fn test_verify_empty_chain() {
        assert!(verify_chain(&[]).is_ok());
    }
}
