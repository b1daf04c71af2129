//! # Screening Audit
//!
//! 合规审计日志模块：仅追加的事件序列、全局单调计数器、
//! 哈希链防篡改校验以及合规查询。

pub mod chain;
pub mod entry;
pub mod log;

pub use chain::{compute_entry_hash, hash_data, verify_chain, GENESIS_HASH};
pub use entry::{AuditEntry, AuditSeverity, NewAuditEntry};
pub use log::{AuditLog, AuditQuery, AuditStore, MemoryAuditStore};
