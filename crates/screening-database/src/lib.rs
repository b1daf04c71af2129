//! # Screening Database
//!
//! 筛查系统的PostgreSQL持久化层：表结构、行模型与条件写入查询。
//! 患者唯一活动周期与乐观并发版本检查都在SQL层面强制。

pub mod connection;
pub mod models;
pub mod queries;

pub use connection::DatabasePool;
pub use queries::DatabaseQueries;
