//! # Screening Web
//!
//! 筛查工作流的HTTP接口层：每个编排操作一个路由，
//! 身份从受信标头提取，类型化错误映射为HTTP状态码。

pub mod handlers;
pub mod identity;
pub mod server;

pub use handlers::{ApiError, ApiResult};
pub use identity::{actor_from_headers, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
pub use server::WebServer;
