//! 边界身份提取
//!
//! 身份由外部身份系统验证后经受信标头传入，
//! 核心只消费已验证的身份与角色声明，不做认证本身

use axum::http::HeaderMap;
use screening_core::{Actor, ActorRole, Result, ScreeningError};
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// 从请求标头解析操作者身份
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ScreeningError::Unauthorized("缺少身份标头".into()))?;
    let id = Uuid::parse_str(id)
        .map_err(|_| ScreeningError::Unauthorized(format!("身份标头格式无效: {}", id)))?;

    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ScreeningError::Unauthorized("缺少角色声明".into()))?;
    let role = role
        .parse::<ActorRole>()
        .map_err(|_| ScreeningError::Unauthorized(format!("未知角色声明: {}", role)))?;

    Ok(Actor { id, role })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_actor_from_valid_headers() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("pathologist"));

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.id, id);
        assert_eq!(actor.role, ActorRole::Pathologist);
    }

    #[test]
    fn test_missing_or_invalid_headers_are_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            actor_from_headers(&headers).unwrap_err(),
            ScreeningError::Unauthorized(_)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("clinician"));
        assert!(matches!(
            actor_from_headers(&headers).unwrap_err(),
            ScreeningError::Unauthorized(_)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(
            ACTOR_ID_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("surgeon"));
        assert!(matches!(
            actor_from_headers(&headers).unwrap_err(),
            ScreeningError::Unauthorized(_)
        ));
    }
}
