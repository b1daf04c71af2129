//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 生成筛查登记号
pub fn generate_accession_number() -> String {
    format!(
        "SCR-{}-{}",
        Utc::now().format("%Y%m%d"),
        Uuid::new_v4().simple().to_string()[..8].to_uppercase()
    )
}

/// 验证登记号格式
pub fn is_valid_accession_number(accession: &str) -> bool {
    let parts: Vec<&str> = accession.split('-').collect();
    parts.len() == 3
        && parts[0] == "SCR"
        && parts[1].len() == 8
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() == 8
        && parts[2].chars().all(|c| c.is_ascii_hexdigit() || c.is_ascii_uppercase())
}

/// 风险评分是否在有效区间 [0,1]
pub fn is_valid_risk_score(score: f64) -> bool {
    score.is_finite() && (0.0..=1.0).contains(&score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_accession_number() {
        let accession = generate_accession_number();
        assert!(is_valid_accession_number(&accession), "{}", accession);
    }

    #[test]
    fn test_is_valid_accession_number() {
        assert!(is_valid_accession_number("SCR-20260115-0A1B2C3D"));
        assert!(!is_valid_accession_number(""));
        assert!(!is_valid_accession_number("SCR-2026-XX"));
        assert!(!is_valid_accession_number("ACC-20260115-0A1B2C3D"));
    }

    #[test]
    fn test_is_valid_risk_score() {
        assert!(is_valid_risk_score(0.0));
        assert!(is_valid_risk_score(0.73));
        assert!(is_valid_risk_score(1.0));
        assert!(!is_valid_risk_score(-0.1));
        assert!(!is_valid_risk_score(1.01));
        assert!(!is_valid_risk_score(f64::NAN));
    }
}
