use timer_core::{TimerError, TimerResult};

/// 配置校验trait, 每个配置节自行实现
pub trait ConfigValidator {
    fn validate(&self) -> TimerResult<()>;
}

/// 通用校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> TimerResult<()> {
        if value.trim().is_empty() {
            return Err(TimerError::Configuration(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str, max: usize) -> TimerResult<()> {
        if count == 0 {
            return Err(TimerError::Configuration(format!("{field_name} 必须大于0")));
        }
        if count > max {
            return Err(TimerError::Configuration(format!(
                "{field_name} 不能超过 {max}"
            )));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> TimerResult<()> {
        if timeout_seconds == 0 {
            return Err(TimerError::Configuration(format!(
                "{field_name} 必须大于0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(TimerError::Configuration(format!(
                "{field_name} 不能超过 3600"
            )));
        }
        Ok(())
    }

    pub fn validate_choice(value: &str, field_name: &str, choices: &[&str]) -> TimerResult<()> {
        if !choices.contains(&value) {
            return Err(TimerError::Configuration(format!(
                "{field_name} 取值无效: {value}, 可选: {choices:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("value", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(1, "field", 100).is_ok());
        assert!(ValidationUtils::validate_count(100, "field", 100).is_ok());
        assert!(ValidationUtils::validate_count(0, "field", 100).is_err());
        assert!(ValidationUtils::validate_count(101, "field", 100).is_err());
    }

    #[test]
    fn test_validate_timeout_seconds() {
        assert!(ValidationUtils::validate_timeout_seconds(30, "field").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(3600, "field").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(0, "field").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(3601, "field").is_err());
    }

    #[test]
    fn test_validate_choice() {
        assert!(ValidationUtils::validate_choice("json", "field", &["pretty", "json"]).is_ok());
        let err = ValidationUtils::validate_choice("xml", "field", &["pretty", "json"]);
        assert!(err.is_err());
        assert!(err.unwrap_err().to_string().contains("xml"));
    }
}
