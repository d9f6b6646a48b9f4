//! 配置校验模块
//!
//! 校验规则：
//! - 字段取值范围 (derive 规则)
//! - 扫描窗口不超过扫描间隔
//! - 监督超时足以容纳建立阶段的事件上限
//! - 冲突比例与池容量组合合理

use contracts::{LinkLayerConfig, LinkLayerError};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 最短周期广播间隔 (us)
const MIN_PERIODIC_INTERVAL_USEC: u64 = 7_500;

/// 校验 LinkLayerConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &LinkLayerConfig) -> Result<(), LinkLayerError> {
    validate_ranges(config)?;
    validate_scan_window(config)?;
    validate_past_timeout(config)?;
    Ok(())
}

/// 校验字段取值范围
fn validate_ranges(config: &LinkLayerConfig) -> Result<(), LinkLayerError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, String::new());
        LinkLayerError::config_validation(field, message)
    })
}

/// 取出第一个字段错误，嵌套字段以 `.` 连接
fn first_error(errors: &ValidationErrors, prefix: String) -> (String, String) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(error) = list.first() {
                    let message = match &error.message {
                        Some(message) => message.to_string(),
                        None => format!("failed `{}` check", error.code),
                    };
                    return (path, message);
                }
            }
            ValidationErrorsKind::Struct(nested) => return first_error(nested, path),
            ValidationErrorsKind::List(items) => {
                if let Some((idx, nested)) = items.iter().next() {
                    return first_error(nested, format!("{path}[{idx}]"));
                }
            }
        }
    }
    (prefix, "invalid value".to_string())
}

/// 校验扫描窗口
fn validate_scan_window(config: &LinkLayerConfig) -> Result<(), LinkLayerError> {
    let scan = &config.ext_scan;
    if scan.window_usec > scan.interval_usec {
        return Err(LinkLayerError::config_validation(
            "ext_scan.window_usec / ext_scan.interval_usec",
            format!(
                "window_usec ({}) must be <= interval_usec ({})",
                scan.window_usec, scan.interval_usec
            ),
        ));
    }
    Ok(())
}

/// 校验 PAST 默认监督超时
///
/// 即使是最短间隔的列车，超时也必须覆盖建立阶段允许错过的事件数。
fn validate_past_timeout(config: &LinkLayerConfig) -> Result<(), LinkLayerError> {
    let timeout_usec = config.past_defaults.sync_timeout_10ms as u64 * 10_000;
    let needed = config.establish_event_limit as u64 * MIN_PERIODIC_INTERVAL_USEC;
    if timeout_usec < needed {
        return Err(LinkLayerError::config_validation(
            "past_defaults.sync_timeout_10ms",
            format!(
                "timeout of {timeout_usec} us is shorter than {} missed events",
                config.establish_event_limit
            ),
        ));
    }
    Ok(())
}
