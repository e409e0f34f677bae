// Typed access to the free-form params map.
//
// Missing keys are `None`; present-but-wrong-type values are a `RuleError` so a typo in
// the rules file surfaces in the logs instead of silently disabling a check.

use crate::core::moderation::moderation_models::RuleParams;
use crate::core::moderation::rule_engine::RuleError;
use serde_json::Value;

fn invalid(param: &str, reason: &str) -> RuleError {
    RuleError::InvalidParam {
        param: param.to_string(),
        reason: reason.to_string(),
    }
}

/// The rule's configured `reason`, or `default`.
pub fn reason_or(params: &RuleParams, default: &str) -> String {
    params
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

pub fn opt_i64(params: &RuleParams, key: &str) -> Result<Option<i64>, RuleError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            // Accept 2.0 as well as 2; policy files are often hand-written.
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| invalid(key, "expected an integer")),
    }
}

pub fn opt_str<'a>(params: &'a RuleParams, key: &str) -> Result<Option<&'a str>, RuleError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(key, "expected a string")),
    }
}

pub fn str_list(params: &RuleParams, key: &str) -> Result<Vec<String>, RuleError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(key, "expected a list of strings"))
            })
            .collect(),
        Some(_) => Err(invalid(key, "expected a list of strings")),
    }
}
