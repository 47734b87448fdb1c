//! Rule compilation and evaluation
//!
//! Rules are compiled once per chunk run into a tagged union with one typed
//! variant per rule type, so the per-row hot path never touches the raw
//! jsonb parameters. Evaluation itself is a pure function from a compiled
//! rule and a raw value to a list of failures.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::models::{RuleScope, RuleSeverity, RuleType, ValidationRule};

/// One recorded rule violation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub rule_id: Option<Uuid>,
    pub field_name: Option<String>,
    pub code: String,
    pub message: String,
    pub severity: RuleSeverity,
}

impl RuleFailure {
    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

/// Typed check parameters, parsed once when the rule set is loaded.
#[derive(Debug, Clone)]
pub enum CompiledCheck {
    Required,
    Regex { regex: Regex },
    AllowedValues { values: HashSet<String>, ignore_case: bool },
    DecimalRange { min: Option<BigDecimal>, max: Option<BigDecimal> },
    DateFormat { format: String },
}

/// A rule ready for per-row evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: Uuid,
    pub scope: RuleScope,
    pub field_name: Option<String>,
    pub severity: RuleSeverity,
    pub code: String,
    pub message_template: String,
    pub check: CompiledCheck,
}

/// Compile the enabled rule set, dropping misconfigured rules.
///
/// A dropped rule is a no-op for every row (missing field name on a
/// field-scoped rule, missing/invalid parameters, unbuildable regex); it is
/// logged once here instead of failing every chunk that evaluates it.
pub fn compile_rules(rules: &[ValidationRule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .filter_map(|rule| match compile_rule(rule) {
            Some(compiled) => Some(compiled),
            None => {
                tracing::warn!(
                    rule_id = %rule.id,
                    rule_type = ?rule.rule_type,
                    code = %rule.code,
                    "Skipping misconfigured validation rule"
                );
                None
            },
        })
        .collect()
}

/// Compile a single rule; `None` means misconfigured.
pub fn compile_rule(rule: &ValidationRule) -> Option<CompiledRule> {
    if rule.scope == RuleScope::Field && is_blank(rule.field_name.as_deref()) {
        return None;
    }

    let params = &rule.parameters.0;

    let check = match rule.rule_type {
        RuleType::Required => CompiledCheck::Required,

        RuleType::Regex => {
            let pattern = param_str(params, "pattern").filter(|p| !p.trim().is_empty())?;
            // Full-match semantics: anchor the configured pattern rather
            // than searching for a substring hit.
            let regex = RegexBuilder::new(&format!("^(?:{pattern})$"))
                .case_insensitive(param_bool(params, "ignoreCase"))
                .build()
                .ok()?;
            CompiledCheck::Regex { regex }
        },

        RuleType::AllowedValues => {
            let raw_values = param_array(params, "values")?;
            let ignore_case = param_bool(params, "ignoreCase");
            let values = raw_values
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    if ignore_case {
                        v.to_uppercase()
                    } else {
                        v.to_string()
                    }
                })
                .collect();
            CompiledCheck::AllowedValues {
                values,
                ignore_case,
            }
        },

        RuleType::DecimalRange => {
            let min = param_decimal(params, "min");
            let max = param_decimal(params, "max");
            if min.is_none() && max.is_none() {
                return None;
            }
            CompiledCheck::DecimalRange { min, max }
        },

        RuleType::DateFormat => {
            let format = param_str(params, "format").filter(|f| !f.trim().is_empty())?;
            CompiledCheck::DateFormat {
                format: format.to_string(),
            }
        },
    };

    Some(CompiledRule {
        id: rule.id,
        scope: rule.scope,
        field_name: rule.field_name.clone(),
        severity: rule.severity,
        code: rule.code.clone(),
        message_template: rule.message_template.clone(),
        check,
    })
}

/// Normalize a raw value before evaluation (never persisted).
///
/// Trims whitespace; identifier-like fields (iban, swift, unique,
/// accountnumber) additionally drop internal spaces so "DE89 3704 0044"
/// and "DE8937040044" validate the same.
pub fn normalize_value(field_name: Option<&str>, raw_value: Option<&str>) -> String {
    let value = raw_value.unwrap_or("").trim().to_string();

    let Some(field_name) = field_name else {
        return value;
    };

    let lowered = field_name.to_lowercase();
    if ["iban", "swift", "unique", "accountnumber"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        value.replace(' ', "")
    } else {
        value
    }
}

/// Evaluate one compiled rule against a raw value.
///
/// Pure: the only output is the (possibly empty) failure list.
pub fn evaluate(rule: &CompiledRule, raw_value: Option<&str>) -> Vec<RuleFailure> {
    let value = normalize_value(rule.field_name.as_deref(), raw_value);
    let mut failures = Vec::new();

    match &rule.check {
        CompiledCheck::Required => {
            if value.is_empty() {
                failures.push(failure(rule, "is required"));
            }
        },

        CompiledCheck::Regex { regex } => {
            if !value.is_empty() && !regex.is_match(&value) {
                failures.push(failure(rule, "has invalid format"));
            }
        },

        CompiledCheck::AllowedValues {
            values,
            ignore_case,
        } => {
            if value.is_empty() {
                return failures;
            }
            let candidate = if *ignore_case {
                value.to_uppercase()
            } else {
                value.clone()
            };
            if !values.contains(&candidate) {
                failures.push(failure(rule, "is not an allowed value"));
            }
        },

        CompiledCheck::DecimalRange { min, max } => {
            if value.is_empty() {
                return failures;
            }
            let Ok(amount) = BigDecimal::from_str(&value) else {
                // An unparsable value yields exactly this one failure; the
                // bounds are not checked against it.
                failures.push(failure(rule, "is not a valid decimal"));
                return failures;
            };
            if let Some(min) = min {
                if amount < *min {
                    failures.push(failure(rule, &format!("must be >= {min}")));
                }
            }
            if let Some(max) = max {
                if amount > *max {
                    failures.push(failure(rule, &format!("must be <= {max}")));
                }
            }
        },

        CompiledCheck::DateFormat { format } => {
            if !value.is_empty() && !parses_exactly(&value, format) {
                failures.push(failure(rule, &format!("must match format {format}")));
            }
        },
    }

    failures
}

/// Exact parse against a chrono format string: the whole value must be
/// consumed as a datetime, a date, or a time.
fn parses_exactly(value: &str, format: &str) -> bool {
    NaiveDateTime::parse_from_str(value, format).is_ok()
        || NaiveDate::parse_from_str(value, format).is_ok()
        || NaiveTime::parse_from_str(value, format).is_ok()
}

fn failure(rule: &CompiledRule, fallback: &str) -> RuleFailure {
    RuleFailure {
        rule_id: Some(rule.id),
        field_name: rule.field_name.clone(),
        code: rule.code.clone(),
        message: resolve_message(&rule.message_template, rule.field_name.as_deref(), fallback),
        severity: rule.severity,
    }
}

/// Resolve the failure message: substitute the field name into the rule's
/// `{FieldName}` token (case-insensitive); a blank template falls back to
/// "<field> <fallback>", or the bare fallback when no field applies.
pub fn resolve_message(template: &str, field_name: Option<&str>, fallback: &str) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();

    if !template.trim().is_empty() {
        let token = TOKEN.get_or_init(|| {
            #[allow(clippy::unwrap_used)]
            RegexBuilder::new(&regex::escape("{FieldName}"))
                .case_insensitive(true)
                .build()
                .unwrap()
        });
        return token
            .replace_all(template, regex::NoExpand(field_name.unwrap_or("")))
            .into_owned();
    }

    match field_name {
        Some(field) if !field.trim().is_empty() => format!("{field} {fallback}"),
        _ => fallback.to_string(),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    param(params, key)?.as_str()
}

fn param_bool(params: &Value, key: &str) -> bool {
    param(params, key).and_then(Value::as_bool).unwrap_or(false)
}

fn param_array<'a>(params: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    param(params, key)?.as_array()
}

/// Bounds are accepted as JSON numbers or numeric strings.
fn param_decimal(params: &Value, key: &str) -> Option<BigDecimal> {
    match param(params, key)? {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Case-insensitive parameter lookup; unknown keys elsewhere are ignored.
fn param<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    let map = params.as_object()?;
    map.get(key)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleSeverity;
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    fn rule(
        scope: RuleScope,
        field_name: Option<&str>,
        rule_type: RuleType,
        parameters: Value,
    ) -> ValidationRule {
        ValidationRule {
            id: Uuid::new_v4(),
            enabled: true,
            scope,
            field_name: field_name.map(str::to_string),
            rule_type,
            parameters: Json(parameters),
            severity: RuleSeverity::Error,
            code: "TEST_CODE".to_string(),
            message_template: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_field_rule_without_field_name_is_noop() {
        let r = rule(RuleScope::Field, None, RuleType::Required, json!({}));
        assert!(compile_rule(&r).is_none());

        let r = rule(RuleScope::Field, Some("  "), RuleType::Required, json!({}));
        assert!(compile_rule(&r).is_none());
    }

    #[test]
    fn test_normalize_value_trims() {
        assert_eq!(normalize_value(Some("Name"), Some("  alice  ")), "alice");
        assert_eq!(normalize_value(None, None), "");
    }

    #[test]
    fn test_normalize_value_strips_spaces_for_identifier_fields() {
        assert_eq!(
            normalize_value(Some("Iban"), Some(" DE89 3704 0044 ")),
            "DE8937040044"
        );
        assert_eq!(
            normalize_value(Some("SwiftCode"), Some("ABNA NL 2A")),
            "ABNANL2A"
        );
        assert_eq!(
            normalize_value(Some("UniqueReference"), Some("A B C")),
            "ABC"
        );
        assert_eq!(
            normalize_value(Some("AccountNumber"), Some("12 34")),
            "1234"
        );
        // other fields keep internal spaces
        assert_eq!(
            normalize_value(Some("BeneficiaryName"), Some("Jane Doe")),
            "Jane Doe"
        );
    }
}
