//! Config variables resolved against external variables.
//!
//! A config is a JSON object. A value is either used as-is, or is a list of conditions:
//!
//! ```json
//! {
//!     "cuj_username": "user",
//!     "some_var": [
//!         { "board": "board1.*", "value": "val for board1" },
//!         { "board": "board2.*", "model": "model2.*", "value": "val for board2 model2" },
//!         { "value": "fallback" }
//!     ]
//! }
//! ```
//!
//! Every key of a condition other than `value` names an external variable; its value is a regex that must be found
//! (case-insensitively) in that variable. The first condition whose keys all match wins, and its `value` is resolved
//! again, so conditions can nest. A condition with no keys besides `value` always matches. A condition naming an
//! unknown external variable never matches.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::error::{AutotestError, Result};

/// Key holding the value of a condition.
const VALUE_KEY: &str = "value";

/// Resolve every variable of `data` against `extvars`.
pub fn transform_config(data: &Value, extvars: &HashMap<String, String>) -> Result<BTreeMap<String, Value>> {
    let Value::Object(entries) = data else {
        return Err(config_error(format!(
            "Top level configuration object must be a dictionary but got {}",
            type_name(data)
        )));
    };
    entries
        .iter()
        .map(|(key, val)| Ok((key.clone(), get_val(val, extvars)?)))
        .collect()
}

/// Parse JSON text and resolve it.
pub fn transform_json_text(text: &str, extvars: &HashMap<String, String>) -> Result<BTreeMap<String, Value>> {
    let data: Value = serde_json::from_str(text).map_err(|e| AutotestError::parse("config JSON", e.to_string()))?;
    transform_config(&data, extvars)
}

/// Read a JSON file and resolve it.
pub fn transform_json_file(path: &Path, extvars: &HashMap<String, String>) -> Result<BTreeMap<String, Value>> {
    let text = fs::read_to_string(path)?;
    transform_json_text(&text, extvars)
}

fn get_val(val: &Value, extvars: &HashMap<String, String>) -> Result<Value> {
    let conditions = match val {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => return Ok(val.clone()),
        Value::Array(conditions) => conditions,
        other => {
            return Err(config_error(format!(
                "Conditions must be an array but got {}",
                type_name(other)
            )));
        }
    };

    for cond in conditions {
        let Value::Object(cond) = cond else {
            return Err(config_error(format!(
                "Condition must be a dictionary but got {}",
                type_name(cond)
            )));
        };
        let Some(value) = cond.get(VALUE_KEY) else {
            return Err(config_error(r#"Missing mandatory "value" key from condition"#));
        };
        if condition_matches(cond, extvars)? {
            return get_val(value, extvars);
        }
    }

    Err(config_error("Condition did not match any external vars"))
}

fn condition_matches(cond: &Map<String, Value>, extvars: &HashMap<String, String>) -> Result<bool> {
    for (key, pattern) in cond {
        if key == VALUE_KEY {
            continue;
        }
        let Some(extval) = extvars.get(key) else {
            tracing::warn!("Ignored unknown external var: {}", key);
            return Ok(false);
        };
        let Some(pattern) = pattern.as_str() else {
            return Err(config_error(format!(
                "Condition pattern for '{}' must be a string but got {}",
                key,
                type_name(pattern)
            )));
        };
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AutotestError::parse(format!("condition pattern for '{key}'"), e.to_string()))?;
        if !re.is_match(extval) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn config_error(text: impl Into<String>) -> AutotestError {
    let text = text.into();
    tracing::error!("{}", text);
    AutotestError::Config(text)
}

fn type_name(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn sample() -> Value {
        json!({
            "cuj_username": "user",
            "private_key": "SECRET",
            "retries": 3,
            "some_var": [
                {"board": "board1.*", "value": "val for board1"},
                {"board": "board2.*", "value": "val for board2"},
                {"value": "val for board2"}
            ],
            "some_var2": [
                {"board": "board2.*", "model": "model2.*", "value": "val2 for board2 model2"},
                {"value": "val2"}
            ]
        })
    }

    #[test]
    fn test_board1_resolution() {
        let config = transform_config(&sample(), &vars(&[("board", "board1"), ("model", "model1")])).unwrap();
        assert_eq!(config["cuj_username"], json!("user"));
        assert_eq!(config["retries"], json!(3));
        assert_eq!(config["some_var"], json!("val for board1"));
        assert_eq!(config["some_var2"], json!("val2"));
    }

    #[test]
    fn test_booleans_pass_through() {
        let data = json!({
            "flag": true,
            "board_flag": [
                {"board": "board1", "value": false},
                {"value": true}
            ]
        });
        let config = transform_config(&data, &vars(&[("board", "board1")])).unwrap();
        assert_eq!(config["flag"], json!(true));
        assert_eq!(config["board_flag"], json!(false));

        let config = transform_config(&data, &HashMap::new()).unwrap();
        assert_eq!(config["board_flag"], json!(true));
    }

    #[test]
    fn test_board2_model2_resolution() {
        let config = transform_config(&sample(), &vars(&[("board", "board2"), ("model", "model2")])).unwrap();
        assert_eq!(config["some_var"], json!("val for board2"));
        assert_eq!(config["some_var2"], json!("val2 for board2 model2"));
    }

    #[test]
    fn test_match_is_case_insensitive_search() {
        let data = json!({"v": [{"board": "OARD", "value": "hit"}]});
        let config = transform_config(&data, &vars(&[("board", "Board2")])).unwrap();
        assert_eq!(config["v"], json!("hit"));
    }

    #[test]
    fn test_unknown_external_var_fails_condition() {
        let data = json!({"v": [{"sku": ".*", "value": "a"}, {"value": "b"}]});
        let config = transform_config(&data, &vars(&[("board", "x")])).unwrap();
        assert_eq!(config["v"], json!("b"));
    }

    #[test]
    fn test_nested_conditions() {
        let data = json!({"v": [{"board": "b1", "value": [{"model": "m2", "value": "b1m2"}, {"value": "b1"}]}]});
        let config = transform_config(&data, &vars(&[("board", "b1"), ("model", "m2")])).unwrap();
        assert_eq!(config["v"], json!("b1m2"));
    }

    #[test]
    fn test_no_matching_condition_is_an_error() {
        let data = json!({"v": [{"board": "b1", "value": "x"}]});
        let err = transform_config(&data, &vars(&[("board", "b2")])).unwrap_err();
        assert_eq!(
            err,
            AutotestError::Config("Condition did not match any external vars".to_string())
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let no_vars = HashMap::new();
        assert!(transform_config(&json!([1, 2]), &no_vars).is_err());
        assert!(transform_config(&json!({"v": {"a": 1}}), &no_vars).is_err());
        assert!(transform_config(&json!({"v": ["x"]}), &no_vars).is_err());
        let err = transform_config(&json!({"v": [{"board": "x"}]}), &no_vars).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"configuration error: Missing mandatory "value" key from condition"#
        );
    }

    #[test]
    fn test_json_text_parse_error() {
        let err = transform_json_text("{not json", &HashMap::new()).unwrap_err();
        assert!(matches!(err, AutotestError::Parse { .. }));
    }
}
