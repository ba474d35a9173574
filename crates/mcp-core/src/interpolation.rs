//! Environment-variable interpolation for config values
//!
//! Supports `${VAR}` and `${VAR:-default}`. Expressions may nest — the
//! innermost `${...}` is resolved first, so a default value may itself
//! contain another reference, e.g. `${OUTER:-${INNER:-fallback}}`.

use std::collections::HashMap;
use std::env;

use regex::Regex;

use crate::errors::ConfigError;

/// Controls what happens when a referenced variable is unset and no
/// default is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Unresolved variables become an empty string.
    Lenient,
    /// Unresolved variables raise [`ConfigError::UnresolvedEnvVar`].
    Strict,
}

const MAX_PASSES: usize = 32;

/// Walks `input`, replacing `${VAR}` / `${VAR:-default}` expressions using
/// `vars` first and falling back to the process environment. Innermost
/// expressions are resolved before outer ones, repeating until the string
/// reaches a fixed point (or `MAX_PASSES` is hit, which indicates a cycle).
pub fn interpolate(
    input: &str,
    vars: &HashMap<String, String>,
    mode: InterpolationMode,
) -> Result<String, ConfigError> {
    let pattern = innermost_pattern();
    let mut current = input.to_string();

    for _ in 0..MAX_PASSES {
        if !pattern.is_match(&current) {
            return Ok(current);
        }
        current = replace_innermost(&pattern, &current, vars, mode)?;
    }

    Err(ConfigError::MalformedExpression(format!(
        "interpolation did not converge after {MAX_PASSES} passes (possible cycle) in '{input}'"
    )))
}

/// Matches a `${...}` expression containing no further `${` or `}` inside
/// it — i.e. the innermost one in a nested expression.
fn innermost_pattern() -> Regex {
    Regex::new(r"\$\{([^${}]+)\}").expect("static interpolation regex is valid")
}

fn replace_innermost(
    pattern: &Regex,
    input: &str,
    vars: &HashMap<String, String>,
    mode: InterpolationMode,
) -> Result<String, ConfigError> {
    let mut err = None;
    let replaced = pattern.replace_all(input, |caps: &regex::Captures| {
        let expr = &caps[1];
        match resolve_one(expr, vars, mode) {
            Ok(value) => value,
            Err(e) => {
                err.get_or_insert(e);
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok(replaced.into_owned())
}

/// Resolves a single `VAR` or `VAR:-default` expression (already stripped
/// of its surrounding `${}`).
fn resolve_one(
    expr: &str,
    vars: &HashMap<String, String>,
    mode: InterpolationMode,
) -> Result<String, ConfigError> {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expr, None),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::MalformedExpression(format!(
            "empty variable name in '${{{expr}}}'"
        )));
    }

    if let Some(value) = vars.get(name) {
        return Ok(value.clone());
    }
    if let Ok(value) = env::var(name) {
        return Ok(value);
    }
    if let Some(default) = default {
        return Ok(default.to_string());
    }
    match mode {
        InterpolationMode::Lenient => Ok(String::new()),
        InterpolationMode::Strict => Err(ConfigError::UnresolvedEnvVar(name.to_string())),
    }
}

/// Recursively interpolates every string value in a JSON document. Keys
/// are left untouched; non-string leaves (numbers, bools, null) pass
/// through unchanged.
pub fn interpolate_json(
    value: &serde_json::Value,
    vars: &HashMap<String, String>,
    mode: InterpolationMode,
) -> Result<serde_json::Value, ConfigError> {
    match value {
        serde_json::Value::String(s) => {
            Ok(serde_json::Value::String(interpolate(s, vars, mode)?))
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_json(item, vars, mode)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), interpolate_json(v, vars, mode)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_plain_variable() {
        let v = vars(&[("API_KEY", "secret")]);
        let out = interpolate("key=${API_KEY}", &v, InterpolationMode::Strict).unwrap();
        assert_eq!(out, "key=secret");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let v = HashMap::new();
        let out = interpolate("port=${PORT:-8080}", &v, InterpolationMode::Strict).unwrap();
        assert_eq!(out, "port=8080");
    }

    #[test]
    fn lenient_mode_becomes_empty_string() {
        let v = HashMap::new();
        let out = interpolate("x=${MISSING}", &v, InterpolationMode::Lenient).unwrap();
        assert_eq!(out, "x=");
    }

    #[test]
    fn strict_mode_errors_on_unresolved() {
        let v = HashMap::new();
        let err = interpolate("x=${MISSING}", &v, InterpolationMode::Strict).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedEnvVar(name) if name == "MISSING"));
    }

    #[test]
    fn nested_default_resolves_innermost_first() {
        let v = vars(&[("INNER", "inner-value")]);
        let out = interpolate(
            "x=${OUTER:-${INNER:-fallback}}",
            &v,
            InterpolationMode::Strict,
        )
        .unwrap();
        assert_eq!(out, "x=inner-value");
    }

    #[test]
    fn nested_default_falls_through_to_fallback() {
        let v = HashMap::new();
        let out = interpolate(
            "x=${OUTER:-${INNER:-fallback}}",
            &v,
            InterpolationMode::Lenient,
        )
        .unwrap();
        assert_eq!(out, "x=fallback");
    }

    #[test]
    fn local_vars_take_precedence_over_process_env() {
        let v = vars(&[("HOME", "local-override")]);
        let out = interpolate("${HOME}", &v, InterpolationMode::Strict).unwrap();
        assert_eq!(out, "local-override");
    }

    #[test]
    fn interpolate_json_recurses_into_objects_and_arrays() {
        let v = vars(&[("TOKEN", "abc123")]);
        let doc = serde_json::json!({
            "headers": {"Authorization": "Bearer ${TOKEN}"},
            "tags": ["${TOKEN}", "static"],
            "count": 3
        });
        let out = interpolate_json(&doc, &v, InterpolationMode::Strict).unwrap();
        assert_eq!(out["headers"]["Authorization"], "Bearer abc123");
        assert_eq!(out["tags"][0], "abc123");
        assert_eq!(out["count"], 3);
    }
}
