use apollo_core::{ApolloError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::env;

// ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Substitutes `${VAR}` references in every string of a settings document,
/// reading variables from the process environment.
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    substitute_with(value, &|name| env::var(name).ok())
}

/// Same as [`substitute_env_vars`] with an explicit variable source.
pub fn substitute_with(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
    let mut missing = Vec::new();
    walk(value, lookup, &mut missing);

    if missing.is_empty() {
        Ok(())
    } else {
        missing.sort();
        missing.dedup();
        Err(ApolloError::ConfigError(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )))
    }
}

fn walk(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>, missing: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_in_string(s, lookup, missing);
            }
        }
        Value::Object(map) => map.values_mut().for_each(|v| walk(v, lookup, missing)),
        Value::Array(items) => items.iter_mut().for_each(|v| walk(v, lookup, missing)),
        _ => {}
    }
}

fn substitute_in_string(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    missing: &mut Vec<String>,
) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |cap: &Captures<'_>| {
            let name = &cap[1];
            match lookup(name) {
                Some(value) => value,
                None => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        missing.push(name.to_string());
                        cap[0].to_string()
                    }
                },
            }
        })
        .into_owned()
}
