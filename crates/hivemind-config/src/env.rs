//! Environment variable fallbacks and `${VAR}` reference resolution.
//!
//! Environment variables are **fallback**, not override: they only fill
//! fields that no config file set.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources, is_unset};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// Supported env vars. Earlier entries win when two map to the same field.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "HIVEMIND_BACKEND",
        field_path: "store.backend",
    },
    EnvMapping {
        var_name: "HIVEMIND_NAMESPACE",
        field_path: "store.namespace",
    },
    EnvMapping {
        var_name: "HIVEMIND_HISTORY_LIMIT",
        field_path: "store.history_limit",
    },
    EnvMapping {
        var_name: "CONTEXT_CACHE_TTL",
        field_path: "store.default_ttl_secs",
    },
    EnvMapping {
        var_name: "REDIS_URL",
        field_path: "cache.url",
    },
    EnvMapping {
        var_name: "DATABASE_URL",
        field_path: "relational.url",
    },
    EnvMapping {
        var_name: "DATABASE_POOL_MIN",
        field_path: "relational.pool_min",
    },
    EnvMapping {
        var_name: "DATABASE_POOL_MAX",
        field_path: "relational.pool_max",
    },
    EnvMapping {
        var_name: "HIVEMIND_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "HIVEMIND_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file, then assemble connection URLs from their components.
///
/// Returns the number of fields filled from the environment.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if !is_unset(sources, mapping.field_path) {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );

            set_field_from_string(merged, mapping.field_path, val);
            sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
            count = count.saturating_add(1);
        }
    }

    if is_unset(sources, "cache.url")
        && let Some(url) = assemble_redis_url(env_vars)
    {
        debug!(field = "cache.url", "assembled redis url from REDIS_* components");
        set_field_from_string(merged, "cache.url", &url);
        sources.insert("cache.url".to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    if is_unset(sources, "relational.url")
        && let Some(path) = env_vars.get("SQLITE_PATH").filter(|p| !p.is_empty())
    {
        debug!(field = "relational.url", "assembled sqlite url from SQLITE_PATH");
        set_field_from_string(merged, "relational.url", &format!("sqlite://{path}"));
        sources.insert("relational.url".to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    count
}

/// Build `redis://[:password@]host:port/db` when any `REDIS_*` component is
/// present. Missing components default to `localhost`, `6379` and `0`.
fn assemble_redis_url<S: ::std::hash::BuildHasher>(
    env_vars: &HashMap<String, String, S>,
) -> Option<String> {
    const COMPONENTS: [&str; 4] = ["REDIS_HOST", "REDIS_PORT", "REDIS_DB", "REDIS_PASSWORD"];
    if !COMPONENTS.iter().any(|name| env_vars.contains_key(*name)) {
        return None;
    }

    let get = |name: &str, default: &'static str| {
        env_vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
    };
    let auth = env_vars
        .get("REDIS_PASSWORD")
        .filter(|p| !p.is_empty())
        .map(|p| format!(":{p}@"))
        .unwrap_or_default();

    Some(format!(
        "redis://{auth}{}:{}/{}",
        get("REDIS_HOST", "localhost"),
        get("REDIS_PORT", "6379"),
        get("REDIS_DB", "0")
    ))
}

/// Resolve `${VAR}` references within string values in the config tree.
///
/// References that don't resolve are left as-is.
pub fn resolve_env_references<S: ::std::hash::BuildHasher>(
    val: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) {
    match val {
        toml::Value::String(s) => {
            *s = resolve_string_refs(s, env_vars);
        },
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        toml::Value::Array(arr) => {
            for child in arr.iter_mut() {
                resolve_env_references(child, env_vars);
            }
        },
        _ => {},
    }
}

fn resolve_string_refs<S: ::std::hash::BuildHasher>(
    input: &str,
    env_vars: &HashMap<String, String, S>,
) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;

            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }

            if closed && !var_name.is_empty() {
                if let Some(val) = env_vars.get(&var_name) {
                    result.push_str(val);
                } else {
                    debug!(var = var_name, "unresolved env var reference in config");
                    let _ = write!(result, "${{{var_name}}}");
                }
            } else {
                // Malformed reference, leave as-is.
                result.push_str("${");
                result.push_str(&var_name);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Set a dotted field in the TOML tree, creating intermediate tables.
fn set_field_from_string(root: &mut toml::Value, path: &str, val: &str) {
    let toml_val = coerce_to_toml_value(path, val);

    let (parents, leaf) = path.rsplit_once('.').unwrap_or(("", path));

    let mut current = root;
    for segment in parents.split('.').filter(|s| !s.is_empty()) {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), toml_val);
    }
}

/// Coerce an env var string to the TOML type the field expects.
fn coerce_to_toml_value(path: &str, val: &str) -> toml::Value {
    if matches!(
        path,
        "store.history_limit"
            | "store.default_ttl_secs"
            | "relational.pool_min"
            | "relational.pool_max"
    ) && let Ok(i) = val.trim().parse::<i64>()
    {
        return toml::Value::Integer(i);
    }

    toml::Value::String(val.to_owned())
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn defaults() -> (toml::Value, FieldSources) {
        let val: toml::Value =
            toml::from_str("[store]\nbackend = \"cache\"\n[cache]\nurl = \"redis://localhost\"\n")
                .unwrap();
        let mut sources = FieldSources::new();
        crate::merge::record_leaves(&val, "", &ConfigLayer::Defaults, &mut sources);
        (val, sources)
    }

    #[test]
    fn test_env_fills_defaulted_field() {
        let (mut val, mut sources) = defaults();
        let env = make_env(&[("HIVEMIND_BACKEND", "relational")]);

        let count = apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(count, 1);
        assert_eq!(val["store"]["backend"].as_str(), Some("relational"));
        assert_eq!(sources.get("store.backend"), Some(&ConfigLayer::Environment));
    }

    #[test]
    fn test_env_does_not_override_file() {
        let (mut val, mut sources) = defaults();
        sources.insert("store.backend".to_owned(), ConfigLayer::User);
        let env = make_env(&[("HIVEMIND_BACKEND", "memory")]);

        apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(val["store"]["backend"].as_str(), Some("cache"));
    }

    #[test]
    fn test_integer_coercion() {
        let (mut val, mut sources) = defaults();
        let env = make_env(&[("CONTEXT_CACHE_TTL", "3600"), ("DATABASE_POOL_MAX", "4")]);

        apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(val["store"]["default_ttl_secs"].as_integer(), Some(3600));
        assert_eq!(val["relational"]["pool_max"].as_integer(), Some(4));
    }

    #[test]
    fn test_redis_url_assembled_from_components() {
        let (mut val, mut sources) = defaults();
        let env = make_env(&[("REDIS_HOST", "cache.internal"), ("REDIS_PASSWORD", "pw")]);

        apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(
            val["cache"]["url"].as_str(),
            Some("redis://:pw@cache.internal:6379/0")
        );
    }

    #[test]
    fn test_redis_url_wins_over_components() {
        let (mut val, mut sources) = defaults();
        let env = make_env(&[("REDIS_URL", "redis://primary:6380/2"), ("REDIS_HOST", "other")]);

        apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(val["cache"]["url"].as_str(), Some("redis://primary:6380/2"));
    }

    #[test]
    fn test_sqlite_path_assembly() {
        let (mut val, mut sources) = defaults();
        let env = make_env(&[("SQLITE_PATH", "/var/lib/hivemind/ctx.db")]);

        apply_env_fallbacks(&mut val, &mut sources, &env);

        assert_eq!(
            val["relational"]["url"].as_str(),
            Some("sqlite:///var/lib/hivemind/ctx.db")
        );
    }

    #[test]
    fn test_no_components_no_assembly() {
        let env = make_env(&[]);
        assert!(assemble_redis_url(&env).is_none());
    }

    #[test]
    fn test_resolve_references() {
        let mut val: toml::Value =
            toml::from_str("[cache]\nurl = \"redis://:${REDIS_PW}@host/0\"\n").unwrap();
        let env = make_env(&[("REDIS_PW", "abc")]);

        resolve_env_references(&mut val, &env);

        assert_eq!(val["cache"]["url"].as_str(), Some("redis://:abc@host/0"));
    }

    #[test]
    fn test_unresolved_and_malformed_references_kept() {
        let env = make_env(&[]);
        assert_eq!(resolve_string_refs("${MISSING}", &env), "${MISSING}");
        assert_eq!(resolve_string_refs("${OPEN", &env), "${OPEN");
        assert_eq!(resolve_string_refs("cost $5", &env), "cost $5");
    }
}
