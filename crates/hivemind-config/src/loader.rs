//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user file (`~/.hivemind/config.toml`, or `$HIVEMIND_HOME/config.toml`)
//! 3. Merge the explicit file, if one was given
//! 4. Apply env var fallbacks for unset fields
//! 5. Resolve `${VAR}` references
//! 6. Deserialize merged tree → `Config`
//! 7. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars, resolve_env_references};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the configuration with layered precedence, reading the process
/// environment.
///
/// `explicit` is a file the operator named directly; it must exist.
/// `home_override` replaces the `.hivemind` directory used for the user
/// layer.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is unreadable or malformed,
/// or if the merged configuration fails validation.
pub fn load(explicit: Option<&Path>, home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(explicit, home_override, &collect_env_vars())
}

/// [`load`] against a supplied environment instead of the process one.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    explicit: Option<&Path>,
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    // 2. User config.
    match user_config_path(home_override, env_vars) {
        Ok(path) => {
            if let Some(overlay) = try_load_file(&path)? {
                deep_merge_tracking(
                    &mut merged,
                    &overlay,
                    "",
                    &ConfigLayer::User,
                    &mut field_sources,
                );
                info!(path = %path.display(), "loaded user config");
                loaded_files.push(path.display().to_string());
            }
        },
        Err(ConfigError::NoHomeDir) => {
            debug!("no home directory, skipping user config");
        },
        Err(e) => return Err(e),
    }

    // 3. Explicit config.
    if let Some(path) = explicit {
        let overlay = read_file(path)?;
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::Explicit,
            &mut field_sources,
        );
        info!(path = %path.display(), "loaded config file");
        loaded_files.push(path.display().to_string());
    }

    // 4. Env var fallbacks for unset fields.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    // 5–6. Resolve ${VAR} references, then deserialize.
    resolve_env_references(&mut merged, env_vars);
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 7. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a specific file path (no layering, no environment).
///
/// Fields the file omits take their default values.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or
/// fails validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = read_file(path)?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Path of the user-level config file.
///
/// `home_override` is treated as the `.hivemind` directory itself. Otherwise
/// `HIVEMIND_HOME` is used when set, then `~/.hivemind`.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if no home directory can be found.
pub fn user_config_path<S: ::std::hash::BuildHasher>(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<PathBuf> {
    if let Some(dir) = home_override {
        return Ok(dir.join("config.toml"));
    }
    if let Some(dir) = env_vars.get("HIVEMIND_HOME").filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir).join("config.toml"));
    }
    Ok(home_directory()?.join(".hivemind").join("config.toml"))
}

/// Read and parse a file that must exist.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_content(path, &content)
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read to avoid racing a separate existence check.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };
    parse_content(path, &content).map(Some)
}

fn parse_content(path: &Path, content: &str) -> ConfigResult<toml::Value> {
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config.store.backend, "cache");
        assert_eq!(config.store.namespace, "mcp");
        assert_eq!(config.store.history_limit, 100);
        assert_eq!(config.relational.pool_max, 10);
        assert_eq!(config.relational.connect_retries, 2);
        assert!(validate::validate(&config).is_ok());
    }

    #[test]
    fn test_load_with_empty_home() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load_with_env(None, Some(home.path()), &env(&[])).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.config.cache.url, "redis://localhost:6379/0");
        assert_eq!(
            resolved.field_sources.get("cache.url"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_layer_precedence() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[store]\nbackend = \"memory\"\nnamespace = \"user\"\n",
        )
        .unwrap();
        let explicit_dir = tempfile::tempdir().unwrap();
        let explicit = explicit_dir.path().join("hivemind.toml");
        std::fs::write(&explicit, "[store]\nnamespace = \"explicit\"\n").unwrap();

        let resolved = load_with_env(
            Some(&explicit),
            Some(home.path()),
            &env(&[("HIVEMIND_BACKEND", "relational"), ("HIVEMIND_LOG_LEVEL", "debug")]),
        )
        .unwrap();

        // File layers beat env; env beats defaults.
        assert_eq!(resolved.config.store.backend, "memory");
        assert_eq!(resolved.config.store.namespace, "explicit");
        assert_eq!(resolved.config.logging.level, "debug");
        assert_eq!(resolved.loaded_files.len(), 2);
        assert_eq!(
            resolved.field_sources.get("store.namespace"),
            Some(&ConfigLayer::Explicit)
        );
        assert_eq!(
            resolved.field_sources.get("logging.level"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_env_references_resolved() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[cache]\nurl = \"redis://:${CACHE_PW}@cache:6379/0\"\n",
        )
        .unwrap();

        let resolved =
            load_with_env(None, Some(home.path()), &env(&[("CACHE_PW", "pw1")])).unwrap();
        assert_eq!(resolved.config.cache.url, "redis://:pw1@cache:6379/0");
    }

    #[test]
    fn test_hivemind_home_env() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "[store]\nhistory_limit = 7\n").unwrap();
        let vars = env(&[("HIVEMIND_HOME", home.path().to_str().unwrap())]);

        let resolved = load_with_env(None, None, &vars).unwrap();
        assert_eq!(resolved.config.store.history_limit, 7);
    }

    #[test]
    fn test_validation_failure_surfaces() {
        let home = tempfile::tempdir().unwrap();
        let vars = env(&[("DATABASE_POOL_MIN", "20"), ("DATABASE_POOL_MAX", "5")]);
        let err = load_with_env(None, Some(home.path()), &vars).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("missing.toml");
        let err = load_with_env(Some(&missing), Some(home.path()), &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_malformed_user_file() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "[store\nbackend=").unwrap();
        let err = load_with_env(None, Some(home.path()), &env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "[store]\nbackend = \"relational\"\n").unwrap();
        let config = load_file(&path).unwrap();
        assert_eq!(config.store.backend, "relational");
        assert_eq!(config.relational.url, "sqlite://hivemind.db");
    }

    #[test]
    fn test_try_load_file_missing() {
        assert!(
            try_load_file(Path::new("/nonexistent/hivemind/config.toml"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_oversized_file_rejected() {
        let big = "#".repeat(1_048_577);
        let err = parse_content(Path::new("big.toml"), &big).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }
}
