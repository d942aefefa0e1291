//! `hivemind config`: inspect the resolved configuration.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use colored::Colorize;

use hivemind_config::{Config, ResolvedConfig, ShowFormat, env, loader};

use crate::theme::Theme;

fn load(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    Config::load(explicit).context("failed to load configuration")
}

/// Print the resolved configuration with source annotations.
pub(crate) fn show_config(explicit: Option<&Path>, format: &str, section: Option<&str>) -> Result<()> {
    let show_format = match format {
        "toml" => ShowFormat::Toml,
        "json" => ShowFormat::Json,
        other => bail!("unknown config format: {other} (expected toml or json)"),
    };
    let resolved = load(explicit)?;
    let rendered = resolved.show(show_format, section).map_err(|_| match section {
        Some(s) => anyhow::anyhow!("no such config section: {s}"),
        None => anyhow::anyhow!("failed to render configuration"),
    })?;
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// Load and validate, reporting the outcome.
pub(crate) fn validate_config(explicit: Option<&Path>) -> Result<()> {
    let resolved = load(explicit)?;
    println!("{}", Theme::success("Configuration is valid"));
    for file in &resolved.loaded_files {
        println!("  {} {file}", "loaded".dimmed());
    }
    println!(
        "  {} {}",
        "backend".dimmed(),
        resolved.config.store.backend_kind()?
    );
    Ok(())
}

/// Show which config files are consulted, in precedence order.
pub(crate) fn show_paths(explicit: Option<&Path>) -> Result<()> {
    println!("{}", Theme::header("Config file paths (lowest precedence first)"));
    println!("  {} (built in)", "defaults".dimmed());

    let env_vars = env::collect_env_vars();
    match loader::user_config_path(None, &env_vars) {
        Ok(path) => print_path("user", &path),
        Err(e) => println!("  {} {}", "user".dimmed(), Theme::warning(&e.to_string())),
    }
    if let Some(path) = explicit {
        print_path("explicit", path);
    }
    println!("  {} (environment fallbacks)", "env".dimmed());
    Ok(())
}

fn print_path(label: &str, path: &Path) {
    let state = if path.exists() {
        "found".green()
    } else {
        "missing".dimmed()
    };
    println!("  {} {} [{state}]", label.dimmed(), path.display());
}
