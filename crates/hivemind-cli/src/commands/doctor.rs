//! Doctor command for health checks.

use std::path::Path;
use std::time::Instant;

use anyhow::{Result, bail};
use colored::Colorize;
use serde_json::json;

use hivemind_config::{BackendKind, Config};
use hivemind_context::connect_backend;
use hivemind_storage::{ContextBackend, redact_url};

fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_millis()
}

/// Check configuration, backend connectivity and a write/read/delete probe.
pub(crate) async fn run_doctor(explicit: Option<&Path>) -> Result<()> {
    println!("{}", "Hivemind Doctor - Context Store Health Check".cyan().bold());
    println!();

    print!("  Checking configuration... ");
    let resolved = match Config::load(explicit) {
        Ok(resolved) => {
            println!("{}", "OK".green());
            for file in &resolved.loaded_files {
                println!("    Loaded: {file}");
            }
            resolved
        },
        Err(e) => {
            println!("{}", "FAIL".red());
            println!("    {e}");
            bail!("configuration is invalid");
        },
    };
    let config = &resolved.config;
    let kind = config.store.backend_kind()?;
    let target = match kind {
        BackendKind::Cache => redact_url(&config.cache.url),
        BackendKind::Relational => config.relational.url.clone(),
        BackendKind::Memory => "in-process".to_string(),
    };
    println!("    Backend: {kind} ({target})");
    println!("    Namespace: {}", config.store.namespace);

    print!("  Connecting... ");
    let start = Instant::now();
    let backend = match connect_backend(config).await {
        Ok(backend) => {
            println!("{} ({}ms)", "OK".green(), elapsed_ms(start));
            backend
        },
        Err(e) => {
            println!("{}", "FAIL".red());
            println!("    {e}");
            bail!("backend is unreachable");
        },
    };

    let mut healthy = true;

    print!("  Ping... ");
    let start = Instant::now();
    match backend.ping().await {
        Ok(()) => println!("{} ({}ms)", "OK".green(), elapsed_ms(start)),
        Err(e) => {
            healthy = false;
            println!("{} - {}", "FAIL".red(), e.to_string().dimmed());
        },
    }

    print!("  Write/read/delete probe... ");
    let start = Instant::now();
    match probe(backend.as_ref(), &config.store.namespace).await {
        Ok(()) => println!("{} ({}ms)", "OK".green(), elapsed_ms(start)),
        Err(e) => {
            healthy = false;
            println!("{} - {}", "FAIL".red(), e.to_string().dimmed());
        },
    }

    println!();
    println!(
        "  Deletes cascade to children: {}",
        if backend.cascades_deletes() { "yes" } else { "no" }
    );
    if kind == BackendKind::Memory {
        println!(
            "  {}",
            "Memory backend: contexts do not outlive this process".yellow()
        );
    }
    println!();

    if !healthy {
        bail!("context store is unhealthy");
    }
    println!("{}", "Context store is ready to use!".green().bold());
    Ok(())
}

async fn probe(backend: &dyn ContextBackend, namespace: &str) -> Result<()> {
    let key = format!("{namespace}:__doctor_probe__");
    let value = json!({ "probe": true });
    if !backend
        .set(&key, &value, Some(std::time::Duration::from_secs(30)))
        .await?
    {
        bail!("write was rejected");
    }
    if backend.get(&key).await?.as_ref() != Some(&value) {
        bail!("read back a different value");
    }
    backend.delete(&key).await?;
    Ok(())
}
