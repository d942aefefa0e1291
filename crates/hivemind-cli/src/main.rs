//! Hivemind CLI - shared context store for cooperating agents.
//!
//! Every command loads the layered configuration, connects the configured
//! backend, runs one operation, and prints the result as pretty text or
//! JSON. Logs go to stderr so stdout stays parseable.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};

mod commands;
pub mod config_bridge;
mod formatter;
mod theme;

use commands::{config, context, doctor, entry, open_manager};
use formatter::OutputFormat;

/// Hivemind - shared context store
#[derive(Parser)]
#[command(name = "hivemind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an explicit configuration file
    #[arg(short, long, global = true, env = "HIVEMIND_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage hierarchical context nodes
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },

    /// Manage flat agent entries
    Entry {
        #[command(subcommand)]
        command: EntryCommands,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Check configuration and backend connectivity
    Doctor,
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Create a node and print its id
    Create {
        /// Payload as a JSON object
        #[arg(short, long)]
        data: Option<String>,
        /// Node type (default: generic)
        #[arg(short = 't', long = "type")]
        node_type: Option<String>,
        /// Parent node id
        #[arg(short, long)]
        parent: Option<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Show a node
    Get {
        /// Node id
        id: String,
    },
    /// Merge changes into a node
    Update {
        /// Node id
        id: String,
        /// Keys to merge into the payload, as a JSON object
        #[arg(short, long)]
        data: Option<String>,
        /// Tag to add (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Tag to remove (repeatable)
        #[arg(long = "remove-tag")]
        remove_tags: Vec<String>,
        /// Keys to merge into the metadata, as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
        /// Replace the expiry, in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Add a tag
    Tag {
        /// Node id
        id: String,
        /// Tag to add
        tag: String,
    },
    /// Remove a tag
    Untag {
        /// Node id
        id: String,
        /// Tag to remove
        tag: String,
    },
    /// Delete a node
    Delete {
        /// Node id
        id: String,
    },
    /// Find nodes by tag and/or type
    #[command(group(ArgGroup::new("filter").required(true).multiple(true).args(["tag", "node_type"])))]
    Find {
        /// Tag to match
        #[arg(long)]
        tag: Option<String>,
        /// Node type to match
        #[arg(short = 't', long = "type")]
        node_type: Option<String>,
    },
    /// List a node's children
    Children {
        /// Parent node id
        id: String,
    },
}

#[derive(Subcommand)]
enum EntryCommands {
    /// Store an entry for an agent and print its id
    Put {
        /// Agent id
        agent: String,
        /// Payload as JSON
        data: String,
        /// Expire after this many seconds
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Show an entry
    Get {
        /// Entry id
        id: String,
    },
    /// List recent entries
    Search {
        /// Only this agent's history, most recent first
        #[arg(short, long)]
        agent: Option<String>,
        /// Maximum number of entries
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Delete an entry, or everything in the namespace
    Clear {
        /// Entry id
        id: Option<String>,
        /// Clear every entry and history in the namespace
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show resolved configuration with source annotations
    Show {
        /// Output format (toml or json)
        #[arg(short, long, default_value = "toml")]
        output: String,
        /// Show only a specific section (store, cache, relational, logging)
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Validate the current configuration
    Validate,
    /// Show config file paths being checked
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config for logging setup; commands report load errors themselves.
    let loaded = hivemind_config::Config::load(cli.config.as_deref());

    let log_config = if let Ok(resolved) = &loaded {
        let mut lc = config_bridge::to_log_config(&resolved.config);
        if cli.verbose {
            "debug".clone_into(&mut lc.level);
        }
        lc
    } else {
        let level = if cli.verbose { "debug" } else { "warn" };
        hivemind_telemetry::LogConfig::new(level)
            .with_format(hivemind_telemetry::LogFormat::Compact)
    };
    if let Err(e) = hivemind_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    match &loaded {
        Ok(resolved) => tracing::debug!(files = ?resolved.loaded_files, "Configuration loaded"),
        Err(e) => tracing::warn!(error = %e, "Configuration failed to load"),
    }

    let output_format = OutputFormat::parse(&cli.format);
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Context { command } => {
            let manager = open_manager(&loaded?.config).await?;
            handle_context(&manager, command, output_format).await
        },
        Commands::Entry { command } => {
            let manager = open_manager(&loaded?.config).await?;
            handle_entry(&manager, command, output_format).await
        },
        Commands::Config { command } => handle_config(explicit, command),
        Commands::Doctor => doctor::run_doctor(explicit).await,
    }
}

async fn handle_context(
    manager: &hivemind_context::ContextManager,
    command: ContextCommands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ContextCommands::Create {
            data,
            node_type,
            parent,
            tags,
            metadata,
            ttl,
        } => {
            let args = context::CreateArgs {
                data,
                node_type,
                parent,
                tags,
                metadata,
                ttl,
            };
            context::create(manager, args, format).await
        },
        ContextCommands::Get { id } => context::get(manager, &id, format).await,
        ContextCommands::Update {
            id,
            data,
            tags,
            remove_tags,
            metadata,
            ttl,
        } => {
            let args = context::UpdateArgs {
                data,
                tags,
                remove_tags,
                metadata,
                ttl,
            };
            context::update(manager, &id, args, format).await
        },
        ContextCommands::Tag { id, tag } => context::tag(manager, &id, &tag, false, format).await,
        ContextCommands::Untag { id, tag } => context::tag(manager, &id, &tag, true, format).await,
        ContextCommands::Delete { id } => context::delete(manager, &id, format).await,
        ContextCommands::Find { tag, node_type } => {
            context::find(manager, tag.as_deref(), node_type.as_deref(), format).await
        },
        ContextCommands::Children { id } => context::children(manager, &id, format).await,
    }
}

async fn handle_entry(
    manager: &hivemind_context::ContextManager,
    command: EntryCommands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        EntryCommands::Put { agent, data, ttl } => {
            entry::put(manager, &agent, &data, ttl, format).await
        },
        EntryCommands::Get { id } => entry::get(manager, &id, format).await,
        EntryCommands::Search { agent, limit } => {
            entry::search(manager, agent.as_deref(), limit, format).await
        },
        EntryCommands::Clear { id, all } => entry::clear(manager, id.as_deref(), all, format).await,
    }
}

fn handle_config(explicit: Option<&std::path::Path>, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show { output, section } => {
            config::show_config(explicit, &output, section.as_deref())
        },
        ConfigCommands::Validate => config::validate_config(explicit),
        ConfigCommands::Paths => config::show_paths(explicit),
    }
}
