// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! forest-engine demo CLI - exercises the library's core operations against
//! a local, file-backed store. Not a product surface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use forest_engine::{
    Config, ContentBlock, FileBookmarkStore, FileStore, Forest, ForestError, MetadataSeed, Message, NodeId, Result,
    RootConfig, SourceInfo,
};
use tracing::{info, Level};
use tracing_subscriber::fmt;

/// forest-engine demo CLI.
#[derive(Parser)]
#[command(
    name = "forest-engine",
    version = env!("CARGO_PKG_VERSION"),
    author = "Chetan Conikee <conikee@gmail.com>",
    about = "Demo CLI for the forest-engine branching-conversation tree"
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the store's base directory
    #[arg(long)]
    store_root: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create (or reuse) a root and append a single user message to it
    Append {
        /// The root's system prompt
        #[arg(long)]
        system_prompt: Option<String>,
        /// The message text to append
        text: String,
    },

    /// Print the full tree for every root, as JSON
    Inspect,

    /// Print the `k` most recently created leaf nodes
    RecentLeaves {
        /// How many leaves to print
        #[arg(default_value_t = 10)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(None);

    let log_level = if cli.verbose {
        config
            .log_level
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(Level::DEBUG)
    } else {
        Level::INFO
    };
    fmt().with_max_level(log_level).with_target(false).init();

    let store_root = cli.store_root.unwrap_or_else(|| config.resolved_store_root());
    info!(path = %store_root.display(), "opening store");

    let store = Arc::new(FileStore::open(store_root.clone()).await?);
    let bookmarks = Arc::new(FileBookmarkStore::open(store_root.join("bookmarks.json")).await?);
    let forest = Forest::new(store, bookmarks);

    match cli.command {
        Commands::Append { system_prompt, text } => handle_append(&forest, system_prompt, text).await,
        Commands::Inspect => handle_inspect(&forest).await,
        Commands::RecentLeaves { k } => handle_recent_leaves(&forest, k).await,
    }
}

/// Handles the append command.
async fn handle_append(forest: &Forest, system_prompt: Option<String>, text: String) -> Result<()> {
    let root = forest.get_or_create_root(RootConfig { system_prompt }).await?;
    let parent_ref = NodeId::from_raw(root.id.to_string());
    let message = Message::User {
        content: vec![ContentBlock::Text { text }],
    };
    let node = forest
        .append(&parent_ref, vec![message], MetadataSeed::new(SourceInfo::User))
        .await?;
    let node_data = node.as_node_data().ok_or_else(|| ForestError::node_not_found_or_root(node.id_string()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(node_data).map_err(|e| ForestError::json("node", e))?
    );
    Ok(())
}

/// Handles the inspect command.
async fn handle_inspect(forest: &Forest) -> Result<()> {
    let rendered = forest.serialize().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&rendered).map_err(|e| ForestError::json("serialize", e))?
    );
    Ok(())
}

/// Handles the recent-leaves command.
async fn handle_recent_leaves(forest: &Forest, k: usize) -> Result<()> {
    let leaves = forest.list_recent_leaves(k).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&leaves).map_err(|e| ForestError::json("recent leaves", e))?
    );
    Ok(())
}
