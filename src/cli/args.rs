//! CLI argument parsing using clap.
//!
//! Contains the Cli struct and the Commands enum.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

const AFTER_HELP: &str = "\
Quick Start:
  $ ragbase init                          # Create .ragbase/settings.toml
  $ ragbase add notes.md handbook.txt     # Ingest files
  $ ragbase add --dir ./docs --clean      # Ingest a directory of markdown
  $ ragbase ask \"What color is the sky?\"  # Grounded answer with citations
  $ ragbase status                        # Knowledge base counts";

/// Retrieval-augmented knowledge base
#[derive(Parser)]
#[command(
    name = "ragbase",
    version = env!("CARGO_PKG_VERSION"),
    about = "Answer questions from your own documents",
    long_about = "Ingest documents, embed their chunks, and answer questions grounded in the most relevant fragments.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = AFTER_HELP
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "RAGBASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize configuration
    #[command(about = "Set up .ragbase directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest documents
    #[command(about = "Add files or a directory of documents to the knowledge base")]
    Add {
        /// Files to ingest
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Ingest every matching file under this directory
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Document id to use (single file only; default is a content hash)
        #[arg(long, value_name = "NAME")]
        id: Option<String>,

        /// Replace an existing document with the same id
        #[arg(long)]
        overwrite: bool,

        /// Clean converted markdown before chunking
        #[arg(long)]
        clean: bool,
    },

    /// Ask a question
    #[command(about = "Answer a question from the knowledge base")]
    Ask {
        /// The question
        question: String,

        /// Number of context chunks (overrides config)
        #[arg(short, long)]
        k: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show knowledge base status
    #[command(about = "Show document, chunk and vector counts")]
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List documents
    #[command(about = "List stored documents")]
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one document
    #[command(about = "Show a document's metadata and chunks")]
    Show {
        /// Document id
        id: String,
    },

    /// Remove a document
    #[command(about = "Delete a document with its chunks and vectors")]
    Remove {
        /// Document id
        id: String,
    },

    /// Retry a failed document
    #[command(about = "Re-run ingestion for a failed document")]
    Retry {
        /// Document id
        id: String,
    },

    /// Rebuild the vector index
    #[command(about = "Rebuild the vector index from stored embeddings")]
    Rebuild,

    /// Remove everything
    #[command(about = "Delete every document and vector")]
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show configuration
    #[command(about = "Display active settings")]
    Config,
}
