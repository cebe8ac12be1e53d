//! CLI argument definitions for Triagraph.

use clap::{Parser, Subcommand};

/// Triagraph - topic-aware bug triage over a per-tenant graph.
#[derive(Parser, Debug)]
#[command(name = "tg")]
#[command(author, version, about = "Ingest bug reports, link duplicates, recommend developers", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory holding all tenant databases and model artifacts.
    /// Can also be set via TG_DATA_DIR environment variable.
    #[arg(short = 'd', long = "data-dir", global = true, env = "TG_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Tenant organization name
    #[arg(long = "org", global = true, default_value = "default")]
    pub organization: String,

    /// Tenant project name
    #[arg(long = "project", global = true, default_value = "default")]
    pub project: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize storage for the selected tenant
    Init,

    /// Bug report commands
    Bug {
        #[command(subcommand)]
        command: BugCommands,
    },

    /// Topic model commands
    Topic {
        #[command(subcommand)]
        command: TopicCommands,
    },

    /// Developer commands
    Dev {
        #[command(subcommand)]
        command: DevCommands,
    },

    /// Developer recommendation commands
    Recommend {
        #[command(subcommand)]
        command: RecommendCommands,
    },

    /// Submit a topic relevance judgment for a bug
    Feedback {
        /// Bug id the judgment applies to
        #[arg(long)]
        bug: String,

        /// Topic id the judgment applies to
        #[arg(long)]
        topic: i64,

        /// Mark the association as relevant (the default)
        #[arg(long, conflicts_with = "not_relevant")]
        relevant: bool,

        /// Mark the association as not relevant
        #[arg(long)]
        not_relevant: bool,
    },

    /// Ranker training commands
    Train {
        #[command(subcommand)]
        command: TrainCommands,
    },
}

/// Bug report commands
#[derive(Subcommand, Debug)]
pub enum BugCommands {
    /// Ingest one bug report (JSON on stdin or via --file)
    ///
    /// Infers a topic, links near-duplicates against the similarity
    /// index, and upserts the whole neighborhood in one transaction.
    /// Re-ingesting the same bug id is safe.
    Ingest {
        /// Read the report from this file instead of stdin
        #[arg(long)]
        file: Option<std::path::PathBuf>,
    },

    /// Show one bug with its outgoing edges
    Show {
        /// Bug id
        id: String,
    },

    /// List ingested bugs
    List {
        /// Maximum number of bugs returned
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Skip this many bugs first
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Free-text search over bug summaries
    Search {
        /// Query text
        #[arg(long)]
        query: String,

        /// Maximum number of matches returned
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show similarity neighbors of one bug
    Similar {
        /// Bug id
        id: String,
    },
}

/// Topic model commands
#[derive(Subcommand, Debug)]
pub enum TopicCommands {
    /// Infer a topic distribution for free text
    Infer {
        /// Text to classify
        #[arg(long)]
        text: String,
    },

    /// List topics referenced by the tenant graph
    List,
}

/// Developer commands
#[derive(Subcommand, Debug)]
pub enum DevCommands {
    /// List developers known to the tenant graph
    List,

    /// Show one developer's per-topic fix history
    Topics {
        /// Developer id (email)
        id: String,
    },
}

/// Developer recommendation commands
#[derive(Subcommand, Debug)]
pub enum RecommendCommands {
    /// Frequency-based recommendation for a description or a bug
    Frequency {
        /// Free-text problem description
        #[arg(long, conflicts_with = "bug", required_unless_present = "bug")]
        query: Option<String>,

        /// Target an already-ingested bug instead of free text
        #[arg(long)]
        bug: Option<String>,

        /// Maximum number of developers returned
        #[arg(long, default_value_t = crate::recommend::DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Learned-ranker recommendation for an ingested bug
    Rank {
        /// Bug id
        #[arg(long)]
        bug: String,

        /// Maximum number of developers returned
        #[arg(long, default_value_t = crate::recommend::DEFAULT_LIMIT)]
        limit: usize,

        /// Fall back to frequency recommendation when no model is trained
        #[arg(long)]
        fallback: bool,
    },
}

/// Ranker training commands
#[derive(Subcommand, Debug)]
pub enum TrainCommands {
    /// Start a training run for this tenant
    ///
    /// The run is exclusive per tenant; its progress can be polled from
    /// another terminal with `tg train status`.
    Start,

    /// Show the status of a training run (latest by default)
    Status {
        /// Specific run id instead of the latest run
        #[arg(long = "run")]
        run_id: Option<String>,
    },
}
