//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragcore",
    version,
    about = "Hybrid retrieval and ranking over local knowledge libraries",
    long_about = "ragcore imports documents into knowledge libraries and answers questions with \
                  ranked, cited fragments. Vector similarity, keyword matching and an entity \
                  graph are fused into one ranking and gated by per-library retrieval profiles."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragcore/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage knowledge libraries
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },

    /// Import a file or directory into a library
    Import {
        /// Library name or id
        library: String,

        /// File or directory to import
        path: PathBuf,

        /// Skip the graph rebuild after import
        #[arg(long)]
        no_graph: bool,
    },

    /// Retrieve cited fragments for a question
    Search {
        /// Question text
        query: String,

        /// Libraries to search (name or id); repeatable
        #[arg(short, long = "library", required = true)]
        libraries: Vec<String>,

        /// Number of fragments to return (defaults to retrieval.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Retrieval profile key or id, overriding the library's profile
        #[arg(short, long)]
        profile: Option<String>,

        /// Conversation name; keeps recent turns for follow-up questions
        #[arg(short, long)]
        session: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Build or inspect a library's knowledge graph
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Manage retrieval profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum LibraryAction {
    /// Create a library
    Create {
        name: String,

        /// Library type: general, novel, enterprise, scientific or humanities
        #[arg(short = 't', long = "type", default_value = "general")]
        library_type: String,

        /// Assign a retrieval profile (key or id)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// List libraries
    List,

    /// Assign a retrieval profile to a library, or clear it
    SetProfile {
        library: String,

        /// Profile key or id; omit to fall back to the type default
        profile: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GraphAction {
    /// Rebuild the graph from the library's current chunks
    Rebuild { library: String },

    /// Print a bounded view of the graph
    Show {
        library: String,

        /// Maximum nodes (defaults to graph.view_node_limit)
        #[arg(long)]
        nodes: Option<usize>,

        /// Maximum edges (defaults to graph.view_edge_limit)
        #[arg(long)]
        edges: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// List profiles
    List,

    /// Show one profile with its full configuration
    Show {
        /// Profile key or id
        profile: String,
    },

    /// Create or update profiles from a JSON file (one draft or a list)
    Import { file: PathBuf },

    /// Make a profile the global default
    SetDefault { profile: String },

    /// Enable or disable a profile
    SetActive {
        profile: String,

        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },

    /// Delete a user profile
    Delete { profile: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the default configuration path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
