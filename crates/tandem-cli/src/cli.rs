use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Offline-first record sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name holding backend configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, edit, and inspect local records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Reconcile the local store with the backend
    Sync {
        /// Re-fetch everything and remove records deleted remotely
        #[arg(long)]
        full: bool,
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Keep syncing on realtime changes until interrupted
    Watch,
    /// Check this build against the backend's minimum supported version
    VersionCheck {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download record assets
    Assets {
        #[command(subcommand)]
        command: AssetCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Entity types the CLI knows how to edit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum EntityKind {
    Profiles,
    Listings,
    Tasks,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StateFilter {
    Synced,
    Pending,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create a record from a JSON object (read from stdin when omitted)
    Add {
        #[arg(value_enum)]
        entity: EntityKind,
        /// Record fields as JSON
        json: Option<String>,
    },
    /// Replace a record's fields with a JSON object
    Edit {
        #[arg(value_enum)]
        entity: EntityKind,
        /// Record ID or unique ID prefix
        id: String,
        /// Record fields as JSON (read from stdin when omitted)
        json: Option<String>,
    },
    /// Show one record with its sync metadata
    Show {
        #[arg(value_enum)]
        entity: EntityKind,
        /// Record ID or unique ID prefix
        id: String,
    },
    /// List records of one entity type
    List {
        #[arg(value_enum)]
        entity: EntityKind,
        /// Only records in this sync state
        #[arg(long, value_enum)]
        state: Option<StateFilter>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Push records whose last push failed
    Retry,
    /// Forget checkpoints so the next sync fetches every row
    Reset,
    /// Show per-type sync state counts and checkpoints
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records whose last push failed
    Failed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AssetCommands {
    /// Download profile avatars whose content hash changed
    Pull {
        /// Directory holding downloaded assets
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Backend project URL
        #[arg(long, value_name = "URL")]
        backend_url: Option<String>,
        /// Backend anon/public key
        #[arg(long, value_name = "KEY")]
        anon_key: Option<String>,
        /// Session access token for row-level access
        #[arg(long, value_name = "TOKEN")]
        access_token: Option<String>,
        /// Storage bucket holding record assets
        #[arg(long, value_name = "NAME")]
        storage_bucket: Option<String>,
        /// User ID this client syncs as
        #[arg(long, value_name = "ID")]
        actor_id: Option<String>,
        /// Realtime broadcast topic carrying change events
        #[arg(long, value_name = "TOPIC")]
        realtime_topic: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile (secrets redacted)
    Show {
        /// Profile name to show
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}
