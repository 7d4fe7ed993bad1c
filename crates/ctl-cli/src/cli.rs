use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ctl_types::{EntityKey, Timestamp};

#[derive(Parser)]
#[command(
    name = "ctl",
    about = "Campaign Timeline Ledger: branching, bitemporal world state",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// State file holding branches and versions
    #[arg(long, global = true, default_value = "ctl-state.json")]
    pub state: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Recorded as the author of new versions
    #[arg(long, global = true, default_value = "cli")]
    pub user: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the root timeline
    Init,
    /// Fork a new timeline from an existing one
    Fork(ForkArgs),
    /// Show the timeline tree
    Branches,
    /// Show a timeline and its ancestors up to the root
    Ancestry(BranchRef),
    /// Delete an unpinned timeline without children
    DeleteBranch(BranchRef),
    /// Pin or unpin a timeline
    Pin(PinArgs),
    /// Add or remove a timeline tag
    Tag(TagArgs),
    /// Record a new full state for an entity
    Append(AppendArgs),
    /// Apply JSON-Patch style operations to an entity's current state
    Patch(PatchArgs),
    /// Show an entity's own history on a timeline
    History(HistoryArgs),
    /// Show an entity's effective state on a timeline
    Resolve(ResolveArgs),
    /// Show field changes between two versions
    Diff(DiffArgs),
    /// Restore an entity to a historical version
    Restore(RestoreArgs),
    /// Merge an entity from one timeline into another
    Merge(MergeArgs),
    /// Check history invariants
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct BranchRef {
    /// Branch ID or unique name
    pub branch: String,
}

#[derive(Args)]
pub struct ForkArgs {
    /// Parent branch ID or unique name
    pub parent: String,
    pub name: String,
    #[arg(short, long)]
    pub description: Option<String>,
    /// Divergence instant (RFC 3339); defaults to now
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,
}

#[derive(Args)]
pub struct PinArgs {
    pub branch: String,
    #[arg(long)]
    pub unpin: bool,
}

#[derive(Args)]
pub struct TagArgs {
    pub branch: String,
    pub tag: String,
    #[arg(short = 'd', long)]
    pub remove: bool,
}

#[derive(Args)]
pub struct AppendArgs {
    pub branch: String,
    /// Entity as `type/id`
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    /// Full state as a JSON object
    pub payload: String,
    #[arg(short, long)]
    pub message: Option<String>,
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,
}

#[derive(Args)]
pub struct PatchArgs {
    pub branch: String,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    /// JSON array of patch operations
    pub operations: String,
    #[arg(short, long)]
    pub message: Option<String>,
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub branch: String,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Walk every page instead of just the first
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct ResolveArgs {
    pub branch: String,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,
}

#[derive(Args)]
pub struct DiffArgs {
    pub from: String,
    pub to: String,
}

#[derive(Args)]
pub struct RestoreArgs {
    pub branch: String,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    pub version: String,
    #[arg(short, long)]
    pub message: Option<String>,
}

#[derive(Args)]
pub struct MergeArgs {
    pub source: String,
    pub target: String,
    #[arg(value_parser = parse_entity)]
    pub entity: EntityKey,
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<Timestamp>,
    #[arg(short, long)]
    pub message: Option<String>,
    /// Show the three-way comparison without writing
    #[arg(long)]
    pub preview: bool,
    /// Settle a conflict: `path=<json>`, repeatable
    #[arg(long = "resolve", value_parser = parse_resolution)]
    pub resolutions: Vec<(String, serde_json::Value)>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Limit to one branch
    pub branch: Option<String>,
}

fn parse_entity(s: &str) -> Result<EntityKey, String> {
    match s.split_once('/') {
        Some((ty, id)) if !ty.is_empty() && !id.is_empty() => Ok(EntityKey::new(ty, id)),
        _ => Err(format!("expected `type/id`, got `{s}`")),
    }
}

fn parse_timestamp(s: &str) -> Result<Timestamp, String> {
    Timestamp::parse(s).map_err(|e| e.to_string())
}

fn parse_resolution(s: &str) -> Result<(String, serde_json::Value), String> {
    let (path, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `path=<json>`, got `{s}`"))?;
    // Bare words are taken as strings so `ruler=Cerys` works unquoted.
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.into()));
    Ok((path.to_string(), value))
}
