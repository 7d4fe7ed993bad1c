use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use ctl_sdk::{
    Branch, Ctl, Diff, EngineConfig, LocalState, MergeRequest, MergeResult, NewVersion, Pagination,
    PatchOperation, PatchRequest, Payload, RestoreRequest, Version, VersionId,
    VersionKey,
};
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let state = LocalState::open(&cli.state)
        .with_context(|| format!("loading state {}", cli.state.display()))?;
    let ctl = state.ctl(config);
    let out = Output { format: cli.format };

    let mutated = match cli.command {
        Command::Init => cmd_init(&ctl, &out)?,
        Command::Fork(args) => cmd_fork(&ctl, &out, args)?,
        Command::Branches => cmd_branches(&ctl, &out)?,
        Command::Ancestry(args) => cmd_ancestry(&ctl, &out, args)?,
        Command::DeleteBranch(args) => cmd_delete_branch(&ctl, &out, args)?,
        Command::Pin(args) => cmd_pin(&ctl, &out, args)?,
        Command::Tag(args) => cmd_tag(&ctl, &out, args)?,
        Command::Append(args) => cmd_append(&ctl, &out, &cli.user, args)?,
        Command::Patch(args) => cmd_patch(&ctl, &out, &cli.user, args)?,
        Command::History(args) => cmd_history(&ctl, &out, args)?,
        Command::Resolve(args) => cmd_resolve(&ctl, &out, args)?,
        Command::Diff(args) => cmd_diff(&ctl, &out, args)?,
        Command::Restore(args) => cmd_restore(&ctl, &out, &cli.user, args)?,
        Command::Merge(args) => cmd_merge(&ctl, &out, &cli.user, args)?,
        Command::Verify(args) => cmd_verify(&ctl, &out, args)?,
    };

    if mutated {
        state
            .save(&cli.state)
            .with_context(|| format!("saving state {}", cli.state.display()))?;
        debug!(path = %cli.state.display(), "state saved");
    }
    Ok(())
}

struct Output {
    format: OutputFormat,
}

impl Output {
    /// JSON mode prints `value`; text mode runs `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(),
        }
        Ok(())
    }
}

fn branch(ctl: &Ctl, reference: &str) -> anyhow::Result<Branch> {
    ctl.find_branch(reference)?
        .ok_or_else(|| anyhow!("no branch with ID or unique name `{reference}`"))
}

fn version_id(ctl: &Ctl, s: &str) -> anyhow::Result<VersionId> {
    let id: VersionId = s.parse().with_context(|| format!("invalid version ID `{s}`"))?;
    ctl.get_version(&id)?;
    Ok(id)
}

fn print_version(v: &Version) {
    println!(
        "{}  {}  {} .. {}",
        format!("v{}", v.version_number).yellow().bold(),
        v.id.short_id().dimmed(),
        v.valid_from,
        v.valid_to.map(|t| t.to_string()).unwrap_or_else(|| "open".green().to_string()),
    );
    if let Some(comment) = &v.comment {
        println!("  {comment}");
    }
    println!("  by {} at {}", v.created_by, v.created_at);
}

fn print_payload(payload: &Payload) {
    for (field, value) in payload.as_map() {
        println!("  {}: {}", field.bold(), value);
    }
}

fn cmd_init(ctl: &Ctl, out: &Output) -> anyhow::Result<bool> {
    let root = ctl.init()?;
    out.emit(&root, || {
        println!("{} Initialized timeline {}", "✓".green().bold(), root.name.yellow().bold());
        println!("  ID: {}", root.id.to_string().cyan());
    })?;
    Ok(true)
}

fn cmd_fork(ctl: &Ctl, out: &Output, args: ForkArgs) -> anyhow::Result<bool> {
    let parent = branch(ctl, &args.parent)?;
    let child = match args.at {
        Some(at) => ctl.fork_branch_at(&parent.id, &args.name, args.description, at)?,
        None => ctl.fork_branch(&parent.id, &args.name, args.description)?,
    };
    out.emit(&child, || {
        println!(
            "{} Forked {} from {} at {}",
            "✓".green().bold(),
            child.name.yellow().bold(),
            parent.name.yellow(),
            child.diverged_at.map(|t| t.to_string()).unwrap_or_default()
        );
        println!("  ID: {}", child.id.to_string().cyan());
    })?;
    Ok(true)
}

fn cmd_branches(ctl: &Ctl, out: &Output) -> anyhow::Result<bool> {
    let all = ctl.tree().list()?;
    out.emit(&all, || {
        if let Ok(root) = ctl.root_branch() {
            print_subtree(ctl, &root, 0);
        } else {
            println!("No timelines. Run `ctl init` first.");
        }
    })?;
    Ok(false)
}

fn print_subtree(ctl: &Ctl, branch: &Branch, depth: usize) {
    let mut line = format!("{}{}", "  ".repeat(depth), branch.name.yellow().bold());
    line.push_str(&format!("  {}", branch.id.short_id().dimmed()));
    if let Some(at) = branch.diverged_at {
        line.push_str(&format!("  forked {at}"));
    }
    if branch.is_pinned {
        line.push_str(&format!("  {}", "pinned".magenta()));
    }
    for tag in &branch.tags {
        line.push_str(&format!("  #{}", tag.blue()));
    }
    println!("{line}");
    for child in ctl.tree().children(&branch.id).unwrap_or_default() {
        print_subtree(ctl, &child, depth + 1);
    }
}

fn cmd_ancestry(ctl: &Ctl, out: &Output, args: BranchRef) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let chain = ctl.resolve_branch_ancestry(&target.id)?;
    out.emit(&chain, || {
        let names: Vec<String> = chain.iter().rev().map(|b| b.name.clone()).collect();
        println!("{}", names.join(" > ").yellow());
    })?;
    Ok(false)
}

fn cmd_delete_branch(ctl: &Ctl, out: &Output, args: BranchRef) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let deleted = ctl.delete_branch(&target.id)?;
    out.emit(&deleted, || {
        println!("{} Deleted {}", "✓".green().bold(), deleted.name.yellow());
    })?;
    Ok(true)
}

fn cmd_pin(ctl: &Ctl, out: &Output, args: PinArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let updated = ctl.tree().set_pinned(&target.id, !args.unpin)?;
    out.emit(&updated, || {
        let state = if updated.is_pinned { "Pinned" } else { "Unpinned" };
        println!("{} {} {}", "✓".green().bold(), state, updated.name.yellow());
    })?;
    Ok(true)
}

fn cmd_tag(ctl: &Ctl, out: &Output, args: TagArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let updated = if args.remove {
        ctl.tree().remove_tag(&target.id, &args.tag)?
    } else {
        ctl.tree().add_tag(&target.id, &args.tag)?
    };
    out.emit(&updated, || {
        let tags: Vec<&str> = updated.tags.iter().map(String::as_str).collect();
        println!("{} {}: [{}]", "✓".green().bold(), updated.name.yellow(), tags.join(", "));
    })?;
    Ok(true)
}

fn cmd_append(ctl: &Ctl, out: &Output, user: &str, args: AppendArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let value: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;
    let payload = Payload::try_from(value)?;
    let request = NewVersion::new(VersionKey::new(args.entity, target.id), payload, user)
        .with_optional_comment(args.message)
        .with_effective_from(args.at);
    let version = ctl.append_version(&request)?;
    out.emit(&version, || {
        println!("{} Recorded {} on {}", "✓".green().bold(), version.entity, target.name.yellow());
        print_version(&version);
    })?;
    Ok(true)
}

fn cmd_patch(ctl: &Ctl, out: &Output, user: &str, args: PatchArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let operations: Vec<PatchOperation> =
        serde_json::from_str(&args.operations).context("operations must be a JSON array")?;
    let mut request = PatchRequest::new(VersionKey::new(args.entity, target.id), operations, user);
    request.comment = args.message;
    request.effective_from = args.at;
    let version = ctl.apply_patch(&request)?;
    out.emit(&version, || {
        println!(
            "{} Applied {} operation(s) to {}",
            "✓".green().bold(),
            request.operations.len(),
            version.entity
        );
        print_version(&version);
        print_payload(&version.payload);
    })?;
    Ok(true)
}

fn cmd_history(ctl: &Ctl, out: &Output, args: HistoryArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let key = VersionKey::new(args.entity, target.id);
    let versions: Vec<Version> = if args.all {
        ctl.history_iter(&key).collect::<Result<_, _>>()?
    } else {
        let pagination = Pagination {
            limit: args.limit,
            cursor: None,
        };
        ctl.get_history(&key, pagination)?.versions
    };
    out.emit(&versions, || {
        if versions.is_empty() {
            println!("No versions of {} on {}.", key.entity, target.name.yellow());
        }
        for v in &versions {
            print_version(v);
        }
    })?;
    Ok(false)
}

fn cmd_resolve(ctl: &Ctl, out: &Output, args: ResolveArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let state = ctl.resolve(&args.entity, &target.id, args.at)?;
    out.emit(&state, || {
        println!(
            "{} on {} as of {}",
            state.entity.to_string().bold(),
            target.name.yellow(),
            state.as_of
        );
        if state.is_inherited() {
            let from = ctl
                .tree()
                .get(&state.source_branch_id)
                .map(|b| b.name)
                .unwrap_or_else(|_| state.source_branch_id.to_string());
            println!("  inherited from {} v{}", from.yellow(), state.source_version_number);
        } else {
            println!("  v{}", state.source_version_number);
        }
        print_payload(&state.payload);
    })?;
    Ok(false)
}

fn cmd_diff(ctl: &Ctl, out: &Output, args: DiffArgs) -> anyhow::Result<bool> {
    let from = version_id(ctl, &args.from)?;
    let to = version_id(ctl, &args.to)?;
    let d = ctl.get_diff(&from, &to)?;
    out.emit(&d, || print_diff(&d))?;
    Ok(false)
}

fn print_diff(d: &Diff) {
    if d.is_empty() {
        println!("No changes.");
        return;
    }
    for (path, value) in &d.added {
        println!("{} {}: {}", "+".green().bold(), path, value);
    }
    for (path, change) in &d.modified {
        println!("{} {}: {} -> {}", "~".yellow().bold(), path, change.old, change.new);
    }
    for (path, value) in &d.removed {
        println!("{} {}: {}", "-".red().bold(), path, value);
    }
}

fn cmd_restore(ctl: &Ctl, out: &Output, user: &str, args: RestoreArgs) -> anyhow::Result<bool> {
    let target = branch(ctl, &args.branch)?;
    let id: VersionId = args
        .version
        .parse()
        .with_context(|| format!("invalid version ID `{}`", args.version))?;
    let mut request = RestoreRequest::new(args.entity, target.id, id, user);
    request.comment = args.message;
    let version = ctl.restore_version(&request)?;
    out.emit(&version, || {
        println!("{} Restored {} on {}", "✓".green().bold(), version.entity, target.name.yellow());
        print_version(&version);
    })?;
    Ok(true)
}

fn cmd_merge(ctl: &Ctl, out: &Output, user: &str, args: MergeArgs) -> anyhow::Result<bool> {
    let source = branch(ctl, &args.source)?;
    let target = branch(ctl, &args.target)?;
    let mut request = MergeRequest::new(source.id, target.id, args.entity, user);
    request.as_of = args.at;
    request.comment = args.message;

    if args.preview {
        if !args.resolutions.is_empty() {
            bail!("--preview and --resolve cannot be combined");
        }
        let preview = ctl.preview_merge(&request)?;
        out.emit(&preview, || {
            println!("Source changes:");
            print_diff(&preview.source_changes);
            println!("Target changes:");
            print_diff(&preview.target_changes);
            if preview.is_clean() {
                println!("{} Merges cleanly.", "✓".green().bold());
            } else {
                println!("{} Conflicts: {}", "✗".red().bold(), preview.conflict_paths().join(", "));
            }
        })?;
        return Ok(false);
    }

    if !args.resolutions.is_empty() {
        let resolutions: BTreeMap<String, serde_json::Value> = args.resolutions.into_iter().collect();
        let version = ctl.merge_branches_with_resolutions(&request, &resolutions)?;
        out.emit(&version, || {
            println!(
                "{} Merged {} into {} with {} resolution(s)",
                "✓".green().bold(),
                source.name.yellow(),
                target.name.yellow(),
                resolutions.len()
            );
            print_version(&version);
        })?;
        return Ok(true);
    }

    let result = ctl.merge_branches(&request)?;
    out.emit(&result, || match &result {
        MergeResult::Merged(version) => {
            println!(
                "{} Merged {} into {}",
                "✓".green().bold(),
                source.name.yellow(),
                target.name.yellow()
            );
            print_version(version);
        }
        MergeResult::Conflicted(fields) => {
            println!("{} {} conflicting field(s); nothing written", "✗".red().bold(), fields.len());
            for field in fields {
                let show = |v: &Option<serde_json::Value>| {
                    v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "(absent)".into())
                };
                println!(
                    "  {}: base {} | source {} | target {}",
                    field.path.bold(),
                    show(&field.base_value),
                    show(&field.source_value),
                    show(&field.target_value)
                );
            }
            println!("Re-run with --resolve <path>=<json> for each field.");
        }
    })?;
    Ok(result.is_merged())
}

#[derive(Serialize)]
struct VerifyEntry {
    key: Option<VersionKey>,
    versions: u64,
    violations: Vec<String>,
}

fn cmd_verify(ctl: &Ctl, out: &Output, args: VerifyArgs) -> anyhow::Result<bool> {
    let reports = match &args.branch {
        Some(reference) => ctl.verify(&branch(ctl, reference)?.id)?,
        None => ctl.verify_all()?,
    };
    let entries: Vec<VerifyEntry> = reports
        .iter()
        .map(|r| VerifyEntry {
            key: r.key.clone(),
            versions: r.version_count,
            violations: r.violations.iter().map(|v| v.description.clone()).collect(),
        })
        .collect();
    let failed = entries.iter().filter(|e| !e.violations.is_empty()).count();
    out.emit(&entries, || {
        for entry in entries.iter().filter(|e| !e.violations.is_empty()) {
            let key = entry.key.as_ref().map(|k| k.to_string()).unwrap_or_default();
            println!("{} {}", "✗".red().bold(), key.bold());
            for violation in &entry.violations {
                println!("  {violation}");
            }
        }
        if failed == 0 {
            println!("{} {} histories verified.", "✓".green().bold(), entries.len());
        }
    })?;
    if failed > 0 {
        bail!("{failed} histories violate invariants");
    }
    Ok(false)
}
