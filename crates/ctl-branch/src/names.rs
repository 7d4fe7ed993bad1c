//! Branch name and tag validation.
//!
//! Branch names are shown in breadcrumbs and typed on the command line, so
//! they follow git-like conventions, relaxed to allow inner spaces
//! ("Dragon wins"):
//! - Must be non-empty and at most [`MAX_NAME_LEN`] characters
//! - Must not start or end with whitespace, `.` or `/`
//! - Must not contain control characters, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..`, `@{` or `//`

use crate::error::{BranchError, BranchResult};

/// Longest accepted branch name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Longest accepted tag, in characters.
pub const MAX_TAG_LEN: usize = 64;

const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

const FORBIDDEN_SEQUENCES: &[&str] = &["..", "@{", "//"];

fn invalid(name: &str, reason: impl Into<String>) -> BranchError {
    BranchError::InvalidBranchName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a branch name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use ctl_branch::names::validate_branch_name;
///
/// assert!(validate_branch_name("main").is_ok());
/// assert!(validate_branch_name("what-if/dragon wins").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("bad..name").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> BranchResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "branch name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid(name, format!("longer than {MAX_NAME_LEN} characters")));
    }
    if name.trim() != name {
        return Err(invalid(name, "must not start or end with whitespace"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }
    if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|s| name.contains(**s)) {
        return Err(invalid(name, format!("must not contain {seq:?}")));
    }
    if name.starts_with(['.', '/']) || name.ends_with(['.', '/']) {
        return Err(invalid(name, "must not start or end with '.' or '/'"));
    }
    Ok(())
}

/// Validate a free-form branch tag: non-empty, bounded, no whitespace.
pub fn validate_tag(tag: &str) -> BranchResult<()> {
    let reason = if tag.is_empty() {
        "tag must not be empty".to_string()
    } else if tag.chars().count() > MAX_TAG_LEN {
        format!("longer than {MAX_TAG_LEN} characters")
    } else if tag.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace".to_string()
    } else {
        return Ok(());
    };
    Err(BranchError::InvalidTag {
        tag: tag.to_string(),
        reason,
    })
}
