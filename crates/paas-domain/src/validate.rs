//! Input validation: cluster resource names, git URLs and refs, build
//! context directories. All checks are character-whitelist based.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Legal cluster resource name: lowercase alphanumeric start, lowercase
/// alphanumeric or hyphen body, 2–63 chars, alphanumeric end.
static RESOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,61}[a-z0-9]$").expect("resource name regex"));

/// Git ref whitelist: letters, digits, `-`, `_`, `.`, `/`.
static GIT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._/-]+$").expect("git ref regex"));

/// Context dir whitelist; must not start with `/`.
static CONTEXT_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._][a-zA-Z0-9._/-]*$").expect("context dir regex"));

/// Validate a name for safe use as a cluster resource name.
pub fn resource_name(name: &str) -> Result<()> {
    if !RESOURCE_NAME.is_match(name) {
        return Err(Error::invalid_input(format!(
            "name {name:?} is not a valid cluster resource name"
        )));
    }
    Ok(())
}

/// Validate a git repository URL. Only https:// and git:// are allowed,
/// which keeps the builder from being pointed at arbitrary schemes.
pub fn git_repo(repo: &str) -> Result<()> {
    if repo.is_empty() {
        return Err(Error::invalid_input("git_repo is required"));
    }
    if !repo.starts_with("https://") && !repo.starts_with("git://") {
        return Err(Error::invalid_input(
            "git_repo must use https:// or git:// protocol",
        ));
    }
    Ok(())
}

/// Validate a git ref (branch/tag/commit). Empty passes; the caller
/// substitutes the default.
pub fn git_ref(git_ref: &str) -> Result<()> {
    if git_ref.is_empty() {
        return Ok(());
    }
    if !GIT_REF.is_match(git_ref) {
        return Err(Error::invalid_input(format!(
            "git_ref {git_ref:?} contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate a build context sub-directory against path traversal.
pub fn context_dir(dir: &str) -> Result<()> {
    if dir.is_empty() || dir == "." {
        return Ok(());
    }
    if !CONTEXT_DIR.is_match(dir) {
        return Err(Error::invalid_input(format!(
            "context_dir {dir:?} contains invalid characters"
        )));
    }
    if dir.split('/').any(|seg| seg == "..") {
        return Err(Error::invalid_input(format!(
            "context_dir {dir:?} must not contain '..'"
        )));
    }
    Ok(())
}
