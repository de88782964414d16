//! Path validation and security utilities.
//!
//! This module provides functions to validate request paths and prevent
//! security issues like path traversal attacks.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Normalizes a path relative to a served root.
///
/// Ensures that paths don't escape the root (no `..` traversal). Unlike
/// [`validate`], a path that normalizes to nothing is allowed and returned as
/// an empty [`PathBuf`], meaning "the root itself".
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
pub fn normalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    Ok(components.into_iter().collect())
}

/// Validates a path for security and correctness.
///
/// Same as [`normalize`], except that paths resolving to the root itself are
/// rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trove_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("photos/cat.jpg").is_ok());
/// assert!(validate_path("a/../file.png").is_ok()); // (never leaves root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves root)
/// assert!(validate_path("a\0b").is_err());
/// assert!(validate_path("/").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./cat.jpg/").unwrap(),
///     Path::new("correct/cat.jpg")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let normalized = normalize(path.as_ref())?;
    match normalized.as_os_str().is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(normalized),
    }
}

/// Validates a raw, already percent-decoded request path.
///
/// Requests are refused outright when they contain `//` or `..`, before any
/// normalization happens; clients are expected to send canonical paths. The
/// result may be empty (the root).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trove_storage::validate_request;
/// assert_eq!(validate_request("/holiday/beach.jpg/").unwrap(), Path::new("holiday/beach.jpg"));
/// assert_eq!(validate_request("/").unwrap(), Path::new(""));
/// assert!(validate_request("/holiday//beach.jpg").is_err());
/// assert!(validate_request("/holiday/../secret").is_err());
/// ```
pub fn validate_request(raw: &str) -> Result<PathBuf> {
    if raw.contains("//") || raw.contains("..") {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(raw)));
    }
    normalize(raw)
}

/// Render a relative path with `/` separators, regardless of platform.
///
/// Used for archive entry names and access-rule lookups.
pub fn slash_path(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercased extension of the final path component, if any.
pub fn extension(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref().extension().and_then(|ext| ext.to_str()).map(str::to_lowercase)
}
