//! Syntactic validation for request paths, path parts and file names.
//!
//! Valid paths:
//! - Must be non-empty and at most [`MAX_PATH_LEN`] bytes
//! - Must not contain control characters or any of `\ : * ? " < > |`
//! - Must not contain empty components (`//`) or `.` / `..` components
//!
//! A single leading or trailing `/` is tolerated and stripped by
//! [`ArtifactPath`](crate::ArtifactPath); it is not an empty component.
//!
//! Path parts and file names follow the same character rules, must not
//! contain `/` and are limited to [`MAX_NAME_LEN`] bytes.

use crate::error::TypeError;

/// Maximum length in bytes of a full relative path.
pub const MAX_PATH_LEN: usize = 1024;

/// Maximum length in bytes of a single path part or file name.
pub const MAX_NAME_LEN: usize = 255;

/// Characters that are forbidden anywhere in a path or name.
const FORBIDDEN_CHARS: &[char] = &['\\', ':', '*', '?', '"', '<', '>', '|'];

/// Validate a relative path, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use sluice_types::names::validate_path;
///
/// assert!(validate_path("campaign/csv/data.csv").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("").is_err());
/// ```
pub fn validate_path(path: &str) -> Result<(), TypeError> {
    let invalid = |reason: String| TypeError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Err(invalid("path must not be empty".into()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(invalid(format!(
            "path is {} bytes, limit is {MAX_PATH_LEN}",
            path.len()
        )));
    }
    check_chars(path).map_err(invalid)?;

    for component in trimmed.split('/') {
        match component {
            "" => return Err(invalid("path components must not be empty".into())),
            "." | ".." => {
                return Err(invalid(format!(
                    "relative component {component:?} is not allowed"
                )));
            }
            c if c.len() > MAX_NAME_LEN => {
                return Err(invalid(format!(
                    "component is {} bytes, limit is {MAX_NAME_LEN}",
                    c.len()
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Validate one part of a derived path (campaign, format, sequence name).
pub fn validate_path_part(part: &str) -> Result<(), TypeError> {
    validate_name(part)
}

/// Validate a file name, including logical keys inside packed containers.
pub fn validate_file_name(name: &str) -> Result<(), TypeError> {
    validate_name(name)
}

fn validate_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: String| TypeError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "name is {} bytes, limit is {MAX_NAME_LEN}",
            name.len()
        )));
    }
    if name.contains('/') {
        return Err(invalid("name must not contain '/'".into()));
    }
    if name == "." || name == ".." {
        return Err(invalid("name must not be '.' or '..'".into()));
    }
    check_chars(name).map_err(invalid)
}

fn check_chars(s: &str) -> Result<(), String> {
    if let Some(ch) = s.chars().find(|c| c.is_control()) {
        return Err(format!("contains control character {ch:?}"));
    }
    if let Some(ch) = s.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(format!("contains forbidden character {ch:?}"));
    }
    Ok(())
}
