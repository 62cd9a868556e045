//! `shedutils::path` is a module containing path utilities for the shed project.

use std::path::{Path, PathBuf};

use typed_path::{Utf8UnixComponent, Utf8UnixPathBuf};

use crate::{ShedutilsError, ShedutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The type of a supported path.
pub enum SupportedPathType {
    /// Any path type.
    Any,

    /// An absolute path.
    Absolute,

    /// A relative path.
    Relative,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes a unix path string.
///
/// `.` components and repeated separators are dropped and `..` is resolved lexically.
/// A `..` that would climb above the first component is rejected, as is a path that does
/// not match `path_type`.
pub fn normalize_path(path: &str, path_type: SupportedPathType) -> ShedutilsResult<String> {
    if path.is_empty() {
        return Err(ShedutilsError::PathValidation(
            "Path cannot be empty".to_string(),
        ));
    }

    let parsed = Utf8UnixPathBuf::from(path);
    let is_absolute = parsed.is_absolute();
    let mut segments: Vec<&str> = Vec::new();

    for component in parsed.components() {
        match component {
            Utf8UnixComponent::RootDir | Utf8UnixComponent::CurDir => {}
            Utf8UnixComponent::ParentDir => {
                if segments.pop().is_none() {
                    return Err(ShedutilsError::PathValidation(format!(
                        "Invalid path {path}: cannot traverse above root directory"
                    )));
                }
            }
            Utf8UnixComponent::Normal(segment) => segments.push(segment),
        }
    }

    match path_type {
        SupportedPathType::Absolute if !is_absolute => {
            return Err(ShedutilsError::PathValidation(format!(
                "Path {path} must be absolute (start with '/')"
            )));
        }
        SupportedPathType::Relative if is_absolute => {
            return Err(ShedutilsError::PathValidation(format!(
                "Path {path} must be relative (must not start with '/')"
            )));
        }
        _ => {}
    }

    let joined = segments.join("/");
    if is_absolute {
        Ok(format!("/{joined}"))
    } else {
        Ok(joined)
    }
}

/// Resolves `path` (absolute or relative) beneath `root`.
///
/// The path is normalized first, so the result can never point outside `root`.
pub fn join_under_root(root: impl AsRef<Path>, path: &str) -> ShedutilsResult<PathBuf> {
    let normalized = normalize_path(path, SupportedPathType::Any)?;
    let relative = normalized.trim_start_matches('/');

    if relative.is_empty() {
        return Ok(root.as_ref().to_path_buf());
    }

    Ok(root.as_ref().join(relative))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
