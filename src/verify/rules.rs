//! Validation rules for operation paths and permission bits.
//!
//! Apart from canonicalizing the existing part of a path, these are pure
//! functions with no side effects.

use std::path::{Component, Path, PathBuf};

const MAX_MODE: u32 = 0o7777;

/// Resolves `raw` to a canonical absolute path.
///
/// ## Rules
/// - Not empty, no NUL bytes
/// - Relative paths are joined onto `base`
/// - `.` and `..` are folded lexically; `..` may not climb above the root
/// - The longest existing ancestor is canonicalized (symlinks in parent
///   directories resolved); the final component is kept as written so that
///   operations on a symlink act on the link itself
/// - Windows: no reserved names (CON, PRN, etc.) or invalid chars (`<>"|?*`)
pub fn resolve_path(raw: &Path, base: &Path) -> Result<PathBuf, String> {
    let raw_str = raw.to_string_lossy();
    if raw_str.is_empty() {
        return Err("path is empty".to_string());
    }
    if raw_str.contains('\0') {
        return Err("path contains a NUL byte".to_string());
    }

    #[cfg(windows)]
    {
        validate_windows_path_components(raw)?;
    }

    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let normalized = normalize(&joined)?;

    let Some(name) = normalized.file_name() else {
        return Err("path has no final component (is it the root?)".to_string());
    };

    let parent = normalized.parent().unwrap_or(Path::new("/"));
    Ok(canonicalize_existing(parent).join(name))
}

/// Folds `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> Result<PathBuf, String> {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_none() {
                    return Err("'..' climbs above the filesystem root".to_string());
                }
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }

    if !out.is_absolute() {
        return Err(format!("cannot resolve to an absolute path: {}", path.display()));
    }

    Ok(out)
}

/// Canonicalizes the longest existing prefix of `path` and re-appends the
/// rest verbatim.
fn canonicalize_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for name in rest.iter().rev() {
                out.push(name);
            }
            return out;
        }

        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Parses permission bits from an octal string (`644`, `0644`, `0o644`).
pub fn parse_mode(s: &str) -> Result<u32, String> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0o")
        .or_else(|| trimmed.strip_prefix("0O"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return Err(format!("invalid permissions '{}': empty", s));
    }

    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("invalid permissions '{}': not an octal number", s))?;
    validate_mode(mode)?;
    Ok(mode)
}

/// Permission bits must fit in `0o7777` (rwx for user/group/other plus
/// setuid, setgid and sticky).
pub fn validate_mode(mode: u32) -> Result<(), String> {
    if mode > MAX_MODE {
        return Err(format!(
            "invalid permissions {:o}: exceeds {:o}",
            mode, MAX_MODE
        ));
    }
    Ok(())
}

#[cfg(windows)]
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[cfg(windows)]
fn validate_windows_path_components(path: &Path) -> Result<(), String> {
    const INVALID_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

    for component in path.components() {
        if let Component::Normal(name) = component {
            let name_str = name.to_string_lossy();
            let base = name_str.split('.').next().unwrap_or_default().to_uppercase();

            if WINDOWS_RESERVED_NAMES.contains(&base.as_str()) {
                return Err(format!("'{}' is a Windows reserved name", name_str));
            }

            if let Some(ch) = INVALID_CHARS.iter().find(|&&ch| name_str.contains(ch)) {
                return Err(format!("'{}' contains invalid char '{}'", name_str, ch));
            }
        }
    }

    Ok(())
}
