use std::path::{Path, PathBuf};

const MAX_PATH_LEN: usize = 4096;

fn check_length(user_path: &str) -> Result<(), String> {
    if user_path.is_empty() || user_path.len() > MAX_PATH_LEN {
        return Err("Invalid path: path must be non-empty and under 4096 characters".to_string());
    }
    Ok(())
}

fn canonical_base(base_dir: &Path) -> Result<PathBuf, String> {
    base_dir
        .canonicalize()
        .map_err(|e| format!("Failed to canonicalize base directory: {}", e))
}

/// Resolve an existing path inside `base_dir`, rejecting anything that
/// escapes it through `..` or symlinks. Absolute paths are accepted when they
/// land inside the base.
pub fn safe_resolve_path(user_path: &str, base_dir: &Path) -> Result<PathBuf, String> {
    check_length(user_path)?;

    let resolved = base_dir
        .join(user_path)
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path '{}': {}", user_path, e))?;

    let base_canonical = canonical_base(base_dir)?;
    if !resolved.starts_with(&base_canonical) {
        return Err(format!(
            "Path traversal detected: '{}' escapes base directory",
            user_path
        ));
    }

    Ok(resolved)
}

/// Like [`safe_resolve_path`] for a file that may not exist yet. The parent
/// directory must exist and lie inside `base_dir`.
pub fn resolve_for_write(user_path: &str, base_dir: &Path) -> Result<PathBuf, String> {
    check_length(user_path)?;

    let joined = base_dir.join(user_path);
    let file_name = joined
        .file_name()
        .filter(|name| *name != "..")
        .ok_or_else(|| format!("Invalid file path: '{}'", user_path))?
        .to_owned();
    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid file path: '{}'", user_path))?
        .canonicalize()
        .map_err(|e| format!("Failed to resolve parent of '{}': {}", user_path, e))?;

    let base_canonical = canonical_base(base_dir)?;
    if !parent.starts_with(&base_canonical) {
        return Err(format!(
            "Path traversal detected: '{}' escapes base directory",
            user_path
        ));
    }

    let target = parent.join(file_name);
    // An existing symlink must not point outside either.
    if target.exists() {
        return safe_resolve_path(user_path, base_dir);
    }
    Ok(target)
}

/// Canonicalize a templated command argument inside the base directory.
pub fn canonicalize_within_base_dir(user_path: &str, base_dir: &Path) -> Result<String, String> {
    let resolved = safe_resolve_path(user_path, base_dir)?;
    stringify_path(&resolved)
}

pub fn is_option_like(s: &str) -> bool {
    s.starts_with('-')
}

pub fn stringify_path(p: &Path) -> Result<String, String> {
    p.to_str()
        .ok_or_else(|| format!("Path contains invalid UTF-8: {}", p.display()))
        .map(|s| s.to_string())
}
