//! Collision-safe destination paths.
//!
//! Names and relative paths arriving from a peer are normalized (`/` and `\`
//! both separate components), checked so they stay inside the save folder,
//! and then made unique by appending `(1)`, `(2)`, ... before the extension.
//! An existing file is never overwritten.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Create `dir` and its parents if missing.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::DestinationError {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })
}

/// Turn a peer-supplied name or relative path into a relative `PathBuf`.
///
/// # Errors
///
/// Returns `InvalidPath` for empty names and for paths with `..`, root or
/// drive-prefix components.
pub fn sanitize_relative(relative: &str) -> Result<PathBuf> {
    let normalized = relative.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(Error::InvalidPath(format!("absolute path: {relative}")));
    }

    let mut out = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(Error::InvalidPath(format!("parent reference: {relative}"))),
            s if s.contains(':') => {
                return Err(Error::InvalidPath(format!("drive prefix: {relative}")));
            }
            s => out.push(s),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("empty path: {relative:?}")));
    }
    if !out.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::InvalidPath(relative.to_string()));
    }

    Ok(out)
}

/// Resolve a destination for `relative_or_name` under `base_dir`.
///
/// Intermediate directories are created. If the target already exists a
/// numbered sibling is chosen (`report.txt` becomes `report(1).txt`).
pub async fn resolve(base_dir: &Path, relative_or_name: &str) -> Result<PathBuf> {
    let relative = sanitize_relative(relative_or_name)?;
    let target = base_dir.join(relative);

    if let Some(parent) = target.parent() {
        ensure_dir(parent).await?;
    }

    Ok(unique_path(target).await)
}

/// Create (or reuse) `base_dir/<name>` as the root of a received folder.
pub async fn folder_root(base_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = sanitize_relative(name)?;
    let root = base_dir.join(relative);
    ensure_dir(&root).await?;
    Ok(root)
}

/// First of `path`, `stem(1).ext`, `stem(2).ext`, ... that does not exist.
pub async fn unique_path(path: PathBuf) -> PathBuf {
    if !exists(&path).await {
        return path;
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1u64.. {
        let candidate = parent.join(format!("{stem}({n}){extension}"));
        if !exists(&candidate).await {
            return candidate;
        }
    }
    path
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_fresh_name() {
        let dir = TempDir::new().unwrap();
        let path = resolve(dir.path(), "report.txt").await.unwrap();
        assert_eq!(path, dir.path().join("report.txt"));
    }

    #[tokio::test]
    async fn test_resolve_collision_appends_counter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.txt"), b"old").unwrap();

        let first = resolve(dir.path(), "report.txt").await.unwrap();
        assert_eq!(first, dir.path().join("report(1).txt"));
        std::fs::write(&first, b"new").unwrap();

        let second = resolve(dir.path(), "report.txt").await.unwrap();
        assert_eq!(second, dir.path().join("report(2).txt"));
        assert_ne!(first, second);
        assert!(second.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_resolve_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Makefile"), b"").unwrap();
        let path = resolve(dir.path(), "Makefile").await.unwrap();
        assert_eq!(path, dir.path().join("Makefile(1)"));
    }

    #[tokio::test]
    async fn test_resolve_creates_intermediate_dirs() {
        let dir = TempDir::new().unwrap();
        let path = resolve(dir.path(), "a\\b/c.txt").await.unwrap();
        assert_eq!(path, dir.path().join("a").join("b").join("c.txt"));
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        for bad in ["../evil.txt", "a/../../b", "/etc/passwd", "\\share\\x", "C:\\x.txt", "", "./"] {
            let err = resolve(dir.path(), bad).await.unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{bad:?} gave {err:?}");
        }
    }

    #[tokio::test]
    async fn test_folder_root_reuses_existing() {
        let dir = TempDir::new().unwrap();
        let first = folder_root(dir.path(), "photos").await.unwrap();
        let second = folder_root(dir.path(), "photos").await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
