//! Output-directory snapshot diffing.
//!
//! Workflow scripts write their artifacts into a per-run directory; the
//! pipeline snapshots that directory before invocation and diffs it after to
//! find what was produced. A snapshot maps POSIX-form relative paths to
//! `(mtime_ns, size_bytes)`. Purely observational — nothing here deletes or
//! moves files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Mapping from relative path (POSIX form) to `(mtime_ns, size_bytes)`.
pub type Snapshot = BTreeMap<String, (u128, u64)>;

/// Build a snapshot of every file under `root`.
///
/// Recurses into subdirectories. Symlinks are followed for files but not
/// for directory descent. A nonexistent root yields an empty snapshot.
pub fn snapshot_files(root: &Path) -> std::io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    if !root.exists() {
        return Ok(snapshot);
    }
    walk(root, root, &mut snapshot)?;
    Ok(snapshot)
}

fn walk(dir: &Path, root: &Path, snapshot: &mut Snapshot) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk(&path, root, snapshot)?;
        } else {
            // Follows symlinks; a dangling link is skipped rather than
            // failing the whole snapshot.
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            if metadata.is_file() {
                let mtime_ns = metadata
                    .modified()
                    .ok()
                    .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                snapshot.insert(relative_posix(&path, root), (mtime_ns, metadata.len()));
            }
        }
    }
    Ok(())
}

/// Return files under `root` that are new or whose `(mtime_ns, size)` pair
/// differs from the `before` snapshot, plus the fresh snapshot.
pub fn detect_new_files(
    root: &Path,
    before: &Snapshot,
) -> std::io::Result<(Vec<PathBuf>, Snapshot)> {
    let after = snapshot_files(root)?;
    let mut new_files = Vec::new();

    for (rel_path, meta) in &after {
        if before.get(rel_path) != Some(meta) {
            new_files.push(root.join(rel_path));
        }
    }

    Ok((new_files, after))
}

/// A POSIX-form path for `path` relative to `root`, regardless of host OS.
pub fn relative_posix(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_root_yields_empty_snapshot() {
        let snapshot = snapshot_files(Path::new("/nonexistent/poets/run")).expect("snapshot");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn snapshot_recurses_and_uses_posix_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("nested/deep")).expect("mkdirs");
        std::fs::write(dir.path().join("top.png"), b"png").expect("write");
        std::fs::write(dir.path().join("nested/deep/out.flac"), b"flac").expect("write");

        let snapshot = snapshot_files(dir.path()).expect("snapshot");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("top.png"));
        assert!(snapshot.contains_key("nested/deep/out.flac"));
        assert_eq!(snapshot["nested/deep/out.flac"].1, 4);
    }

    #[test]
    fn diff_reports_exactly_the_new_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("existing.png"), b"old").expect("write");

        let before = snapshot_files(dir.path()).expect("before");
        std::fs::write(dir.path().join("fresh.png"), b"new").expect("write");

        let (new_files, after) = detect_new_files(dir.path(), &before).expect("diff");
        assert_eq!(new_files, vec![dir.path().join("fresh.png")]);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn diff_reports_modified_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("artifact.png");
        std::fs::write(&target, b"v1").expect("write");

        let before = snapshot_files(dir.path()).expect("before");
        // Size change guarantees the (mtime_ns, size) pair differs even on
        // filesystems with coarse mtime resolution.
        std::fs::write(&target, b"version two").expect("rewrite");

        let (new_files, _) = detect_new_files(dir.path(), &before).expect("diff");
        assert_eq!(new_files, vec![target]);
    }

    #[test]
    fn diff_of_unchanged_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.png"), b"a").expect("write");

        let before = snapshot_files(dir.path()).expect("before");
        let (new_files, _) = detect_new_files(dir.path(), &before).expect("diff");
        assert!(new_files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_is_followed_but_directory_is_not_descended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("outside");
        std::fs::write(outside.path().join("real.png"), b"real").expect("write");
        std::fs::create_dir(outside.path().join("subdir")).expect("mkdir");
        std::fs::write(outside.path().join("subdir/hidden.png"), b"hidden").expect("write");

        std::os::unix::fs::symlink(
            outside.path().join("real.png"),
            dir.path().join("link.png"),
        )
        .expect("file symlink");
        std::os::unix::fs::symlink(
            outside.path().join("subdir"),
            dir.path().join("linkdir"),
        )
        .expect("dir symlink");

        let snapshot = snapshot_files(dir.path()).expect("snapshot");
        assert!(snapshot.contains_key("link.png"));
        assert!(!snapshot.keys().any(|k| k.contains("hidden")));
    }

    #[test]
    fn relative_posix_joins_with_forward_slashes() {
        let root = Path::new("/media/root");
        let path = root.join("image").join("7_x").join("out.png");
        assert_eq!(relative_posix(&path, root), "image/7_x/out.png");
    }
}
