//! Script target resolution.
//!
//! A watch target is either a standalone script file or the entry point of a
//! multi-file package. Package membership is signaled by a marker file
//! (`__init__.rhai` by default): a directory belongs to the package iff it
//! directly contains the marker, and the walk never descends into a directory
//! whose marker is missing. A nested directory without the marker therefore
//! silently truncates the walk; that pruning is intentional.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The authoritative set of files and directories that constitute a script.
///
/// Recomputed on every reload, since files can be added to or removed from a
/// package between reloads.
#[derive(Debug, Clone)]
pub struct ScriptTarget {
    /// Absolute path supplied by the caller.
    pub root_path: PathBuf,
    /// Derived module name (package name for packages, file stem otherwise).
    pub module_name: String,
    /// Ordered directories to add to the import search path.
    pub source_directories: Vec<PathBuf>,
    /// Files whose mtimes are tracked. Never empty; the root file is first.
    pub source_files: Vec<PathBuf>,
}

impl ScriptTarget {
    /// Resolve the file and directory set surrounding `root`.
    ///
    /// Walks `dirname(root)` top-down, pruning every directory that does not
    /// directly contain `marker`. If no marker is found at the top (the
    /// single-file case) no tree walk occurs and the file set is exactly the
    /// root file. Unreadable directory entries are skipped with a warning.
    pub fn resolve(root: &Path, marker: &str) -> Self {
        let mut directories = Vec::new();
        let mut files = Vec::new();

        let start = root.parent().unwrap_or_else(|| Path::new("."));
        let walker = WalkDir::new(start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !e.file_type().is_dir() || e.path().join(marker).is_file());

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "resolver", "skipping unreadable entry: {e}");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                directories.push(entry.path().to_path_buf());
            } else if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }

        if files.is_empty() {
            // No package marker anywhere: watch the root file alone.
            files.push(root.to_path_buf());
        } else {
            // The forced-stale rule applies to the first file, which must be
            // the watched root.
            if let Some(pos) = files.iter().position(|f| f == root) {
                files.swap(0, pos);
            } else {
                files.insert(0, root.to_path_buf());
            }
        }

        Self {
            root_path: root.to_path_buf(),
            module_name: module_name(root, marker),
            source_directories: directories,
            source_files: files,
        }
    }
}

/// Derive the module name for a root path.
///
/// If the root file is itself the package marker, the module is named after
/// the containing directory (the package name); otherwise after the file's
/// stem.
pub fn module_name(root: &Path, marker: &str) -> String {
    let basename = root.file_name().and_then(OsStr::to_str).unwrap_or_default();
    if basename == marker {
        root.parent()
            .and_then(Path::file_name)
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string()
    } else {
        root.file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string()
    }
}
