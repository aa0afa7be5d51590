use std::path::Path;

use globset::GlobSet;

use deftriage_utils::error::CapabilityError;

use crate::root::ProjectRoot;
use crate::search::is_excluded;

pub const LIST_DIRECTORY: &str = "list_directory";

/// Entries shown per directory before eliding the rest
const MAX_ENTRIES_PER_DIR: usize = 200;

/// Depth-bounded directory tree rendering.
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    root: ProjectRoot,
    exclude: GlobSet,
    max_depth: usize,
}

impl DirectoryLister {
    #[must_use]
    pub fn new(root: ProjectRoot, exclude: GlobSet, max_depth: usize) -> Self {
        Self {
            root,
            exclude,
            max_depth,
        }
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Render `path` (relative to the root) as an indented tree.
    ///
    /// `depth` is clamped to the configured maximum. Directories end in `/`.
    ///
    /// # Errors
    ///
    /// `NotFound` when `path` does not exist, `InvalidArguments` when it
    /// escapes the project root.
    pub fn list(&self, path: &str, depth: usize) -> Result<String, CapabilityError> {
        let dir = self.root.resolve(path, LIST_DIRECTORY)?;
        if !dir.is_dir() {
            return Err(CapabilityError::NotFound {
                what: format!("directory {path}"),
            });
        }
        let depth = depth.clamp(1, self.max_depth.max(1));

        let mut out = String::new();
        let label = self.root.relative(&dir);
        out.push_str(if label.is_empty() { "." } else { &label });
        out.push_str("/\n");
        self.render(&dir, 1, depth, &mut out);
        Ok(out)
    }

    fn render(&self, dir: &Path, level: usize, depth: usize, out: &mut String) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries
            .flatten()
            .filter_map(|e| {
                let is_dir = e.file_type().ok()?.is_dir();
                let rel = self.root.relative(&e.path());
                (!is_excluded(&self.exclude, &rel, is_dir)).then_some((e, is_dir))
            })
            .collect();
        entries.sort_by_key(|(e, _)| e.file_name());

        let total = entries.len();
        for (entry, is_dir) in entries.into_iter().take(MAX_ENTRIES_PER_DIR) {
            out.push_str(&"  ".repeat(level));
            out.push_str(&entry.file_name().to_string_lossy());
            if is_dir {
                out.push('/');
                out.push('\n');
                if level < depth {
                    self.render(&entry.path(), level + 1, depth, out);
                }
            } else {
                out.push('\n');
            }
        }
        if total > MAX_ENTRIES_PER_DIR {
            out.push_str(&"  ".repeat(level));
            out.push_str(&format!("... {} more\n", total - MAX_ENTRIES_PER_DIR));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::build_globset;
    use tempfile::TempDir;

    fn lister(depth: usize) -> (TempDir, DirectoryLister) {
        let dir = TempDir::new().unwrap();
        let p = dir.path();
        std::fs::create_dir_all(p.join("src/net/deep")).unwrap();
        std::fs::create_dir_all(p.join(".git/objects")).unwrap();
        std::fs::write(p.join("src/main.c"), "").unwrap();
        std::fs::write(p.join("src/net/sock.c"), "").unwrap();
        std::fs::write(p.join("src/net/deep/x.c"), "").unwrap();
        std::fs::write(p.join("README"), "").unwrap();
        let root = ProjectRoot::new(p).unwrap();
        let exclude = build_globset(&[".git/**".to_string()]).unwrap();
        (dir, DirectoryLister::new(root, exclude, depth))
    }

    #[test]
    fn test_tree_is_sorted_and_depth_bounded() {
        let (_dir, lister) = lister(2);
        let tree = lister.list("", 3).unwrap();
        assert_eq!(
            tree,
            "./\n  README\n  src/\n    main.c\n    net/\n"
        );
    }

    #[test]
    fn test_subdirectory_listing() {
        let (_dir, lister) = lister(3);
        let tree = lister.list("src/net", 3).unwrap();
        assert_eq!(tree, "src/net/\n  deep/\n    x.c\n  sock.c\n");
    }

    #[test]
    fn test_missing_directory() {
        let (_dir, lister) = lister(3);
        assert!(matches!(
            lister.list("nope", 1),
            Err(CapabilityError::NotFound { .. })
        ));
    }
}
