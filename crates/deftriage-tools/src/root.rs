//! Project root confinement
//!
//! Paths named by the reasoning backend are untrusted. Every capability
//! resolves them through [`ProjectRoot`], which keeps them inside the
//! analysed project.

use std::path::{Component, Path, PathBuf};

use deftriage_utils::error::CapabilityError;

/// Canonicalized root directory of the analysed project.
#[derive(Debug, Clone)]
pub struct ProjectRoot {
    root: PathBuf,
}

impl ProjectRoot {
    /// Canonicalize `root` and check it is a directory.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityError::NotFound` if the directory does not exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, CapabilityError> {
        let root_path = root.as_ref();
        if !root_path.is_dir() {
            return Err(CapabilityError::NotFound {
                what: format!("project root {}", root_path.display()),
            });
        }
        let canonical = root_path
            .canonicalize()
            .map_err(|e| CapabilityError::NotFound {
                what: format!("project root {}: {e}", root_path.display()),
            })?;
        Ok(Self { root: canonical })
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.root
    }

    /// Resolve a path named by the scanner or the reasoning backend.
    ///
    /// Relative paths are joined to the root. Absolute paths are accepted only
    /// when they already point inside the root, since scanner reports often
    /// carry absolute paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` for paths escaping the root and `NotFound`
    /// when the path does not exist.
    pub fn resolve(&self, path: &str, capability: &str) -> Result<PathBuf, CapabilityError> {
        let requested = Path::new(path.trim());
        let escape = || CapabilityError::InvalidArguments {
            capability: capability.to_string(),
            reason: format!("path '{path}' is outside the project root"),
        };

        if requested.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            if requested
                .components()
                .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(escape());
            }
            self.root.join(requested)
        };

        let canonical = joined.canonicalize().map_err(|_| CapabilityError::NotFound {
            what: format!("file {path}"),
        })?;

        // Symlinks may point anywhere; compare after resolution
        if !canonical.starts_with(&self.root) {
            return Err(escape());
        }
        Ok(canonical)
    }

    /// Path relative to the root, with forward slashes.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProjectRoot) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/net.c"), "int x;\n").unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_resolves_relative_and_dot_prefixed_paths() {
        let (_dir, root) = setup();
        let a = root.resolve("src/net.c", "read_file_lines").unwrap();
        let b = root.resolve("./src/net.c", "read_file_lines").unwrap();
        assert_eq!(a, b);
        assert_eq!(root.relative(&a), "src/net.c");
    }

    #[test]
    fn test_accepts_absolute_path_inside_root() {
        let (_dir, root) = setup();
        let abs = root.as_path().join("src/net.c");
        assert!(root.resolve(abs.to_str().unwrap(), "read_file_lines").is_ok());
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let (_dir, root) = setup();
        let err = root.resolve("../etc/passwd", "read_file_lines").unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[test]
    fn test_rejects_absolute_path_outside_root() {
        let (_dir, root) = setup();
        let other = TempDir::new().unwrap();
        let err = root
            .resolve(other.path().to_str().unwrap(), "read_file_lines")
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let (_dir, root) = setup();
        let err = root.resolve("src/missing.c", "read_file_lines").unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound { .. }));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectRoot::new(dir.path().join("nope")).is_err());
    }
}
