use async_trait::async_trait;
use tracing::debug;

use deftriage_utils::error::CapabilityError;

use crate::root::ProjectRoot;

pub const READ_FILE_LINES: &str = "read_file_lines";

/// Line-range file reads.
#[async_trait]
pub trait CodeLookup: Send + Sync {
    /// Lines `start_line..=end_line` (1-based) of `path`.
    ///
    /// `end_line` is clamped to the end of the file.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing file or an invalid range.
    async fn read(&self, path: &str, start_line: i64, end_line: i64) -> Result<String, CapabilityError>;
}

/// [`CodeLookup`] over the local filesystem, confined to the project root.
#[derive(Debug, Clone)]
pub struct FsCodeLookup {
    root: ProjectRoot,
}

impl FsCodeLookup {
    #[must_use]
    pub fn new(root: ProjectRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl CodeLookup for FsCodeLookup {
    async fn read(&self, path: &str, start_line: i64, end_line: i64) -> Result<String, CapabilityError> {
        if start_line <= 0 || end_line <= 0 {
            return Err(CapabilityError::NotFound {
                what: format!("line range {start_line}-{end_line} (line numbers must be positive)"),
            });
        }
        if start_line > end_line {
            return Err(CapabilityError::NotFound {
                what: format!("line range {start_line}-{end_line} (start is after end)"),
            });
        }

        let resolved = self.root.resolve(path, READ_FILE_LINES)?;
        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| CapabilityError::NotFound {
                what: format!("file {path}: {e}"),
            })?;
        let content = String::from_utf8_lossy(&bytes);

        select_lines(&content, start_line as usize, end_line as usize).ok_or_else(|| {
            CapabilityError::NotFound {
                what: format!(
                    "line {start_line} in {path} (total lines: {})",
                    content.lines().count()
                ),
            }
        })
    }
}

/// Inclusive 1-based slice of `content`, or `None` when `start` is past EOF.
pub(crate) fn select_lines(content: &str, start: usize, end: usize) -> Option<String> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if start > lines.len() {
        return None;
    }
    let end = end.min(lines.len());
    debug!(start, end, total = lines.len(), "Selected lines");
    Some(lines[start - 1..end].concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lookup() -> (TempDir, FsCodeLookup) {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("five.txt"),
            "Line 1\nLine 2\nLine 3\nLine 4\nLine 5\n",
        )
        .unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        (dir, FsCodeLookup::new(root))
    }

    #[tokio::test]
    async fn test_reads_inclusive_range() {
        let (_dir, lookup) = lookup();
        let text = lookup.read("five.txt", 2, 4).await.unwrap();
        assert_eq!(text, "Line 2\nLine 3\nLine 4\n");
    }

    #[tokio::test]
    async fn test_single_line() {
        let (_dir, lookup) = lookup();
        assert_eq!(lookup.read("five.txt", 1, 1).await.unwrap(), "Line 1\n");
    }

    #[tokio::test]
    async fn test_end_is_clamped_to_eof() {
        let (_dir, lookup) = lookup();
        assert_eq!(lookup.read("five.txt", 4, 60).await.unwrap(), "Line 4\nLine 5\n");
    }

    #[tokio::test]
    async fn test_invalid_ranges_are_not_found() {
        let (_dir, lookup) = lookup();
        for (start, end) in [(0, 2), (3, 2), (-1, 4), (6, 9)] {
            let err = lookup.read("five.txt", start, end).await.unwrap_err();
            assert!(
                matches!(err, CapabilityError::NotFound { .. }),
                "range {start}-{end} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_dir, lookup) = lookup();
        let err = lookup.read("non_existent.txt", 1, 2).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound { .. }));
    }

    #[test]
    fn test_select_lines_without_trailing_newline() {
        assert_eq!(select_lines("a\nb", 2, 2).as_deref(), Some("b"));
        assert_eq!(select_lines("", 1, 1), None);
    }
}
