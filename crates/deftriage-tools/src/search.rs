//! Code search backends
//!
//! [`RipgrepSearch`] shells out to `rg --json`. [`NativeSearch`] walks the
//! tree with `regex` and `globset` and is used when ripgrep is not installed
//! or when `search_backend = "native"`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use deftriage_utils::error::CapabilityError;

use crate::root::ProjectRoot;

pub const CODEBASE_SEARCH: &str = "codebase_search";

/// Stderr kept in diagnostics
const STDERR_CAP_BYTES: usize = 2048;

/// One search match with surrounding lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Path relative to the project root
    pub path: String,
    /// 1-based line of the match
    pub line: u64,
    /// Match and context lines, `N:` prefix on the match, `N-` on context
    pub context_text: String,
}

/// Exact/regex pattern search over the project.
#[async_trait]
pub trait CodeSearch: Send + Sync {
    /// Search for `query`, optionally restricted by include/exclude globs.
    ///
    /// Hits are ordered by path, then line.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when the search backend cannot run.
    async fn search(
        &self,
        query: &str,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Vec<SearchHit>, CapabilityError>;
}

/// Shared search knobs
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub context_lines: usize,
    pub max_matches_per_file: usize,
    pub timeout: Duration,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            context_lines: 3,
            max_matches_per_file: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Ripgrep
// ============================================================================

/// [`CodeSearch`] backed by the `rg` binary.
#[derive(Debug, Clone)]
pub struct RipgrepSearch {
    root: ProjectRoot,
    binary: Option<PathBuf>,
    limits: SearchLimits,
    /// Config exclude globs, passed as `-g !<glob>`
    exclude: Vec<String>,
}

impl RipgrepSearch {
    /// Use `binary` when given, otherwise look `rg` up on PATH.
    ///
    /// A missing binary is not an error here; searches report
    /// `BackendUnavailable` instead so the rest of a run still works.
    #[must_use]
    pub fn new(root: ProjectRoot, binary: Option<PathBuf>, limits: SearchLimits) -> Self {
        let binary = binary.or_else(|| which::which("rg").ok());
        if binary.is_none() {
            warn!("ripgrep not found in PATH; codebase search is unavailable");
        }
        Self {
            root,
            binary,
            limits,
            exclude: Vec::new(),
        }
    }

    /// Skip paths matching any of `patterns` on every search.
    #[must_use]
    pub fn with_exclude(mut self, patterns: &[String]) -> Self {
        self.exclude = patterns.to_vec();
        self
    }

    /// Whether the `rg` binary was found
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    fn unavailable(reason: impl Into<String>) -> CapabilityError {
        CapabilityError::BackendUnavailable {
            backend: "ripgrep".to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CodeSearch for RipgrepSearch {
    async fn search(
        &self,
        query: &str,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let Some(binary) = &self.binary else {
            return Err(Self::unavailable(
                "ripgrep command not found; install ripgrep or set tools.search_backend = \"native\"",
            ));
        };

        let mut cmd = Command::new(binary);
        cmd.arg("--json")
            .arg("--sort")
            .arg("path")
            .arg("--context")
            .arg(self.limits.context_lines.to_string())
            .arg("--max-count")
            .arg(self.limits.max_matches_per_file.to_string());
        if let Some(glob) = include {
            cmd.arg("-g").arg(glob);
        }
        for glob in self.exclude.iter().map(String::as_str).chain(exclude) {
            cmd.arg("-g").arg(format!("!{glob}"));
        }
        cmd.arg("--")
            .arg(query)
            .arg(".")
            .current_dir(self.root.as_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(query, ?include, ?exclude, "Running ripgrep");
        let child = cmd
            .spawn()
            .map_err(|e| Self::unavailable(format!("failed to spawn ripgrep: {e}")))?;

        let output = match timeout(self.limits.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Self::unavailable(format!("failed to wait for ripgrep: {e}"))),
            Err(_) => {
                return Err(CapabilityError::Timeout {
                    capability: CODEBASE_SEARCH.to_string(),
                    duration: self.limits.timeout,
                });
            }
        };

        match output.status.code() {
            Some(0) => Ok(parse_rg_json(
                &String::from_utf8_lossy(&output.stdout),
                self.limits.context_lines,
            )),
            // Exit code 1 means no matches
            Some(1) => Ok(Vec::new()),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = truncate(&stderr, STDERR_CAP_BYTES);
                Err(Self::unavailable(format!(
                    "ripgrep exited with {code:?}: {}",
                    stderr.trim()
                )))
            }
        }
    }
}

#[derive(Deserialize)]
struct RgEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<RgData>,
}

#[derive(Deserialize)]
struct RgData {
    path: Option<RgText>,
    lines: Option<RgText>,
    line_number: Option<u64>,
}

#[derive(Deserialize)]
struct RgText {
    #[serde(default)]
    text: Option<String>,
}

/// Fold ripgrep's JSON event stream into hits with context.
pub(crate) fn parse_rg_json(stdout: &str, context_lines: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut collector = ContextCollector::new(context_lines);

    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(event) = serde_json::from_str::<RgEvent>(line) else {
            continue;
        };
        let Some(data) = event.data else {
            continue;
        };
        let (Some(path), Some(number)) = (
            data.path.and_then(|p| p.text),
            data.line_number,
        ) else {
            if event.kind == "begin" {
                collector.reset();
            }
            continue;
        };
        let text = data.lines.and_then(|l| l.text).unwrap_or_default();
        let path = path.strip_prefix("./").unwrap_or(&path).to_string();

        match event.kind.as_str() {
            "match" => collector.on_match(&mut hits, path, number, &text),
            "context" => collector.on_context(&mut hits, number, &text),
            _ => {}
        }
    }
    hits
}

/// Tracks before-context and extends the latest hit with after-context.
struct ContextCollector {
    context_lines: usize,
    before: VecDeque<(u64, String)>,
    /// Index into hits of the last match of the current file
    last: Option<usize>,
}

impl ContextCollector {
    fn new(context_lines: usize) -> Self {
        Self {
            context_lines,
            before: VecDeque::new(),
            last: None,
        }
    }

    fn reset(&mut self) {
        self.before.clear();
        self.last = None;
    }

    fn on_match(&mut self, hits: &mut Vec<SearchHit>, path: String, number: u64, text: &str) {
        if hits.last().is_some_and(|h| h.path != path) {
            self.reset();
        }
        let mut context_text = String::new();
        for (n, line) in self.before.drain(..) {
            if n + self.context_lines as u64 >= number {
                push_line(&mut context_text, n, '-', &line);
            }
        }
        push_line(&mut context_text, number, ':', text);
        hits.push(SearchHit {
            path,
            line: number,
            context_text,
        });
        self.last = Some(hits.len() - 1);
    }

    fn on_context(&mut self, hits: &mut [SearchHit], number: u64, text: &str) {
        if let Some(idx) = self.last
            && let Some(hit) = hits.get_mut(idx)
            && number > hit.line
            && number <= hit.line + self.context_lines as u64
        {
            push_line(&mut hit.context_text, number, '-', text);
        }
        self.before.push_back((number, text.to_string()));
        while self.before.len() > self.context_lines {
            self.before.pop_front();
        }
    }
}

fn push_line(buf: &mut String, number: u64, sep: char, text: &str) {
    buf.push_str(&number.to_string());
    buf.push(sep);
    buf.push_str(text.trim_end_matches(['\n', '\r']));
    buf.push('\n');
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Native
// ============================================================================

/// Pure-Rust [`CodeSearch`] using `regex` and `globset`.
#[derive(Debug, Clone)]
pub struct NativeSearch {
    root: ProjectRoot,
    exclude: GlobSet,
    limits: SearchLimits,
}

impl NativeSearch {
    #[must_use]
    pub fn new(root: ProjectRoot, exclude: GlobSet, limits: SearchLimits) -> Self {
        Self {
            root,
            exclude,
            limits,
        }
    }
}

fn single_glob(pattern: &str, capability: &str) -> Result<GlobSet, CapabilityError> {
    let glob = Glob::new(pattern).map_err(|e| CapabilityError::InvalidArguments {
        capability: capability.to_string(),
        reason: format!("invalid glob '{pattern}': {e}"),
    })?;
    GlobSetBuilder::new()
        .add(glob)
        .build()
        .map_err(|e| CapabilityError::InvalidArguments {
            capability: capability.to_string(),
            reason: format!("invalid glob '{pattern}': {e}"),
        })
}

/// Build a glob set from config patterns.
///
/// # Errors
///
/// `InvalidArguments` for a malformed pattern.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet, CapabilityError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CapabilityError::InvalidArguments {
            capability: "exclude".to_string(),
            reason: format!("invalid glob '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CapabilityError::InvalidArguments {
        capability: "exclude".to_string(),
        reason: e.to_string(),
    })
}

/// Directory globs such as `target/**` only match paths below the directory,
/// so directories are tested through a placeholder child path.
pub(crate) fn is_excluded(set: &GlobSet, rel: &str, is_dir: bool) -> bool {
    set.is_match(rel) || (is_dir && set.is_match(format!("{rel}/_")))
}

#[async_trait]
impl CodeSearch for NativeSearch {
    async fn search(
        &self,
        query: &str,
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let pattern = Regex::new(query).map_err(|e| CapabilityError::InvalidArguments {
            capability: CODEBASE_SEARCH.to_string(),
            reason: format!("invalid pattern: {e}"),
        })?;
        let include = include.map(|g| single_glob(g, CODEBASE_SEARCH)).transpose()?;
        let extra_exclude = exclude.map(|g| single_glob(g, CODEBASE_SEARCH)).transpose()?;

        let root = self.root.clone();
        let exclude = self.exclude.clone();
        let limits = self.limits;

        let task = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            collect_files(&root, root.as_path(), &exclude, extra_exclude.as_ref(), &mut files);
            files.sort();

            let mut hits = Vec::new();
            for file in files {
                let rel = root.relative(&file);
                if let Some(inc) = &include
                    && !inc.is_match(&rel)
                {
                    continue;
                }
                // Binary or non-UTF-8 files are skipped like ripgrep does
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                search_file(&pattern, &rel, &content, limits, &mut hits);
            }
            hits
        });

        match timeout(self.limits.timeout, task).await {
            Ok(Ok(hits)) => Ok(hits),
            Ok(Err(e)) => Err(CapabilityError::BackendUnavailable {
                backend: "native".to_string(),
                reason: format!("search task failed: {e}"),
            }),
            Err(_) => Err(CapabilityError::Timeout {
                capability: CODEBASE_SEARCH.to_string(),
                duration: self.limits.timeout,
            }),
        }
    }
}

fn collect_files(
    root: &ProjectRoot,
    dir: &Path,
    exclude: &GlobSet,
    extra: Option<&GlobSet>,
    out: &mut Vec<PathBuf>,
) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Symlinks are not followed
        if file_type.is_symlink() {
            continue;
        }
        let rel = root.relative(&path);
        let is_dir = file_type.is_dir();
        if is_excluded(exclude, &rel, is_dir) || extra.is_some_and(|g| is_excluded(g, &rel, is_dir)) {
            continue;
        }
        if is_dir {
            collect_files(root, &path, exclude, extra, out);
        } else if file_type.is_file() {
            out.push(path);
        }
    }
}

fn search_file(pattern: &Regex, rel: &str, content: &str, limits: SearchLimits, hits: &mut Vec<SearchHit>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut found = 0usize;
    for (idx, line) in lines.iter().enumerate() {
        if found >= limits.max_matches_per_file {
            break;
        }
        if !pattern.is_match(line) {
            continue;
        }
        found += 1;
        let from = idx.saturating_sub(limits.context_lines);
        let to = (idx + limits.context_lines).min(lines.len().saturating_sub(1));
        let mut context_text = String::new();
        for (i, text) in lines.iter().enumerate().take(to + 1).skip(from) {
            let sep = if i == idx { ':' } else { '-' };
            push_line(&mut context_text, i as u64 + 1, sep, text);
        }
        hits.push(SearchHit {
            path: rel.to_string(),
            line: idx as u64 + 1,
            context_text,
        });
    }
}

/// Render hits for the reasoning loop.
#[must_use]
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No matches found.".to_string();
    }
    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!("{}:{}\n{}--\n", hit.path, hit.line, hit.context_text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, ProjectRoot) {
        let dir = TempDir::new().unwrap();
        let p = dir.path();
        std::fs::create_dir_all(p.join("src")).unwrap();
        std::fs::create_dir_all(p.join("target/debug")).unwrap();
        std::fs::write(
            p.join("src/net.c"),
            "int open_sock(void) {\n  int sock = socket();\n  if (sock < 0)\n    return -1;\n  return sock;\n}\n",
        )
        .unwrap();
        std::fs::write(p.join("src/notes.md"), "the sock is closed\n").unwrap();
        std::fs::write(p.join("target/debug/gen.c"), "int sock;\n").unwrap();
        let root = ProjectRoot::new(p).unwrap();
        (dir, root)
    }

    fn native(root: ProjectRoot) -> NativeSearch {
        let exclude = build_globset(&["target/**".to_string()]).unwrap();
        NativeSearch::new(
            root,
            exclude,
            SearchLimits {
                context_lines: 1,
                ..SearchLimits::default()
            },
        )
    }

    #[tokio::test]
    async fn test_native_search_orders_by_path_then_line() {
        let (_dir, root) = project();
        let hits = native(root).search(r"\bsock\b", None, None).await.unwrap();

        let keys: Vec<(&str, u64)> = hits.iter().map(|h| (h.path.as_str(), h.line)).collect();
        assert_eq!(
            keys,
            vec![("src/net.c", 2), ("src/net.c", 3), ("src/net.c", 5), ("src/notes.md", 1)]
        );
        assert_eq!(hits[0].context_text, "1-int open_sock(void) {\n2:  int sock = socket();\n3-  if (sock < 0)\n");
    }

    #[tokio::test]
    async fn test_native_search_respects_include_and_exclude() {
        let (_dir, root) = project();
        let search = native(root);

        let only_c = search.search("sock", Some("*.c"), None).await.unwrap();
        assert!(only_c.iter().all(|h| h.path == "src/net.c"));

        let no_md = search.search("closed", None, Some("*.md")).await.unwrap();
        assert!(no_md.is_empty());
    }

    #[tokio::test]
    async fn test_native_search_rejects_bad_regex() {
        let (_dir, root) = project();
        let err = native(root).search("(unclosed", None, None).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_ripgrep_missing_binary_is_backend_unavailable() {
        let (dir, root) = project();
        let search = RipgrepSearch::new(
            root,
            Some(dir.path().join("no-such-rg")),
            SearchLimits::default(),
        );
        let err = search.search("sock", None, None).await.unwrap_err();
        assert!(matches!(err, CapabilityError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_ripgrep_sorts_by_path_and_skips_config_excludes() {
        if which::which("rg").is_err() {
            eprintln!("Skipping: ripgrep not installed");
            return;
        }
        let (dir, root) = project();
        // Created after the others so directory order alone would not sort it
        std::fs::write(dir.path().join("src/alloc.c"), "free(sock);\n").unwrap();

        let search = RipgrepSearch::new(
            root,
            None,
            SearchLimits {
                context_lines: 0,
                ..SearchLimits::default()
            },
        )
        .with_exclude(&["target/**".to_string()]);
        let hits = search.search(r"\bsock\b", None, None).await.unwrap();

        let keys: Vec<(&str, u64)> = hits.iter().map(|h| (h.path.as_str(), h.line)).collect();
        assert_eq!(
            keys,
            vec![
                ("src/alloc.c", 1),
                ("src/net.c", 2),
                ("src/net.c", 3),
                ("src/net.c", 5),
                ("src/notes.md", 1)
            ]
        );
    }

    #[test]
    fn test_parse_rg_json_with_context() {
        let stdout = r#"{"type":"begin","data":{"path":{"text":"./src/net.c"}}}
{"type":"context","data":{"path":{"text":"./src/net.c"},"lines":{"text":"int open_sock(void) {\n"},"line_number":1}}
{"type":"match","data":{"path":{"text":"./src/net.c"},"lines":{"text":"  int sock = socket();\n"},"line_number":2,"submatches":[]}}
{"type":"context","data":{"path":{"text":"./src/net.c"},"lines":{"text":"  if (sock < 0)\n"},"line_number":3}}
{"type":"end","data":{"path":{"text":"./src/net.c"}}}
{"type":"summary","data":{"elapsed_total":{"secs":0}}}"#;

        let hits = parse_rg_json(stdout, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "src/net.c");
        assert_eq!(hits[0].line, 2);
        assert_eq!(
            hits[0].context_text,
            "1-int open_sock(void) {\n2:  int sock = socket();\n3-  if (sock < 0)\n"
        );
    }

    #[test]
    fn test_format_hits_empty() {
        assert_eq!(format_hits(&[]), "No matches found.");
    }

    #[test]
    fn test_directory_exclusion_uses_child_path() {
        let set = build_globset(&[".git/**".to_string()]).unwrap();
        assert!(is_excluded(&set, ".git", true));
        assert!(!is_excluded(&set, ".github", true));
    }
}
