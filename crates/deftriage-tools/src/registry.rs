//! Capability registry
//!
//! Binds capability names to implementations, publishes their signatures
//! per role and performs invocations requested by the reasoning loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::debug;

use deftriage_config::Config;
use deftriage_llm::ToolSpec;
use deftriage_utils::error::CapabilityError;

use crate::computation::{
    Computation, EXTERNAL_RESEARCH, ExternalResearch, ProcessSandbox, RUN_COMPUTATION,
};
use crate::listing::{DirectoryLister, LIST_DIRECTORY};
use crate::lookup::{CodeLookup, FsCodeLookup, READ_FILE_LINES};
use crate::root::ProjectRoot;
use crate::search::{
    CODEBASE_SEARCH, CodeSearch, NativeSearch, RipgrepSearch, SearchLimits, build_globset,
    format_hits,
};

/// Capability subset a step may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolRole {
    Investigation,
    Analysis,
}

/// Implementations shared by every run, cheap to clone.
#[derive(Clone)]
pub struct CapabilityRegistry {
    lookup: Arc<dyn CodeLookup>,
    search: Arc<dyn CodeSearch>,
    listing: Option<Arc<DirectoryLister>>,
    research: Option<Arc<dyn ExternalResearch>>,
    computation: Option<Arc<dyn Computation>>,
    timeout: Duration,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("listing", &self.listing.is_some())
            .field("research", &self.research.is_some())
            .field("computation", &self.computation.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new(lookup: Arc<dyn CodeLookup>, search: Arc<dyn CodeSearch>) -> Self {
        Self {
            lookup,
            search,
            listing: None,
            research: None,
            computation: None,
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_listing(mut self, listing: DirectoryLister) -> Self {
        self.listing = Some(Arc::new(listing));
        self
    }

    #[must_use]
    pub fn with_research(mut self, research: Arc<dyn ExternalResearch>) -> Self {
        self.research = Some(research);
        self
    }

    #[must_use]
    pub fn with_computation(mut self, computation: Arc<dyn Computation>) -> Self {
        self.computation = Some(computation);
        self
    }

    /// Upper bound for any single invocation
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Default filesystem-backed capabilities for the configured project root.
    ///
    /// # Errors
    ///
    /// Fails when the project root does not exist, the exclude globs are
    /// malformed or the configured interpreter cannot be found.
    pub fn from_config(config: &Config) -> Result<Self, CapabilityError> {
        let tools = &config.tools;
        let root_dir = match &tools.project_root {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| CapabilityError::NotFound {
                what: format!("working directory: {e}"),
            })?,
        };
        let root = ProjectRoot::new(&root_dir)?;
        let exclude = build_globset(&tools.exclude)?;
        let timeout = Duration::from_secs(config.engine.capability_timeout_secs.unwrap_or(30));
        let limits = SearchLimits {
            context_lines: tools.context_lines.unwrap_or(3) as usize,
            max_matches_per_file: tools.max_matches_per_file.unwrap_or(50) as usize,
            timeout,
        };

        let search: Arc<dyn CodeSearch> = match tools.search_backend.as_deref() {
            Some("native") => Arc::new(NativeSearch::new(root.clone(), exclude.clone(), limits)),
            _ => {
                let rg = RipgrepSearch::new(root.clone(), tools.rg_path.clone(), limits)
                    .with_exclude(&tools.exclude);
                if rg.is_available() {
                    Arc::new(rg)
                } else {
                    debug!("Falling back to native search");
                    Arc::new(NativeSearch::new(root.clone(), exclude.clone(), limits))
                }
            }
        };

        let tree_depth = config.engine.tree_depth.unwrap_or(3);
        let mut registry = Self::new(Arc::new(FsCodeLookup::new(root.clone())), search)
            .with_listing(DirectoryLister::new(root, exclude, tree_depth))
            .with_timeout(timeout);

        if let Some(interpreter) = &tools.interpreter {
            registry = registry.with_computation(Arc::new(ProcessSandbox::new(interpreter, timeout)?));
        }
        Ok(registry)
    }

    #[must_use]
    pub fn lookup(&self) -> &Arc<dyn CodeLookup> {
        &self.lookup
    }

    #[must_use]
    pub fn search(&self) -> &Arc<dyn CodeSearch> {
        &self.search
    }

    #[must_use]
    pub fn listing(&self) -> Option<&DirectoryLister> {
        self.listing.as_deref()
    }

    /// Capability names available to `role`, in presentation order.
    #[must_use]
    pub fn names(&self, role: ToolRole) -> Vec<&'static str> {
        match role {
            ToolRole::Investigation => {
                let mut names = vec![READ_FILE_LINES, CODEBASE_SEARCH];
                if self.listing.is_some() {
                    names.push(LIST_DIRECTORY);
                }
                if self.research.is_some() {
                    names.push(EXTERNAL_RESEARCH);
                }
                names
            }
            ToolRole::Analysis => {
                if self.computation.is_some() {
                    vec![RUN_COMPUTATION]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Signatures offered to the reasoning backend for `role`.
    #[must_use]
    pub fn specs(&self, role: ToolRole) -> Vec<ToolSpec> {
        self.names(role).into_iter().filter_map(spec_for).collect()
    }

    /// Perform one invocation on behalf of `role`.
    ///
    /// # Errors
    ///
    /// `UnknownCapability` when `name` is not offered to `role`, otherwise
    /// whatever the capability reports, plus `Timeout` from the registry-wide
    /// bound.
    pub async fn invoke(&self, role: ToolRole, name: &str, args: &Value) -> Result<String, CapabilityError> {
        if !self.names(role).iter().any(|n| *n == name) {
            return Err(CapabilityError::UnknownCapability {
                name: name.to_string(),
            });
        }

        debug!(capability = name, ?role, "Invoking capability");
        match timeout(self.timeout, self.dispatch(name, args)).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout {
                capability: name.to_string(),
                duration: self.timeout,
            }),
        }
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<String, CapabilityError> {
        let args = Args { name, value: args };
        match name {
            READ_FILE_LINES => {
                let path = args.string_any(&["file_path", "path"])?;
                let start = args.int("start_line")?;
                let end = args.int("end_line")?;
                self.lookup.read(&path, start, end).await
            }
            CODEBASE_SEARCH => {
                let query = args.string_any(&["query", "pattern"])?;
                let include = args.opt_string("include_glob");
                let exclude = args.opt_string("exclude_glob");
                let hits = self
                    .search
                    .search(&query, include.as_deref(), exclude.as_deref())
                    .await?;
                Ok(format_hits(&hits))
            }
            LIST_DIRECTORY => {
                let listing = self.listing.as_ref().ok_or_else(|| unknown(name))?;
                let path = args.opt_string("path").unwrap_or_default();
                let depth = args.opt_int("depth").map_or(listing.max_depth(), |d| d.max(1) as usize);
                listing.list(&path, depth)
            }
            EXTERNAL_RESEARCH => {
                let research = self.research.as_ref().ok_or_else(|| unknown(name))?;
                research.research(&args.string_any(&["query"])?).await
            }
            RUN_COMPUTATION => {
                let computation = self.computation.as_ref().ok_or_else(|| unknown(name))?;
                computation.run(&args.string_any(&["code"])?).await
            }
            other => Err(unknown(other)),
        }
    }
}

fn unknown(name: &str) -> CapabilityError {
    CapabilityError::UnknownCapability {
        name: name.to_string(),
    }
}

/// Lenient accessors over an arguments object.
struct Args<'a> {
    name: &'a str,
    value: &'a Value,
}

impl Args<'_> {
    fn invalid(&self, reason: String) -> CapabilityError {
        CapabilityError::InvalidArguments {
            capability: self.name.to_string(),
            reason,
        }
    }

    fn string_any(&self, keys: &[&str]) -> Result<String, CapabilityError> {
        keys.iter()
            .find_map(|k| self.value.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| self.invalid(format!("missing string field '{}'", keys[0])))
    }

    fn opt_string(&self, key: &str) -> Option<String> {
        self.value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Integers may arrive as numbers or numeric strings.
    fn opt_int(&self, key: &str) -> Option<i64> {
        match self.value.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn int(&self, key: &str) -> Result<i64, CapabilityError> {
        self.opt_int(key)
            .ok_or_else(|| self.invalid(format!("missing integer field '{key}'")))
    }
}

fn spec_for(name: &str) -> Option<ToolSpec> {
    let (description, parameters) = match name {
        READ_FILE_LINES => (
            "Reads lines from start_line to end_line (inclusive, 1-based) from a file in the \
             project. Useful for fetching specific segments of code.",
            json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Path relative to the project root."},
                    "start_line": {"type": "integer", "description": "1-based first line."},
                    "end_line": {"type": "integer", "description": "1-based last line, inclusive."}
                },
                "required": ["file_path", "start_line", "end_line"]
            }),
        ),
        CODEBASE_SEARCH => (
            "Searches the codebase for an exact string or regex pattern and returns matching \
             lines with context. Use it to find definitions, call sites and checks of an identifier.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Exact string or regex pattern."},
                    "include_glob": {"type": "string", "description": "Only search files matching this glob, e.g. *.c"},
                    "exclude_glob": {"type": "string", "description": "Skip files matching this glob."}
                },
                "required": ["query"]
            }),
        ),
        LIST_DIRECTORY => (
            "Lists a directory of the project as an indented tree.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory relative to the project root; empty for the root."},
                    "depth": {"type": "integer", "description": "Levels to descend."}
                }
            }),
        ),
        EXTERNAL_RESEARCH => (
            "Looks up external documentation or advisories for a query.",
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        ),
        RUN_COMPUTATION => (
            "Runs a short script in a sandbox and returns its output. Use it for \
             calculations that support the analysis.",
            json!({
                "type": "object",
                "properties": {"code": {"type": "string", "description": "Script source."}},
                "required": ["code"]
            }),
        ),
        _ => return None,
    };
    Some(ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoResearch;

    #[async_trait]
    impl ExternalResearch for EchoResearch {
        async fn research(&self, query: &str) -> Result<String, CapabilityError> {
            Ok(format!("research: {query}"))
        }
    }

    fn registry() -> (TempDir, CapabilityRegistry) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.c"), "one\ntwo\nthree\n").unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        let exclude = build_globset(&[]).unwrap();
        let registry = CapabilityRegistry::new(
            Arc::new(FsCodeLookup::new(root.clone())),
            Arc::new(NativeSearch::new(root.clone(), exclude.clone(), SearchLimits::default())),
        )
        .with_listing(DirectoryLister::new(root, exclude, 2));
        (dir, registry)
    }

    #[test]
    fn test_role_subsets() {
        let (_dir, registry) = registry();
        assert_eq!(
            registry.names(ToolRole::Investigation),
            vec![READ_FILE_LINES, CODEBASE_SEARCH, LIST_DIRECTORY]
        );
        assert!(registry.specs(ToolRole::Analysis).is_empty());

        let registry = registry.with_research(Arc::new(EchoResearch));
        let specs = registry.specs(ToolRole::Investigation);
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[3].name, EXTERNAL_RESEARCH);
        assert_eq!(specs[0].parameters["required"][0], "file_path");
    }

    #[tokio::test]
    async fn test_invoke_read_with_string_numbers() {
        let (_dir, registry) = registry();
        let out = registry
            .invoke(
                ToolRole::Investigation,
                READ_FILE_LINES,
                &json!({"file_path": "a.c", "start_line": "2", "end_line": 3}),
            )
            .await
            .unwrap();
        assert_eq!(out, "two\nthree\n");
    }

    #[tokio::test]
    async fn test_invoke_search_formats_hits() {
        let (_dir, registry) = registry();
        let out = registry
            .invoke(ToolRole::Investigation, CODEBASE_SEARCH, &json!({"query": "two"}))
            .await
            .unwrap();
        assert!(out.starts_with("a.c:2\n"));
    }

    #[tokio::test]
    async fn test_role_gating_and_unknown_names() {
        let (_dir, registry) = registry();
        let err = registry
            .invoke(ToolRole::Analysis, READ_FILE_LINES, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownCapability { .. }));

        let err = registry
            .invoke(ToolRole::Investigation, "rm_rf", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownCapability { .. }));
    }

    #[tokio::test]
    async fn test_missing_arguments_are_invalid() {
        let (_dir, registry) = registry();
        let err = registry
            .invoke(ToolRole::Investigation, READ_FILE_LINES, &json!({"file_path": "a.c"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_list_directory_default_path() {
        let (_dir, registry) = registry();
        let out = registry
            .invoke(ToolRole::Investigation, LIST_DIRECTORY, &json!({}))
            .await
            .unwrap();
        assert_eq!(out, "./\n  a.c\n");
    }

    #[test]
    fn test_from_config_with_native_backend() {
        let dir = TempDir::new().unwrap();
        let config = Config::builder()
            .project_root(dir.path())
            .search_backend("native")
            .build()
            .unwrap();
        let registry = CapabilityRegistry::from_config(&config).unwrap();
        assert!(registry.listing().is_some());
        assert!(registry.names(ToolRole::Analysis).is_empty());
    }
}
