//! Shared fixtures for the integration tests
//!
//! Builds throwaway C projects and a scripted reasoning backend whose
//! answers depend on what the capabilities actually return, so verdicts
//! follow the code under test rather than a fixed script.

#![allow(dead_code)]

use std::sync::Arc;

use deftriage::{DefectRecord, EngineSettings, WorkflowController};
use deftriage_llm::test_support::{ScriptedBackend, ScriptedReply};
use deftriage_llm::{LlmInvocation, Role};
use deftriage_tools::{
    CapabilityRegistry, DirectoryLister, FsCodeLookup, NativeSearch, ProjectRoot, SearchLimits,
    build_globset,
};
use serde_json::json;
use tempfile::TempDir;

pub const GUARDED_SOURCE: &str = "#include <unistd.h>\n\
int send_all(int *sock, const char *buf) {\n\
    if (sock == NULL) {\n\
        return -1;\n\
    }\n\
    return write(*sock, buf, 4);\n\
}\n";

pub const UNGUARDED_SOURCE: &str = "#include <unistd.h>\n\
int send_all(int *sock, const char *buf) {\n\
    return write(*sock, buf, 4);\n\
}\n";

pub const PLAN_SEARCH_GUARD: &str = r#"{
  "locale": "en-US",
  "has_enough_context": false,
  "title": "Is sock guarded?",
  "rationale": "The report hinges on whether sock can reach the dereference unchecked.",
  "steps": [
    {"title": "Find guards", "description": "Search for comparisons of sock against NULL", "kind": "investigation"}
  ]
}"#;

pub const FOUND_GUARD: &str = "sock is checked against NULL before use";
pub const NO_GUARD: &str = "no NULL comparison guards sock";

pub fn report(defect_type: &str, description: &str) -> String {
    format!(
        "## Analysis\n\n{description}.\n\n## Conclusion\n\n```json\n{{\"defect_type\": \"{defect_type}\", \"defect_description\": \"{description}\"}}\n```"
    )
}

/// A temp project holding `net.c` with the given body.
pub fn project(source: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("net.c"), source).unwrap();
    dir
}

pub fn registry(dir: &TempDir) -> Arc<CapabilityRegistry> {
    let root = ProjectRoot::new(dir.path()).unwrap();
    let exclude = build_globset(&[]).unwrap();
    let registry = CapabilityRegistry::new(
        Arc::new(FsCodeLookup::new(root.clone())),
        Arc::new(NativeSearch::new(
            root.clone(),
            exclude.clone(),
            SearchLimits::default(),
        )),
    )
    .with_listing(DirectoryLister::new(root, exclude, 2));
    Arc::new(registry)
}

pub fn controller(
    dir: &TempDir,
    backend: Arc<ScriptedBackend>,
    settings: EngineSettings,
) -> WorkflowController {
    WorkflowController::new(backend, registry(dir), settings)
}

pub fn sock_defect() -> DefectRecord {
    DefectRecord::from_csv_line("net.c,6,error,nullPointer,Possible null pointer dereference: sock")
        .unwrap()
}

fn last_is_tool_result(inv: &LlmInvocation) -> bool {
    inv.messages.last().is_some_and(|m| m.role == Role::Tool)
}

fn mentions(inv: &LlmInvocation, needle: &str) -> bool {
    inv.messages.iter().any(|m| m.content.contains(needle))
}

/// Plans one search step, searches for a NULL guard, and judges by what the
/// search returned.
pub fn guard_responder(inv: &LlmInvocation) -> ScriptedReply {
    match inv.stage.as_str() {
        "planner" => ScriptedReply::text(format!("Here is the plan:\n```json\n{PLAN_SEARCH_GUARD}\n```")),
        "investigator" if last_is_tool_result(inv) => {
            let found = inv
                .messages
                .last()
                .is_some_and(|m| m.content.contains("sock == NULL"));
            ScriptedReply::text(if found { FOUND_GUARD } else { NO_GUARD })
        }
        "investigator" => ScriptedReply::call("codebase_search", json!({"query": "sock == NULL"})),
        "analyst" => ScriptedReply::text("The dereference follows the guard."),
        "reporter" if mentions(inv, FOUND_GUARD) => {
            ScriptedReply::text(report("false_positive", "sock is checked before the dereference"))
        }
        "reporter" => ScriptedReply::text(report("bug", "sock is dereferenced without a check")),
        other => panic!("unexpected stage {other}"),
    }
}

pub fn guard_backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::from_fn(guard_responder))
}
