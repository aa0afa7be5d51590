//! Capability implementations for defect triage
//!
//! The engine depends on the [`CodeLookup`], [`CodeSearch`], [`Computation`]
//! and [`ExternalResearch`] contracts only. This crate provides filesystem,
//! ripgrep and process-backed implementations plus the
//! [`CapabilityRegistry`] that exposes them to the reasoning loop.

mod computation;
mod listing;
mod lookup;
mod registry;
mod root;
mod search;

pub use computation::{Computation, ExternalResearch, ProcessSandbox};
pub use listing::DirectoryLister;
pub use lookup::{CodeLookup, FsCodeLookup};
pub use registry::{CapabilityRegistry, ToolRole};
pub use root::ProjectRoot;
pub use search::{
    CodeSearch, NativeSearch, RipgrepSearch, SearchHit, SearchLimits, build_globset, format_hits,
};

pub use deftriage_utils::error::CapabilityError;

/// Capability names as offered to the reasoning backend
pub mod names {
    pub use crate::computation::{EXTERNAL_RESEARCH, RUN_COMPUTATION};
    pub use crate::listing::LIST_DIRECTORY;
    pub use crate::lookup::READ_FILE_LINES;
    pub use crate::search::CODEBASE_SEARCH;
}
