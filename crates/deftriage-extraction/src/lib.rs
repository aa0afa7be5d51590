//! Content extraction utilities for reasoning output
//!
//! Reasoning backends wrap structured documents in prose and code fences and
//! frequently emit almost-JSON. This crate locates the structured part and
//! repairs it into something `serde_json` accepts.

mod fence;
mod repair;

pub use fence::{
    FencedBlock, extract_fenced_blocks, json_block_candidates, last_json_block, strip_code_fences,
};
pub use repair::{RepairError, parse_lenient, repair_json};
