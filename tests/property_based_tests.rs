//! Property-based tests for the lenient parsing paths
//!
//! Reasoning output reaches the engine as almost-JSON: plans, verdict blocks
//! and edited plans all go through the repair pass. These properties pin the
//! behaviour that the workflow relies on.
//!
//! ## Configuration
//!
//! - `PROPTEST_CASES`: Number of test cases per property (default: 64)
//! - `PROPTEST_MAX_SHRINK_ITERS`: Max shrinking iterations on failure (default: 1000)
//!
//! ```bash
//! PROPTEST_CASES=256 cargo test --test property_based_tests
//! ```

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::env;

use deftriage::{DefectRecord, DefectType, Verdict, extract_verdict, validate_plan_document};
use deftriage_extraction::{parse_lenient, repair_json};

/// Default number of test cases per property.
const DEFAULT_PROPTEST_CASES: u32 = 64;

/// Default max shrink iterations.
const DEFAULT_MAX_SHRINK_ITERS: u32 = 1000;

/// Creates a ProptestConfig that respects `PROPTEST_CASES` and
/// `PROPTEST_MAX_SHRINK_ITERS`, capped at `max_cases` when given.
fn proptest_config(max_cases: Option<u32>) -> ProptestConfig {
    let env_cases = env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_PROPTEST_CASES);

    let env_shrink_iters = env::var("PROPTEST_MAX_SHRINK_ITERS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_MAX_SHRINK_ITERS);

    let cases = match max_cases {
        Some(max) => env_cases.min(max),
        None => env_cases,
    };

    ProptestConfig {
        cases,
        max_shrink_iters: env_shrink_iters,
        max_shrink_time: 30000,
        ..ProptestConfig::default()
    }
}

fn defect_type() -> impl Strategy<Value = DefectType> {
    prop_oneof![
        Just(DefectType::FalsePositive),
        Just(DefectType::Style),
        Just(DefectType::Perf),
        Just(DefectType::Bug),
    ]
}

/// Renders a flat map the way a careless model would: single quotes and a
/// trailing comma.
fn sloppy_object(fields: &BTreeMap<String, String>) -> String {
    let body: Vec<String> = fields.iter().map(|(k, v)| format!("'{k}': '{v}'")).collect();
    format!("{{{},}}", body.join(", "))
}

proptest! {
    #![proptest_config(proptest_config(None))]

    #[test]
    fn prop_repair_is_idempotent(input in ".{0,80}") {
        let once = repair_json(&input);
        if serde_json::from_str::<serde_json::Value>(&once).is_ok() {
            prop_assert_eq!(repair_json(&once), once);
        }
    }

    #[test]
    fn prop_sloppy_object_parses_like_strict(
        fields in prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9 ]{0,12}", 1..6)
    ) {
        let strict: serde_json::Value = serde_json::to_value(&fields).unwrap();
        let repaired: serde_json::Value = parse_lenient(&sloppy_object(&fields)).unwrap();
        prop_assert_eq!(repaired, strict);
    }

    #[test]
    fn prop_verdict_block_round_trips(
        kind in defect_type(),
        description in "[A-Za-z0-9][A-Za-z0-9 ,.()]{0,58}[A-Za-z0-9.]",
        prose in "[A-Za-z ]{0,80}",
    ) {
        let verdict = Verdict { defect_type: kind, defect_description: description };
        let narrative = format!("## Analysis\n\n{prose}\n\n{}", verdict.to_block());
        prop_assert_eq!(extract_verdict(&narrative).unwrap(), verdict);
    }

    #[test]
    fn prop_defect_type_normalize_ignores_case_and_separators(
        kind in defect_type(),
        upper in any::<bool>(),
        sep in prop_oneof![Just("_"), Just(" "), Just("-")],
    ) {
        let label = kind.to_string().replace('_', sep);
        let label = if upper { label.to_uppercase() } else { label };
        prop_assert_eq!(DefectType::normalize(&label), Some(kind));
    }

    #[test]
    fn prop_plan_never_exceeds_step_cap(count in 1usize..10, cap in 1usize..6) {
        let steps: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"title": format!("step {i}"), "description": "d", "kind": "analysis"}))
            .collect();
        let raw = serde_json::json!({"has_enough_context": false, "steps": steps}).to_string();

        let plan = validate_plan_document(&raw, "en-US", cap).unwrap();
        prop_assert_eq!(plan.steps.len(), count.min(cap));
        prop_assert_eq!(&plan.steps[0].title, "step 0");
    }

    #[test]
    fn prop_inline_csv_line_round_trips(
        file in "[a-z]{1,8}\\.c",
        line in 1u32..100_000,
        severity in "[a-z]{1,8}",
        id in "[A-Za-z]{1,12}",
        summary in "[A-Za-z0-9][A-Za-z0-9 ,:']{0,38}[A-Za-z0-9]",
    ) {
        let raw = format!("{file},{line},{severity},{id},\"{summary}\"");
        let defect = DefectRecord::from_csv_line(&raw).unwrap();
        prop_assert_eq!(defect.file, file);
        prop_assert_eq!(defect.line, line);
        prop_assert_eq!(defect.id, id);
        prop_assert_eq!(defect.summary, summary);
    }
}
