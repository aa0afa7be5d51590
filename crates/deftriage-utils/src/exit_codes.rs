//! Exit code constants for deftriage.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Run completed (verdict may still be absent) |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments, configuration or defect input |
//! | 3 | `REVIEW_PENDING` | Run suspended for plan review; checkpoint written |
//! | 10 | `TIMEOUT` | Reasoning invocation timed out |
//! | 20 | `PLAN_FORMAT` | Plan document could not be repaired |
//! | 70 | `LLM_FAILURE` | Reasoning backend failed |
//! | 130 | `CANCELLED` | Run cancelled (Ctrl+C) |

/// Exit codes matching the documented exit code table.
///
/// ```rust
/// use deftriage_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_i32(20), ExitCode::PLAN_FORMAT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - run completed
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments, config or defect input
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Run suspended awaiting plan review
    pub const REVIEW_PENDING: ExitCode = ExitCode(3);

    /// Reasoning invocation timed out
    pub const TIMEOUT: ExitCode = ExitCode(10);

    /// Plan document could not be repaired
    pub const PLAN_FORMAT: ExitCode = ExitCode(20);

    /// Reasoning backend failed
    pub const LLM_FAILURE: ExitCode = ExitCode(70);

    /// Run cancelled
    pub const CANCELLED: ExitCode = ExitCode(130);

    /// Get the numeric exit code value for `std::process::exit()`.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
