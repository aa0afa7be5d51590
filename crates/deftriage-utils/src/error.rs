use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `TriageError` is the error type returned by deftriage library operations
/// that terminate a run. Soft failures (a capability miss inside a step, a
/// step hitting its iteration cap, a verdict that cannot be extracted) never
/// surface here; they degrade the run output instead.
///
/// # Exit Code Mapping
///
/// Use [`to_exit_code()`](Self::to_exit_code) to map errors to CLI exit codes:
///
/// | Exit Code | Error Type |
/// |-----------|------------|
/// | 2 | Configuration/CLI argument/defect input errors |
/// | 10 | Reasoning timeout |
/// | 20 | Plan document could not be repaired |
/// | 70 | Reasoning backend failure |
/// | 130 | Run cancelled |
/// | 1 | Other errors |
///
/// # Example
///
/// ```rust
/// use deftriage_utils::error::{PlanFormatError, TriageError};
/// use deftriage_utils::exit_codes::ExitCode;
///
/// let err = TriageError::from(PlanFormatError::Empty);
/// assert_eq!(err.to_exit_code(), ExitCode::PLAN_FORMAT);
/// assert!(err.display_for_user().contains("Suggestions:"));
/// ```
#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reasoning backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Plan format error: {0}")]
    PlanFormat(#[from] PlanFormatError),

    #[error("Defect input error: {0}")]
    Input(#[from] DefectInputError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checkpoint error at {path}: {reason}")]
    Checkpoint { path: String, reason: String },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Prompt template '{template}' is missing variable '{variable}'")]
    PromptTemplate { template: String, variable: String },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Reasoning,
    Capability,
    PlanFormat,
    Input,
    FileSystem,
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Reasoning => write!(f, "Reasoning Backend"),
            Self::Capability => write!(f, "Capability"),
            Self::PlanFormat => write!(f, "Plan Format"),
            Self::Input => write!(f, "Defect Input"),
            Self::FileSystem => write!(f, "File System"),
            Self::Cancellation => write!(f, "Cancellation"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => format!("The configuration file is invalid: {reason}"),
            Self::MissingRequired(key) => format!("Required configuration '{key}' is missing"),
            Self::InvalidValue { key, value } => {
                format!("Configuration key '{key}' has an invalid value: {value}")
            }
            Self::NotFound { path } => format!("No configuration file exists at {path}"),
        }
    }

    fn context(&self) -> Option<String> {
        Some(
            "deftriage reads .deftriage/config.toml, searching upward from the working directory."
                .to_string(),
        )
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax of .deftriage/config.toml".to_string(),
                "Remove unknown sections or keys".to_string(),
            ],
            Self::MissingRequired(key) => vec![format!("Set '{key}' in the config file")],
            Self::InvalidValue { key, .. } => {
                vec![format!("Correct '{key}' in the config file or on the command line")]
            }
            Self::NotFound { .. } => vec![
                "Pass --config with an existing path".to_string(),
                "Omit --config to use discovery and built-in defaults".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors that can occur during LLM backend operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed response)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("Reasoning backend transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("Reasoning provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("Reasoning provider quota exceeded: {msg}"),
            Self::ProviderOutage(msg) => format!("Reasoning provider service outage: {msg}"),
            Self::Timeout { duration } => {
                format!("Reasoning invocation timed out after {duration:?}")
            }
            Self::BudgetExceeded { limit, attempted } => {
                format!("Reasoning budget exceeded: attempted {attempted} calls, limit is {limit}")
            }
            Self::Misconfiguration(msg) => format!("Reasoning backend configuration error: {msg}"),
            Self::Unsupported(msg) => format!("Reasoning feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) => Some(
                "The reasoning backend could not be reached; the run cannot plan or report without it."
                    .to_string(),
            ),
            Self::ProviderAuth(_) => Some(
                "Authentication errors indicate a missing or invalid API key.".to_string(),
            ),
            Self::ProviderQuota(_) | Self::BudgetExceeded { .. } => Some(
                "Call limits protect against runaway investigation loops and cost.".to_string(),
            ),
            Self::Timeout { .. } => Some(
                "Each reasoning call is bounded by llm_timeout_secs.".to_string(),
            ),
            Self::Misconfiguration(_) | Self::Unsupported(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) => vec![
                "Check network connectivity and the configured base_url".to_string(),
                "Retry the run later".to_string(),
            ],
            Self::ProviderAuth(_) => vec![
                "Check that the api_key_env environment variable is set".to_string(),
                "Verify the API key is valid and not expired".to_string(),
            ],
            Self::ProviderQuota(_) => vec!["Wait a few minutes and try again".to_string()],
            Self::Timeout { .. } => {
                vec!["Increase [engine] llm_timeout_secs in the config file".to_string()]
            }
            Self::BudgetExceeded { .. } => vec![
                "Raise [llm.openai] budget or DEFTRIAGE_LLM_BUDGET".to_string(),
                "Lower max_step_num or max_step_iterations".to_string(),
            ],
            Self::Misconfiguration(_) => vec![
                "Check the [llm] section of .deftriage/config.toml".to_string(),
            ],
            Self::Unsupported(_) => vec!["Use provider = \"openai\"".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Misconfiguration(_) | Self::Unsupported(_) | Self::ProviderAuth(_) => {
                ErrorCategory::Configuration
            }
            _ => ErrorCategory::Reasoning,
        }
    }
}

/// Failures raised by code lookup, code search and the other injected capabilities.
///
/// These are local to a step: the executor turns them into a diagnostic for
/// the reasoning loop instead of propagating them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("{capability} timed out after {duration:?}")]
    Timeout {
        capability: String,
        duration: Duration,
    },

    #[error("invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("unknown capability '{name}'")]
    UnknownCapability { name: String },
}

impl CapabilityError {
    /// Text fed back to the reasoning loop in place of a capability result.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            Self::NotFound { .. } => format!("Error: {self}. Check the path and line range."),
            Self::BackendUnavailable { .. } => {
                format!("Error: {self}. This capability cannot be used in this run.")
            }
            Self::Timeout { .. } => format!("Error: {self}. Narrow the request and try again."),
            Self::InvalidArguments { .. } => {
                format!("Error: {self}. Fix the arguments to match the schema.")
            }
            Self::UnknownCapability { .. } => {
                format!("Error: {self}. Use only the listed capabilities.")
            }
        }
    }
}

impl UserFriendlyError for CapabilityError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        None
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::BackendUnavailable { backend, .. } if backend == "ripgrep" => vec![
                "Install ripgrep (rg) or set [tools] search_backend = \"native\"".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Capability
    }
}

/// The plan document returned by the reasoning backend could not be repaired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanFormatError {
    #[error("plan document is empty")]
    Empty,

    #[error("plan document is not valid JSON after repair: {reason}")]
    Unparseable { reason: String, excerpt: String },

    #[error("plan document is missing '{field}'")]
    MissingField { field: String },

    #[error("plan document field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

impl UserFriendlyError for PlanFormatError {
    fn user_message(&self) -> String {
        format!("The investigation plan could not be read: {self}")
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Unparseable { excerpt, .. } if !excerpt.is_empty() => {
                Some(format!("Document starts with: {excerpt}"))
            }
            _ => Some("Plan documents are repaired before parsing; this one could not be.".to_string()),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Re-run the defect; plan generation is not retried automatically".to_string(),
            "Try a model that follows JSON output instructions more reliably".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::PlanFormat
    }
}

/// A defect record could not be built from the supplied input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefectInputError {
    #[error("required field '{0}' is missing")]
    MissingField(String),

    #[error("line number must be a positive integer, got: {0}")]
    InvalidLine(String),

    #[error("invalid defect JSON: {0}")]
    InvalidJson(String),

    #[error("invalid defect CSV: {0}")]
    InvalidCsv(String),
}

impl UserFriendlyError for DefectInputError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        Some("A defect needs file, line, severity, id and summary.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidCsv(_) => vec![
                "Use the form: file,line,severity,id,summary".to_string(),
                "Quote fields that contain commas".to_string(),
            ],
            _ => vec![
                "Pass --json '{\"file\":...,\"line\":...,\"severity\":...,\"id\":...,\"summary\":...}'"
                    .to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Input
    }
}

/// A step exhausted its tool-call loop without a final answer.
///
/// Soft: the step keeps its partial result and is flagged incomplete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("step '{step}' reached the iteration limit of {limit}")]
pub struct StepIterationExceeded {
    pub step: String,
    pub limit: u32,
}

/// The trailing verdict block of a report could not be used.
///
/// Soft: the narrative is still returned and the verdict is absent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictExtractionError {
    #[error("report has no structured verdict block")]
    MissingBlock,

    #[error("verdict block is not valid JSON: {0}")]
    Unparseable(String),

    #[error("verdict block has no '{0}' field")]
    MissingField(String),

    #[error("unrecognized defect_type '{0}'")]
    UnknownDefectType(String),
}

impl UserFriendlyError for TriageError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(err) => err.user_message(),
            Self::Llm(err) => err.user_message(),
            Self::Capability(err) => err.user_message(),
            Self::PlanFormat(err) => err.user_message(),
            Self::Input(err) => err.user_message(),
            Self::Io(err) => format!("File operation failed: {err}"),
            Self::Checkpoint { path, reason } => {
                format!("Checkpoint {path} could not be used: {reason}")
            }
            Self::Cancelled { stage } => format!("The run was cancelled during {stage}"),
            Self::InvalidTransition { from, to } => {
                format!("A run in state {from} cannot move to {to}")
            }
            Self::PromptTemplate { template, variable } => {
                format!("The {template} prompt could not be rendered: '{variable}' is not set")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(err) => err.context(),
            Self::Llm(err) => err.context(),
            Self::Capability(err) => err.context(),
            Self::PlanFormat(err) => err.context(),
            Self::Input(err) => err.context(),
            Self::Checkpoint { .. } => Some(
                "Checkpoints are written when a run suspends for plan review.".to_string(),
            ),
            Self::InvalidTransition { .. } => {
                Some("Only runs awaiting review can be resumed.".to_string())
            }
            Self::Io(_) | Self::Cancelled { .. } | Self::PromptTemplate { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(err) => err.suggestions(),
            Self::Llm(err) => err.suggestions(),
            Self::Capability(err) => err.suggestions(),
            Self::PlanFormat(err) => err.suggestions(),
            Self::Input(err) => err.suggestions(),
            Self::Io(_) => vec!["Check file permissions and free disk space".to_string()],
            Self::Checkpoint { .. } => vec![
                "Pass the checkpoint file written by 'deftriage run --review'".to_string(),
            ],
            Self::Cancelled { .. } | Self::PromptTemplate { .. } => Vec::new(),
            Self::InvalidTransition { .. } => {
                vec!["Start a new run with 'deftriage run'".to_string()]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(err) => err.category(),
            Self::Llm(err) => err.category(),
            Self::Capability(err) => err.category(),
            Self::PlanFormat(err) => err.category(),
            Self::Input(err) => err.category(),
            Self::Io(_) | Self::Checkpoint { .. } => ErrorCategory::FileSystem,
            Self::Cancelled { .. } => ErrorCategory::Cancellation,
            Self::InvalidTransition { .. } => ErrorCategory::Input,
            Self::PromptTemplate { .. } => ErrorCategory::Configuration,
        }
    }
}

impl TriageError {
    /// Get a user-friendly error message with context and actionable suggestions.
    ///
    /// ```text
    /// Error: <user message>
    ///
    /// Context: <context if available>
    ///
    /// Suggestions:
    ///   • <suggestion 1>
    /// ```
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        output
    }

    /// Map this error to the CLI exit code table.
    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        use crate::exit_codes::ExitCode;

        match self {
            TriageError::Config(_) | TriageError::Input(_) => ExitCode::CLI_ARGS,
            TriageError::InvalidTransition { .. } | TriageError::Checkpoint { .. } => {
                ExitCode::CLI_ARGS
            }
            TriageError::PlanFormat(_) => ExitCode::PLAN_FORMAT,
            TriageError::Cancelled { .. } => ExitCode::CANCELLED,
            TriageError::Llm(llm_err) => match llm_err {
                LlmError::Timeout { .. } => ExitCode::TIMEOUT,
                LlmError::Misconfiguration(_) | LlmError::Unsupported(_) => ExitCode::CLI_ARGS,
                _ => ExitCode::LLM_FAILURE,
            },
            _ => ExitCode::INTERNAL,
        }
    }
}
