//! Reasoning backend abstraction
//!
//! Every provider implements [`LlmBackend`], so the engine works with any
//! backend (HTTP provider or test double) without knowing its details.

mod budgeted_backend;
pub(crate) mod http_client;
mod openai_backend;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use deftriage_config as config;
pub use deftriage_utils::error::LlmError;

pub use budgeted_backend::BudgetedBackend;
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role, ToolCall, ToolSpec};

pub(crate) use openai_backend::OpenAiBackend;

use crate::config::Config;
use std::sync::Arc;

/// Create the reasoning backend named by `[llm] provider`.
///
/// HTTP providers are wrapped in a [`BudgetedBackend`].
///
/// # Errors
///
/// Returns `LlmError::Unsupported` for an unknown provider and
/// `LlmError::Misconfiguration` for invalid provider settings.
pub fn from_config(config: &Config) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let provider = config.llm.provider.as_deref().unwrap_or("openai");

    match provider {
        "openai" => {
            let backend = OpenAiBackend::new_from_config(config)?;
            let budget = config.llm.openai.as_ref().and_then(|o| o.budget);
            Ok(Arc::new(BudgetedBackend::with_limit_from_config(
                Box::new(backend),
                budget,
            )))
        }
        unknown => Err(LlmError::Unsupported(format!(
            "Unknown reasoning provider '{unknown}'. Supported providers: openai."
        ))),
    }
}

#[cfg(test)]
mod factory_tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_unsupported() {
        let mut config = Config::builder().build().unwrap();
        config.llm.provider = Some("carrier-pigeon".to_string());

        match from_config(&config) {
            Err(LlmError::Unsupported(msg)) => assert!(msg.contains("carrier-pigeon")),
            Err(other) => panic!("expected Unsupported, got {other:?}"),
            Ok(_) => panic!("expected Unsupported, got a backend"),
        }
    }
}
