//! Budgeted backend wrapper for reasoning call limiting
//!
//! A batch of defects can fan out into hundreds of reasoning calls; this
//! wrapper caps the total per process.

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Default reasoning call limit per process
pub(crate) const DEFAULT_BUDGET_LIMIT: u32 = 500;

/// Environment variable for overriding the budget limit
pub(crate) const BUDGET_ENV_VAR: &str = "DEFTRIAGE_LLM_BUDGET";

/// A wrapper around an `LlmBackend` that enforces a limit on invocations.
///
/// Attempts are counted, not successes: a failed call still consumes a slot,
/// so retry loops cannot bypass the limit.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    used: AtomicU32,
    limit: u32,
}

impl BudgetedBackend {
    /// Create a new budgeted backend with the specified limit
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit = limit, "Creating BudgetedBackend");
        Self {
            inner,
            used: AtomicU32::new(0),
            limit,
        }
    }

    /// Create a budgeted backend with the limit resolved from env > config > default.
    pub fn with_limit_from_config(inner: Box<dyn LlmBackend>, config_budget: Option<u32>) -> Self {
        let env_limit = std::env::var(BUDGET_ENV_VAR)
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        let limit = match (env_limit, config_budget) {
            (Some(limit), _) => {
                debug!(limit = limit, "Using budget limit from {}", BUDGET_ENV_VAR);
                limit
            }
            (None, Some(limit)) => {
                debug!(limit = limit, "Using budget limit from config file");
                limit
            }
            (None, None) => DEFAULT_BUDGET_LIMIT,
        };

        Self::new(inner, limit)
    }

    /// Number of invocations attempted so far
    pub fn call_count(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    /// The configured limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn claim_slot(&self) -> Result<u32, LlmError> {
        let current = self.used.fetch_add(1, Ordering::SeqCst);
        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted = attempted, "Budget limit exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }
        debug!(call_count = current + 1, limit = self.limit, "Budget check passed");
        Ok(current + 1)
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        self.claim_slot()?;
        self.inner.invoke(inv).await
    }

    async fn invoke_streaming(
        &self,
        inv: LlmInvocation,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, LlmError> {
        self.claim_slot()?;
        self.inner.invoke_streaming(inv, chunks).await
    }
}
