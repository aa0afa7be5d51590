//! Cancellable, time-bounded access to the reasoning backend
//!
//! Every stage of a run talks to the backend through a [`Reasoner`]. It
//! checks the run's cancellation token before each call and races the call
//! against it, so a cancelled run never commits a half-finished stage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use deftriage_llm::{LlmBackend, LlmError, LlmInvocation, LlmResult, Message, ToolSpec};
use deftriage_utils::error::TriageError;

/// Reasoning handle bound to one run.
#[derive(Clone)]
pub struct Reasoner {
    backend: Arc<dyn LlmBackend>,
    run_id: String,
    model: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Reasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reasoner")
            .field("run_id", &self.run_id)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Reasoner {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, run_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            backend,
            run_id: run_id.into(),
            model: String::new(),
            timeout: Duration::from_secs(300),
            cancel,
        }
    }

    /// Model passed with every invocation; empty selects the backend default.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Invoke the backend for `stage`, offering `tools`.
    ///
    /// # Errors
    ///
    /// `TriageError::Cancelled` when the run is cancelled before or during
    /// the call, `TriageError::Llm` for backend failures and timeouts.
    pub async fn invoke(
        &self,
        stage: &str,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
    ) -> Result<LlmResult, TriageError> {
        let inv = self.invocation(stage, messages).with_tools(tools);
        self.guarded(stage, self.backend.invoke(inv)).await
    }

    /// Invoke the backend for `stage`, forwarding narrative chunks as they arrive.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke).
    pub async fn invoke_streaming(
        &self,
        stage: &str,
        messages: Vec<Message>,
        chunks: &UnboundedSender<String>,
    ) -> Result<LlmResult, TriageError> {
        let inv = self.invocation(stage, messages);
        self.guarded(stage, self.backend.invoke_streaming(inv, chunks))
            .await
    }

    fn invocation(&self, stage: &str, messages: Vec<Message>) -> LlmInvocation {
        LlmInvocation::new(
            self.run_id.clone(),
            stage,
            self.model.clone(),
            self.timeout,
            messages,
        )
    }

    async fn guarded<F>(&self, stage: &str, call: F) -> Result<LlmResult, TriageError>
    where
        F: Future<Output = Result<LlmResult, LlmError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(cancelled(stage));
        }
        debug!(run_id = %self.run_id, stage, "Invoking reasoning backend");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled(stage)),
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(result) => result.map_err(TriageError::from),
                Err(_) => Err(LlmError::Timeout { duration: self.timeout }.into()),
            },
        }
    }
}

fn cancelled(stage: &str) -> TriageError {
    TriageError::Cancelled {
        stage: stage.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deftriage_llm::test_support::{ScriptedBackend, ScriptedReply};

    fn reasoner(replies: Vec<ScriptedReply>) -> (Arc<ScriptedBackend>, Reasoner) {
        let backend = Arc::new(ScriptedBackend::new(replies));
        let reasoner = Reasoner::new(backend.clone(), "run-1", CancellationToken::new());
        (backend, reasoner)
    }

    #[tokio::test]
    async fn test_invoke_passes_stage_and_tools() {
        let (backend, reasoner) = reasoner(vec![ScriptedReply::text("ok")]);
        let spec = ToolSpec {
            name: "codebase_search".to_string(),
            description: String::new(),
            parameters: serde_json::json!({}),
        };
        let result = reasoner
            .invoke("planner", vec![Message::user("hi")], vec![spec])
            .await
            .unwrap();

        assert_eq!(result.raw_response, "ok");
        let calls = backend.calls();
        assert_eq!(calls[0].stage, "planner");
        assert_eq!(calls[0].run_id, "run-1");
        assert_eq!(calls[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_backend() {
        let (backend, reasoner) = reasoner(vec![ScriptedReply::text("unused")]);
        reasoner.cancel_token().cancel();

        let err = reasoner.invoke("planner", vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, TriageError::Cancelled { .. }));
        assert_eq!(backend.remaining(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let (_backend, reasoner) = reasoner(vec![ScriptedReply::Hang]);
        let token = reasoner.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = reasoner.invoke("investigator", vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, TriageError::Cancelled { stage } if stage == "investigator"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_llm_timeout() {
        let (_backend, reasoner) = reasoner(vec![ScriptedReply::Hang]);
        let reasoner = reasoner.with_timeout(Duration::from_millis(20));

        let err = reasoner.invoke("reporter", vec![], vec![]).await.unwrap_err();
        assert!(matches!(err, TriageError::Llm(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks() {
        let (_backend, reasoner) = reasoner(vec![ScriptedReply::text("narrative")]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        reasoner
            .invoke_streaming("reporter", vec![], &tx)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("narrative"));
    }
}
