//! Scripted reasoning backend for tests
//!
//! Replays canned replies in order (or computes them from the invocation)
//! and records every invocation for later assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, ToolCall};

/// One canned reply
#[derive(Debug)]
pub enum ScriptedReply {
    /// Final text answer
    Text(String),
    /// Capability invocation requests with no text
    ToolCalls(Vec<ToolCall>),
    /// Fail the invocation
    Fail(LlmError),
    /// Never complete; used to exercise cancellation
    Hang,
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Single capability call with a generated id
    pub fn call(name: &str, arguments: serde_json::Value) -> Self {
        Self::ToolCalls(vec![ToolCall::new(format!("call_{name}"), name, arguments)])
    }
}

type Responder = Box<dyn Fn(&LlmInvocation) -> ScriptedReply + Send + Sync>;

/// Test double implementing [`LlmBackend`].
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Responder>,
    calls: Mutex<Vec<LlmInvocation>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    /// Replay `replies` in order; fails once exhausted.
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            responder: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Compute each reply from the invocation.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&LlmInvocation) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every invocation received so far
    pub fn calls(&self) -> Vec<LlmInvocation> {
        lock(&self.calls).clone()
    }

    /// Number of invocations for one stage
    pub fn calls_for_stage(&self, stage: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.stage == stage).count()
    }

    /// Replies not yet consumed
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let queued = lock(&self.replies).pop_front();
        let reply = match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(&inv),
            (None, None) => ScriptedReply::Fail(LlmError::Transport(
                "scripted backend has no replies left".to_string(),
            )),
        };
        lock(&self.calls).push(inv);

        match reply {
            ScriptedReply::Text(text) => Ok(LlmResult::new(text, "scripted", "scripted-model")),
            ScriptedReply::ToolCalls(calls) => {
                Ok(LlmResult::new("", "scripted", "scripted-model").with_tool_calls(calls))
            }
            ScriptedReply::Fail(err) => Err(err),
            ScriptedReply::Hang => std::future::pending().await,
        }
    }
}
