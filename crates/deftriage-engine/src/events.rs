//! Run event stream
//!
//! A run reports progress as an ordered sequence of [`RunEvent`]s. Consuming
//! the stream is optional: with no receiver attached, events are dropped.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::plan::{StepKind, StepStatus};
use crate::reporter::DefectType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PlanCreated {
        version: u32,
        steps: usize,
        has_enough_context: bool,
    },
    ReviewRequested {
        version: u32,
    },
    StepStarted {
        index: usize,
        title: String,
        kind: StepKind,
    },
    StepFinished {
        index: usize,
        status: StepStatus,
        incomplete: bool,
    },
    ToolCall {
        step: usize,
        name: String,
        arguments: Value,
    },
    ToolResult {
        step: usize,
        name: String,
        ok: bool,
        /// Leading part of the result or diagnostic
        excerpt: String,
    },
    ReportChunk {
        text: String,
    },
    Done {
        defect_type: Option<DefectType>,
        incomplete: bool,
    },
    Failed {
        error: String,
    },
}

impl RunEvent {
    /// Wire name of the event
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PlanCreated { .. } => "plan_created",
            Self::ReviewRequested { .. } => "review_requested",
            Self::StepStarted { .. } => "step_started",
            Self::StepFinished { .. } => "step_finished",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ReportChunk { .. } => "report_chunk",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Sending half of a run's event stream.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<RunEvent>>,
}

impl EventSink {
    /// A sink that drops every event.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A connected sink and its receiver.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// True when a receiver was attached at construction.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}

/// First `max` characters of `text`, marking the cut.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().nth(max).is_some() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(RunEvent::ReviewRequested { version: 1 });
        sink.emit(RunEvent::Failed {
            error: "boom".to_string(),
        });
        drop(sink);

        let mut names = Vec::new();
        while let Some(ev) = rx.recv().await {
            names.push(ev.name());
        }
        assert_eq!(names, vec!["review_requested", "failed"]);
    }

    #[test]
    fn test_none_sink_is_detached() {
        let sink = EventSink::none();
        assert!(!sink.is_attached());
        sink.emit(RunEvent::ReportChunk {
            text: "ignored".to_string(),
        });
    }

    #[test]
    fn test_serialized_tag_matches_name() {
        let ev = RunEvent::StepStarted {
            index: 0,
            title: "Read".to_string(),
            kind: StepKind::Investigation,
        };
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["event"], ev.name());
        assert_eq!(value["kind"], "investigation");
    }

    #[test]
    fn test_excerpt_marks_truncation() {
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("abc", 3), "abc");
    }
}
