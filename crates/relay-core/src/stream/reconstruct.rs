//! Stream reconstruction machine
//!
//! Folds typed stream events into a running view of the assistant message:
//! progress stage, tool calls, sources and accumulated text. After every
//! content-affecting event a complete [`Snapshot`] can be taken.
//!
//! Invariants:
//! - accumulated text only grows
//! - tool call results are write-once
//! - `complete` / `error` are terminal, later stage changes are ignored
//! - `requires_action` is only reported once the turn reached `complete`

use std::ops::Range;

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::{
    Citation, DoneEvent, ImageComplete, IntentEvent, SearchComplete, StepStatus, StreamEvent,
    ThinkingStep,
};
use super::snapshot::{
    ContentPart, Progress, ProgressStage, Snapshot, SourceRecord, ToolCallRecord, TurnSummary,
};
use super::tool_names::{is_retrieval_tool, public_tool_name, tool_for_source, PublicTool};
use crate::error::{TurnError, TurnResult};

/// What a declared intent means for progress and retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntentMapping {
    stage: ProgressStage,
    /// Tool synthesized for retrieval intents
    retrieval: Option<PublicTool>,
}

fn map_intent(intent: &str) -> Option<IntentMapping> {
    let (stage, retrieval) = match intent {
        "web_search" | "search" | "research" => {
            (ProgressStage::Searching, Some(PublicTool::WebSearch))
        }
        "document_search" => (ProgressStage::Searching, Some(PublicTool::DocumentSearch)),
        "notebook_search" => (ProgressStage::Searching, Some(PublicTool::NotebookSearch)),
        "image" | "image_generation" => (ProgressStage::GeneratingImage, None),
        "direct" | "chat" => (ProgressStage::Generating, None),
        "summary" | "summarize" => (ProgressStage::Summarizing, None),
        _ => return None,
    };
    Some(IntentMapping { stage, retrieval })
}

/// The thinking step currently open.
#[derive(Debug, Clone)]
struct ActiveStep {
    step_id: String,
    call: ToolCallRecord,
}

#[derive(Debug, Default)]
pub struct StreamReconstructor {
    stage: ProgressStage,
    progress_message: Option<String>,
    text: String,
    tool_calls: Vec<ToolCallRecord>,
    /// Indices into `tool_calls` synthesized by the most recent intent
    fanout: Range<usize>,
    active: Option<ActiveStep>,
    /// Sources carried over from the message being resumed
    prior_sources: Vec<SourceRecord>,
    search_results: Vec<Citation>,
    citations: Option<Vec<Citation>>,
    generated_image: Option<Value>,
    metadata: Option<Value>,
    interrupted: bool,
    thread_id: Option<String>,
    indexed_documents: Vec<String>,
}

impl StreamReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue an existing message, e.g. when resuming after a human answer.
    ///
    /// Tool calls, sources and text of `snapshot` are kept so the resumed
    /// stream appends to them.
    pub fn continue_from(snapshot: &Snapshot) -> Self {
        let mut machine = Self {
            thread_id: snapshot.thread_id.clone(),
            indexed_documents: snapshot.indexed_document_ids.clone(),
            ..Self::default()
        };
        for part in &snapshot.content {
            match part {
                ContentPart::ToolCall(call) => machine.tool_calls.push(call.clone()),
                ContentPart::Source(source) => machine.prior_sources.push(source.clone()),
                ContentPart::Image { image } => machine.generated_image = Some(image.clone()),
                ContentPart::Text { text } => machine.text.push_str(text),
            }
        }
        let len = machine.tool_calls.len();
        machine.fanout = len..len;
        machine
    }

    pub fn stage(&self) -> ProgressStage {
        self.stage
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn indexed_documents(&self) -> &[String] {
        &self.indexed_documents
    }

    /// Apply one event. Returns whether a new snapshot should be emitted.
    ///
    /// An `error` event ends processing with [`TurnError::Protocol`]; text
    /// streamed before it stays in place.
    pub fn apply(&mut self, event: StreamEvent) -> TurnResult<bool> {
        debug!(event = event.name(), stage = ?self.stage, "Applying stream event");

        let changed = match event {
            StreamEvent::ThreadCreated { thread_id } => {
                let changed = self.thread_id.as_deref() != Some(thread_id.as_str());
                self.thread_id = Some(thread_id);
                changed
            }
            StreamEvent::Intent(intent) => {
                self.apply_intent(intent);
                true
            }
            StreamEvent::SearchStart(p)
            | StreamEvent::ImageStart(p)
            | StreamEvent::SummaryStart(p)
            | StreamEvent::ResponseStart(p) => self.set_message(p.message),
            StreamEvent::SearchComplete(complete) => {
                self.apply_search_complete(complete);
                true
            }
            StreamEvent::ImageComplete(complete) => {
                self.apply_image_complete(complete);
                true
            }
            StreamEvent::SummaryComplete(p) => {
                self.set_message(p.message);
                self.set_stage(ProgressStage::Generating);
                true
            }
            StreamEvent::ThinkingStep(step) => self.apply_thinking_step(step),
            StreamEvent::TextDelta { text } => {
                if text.is_empty() {
                    false
                } else {
                    self.text.push_str(&text);
                    true
                }
            }
            StreamEvent::Interrupt => {
                // Reported only after the stream drains.
                self.interrupted = true;
                false
            }
            StreamEvent::DocumentIndexed { document_id } => {
                if !self.indexed_documents.contains(&document_id) {
                    self.indexed_documents.push(document_id);
                }
                false
            }
            StreamEvent::Done(done) => {
                self.apply_done(done);
                true
            }
            StreamEvent::Error { error } => {
                self.set_stage(ProgressStage::Error);
                self.progress_message = Some(error.clone());
                return Err(TurnError::Protocol(error));
            }
        };

        Ok(changed)
    }

    /// Mark the turn complete after the stream drained without a `done`
    /// record. Returns whether the stage changed.
    pub fn finish(&mut self) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.set_stage(ProgressStage::Complete);
        true
    }

    fn set_stage(&mut self, stage: ProgressStage) {
        if self.stage.is_terminal() {
            debug!(current = ?self.stage, ignored = ?stage, "Ignoring stage change after terminal stage");
            return;
        }
        self.stage = stage;
    }

    fn set_message(&mut self, message: String) -> bool {
        if message.is_empty() || self.progress_message.as_deref() == Some(message.as_str()) {
            return false;
        }
        self.progress_message = Some(message);
        true
    }

    fn apply_intent(&mut self, intent: IntentEvent) {
        self.set_message(intent.message.clone());

        let Some(mapping) = map_intent(&intent.intent) else {
            debug!(intent = %intent.intent, "Unmapped intent, no tool call synthesized");
            return;
        };
        self.set_stage(mapping.stage);

        let Some(default_tool) = mapping.retrieval else {
            return;
        };

        let queries: Vec<String> = if intent.sub_queries.is_empty() {
            vec![intent.search_query.clone().unwrap_or_default()]
        } else {
            intent.sub_queries.clone()
        };
        let sources: Vec<Option<String>> = if intent.search_sources.is_empty() {
            vec![None]
        } else {
            intent.search_sources.iter().cloned().map(Some).collect()
        };

        let start = self.tool_calls.len();
        for query in &queries {
            for source in &sources {
                let tool = source
                    .as_deref()
                    .and_then(tool_for_source)
                    .unwrap_or(default_tool);
                let mut args = json!({ "query": query });
                if let Some(source) = source {
                    args["source"] = Value::String(source.clone());
                }
                self.tool_calls.push(ToolCallRecord::new(
                    format!("call_{}", Uuid::new_v4().simple()),
                    tool.as_str(),
                    args,
                ));
            }
        }
        self.fanout = start..self.tool_calls.len();

        debug!(
            queries = queries.len(),
            sources = sources.len(),
            calls = self.fanout.len(),
            "Synthesized retrieval tool calls"
        );
    }

    fn apply_search_complete(&mut self, complete: SearchComplete) {
        let payload = match serde_json::to_value(&complete) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to capture search result payload: {}", e);
                Value::Null
            }
        };

        let mut attached = 0usize;
        for call in &mut self.tool_calls[self.fanout.clone()] {
            if call.set_result(payload.clone()) {
                attached += 1;
            }
        }
        debug!(attached, result_count = complete.result_count, "Search complete");

        if let Some(results) = &complete.results {
            self.search_results.extend(Citation::parse_list(results));
        }
        self.set_message(complete.message);
        self.set_stage(ProgressStage::Generating);
    }

    fn apply_image_complete(&mut self, complete: ImageComplete) {
        if let Some(error) = complete.error_message() {
            warn!(error = %error, "Image generation failed");
            self.set_stage(ProgressStage::Error);
            self.progress_message = Some(error);
            return;
        }

        if let Some(image) = complete.image {
            self.generated_image = Some(image);
        }
        self.set_message(complete.message);
        self.set_stage(ProgressStage::Generating);
    }

    fn apply_thinking_step(&mut self, step: ThinkingStep) -> bool {
        match step.status {
            StepStatus::InProgress => {
                if let Some(previous) = self.active.take() {
                    debug!(step_id = %previous.step_id, "Step superseded before completion");
                    self.tool_calls.push(previous.call);
                }
                let call = ToolCallRecord::new(
                    step.step_id.clone(),
                    public_tool_name(&step.tool_name),
                    step.args.unwrap_or_else(|| json!({})),
                );
                self.active = Some(ActiveStep {
                    step_id: step.step_id,
                    call,
                });
                if !step.title.is_empty() {
                    self.progress_message = Some(step.title);
                }
                true
            }
            StepStatus::Completed => {
                let matches = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.step_id == step.step_id);
                if !matches {
                    debug!(step_id = %step.step_id, "Completion for inactive step ignored");
                    return false;
                }
                let Some(mut active) = self.active.take() else {
                    return false;
                };
                active.call.set_result(step.result.unwrap_or(Value::Null));
                self.tool_calls.push(active.call);
                true
            }
            StepStatus::Other => false,
        }
    }

    fn apply_done(&mut self, done: DoneEvent) {
        if let Some(thread_id) = done.thread_id {
            self.thread_id = Some(thread_id);
        }
        if let Some(citations) = done.citations {
            self.citations = Some(Citation::parse_list(&citations));
        }
        if done.generated_image.is_some() {
            self.generated_image = done.generated_image;
        }
        if done.metadata.is_some() {
            self.metadata = done.metadata;
        }
        if done.interrupted {
            self.interrupted = true;
        }
        self.set_stage(ProgressStage::Complete);
    }

    /// Whether the turn completed while paused for a human answer.
    pub fn requires_action(&self) -> bool {
        self.stage == ProgressStage::Complete && self.interrupted
    }

    fn effective_citations(&self) -> &[Citation] {
        match &self.citations {
            Some(citations) if !citations.is_empty() => citations,
            _ => &self.search_results,
        }
    }

    /// Group citations under the tool call that produced them.
    fn derive_sources(&self) -> Vec<SourceRecord> {
        let mut sources = self.prior_sources.clone();

        for (index, citation) in self.effective_citations().iter().enumerate() {
            let id = citation
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .or_else(|| (!citation.url.is_empty()).then(|| citation.url.clone()))
                .unwrap_or_else(|| format!("source-{}", index + 1));

            if sources.iter().any(|s| s.id == id) {
                continue;
            }

            sources.push(SourceRecord {
                id,
                url: citation.url.clone(),
                title: citation.title.clone(),
                parent_call_id: self.parent_for(citation),
            });
        }

        sources
    }

    fn parent_for(&self, citation: &Citation) -> Option<String> {
        if let Some(call_id) = &citation.tool_call_id {
            if self.tool_calls.iter().any(|c| &c.call_id == call_id) {
                return Some(call_id.clone());
            }
        }

        if let Some(source) = &citation.source {
            let by_source = self.tool_calls[self.fanout.clone()]
                .iter()
                .find(|c| c.args.get("source").and_then(Value::as_str) == Some(source.as_str()));
            if let Some(call) = by_source {
                return Some(call.call_id.clone());
            }
        }

        self.tool_calls
            .iter()
            .find(|c| is_retrieval_tool(&c.tool_name))
            .or_else(|| self.tool_calls.first())
            .map(|c| c.call_id.clone())
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut content: Vec<ContentPart> = self
            .tool_calls
            .iter()
            .cloned()
            .map(ContentPart::ToolCall)
            .collect();

        if let Some(active) = &self.active {
            content.push(ContentPart::ToolCall(active.call.clone()));
        }

        content.extend(self.derive_sources().into_iter().map(ContentPart::Source));

        if let Some(image) = &self.generated_image {
            content.push(ContentPart::Image {
                image: image.clone(),
            });
        }

        if !self.text.is_empty() {
            content.push(ContentPart::Text {
                text: self.text.clone(),
            });
        }

        Snapshot {
            content,
            progress: Progress {
                stage: self.stage,
                message: self.progress_message.clone(),
            },
            requires_action: self.requires_action(),
            thread_id: self.thread_id.clone(),
            indexed_document_ids: self.indexed_documents.clone(),
        }
    }

    pub fn summary(&self) -> TurnSummary {
        TurnSummary {
            thread_id: self.thread_id.clone(),
            text: self.text.clone(),
            citations: self.effective_citations().to_vec(),
            generated_image: self.generated_image.clone(),
            metadata: self.metadata.clone(),
            indexed_document_ids: self.indexed_documents.clone(),
        }
    }
}
