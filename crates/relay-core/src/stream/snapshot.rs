//! Snapshot types produced by the reconstruction machine

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::Citation;
use super::tool_names::ASK_USER_TOOL;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    #[default]
    Classifying,
    Searching,
    Summarizing,
    Generating,
    GeneratingImage,
    Complete,
    Error,
}

impl ProgressStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStage::Complete | ProgressStage::Error)
    }
}

/// A tool invocation and its eventual result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolCallRecord {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args,
            result: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Attach a result. Results are write-once; returns false if one was
    /// already present.
    pub fn set_result(&mut self, result: Value) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result);
        true
    }

    pub fn is_human_question(&self) -> bool {
        self.tool_name == ASK_USER_TOOL
    }

    /// Answer supplied to a human-question call, if any.
    pub fn human_answer(&self) -> Option<&str> {
        let answer = match self.result.as_ref()? {
            Value::String(s) => s.as_str(),
            Value::Object(obj) => obj.get("answer")?.as_str()?,
            _ => return None,
        };
        let answer = answer.trim();
        (!answer.is_empty()).then_some(answer)
    }
}

/// A citable source grouped under the tool call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ToolCall(ToolCallRecord),
    Source(SourceRecord),
    Image { image: Value },
    Text { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: ProgressStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One complete reconstruction of a turn at a point in the stream.
///
/// Content order: tool calls (finalized, then the open one), sources,
/// generated image, text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub content: Vec<ContentPart>,
    pub progress: Progress,
    /// Set once the turn has completed while paused for a human answer
    #[serde(default)]
    pub requires_action: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexed_document_ids: Vec<String>,
}

impl Snapshot {
    pub fn text(&self) -> &str {
        self.content
            .iter()
            .find_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceRecord> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::Source(source) => Some(source),
            _ => None,
        })
    }

    /// The most recent human-question call in this message.
    pub fn human_question(&self) -> Option<&ToolCallRecord> {
        self.tool_calls().filter(|c| c.is_human_question()).last()
    }

    /// Fill in the answer for an outstanding human question. Returns false
    /// when there is no unanswered question.
    pub fn answer_human_question(&mut self, answer: &str) -> bool {
        let question = self.content.iter_mut().rev().find_map(|part| match part {
            ContentPart::ToolCall(call) if call.is_human_question() => Some(call),
            _ => None,
        });
        match question {
            Some(call) => call.set_result(Value::String(answer.to_string())),
            None => false,
        }
    }
}

/// Final aggregate handed to the completion callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub indexed_document_ids: Vec<String>,
}
