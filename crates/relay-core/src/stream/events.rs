//! Typed stream event vocabulary
//!
//! Decoded records are mapped onto [`StreamEvent`] by name. Unknown names
//! and payloads that do not fit their event shape are skipped, so the
//! backend can add events without breaking older clients.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::decoder::RawEvent;

/// Payload carrying only a progress message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEvent {
    pub intent: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sub_queries: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub search_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchComplete {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub result_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageComplete {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ImageComplete {
    /// Error text when the payload marks the generation as failed.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingStep {
    pub step_id: String,
    pub tool_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Supporting material attached to an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Tool call that produced this citation, when the backend knows it
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call_id: Option<String>,
    /// Retrieval source (`web`, `documents`, `notebooks`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Citation {
    /// Parse a loosely shaped result list, skipping entries that don't fit.
    pub fn parse_list(value: &Value) -> Vec<Citation> {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| serde_json::from_value::<Citation>(item.clone()).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interrupted: bool,
}

/// One event of an agent turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ThreadCreated { thread_id: String },
    Intent(IntentEvent),
    SearchStart(ProgressMessage),
    SearchComplete(SearchComplete),
    SummaryStart(ProgressMessage),
    SummaryComplete(ProgressMessage),
    ImageStart(ProgressMessage),
    ImageComplete(ImageComplete),
    ResponseStart(ProgressMessage),
    ThinkingStep(ThinkingStep),
    TextDelta { text: String },
    Interrupt,
    DocumentIndexed { document_id: String },
    Done(DoneEvent),
    Error { error: String },
}

impl StreamEvent {
    /// Map a decoded record to a typed event. `None` for unknown names or
    /// payloads that don't match the event's shape.
    pub fn from_raw(raw: &RawEvent) -> Option<StreamEvent> {
        let data = &raw.data;
        let event = match raw.name.as_str() {
            "thread_created" => StreamEvent::ThreadCreated {
                thread_id: str_field(data, "threadId")?,
            },
            "intent" => StreamEvent::Intent(decode(raw)?),
            "search_start" => StreamEvent::SearchStart(decode(raw)?),
            "search_complete" => StreamEvent::SearchComplete(decode(raw)?),
            "summary_start" => StreamEvent::SummaryStart(decode(raw)?),
            "summary_complete" => StreamEvent::SummaryComplete(decode(raw)?),
            "image_start" => StreamEvent::ImageStart(decode(raw)?),
            "image_complete" => StreamEvent::ImageComplete(decode(raw)?),
            "response_start" => StreamEvent::ResponseStart(decode(raw)?),
            "thinking_step" => StreamEvent::ThinkingStep(decode(raw)?),
            "text_delta" => StreamEvent::TextDelta {
                text: str_field(data, "text")?,
            },
            "interrupt" => StreamEvent::Interrupt,
            "document_indexed" => StreamEvent::DocumentIndexed {
                document_id: str_field(data, "documentId")?,
            },
            "done" => StreamEvent::Done(decode(raw)?),
            // An error record always ends the turn, whatever its shape.
            "error" => StreamEvent::Error {
                error: error_message(data),
            },
            other => {
                debug!(event = other, "Skipping unknown stream event");
                return None;
            }
        };
        Some(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ThreadCreated { .. } => "thread_created",
            StreamEvent::Intent(_) => "intent",
            StreamEvent::SearchStart(_) => "search_start",
            StreamEvent::SearchComplete(_) => "search_complete",
            StreamEvent::SummaryStart(_) => "summary_start",
            StreamEvent::SummaryComplete(_) => "summary_complete",
            StreamEvent::ImageStart(_) => "image_start",
            StreamEvent::ImageComplete(_) => "image_complete",
            StreamEvent::ResponseStart(_) => "response_start",
            StreamEvent::ThinkingStep(_) => "thinking_step",
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::Interrupt => "interrupt",
            StreamEvent::DocumentIndexed { .. } => "document_indexed",
            StreamEvent::Done(_) => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &RawEvent) -> Option<T> {
    match serde_json::from_value(raw.data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(event = %raw.name, "Skipping event with unexpected payload: {}", e);
            None
        }
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ids arrive as strings or numbers depending on the backend tool.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

fn error_message(data: &Value) -> String {
    match data.get("error").or_else(|| data.get("message")) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        _ => "Unknown stream error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(name: &str, data: Value) -> RawEvent {
        RawEvent {
            name: name.to_string(),
            data,
        }
    }

    #[test]
    fn test_intent_with_fanout_fields() {
        let event = StreamEvent::from_raw(&raw(
            "intent",
            json!({
                "intent": "web_search",
                "message": "Suche",
                "subQueries": ["a", "b"],
                "searchSources": ["web", "documents"]
            }),
        ));

        let Some(StreamEvent::Intent(intent)) = event else {
            panic!("expected intent event");
        };
        assert_eq!(intent.sub_queries, vec!["a", "b"]);
        assert_eq!(intent.search_sources, vec!["web", "documents"]);
        assert!(intent.search_query.is_none());
    }

    #[test]
    fn test_thinking_step_status() {
        let event = StreamEvent::from_raw(&raw(
            "thinking_step",
            json!({"stepId": "s1", "toolName": "ask_human", "title": "Rückfrage", "status": "in_progress"}),
        ));
        assert!(matches!(
            event,
            Some(StreamEvent::ThinkingStep(ThinkingStep { status: StepStatus::InProgress, .. }))
        ));

        let other = StreamEvent::from_raw(&raw(
            "thinking_step",
            json!({"stepId": "s1", "toolName": "x", "status": "queued"}),
        ));
        assert!(matches!(
            other,
            Some(StreamEvent::ThinkingStep(ThinkingStep { status: StepStatus::Other, .. }))
        ));
    }

    #[test]
    fn test_unknown_and_misshaped_events_are_skipped() {
        assert!(StreamEvent::from_raw(&raw("heartbeat", json!({}))).is_none());
        assert!(StreamEvent::from_raw(&raw("text_delta", json!({"delta": "x"}))).is_none());
        assert!(StreamEvent::from_raw(&raw("intent", json!({"message": "kein intent"}))).is_none());
    }

    #[test]
    fn test_error_event_message_shapes() {
        let plain = StreamEvent::from_raw(&raw("error", json!({"error": "Agent abgestürzt"})));
        assert_eq!(
            plain,
            Some(StreamEvent::Error {
                error: "Agent abgestürzt".to_string()
            })
        );

        let nested = StreamEvent::from_raw(&raw("error", json!({"error": {"message": "Limit"}})));
        assert_eq!(
            nested,
            Some(StreamEvent::Error {
                error: "Limit".to_string()
            })
        );

        let empty = StreamEvent::from_raw(&raw("error", json!({})));
        assert!(matches!(empty, Some(StreamEvent::Error { .. })));
    }

    #[test]
    fn test_image_error_detection() {
        let ok = ImageComplete {
            image: Some(json!({"url": "https://cdn/x.png"})),
            ..Default::default()
        };
        assert!(ok.error_message().is_none());

        let failed = ImageComplete {
            error: Some(json!("Inhalt abgelehnt")),
            ..Default::default()
        };
        assert_eq!(failed.error_message().as_deref(), Some("Inhalt abgelehnt"));
    }

    #[test]
    fn test_citation_list_is_lenient() {
        let citations = Citation::parse_list(&json!([
            {"url": "https://a", "title": "A", "toolCallId": "call_1"},
            "kaputt",
            {"url": "https://b", "title": "B", "source": "web"}
        ]));
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(citations[1].source.as_deref(), Some("web"));
    }

    #[test]
    fn test_null_optional_fields_keep_the_event() {
        let intent = StreamEvent::from_raw(&raw(
            "intent",
            json!({
                "intent": "web_search",
                "message": "Suche",
                "searchQuery": "Klima",
                "subQueries": null,
                "searchSources": null
            }),
        ));
        let Some(StreamEvent::Intent(intent)) = intent else {
            panic!("expected intent event");
        };
        assert!(intent.sub_queries.is_empty());
        assert!(intent.search_sources.is_empty());
        assert_eq!(intent.search_query.as_deref(), Some("Klima"));

        let done = StreamEvent::from_raw(&raw(
            "done",
            json!({
                "threadId": "t-1",
                "citations": [{"url": "https://a", "title": "A"}],
                "interrupted": null
            }),
        ));
        let Some(StreamEvent::Done(done)) = done else {
            panic!("expected done event");
        };
        assert_eq!(done.thread_id.as_deref(), Some("t-1"));
        assert!(done.citations.is_some());
        assert!(!done.interrupted);

        let complete = StreamEvent::from_raw(&raw(
            "search_complete",
            json!({"message": null, "resultCount": 3}),
        ));
        assert_eq!(
            complete,
            Some(StreamEvent::SearchComplete(SearchComplete {
                message: String::new(),
                result_count: 3,
                results: None,
            }))
        );

        let progress = StreamEvent::from_raw(&raw("search_start", json!({"message": null})));
        assert_eq!(progress, Some(StreamEvent::SearchStart(ProgressMessage::default())));

        let null_count = StreamEvent::from_raw(&raw("search_complete", json!({"resultCount": null})));
        assert!(matches!(
            null_count,
            Some(StreamEvent::SearchComplete(SearchComplete { result_count: 0, .. }))
        ));
    }

    #[test]
    fn test_citation_numeric_ids() {
        let citations = Citation::parse_list(&json!([
            {"id": 1, "url": "https://a", "title": "A", "toolCallId": 7},
            {"id": "c2", "url": "https://b", "title": null},
            {"id": null, "url": "https://c", "title": "C"}
        ]));
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[0].id.as_deref(), Some("1"));
        assert_eq!(citations[0].tool_call_id.as_deref(), Some("7"));
        assert_eq!(citations[1].id.as_deref(), Some("c2"));
        assert_eq!(citations[1].title, "");
        assert!(citations[2].id.is_none());
    }
}
