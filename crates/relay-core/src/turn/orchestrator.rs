//! Turn orchestrator
//!
//! Drives one assistant turn end to end: decide fresh/resume/blocked,
//! compose and send the request, then decode and fold the response stream
//! into snapshots handed to the caller through a bounded channel.
//!
//! Pipeline: transport bytes -> reader task (decoder) -> bounded channel of
//! records -> driver task (reconstruction) -> bounded channel of snapshots.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::documents::DocumentReferenceStore;
use super::request::{build_chat_request, latest_user_text, ChatMessage, RequestOptions, ResumeRequest};
use super::transport::{ByteStream, Transport};
use crate::config::Endpoints;
use crate::error::{TurnError, TurnResult};
use crate::interrupt::{InterruptController, TurnDecision};
use crate::mentions::{MentionParser, MentionRegistry, ParsedMentions};
use crate::stream::{EventDecoder, RawEvent, Snapshot, StreamEvent, StreamReconstructor, TurnSummary};

/// Snapshots of one turn, newest last. Ends after the final snapshot, an
/// error, or cancellation.
pub type TurnStream = ReceiverStream<TurnResult<Snapshot>>;

/// Invoked once with the final aggregate when a turn completes normally.
pub type CompletionCallback = Box<dyn FnOnce(TurnSummary) + Send + 'static>;

/// Which backend endpoint serves fresh turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndpointMode {
    #[default]
    Chat,
    Agent,
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub endpoints: Endpoints,
    pub default_agent_id: String,
    pub model_id: Option<String>,
    pub enabled_tools: Vec<String>,
    /// Capacity of the record and snapshot channels
    pub event_buffer: usize,
}

/// Everything the caller knows about the turn to run.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub messages: Vec<ChatMessage>,
    pub thread_id: Option<String>,
    pub mode: EndpointMode,
    /// The in-progress assistant message, if the UI has one
    pub draft: Option<Snapshot>,
    pub document_chat_ids: Vec<String>,
    pub document_chat_mode: Option<serde_json::Value>,
    pub default_notebook_id: Option<String>,
}

pub struct TurnOrchestrator {
    transport: Arc<dyn Transport>,
    registry: Arc<RwLock<MentionRegistry>>,
    interrupts: Arc<Mutex<InterruptController>>,
    documents: Option<Arc<dyn DocumentReferenceStore>>,
    settings: TurnSettings,
}

impl TurnOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<RwLock<MentionRegistry>>,
        interrupts: Arc<Mutex<InterruptController>>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            interrupts,
            documents: None,
            settings,
        }
    }

    pub fn with_document_store(mut self, store: Arc<dyn DocumentReferenceStore>) -> Self {
        self.documents = Some(store);
        self
    }

    pub fn interrupts(&self) -> &Arc<Mutex<InterruptController>> {
        &self.interrupts
    }

    /// Parse routing directives from the newest user message.
    pub fn parse_mentions(&self, messages: &[ChatMessage]) -> ParsedMentions {
        let text = latest_user_text(messages).unwrap_or_default();
        let registry = self.registry.read();
        MentionParser::new(&registry, &self.settings.default_agent_id).parse(&text)
    }

    /// Start a turn.
    ///
    /// Returns [`TurnError::Cancelled`] without touching the network when a
    /// human question is still unanswered, or when `cancel` fires before the
    /// response arrives.
    pub async fn start(
        &self,
        input: TurnInput,
        cancel: CancellationToken,
        on_complete: Option<CompletionCallback>,
    ) -> TurnResult<TurnStream> {
        let thread_id = input
            .thread_id
            .clone()
            .or_else(|| input.draft.as_ref().and_then(|d| d.thread_id.clone()));

        let decision = self
            .interrupts
            .lock()
            .decide(thread_id.as_deref(), input.draft.as_ref());

        let (endpoint, body, machine) = match decision {
            TurnDecision::Blocked => {
                info!(thread_id = ?thread_id, "Turn blocked while waiting for human input");
                return Err(TurnError::Cancelled);
            }
            TurnDecision::Resume { answer } => {
                let Some(thread_id) = thread_id.clone() else {
                    return Err(TurnError::Protocol(
                        "Cannot resume a turn without a thread id".to_string(),
                    ));
                };
                let body = serde_json::to_value(ResumeRequest {
                    thread_id,
                    resume: answer,
                })?;
                let machine = input
                    .draft
                    .as_ref()
                    .map(StreamReconstructor::continue_from)
                    .unwrap_or_default();
                (self.settings.endpoints.resume.clone(), body, machine)
            }
            TurnDecision::Fresh => {
                let body = self.compose(&input, thread_id.clone()).await?;
                let endpoint = match input.mode {
                    EndpointMode::Chat => self.settings.endpoints.chat.clone(),
                    EndpointMode::Agent => self.settings.endpoints.agent.clone(),
                };
                (endpoint, body, StreamReconstructor::new())
            }
        };

        info!(thread_id = ?thread_id, endpoint = %endpoint, "Starting turn");

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            opened = self.transport.open(&endpoint, body) => opened?,
        };

        let capacity = self.settings.event_buffer.max(1);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(capacity);

        spawn_reader(bytes, record_tx, cancel.clone());
        spawn_driver(
            record_rx,
            snapshot_tx,
            machine,
            TurnContext {
                thread_id,
                interrupts: self.interrupts.clone(),
                cancel,
                on_complete,
            },
        );

        Ok(ReceiverStream::new(snapshot_rx))
    }

    async fn compose(
        &self,
        input: &TurnInput,
        thread_id: Option<String>,
    ) -> TurnResult<serde_json::Value> {
        let mentions = self.parse_mentions(&input.messages);

        let persisted = match (&self.documents, thread_id.as_deref()) {
            (Some(store), Some(id)) => match store.load(id).await {
                Ok(references) => references,
                Err(e) => {
                    warn!(thread_id = %id, "Failed to load document references: {}", e);
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        debug!(
            agent = %mentions.agent_id,
            forced_tools = mentions.forced_tools.len(),
            notebooks = mentions.notebook_ids.len(),
            persisted = persisted.len(),
            "Composing turn request"
        );

        let request = build_chat_request(
            &input.messages,
            mentions,
            &persisted,
            RequestOptions {
                thread_id,
                enabled_tools: self.settings.enabled_tools.clone(),
                model_id: self.settings.model_id.clone(),
                document_chat_ids: input.document_chat_ids.clone(),
                document_chat_mode: input.document_chat_mode.clone(),
                default_notebook_id: input.default_notebook_id.clone(),
            },
        );
        Ok(serde_json::to_value(request)?)
    }
}

/// State the driver needs once the stream has drained.
struct TurnContext {
    thread_id: Option<String>,
    interrupts: Arc<Mutex<InterruptController>>,
    cancel: CancellationToken,
    on_complete: Option<CompletionCallback>,
}

/// Read response bytes and forward decoded records.
fn spawn_reader(
    mut bytes: ByteStream,
    tx: mpsc::Sender<TurnResult<RawEvent>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut decoder = EventDecoder::new();
        let mut chunk_count: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(chunks = chunk_count, "Turn stream read cancelled");
                    return;
                }
                chunk = bytes.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    chunk_count += 1;
                    for record in decoder.feed(&chunk) {
                        if tx.send(Ok(record)).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(chunks = chunk_count, "Turn stream read error: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => break,
            }
        }

        decoder.finish();
        debug!(chunks = chunk_count, dropped = decoder.dropped(), "Turn stream ended");
    });
}

/// Fold records into snapshots and settle the turn when the stream drains.
fn spawn_driver(
    mut rx: mpsc::Receiver<TurnResult<RawEvent>>,
    tx: mpsc::Sender<TurnResult<Snapshot>>,
    mut machine: StreamReconstructor,
    context: TurnContext,
) {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = context.cancel.cancelled() => {
                    let _ = tx.send(Err(TurnError::Cancelled)).await;
                    return;
                }
                next = rx.recv() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                None => break,
            };

            let Some(event) = StreamEvent::from_raw(&raw) else {
                continue;
            };
            match machine.apply(event) {
                Ok(true) => {
                    if tx.send(Ok(machine.snapshot())).await.is_err() {
                        debug!("Snapshot receiver dropped, stopping turn");
                        return;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(thread_id = ?machine.thread_id(), "Turn ended with protocol error: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }

        if machine.finish() {
            let _ = tx.send(Ok(machine.snapshot())).await;
        }

        let snapshot = machine.snapshot();
        let thread_id = machine
            .thread_id()
            .map(str::to_string)
            .or(context.thread_id);
        match &thread_id {
            Some(id) => context.interrupts.lock().record_outcome(id, &snapshot),
            None if snapshot.requires_action => {
                warn!("Turn paused for human input but no thread id is known");
            }
            None => {}
        }

        if snapshot.requires_action {
            info!(thread_id = ?thread_id, "Turn awaiting human input");
            return;
        }

        info!(thread_id = ?thread_id, chars = machine.text().len(), "Turn complete");
        if let Some(on_complete) = context.on_complete {
            on_complete(machine.summary());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::Value;

    use crate::mentions::DocumentReference;
    use crate::mentions::DocumentSourceKind;
    use crate::stream::{ProgressStage, ASK_USER_TOOL};
    use crate::turn::documents::InMemoryDocumentStore;

    /// Replays a scripted body and records every request.
    struct ScriptedTransport {
        body: Vec<String>,
        calls: AtomicUsize,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn new(body: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                body: body.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> (String, Value) {
            self.requests.lock().last().cloned().expect("a request was made")
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, endpoint: &str, body: Value) -> TurnResult<ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push((endpoint.to_string(), body));
            let chunks: Vec<TurnResult<Bytes>> = self
                .body
                .iter()
                .map(|chunk| Ok(Bytes::from(chunk.clone())))
                .collect();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn settings() -> TurnSettings {
        TurnSettings {
            endpoints: Endpoints::default(),
            default_agent_id: "default".to_string(),
            model_id: Some("mistral-large".to_string()),
            enabled_tools: vec!["web_search".to_string()],
            event_buffer: 4,
        }
    }

    fn orchestrator(transport: Arc<ScriptedTransport>) -> TurnOrchestrator {
        TurnOrchestrator::new(
            transport,
            Arc::new(RwLock::new(MentionRegistry::with_builtins())),
            Arc::new(Mutex::new(InterruptController::new())),
            settings(),
        )
    }

    fn user_turn(text: &str, thread_id: Option<&str>) -> TurnInput {
        TurnInput {
            messages: vec![ChatMessage::user("m1", text)],
            thread_id: thread_id.map(str::to_string),
            ..Default::default()
        }
    }

    async fn collect(stream: TurnStream) -> Vec<TurnResult<Snapshot>> {
        stream.collect().await
    }

    const SEARCH_TURN: &[&str] = &[
        "event: thread_created\ndata: {\"threadId\":\"t-1\"}\n\n",
        "event: intent\ndata: {\"intent\":\"web_search\",\"message\":\"Suche\",\"searchQuery\":\"Klima\"}\n\n",
        "event: search_start\ndata: {\"message\":\"Suche läuft\"}\n\nevent: search_complete\ndata: {\"message\":\"3 Treffer\",\"resultCount\":3}\n\n",
        "event: text_delta\ndata: {\"text\":\"Ein\"}\n\nevent: text_del",
        "ta\ndata: {\"text\":\"s \"}\n\nevent: text_delta\ndata: {\"text\":\"zwei\"}\n\n",
        "event: done\ndata: {\"citations\":[{\"url\":\"https://a\",\"title\":\"A\"},{\"url\":\"https://b\",\"title\":\"B\"},{\"url\":\"https://c\",\"title\":\"C\"}]}\n\n",
    ];

    const INTERRUPTED_TURN: &[&str] = &[
        "event: thread_created\ndata: {\"threadId\":\"t-1\"}\n\n",
        "event: thinking_step\ndata: {\"stepId\":\"q1\",\"toolName\":\"ask_human\",\"title\":\"Rückfrage\",\"status\":\"in_progress\",\"args\":{\"question\":\"Welche Region?\"}}\n\n",
        "event: interrupt\ndata: {}\n\n",
        "event: done\ndata: {\"interrupted\":true}\n\n",
    ];

    #[tokio::test]
    async fn test_search_turn_streams_snapshots_and_completes() {
        let transport = ScriptedTransport::new(SEARCH_TURN);
        let orchestrator = orchestrator(transport.clone());
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let stream = orchestrator
            .start(
                user_turn("@presse @web Wie steht es ums Klima?", None),
                CancellationToken::new(),
                Some(Box::new(move |summary: TurnSummary| {
                    let _ = done_tx.send(summary);
                })),
            )
            .await
            .expect("turn starts");

        let snapshots = collect(stream).await;
        let last = snapshots
            .last()
            .and_then(|s| s.as_ref().ok())
            .expect("final snapshot");
        assert_eq!(last.text(), "Eins zwei");
        assert_eq!(last.tool_calls().count(), 1);
        assert_eq!(last.sources().count(), 3);
        assert_eq!(last.progress.stage, ProgressStage::Complete);

        let summary = done_rx.await.expect("completion callback");
        assert_eq!(summary.thread_id.as_deref(), Some("t-1"));
        assert_eq!(summary.citations.len(), 3);

        let (endpoint, body) = transport.last_request();
        assert_eq!(endpoint, Endpoints::default().chat);
        assert_eq!(body["agentId"], "press");
        assert_eq!(body["forcedTools"], serde_json::json!(["web_search"]));
        assert_eq!(body["messages"][0]["parts"][0]["text"], "Wie steht es ums Klima?");
    }

    #[tokio::test]
    async fn test_agent_mode_uses_agent_endpoint() {
        let transport = ScriptedTransport::new(&["event: done\ndata: {}\n"]);
        let orchestrator = orchestrator(transport.clone());
        let mut input = user_turn("Hallo", Some("t-5"));
        input.mode = EndpointMode::Agent;

        let stream = orchestrator
            .start(input, CancellationToken::new(), None)
            .await
            .expect("turn starts");
        collect(stream).await;

        let (endpoint, body) = transport.last_request();
        assert_eq!(endpoint, Endpoints::default().agent);
        assert_eq!(body["threadId"], "t-5");
        assert_eq!(body["agentId"], "default");
    }

    #[tokio::test]
    async fn test_unanswered_question_blocks_with_zero_requests() {
        let transport = ScriptedTransport::new(SEARCH_TURN);
        let orchestrator = orchestrator(transport.clone());

        let mut draft = Snapshot {
            thread_id: Some("t-1".to_string()),
            ..Default::default()
        };
        draft.content.push(crate::stream::ContentPart::ToolCall(
            crate::stream::ToolCallRecord::new("q1", ASK_USER_TOOL, serde_json::json!({})),
        ));
        let mut input = user_turn("Noch da?", Some("t-1"));
        input.draft = Some(draft);

        let result = orchestrator.start(input, CancellationToken::new(), None).await;
        assert!(matches!(result, Err(ref e) if e.is_cancelled()));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_then_block_then_resume() {
        let transport = ScriptedTransport::new(INTERRUPTED_TURN);
        let orchestrator = orchestrator(transport.clone());
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();

        let stream = orchestrator
            .start(
                user_turn("Erstelle eine Übersicht", None),
                CancellationToken::new(),
                Some(Box::new(move |_: TurnSummary| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await
            .expect("turn starts");
        let snapshots = collect(stream).await;
        let paused = snapshots
            .last()
            .and_then(|s| s.as_ref().ok())
            .cloned()
            .expect("final snapshot");
        assert!(paused.requires_action);
        assert!(snapshots
            .iter()
            .rev()
            .skip(1)
            .filter_map(|s| s.as_ref().ok())
            .all(|s| !s.requires_action));
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert!(orchestrator.interrupts().lock().is_pending("t-1"));

        // Same conversation without an answer: blocked, no request.
        let blocked = orchestrator
            .start(user_turn("Hallo?", Some("t-1")), CancellationToken::new(), None)
            .await;
        assert!(matches!(blocked, Err(TurnError::Cancelled)));
        assert_eq!(transport.request_count(), 1);

        // Answer supplied: resume endpoint with thread id and answer only.
        let mut draft = paused.clone();
        assert!(draft.answer_human_question("Bayern"));
        let mut input = user_turn("Erstelle eine Übersicht", Some("t-1"));
        input.draft = Some(draft);
        let stream = orchestrator
            .start(input, CancellationToken::new(), None)
            .await
            .expect("resume starts");
        collect(stream).await;

        let (endpoint, body) = transport.last_request();
        assert_eq!(endpoint, Endpoints::default().resume);
        assert_eq!(body, serde_json::json!({"threadId": "t-1", "resume": "Bayern"}));
    }

    #[tokio::test]
    async fn test_different_conversation_clears_stale_interrupt() {
        let transport = ScriptedTransport::new(&INTERRUPTED_TURN[1..]);
        let orchestrator = orchestrator(transport.clone());

        let stream = orchestrator
            .start(user_turn("Start", Some("t-1")), CancellationToken::new(), None)
            .await
            .expect("turn starts");
        collect(stream).await;
        assert!(orchestrator.interrupts().lock().is_pending("t-1"));

        let stream = orchestrator
            .start(user_turn("Andere Unterhaltung", Some("t-2")), CancellationToken::new(), None)
            .await
            .expect("other conversation proceeds");
        collect(stream).await;

        assert_eq!(transport.request_count(), 2);
        let interrupts = orchestrator.interrupts().lock();
        assert!(!interrupts.is_pending("t-1"));
        assert!(interrupts.is_pending("t-2"));
    }

    #[tokio::test]
    async fn test_protocol_error_ends_stream_after_text() {
        let transport = ScriptedTransport::new(&[
            "event: text_delta\ndata: {\"text\":\"Teil\"}\n\n",
            "event: error\ndata: {\"error\":\"Kontingent erschöpft\"}\n\n",
            "event: text_delta\ndata: {\"text\":\"nie gesehen\"}\n\n",
        ]);
        let orchestrator = orchestrator(transport);

        let snapshots = collect(
            orchestrator
                .start(user_turn("Hallo", None), CancellationToken::new(), None)
                .await
                .expect("turn starts"),
        )
        .await;

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].as_ref().map(|s| s.text().to_string()).ok(), Some("Teil".to_string()));
        assert!(matches!(&snapshots[1], Err(TurnError::Protocol(m)) if m == "Kontingent erschöpft"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_makes_no_snapshots() {
        let transport = ScriptedTransport::new(SEARCH_TURN);
        let orchestrator = orchestrator(transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator.start(user_turn("Hallo", None), cancel, None).await;
        assert!(matches!(result, Err(TurnError::Cancelled)));
    }

    /// Delivers a few chunks, then never yields again.
    struct StalledTransport {
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl Transport for StalledTransport {
        async fn open(&self, _endpoint: &str, _body: Value) -> TurnResult<ByteStream> {
            let head: Vec<TurnResult<Bytes>> = self
                .chunks
                .iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            Ok(Box::pin(
                futures::stream::iter(head).chain(futures::stream::pending::<TurnResult<Bytes>>()),
            ))
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_ends_with_cancelled() {
        let transport = Arc::new(StalledTransport {
            chunks: vec![
                "event: thread_created\ndata: {\"threadId\":\"t-9\"}\n\n",
                "event: text_delta\ndata: {\"text\":\"a\"}\n\n",
            ],
        });
        let orchestrator = TurnOrchestrator::new(
            transport,
            Arc::new(RwLock::new(MentionRegistry::with_builtins())),
            Arc::new(Mutex::new(InterruptController::new())),
            settings(),
        );
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let cancel = CancellationToken::new();

        let mut stream = orchestrator
            .start(
                user_turn("Hallo", None),
                cancel.clone(),
                Some(Box::new(move |_summary: TurnSummary| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await
            .expect("turn starts");

        loop {
            let snapshot = stream
                .next()
                .await
                .expect("stream still open")
                .expect("snapshot");
            if snapshot.text() == "a" {
                break;
            }
        }

        cancel.cancel();
        let rest = collect(stream).await;
        assert_eq!(rest.len(), 1);
        assert!(matches!(rest[0], Err(TurnError::Cancelled)));

        assert_eq!(completions.load(Ordering::SeqCst), 0);
        let interrupts = orchestrator.interrupts().lock();
        assert!(!interrupts.is_pending("t-9"));
        assert!(interrupts.last_snapshot("t-9").is_none());
    }

    #[tokio::test]
    async fn test_persisted_documents_are_sent() {
        let transport = ScriptedTransport::new(&["event: done\ndata: {}\n"]);
        let store = Arc::new(InMemoryDocumentStore::new());
        store.remember(
            "t-3",
            DocumentReference {
                id: "doc-77".to_string(),
                title: "Protokoll".to_string(),
                source: DocumentSourceKind::Document,
            },
        );
        let orchestrator = orchestrator(transport.clone()).with_document_store(store);

        let stream = orchestrator
            .start(user_turn("Was steht im Protokoll?", Some("t-3")), CancellationToken::new(), None)
            .await
            .expect("turn starts");
        collect(stream).await;

        let (_, body) = transport.last_request();
        assert_eq!(body["documentIds"], serde_json::json!(["doc-77"]));
    }
}
