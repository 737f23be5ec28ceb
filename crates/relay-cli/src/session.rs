//! Interactive chat session
//!
//! Owns one conversation's collaborators (registry, interrupt controller,
//! document store) and runs turns one at a time. Lines starting with `:`
//! are session commands; everything else is sent as a message.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use relay_core::mentions::{DocumentReference, DocumentSourceKind};
use relay_core::stream::{Snapshot, TurnSummary};
use relay_core::turn::{
    ChatMessage, CompletionCallback, EndpointMode, HttpTransport, InMemoryDocumentStore, TurnInput,
    TurnOrchestrator,
};
use relay_core::{ClientConfig, InterruptController, MentionParser, MentionRegistry, TurnError};

const HELP: &str = "\
Commands:
  :help                 show this help
  :new                  start a new conversation
  :mode chat|agent      switch the endpoint for new turns
  :doc <slug> <id>      make @doc:<slug> refer to document <id>
  :text <slug> <id>     make @doc:<slug> refer to text <id>
  :complete <prefix>    list mentions starting with <prefix> (e.g. @re)
  :quit                 leave
Anything else is sent as a message. Ctrl-C cancels a running turn.";

pub struct Session {
    orchestrator: TurnOrchestrator,
    registry: Arc<RwLock<MentionRegistry>>,
    interrupts: Arc<Mutex<InterruptController>>,
    documents: Arc<InMemoryDocumentStore>,
    history: Vec<ChatMessage>,
    thread_id: Option<String>,
    mode: EndpointMode,
    /// Assistant message paused on a human question
    awaiting: Option<Snapshot>,
}

impl Session {
    pub fn new(config: &ClientConfig, agent_mode: bool, thread_id: Option<String>) -> Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.api_token.clone())
            .context("Failed to create HTTP transport")?;

        let mut registry = MentionRegistry::with_builtins();
        registry.register_dynamic(config.dynamic_mentionables());
        let registry = Arc::new(RwLock::new(registry));
        let interrupts = Arc::new(Mutex::new(InterruptController::new()));
        let documents = Arc::new(InMemoryDocumentStore::new());

        let orchestrator = TurnOrchestrator::new(
            Arc::new(transport),
            registry.clone(),
            interrupts.clone(),
            config.turn_settings(),
        )
        .with_document_store(documents.clone());

        Ok(Self {
            orchestrator,
            registry,
            interrupts,
            documents,
            history: Vec::new(),
            thread_id,
            mode: if agent_mode {
                EndpointMode::Agent
            } else {
                EndpointMode::Chat
            },
            awaiting: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("relay - type a message, :help for commands");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            prompt(self.awaiting.is_some())?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(command) = line.strip_prefix(':') {
                if !self.handle_command(command) {
                    break;
                }
                continue;
            }

            if let Err(e) = self.send(line).await {
                if e.is_cancelled() {
                    println!("\n(cancelled)");
                } else {
                    println!("\nError: {}", e);
                }
            }
        }

        self.interrupts.lock().dispose();
        self.registry.write().clear_document_references();
        Ok(())
    }

    /// Returns false when the session should end.
    fn handle_command(&mut self, command: &str) -> bool {
        let mut words = command.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("quit" | "q"), _, _) => return false,
            (Some("help"), _, _) => println!("{}", HELP),
            (Some("new"), _, _) => {
                if let Some(id) = self.thread_id.take() {
                    self.interrupts.lock().clear(&id);
                    self.documents.forget(&id);
                }
                self.history.clear();
                self.awaiting = None;
                self.registry.write().clear_document_references();
                println!("New conversation.");
            }
            (Some("mode"), Some("chat"), _) => self.mode = EndpointMode::Chat,
            (Some("mode"), Some("agent"), _) => self.mode = EndpointMode::Agent,
            (Some(kind @ ("doc" | "text")), Some(slug), Some(id)) => {
                let source = if kind == "doc" {
                    DocumentSourceKind::Document
                } else {
                    DocumentSourceKind::Text
                };
                let reference = DocumentReference {
                    id: id.to_string(),
                    title: slug.to_string(),
                    source,
                };
                if let Some(thread_id) = &self.thread_id {
                    self.documents.remember(thread_id, reference.clone());
                }
                self.registry
                    .write()
                    .register_document_reference(slug, reference);
                println!("@doc:{} -> {}", slug, id);
            }
            (Some("complete"), Some(prefix), _) => self.complete(prefix),
            _ => println!("Unknown command, try :help"),
        }
        true
    }

    fn complete(&self, prefix: &str) {
        let Some(active) = MentionParser::active_query(prefix) else {
            println!("Start with @ or /");
            return;
        };
        let registry = self.registry.read();
        for entry in registry.suggest(active.trigger, &active.query) {
            println!(
                "  {}{:<14} {:?} {}",
                active.trigger.as_char(),
                entry.alias,
                entry.kind,
                entry.description.as_deref().unwrap_or("")
            );
        }
    }

    async fn send(&mut self, line: &str) -> Result<(), TurnError> {
        let paused = self.awaiting.take();
        let draft = match &paused {
            Some(paused) => {
                let mut draft = paused.clone();
                draft.answer_human_question(line);
                Some(draft)
            }
            None => {
                self.history
                    .push(ChatMessage::user(uuid::Uuid::new_v4().to_string(), line));
                None
            }
        };
        let view = draft.as_ref().map(View::continuing).unwrap_or_default();

        let input = TurnInput {
            messages: self.history.clone(),
            thread_id: self.thread_id.clone(),
            mode: self.mode,
            draft,
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => ctrl_c.cancel(),
                _ = ctrl_c.cancelled() => {}
            }
        });

        let documents = self.documents.clone();
        let on_complete: CompletionCallback = Box::new(move |summary: TurnSummary| {
            tracing::info!(
                thread_id = ?summary.thread_id,
                citations = summary.citations.len(),
                "Turn summary"
            );
            if let Some(thread_id) = &summary.thread_id {
                for id in &summary.indexed_document_ids {
                    documents.remember(
                        thread_id,
                        DocumentReference {
                            id: id.clone(),
                            title: id.clone(),
                            source: DocumentSourceKind::Document,
                        },
                    );
                }
            }
        });

        let result = self.stream_turn(input, view, cancel.clone(), on_complete).await;
        // Stops the Ctrl-C watcher.
        cancel.cancel();

        match result {
            Ok(Some(last)) => self.settle(last),
            Ok(None) => {}
            Err(e) => {
                if paused.is_some() {
                    self.awaiting = paused;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn stream_turn(
        &mut self,
        input: TurnInput,
        mut view: View,
        cancel: CancellationToken,
        on_complete: CompletionCallback,
    ) -> Result<Option<Snapshot>, TurnError> {
        let mut stream = self
            .orchestrator
            .start(input, cancel, Some(on_complete))
            .await?;

        let mut last = None;
        while let Some(item) = stream.next().await {
            let snapshot = item?;
            view.render(&snapshot);
            last = Some(snapshot);
        }
        println!();
        Ok(last)
    }

    fn settle(&mut self, last: Snapshot) {
        if let Some(id) = &last.thread_id {
            self.thread_id = Some(id.clone());
        }

        let sources: Vec<_> = last.sources().collect();
        if !sources.is_empty() {
            println!("Sources:");
            for (i, source) in sources.iter().enumerate() {
                println!("  [{}] {} {}", i + 1, source.title, source.url);
            }
        }

        if last.requires_action {
            let question = last
                .human_question()
                .and_then(|q| q.args.get("question").and_then(|v| v.as_str()))
                .unwrap_or("The agent needs your input");
            println!("? {}", question);
            self.awaiting = Some(last);
            return;
        }

        self.history.push(ChatMessage::assistant_from_snapshot(
            uuid::Uuid::new_v4().to_string(),
            &last,
        ));
    }
}

/// Incremental terminal rendering of successive snapshots.
#[derive(Default)]
struct View {
    printed_text: usize,
    printed_calls: usize,
    message: Option<String>,
}

impl View {
    /// View of a message whose earlier content is already on screen.
    fn continuing(snapshot: &Snapshot) -> Self {
        Self {
            printed_text: snapshot.text().len(),
            printed_calls: snapshot.tool_calls().count(),
            message: snapshot.progress.message.clone(),
        }
    }

    fn render(&mut self, snapshot: &Snapshot) {
        if snapshot.progress.message != self.message {
            if let Some(message) = &snapshot.progress.message {
                if self.printed_text == 0 {
                    println!("· {}", message);
                }
            }
            self.message = snapshot.progress.message.clone();
        }

        let calls: Vec<_> = snapshot.tool_calls().collect();
        for call in calls.iter().skip(self.printed_calls) {
            println!("⚙ {} {}", call.tool_name, call.args);
        }
        self.printed_calls = self.printed_calls.max(calls.len());

        let text = snapshot.text();
        if text.len() > self.printed_text {
            print!("{}", &text[self.printed_text..]);
            let _ = std::io::stdout().flush();
            self.printed_text = text.len();
        }
    }
}

fn prompt(awaiting_answer: bool) -> Result<()> {
    print!("{}", if awaiting_answer { "answer> " } else { "> " });
    std::io::stdout().flush()?;
    Ok(())
}
