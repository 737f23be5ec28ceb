//! Mention parser
//!
//! Scans chat text for `@alias` / `/alias` directives, resolves them through
//! the [`MentionRegistry`] and produces routing data plus the text with all
//! recognized tokens removed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::registry::{DocumentSourceKind, MentionKind, MentionRegistry, Trigger};

/// Prefix of an explicit document back-reference: `@doc:<slug>`.
pub const DOCUMENT_REF_PREFIX: &str = "doc:";

/// Bare tokens the pickers leave in the composer; stripped, never routed.
pub const PLACEHOLDER_TOKENS: [&str; 2] = ["@file", "@notebook"];

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("valid regex"));

/// Routing directives extracted from one user message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMentions {
    pub agent_id: String,
    pub notebook_ids: Vec<String>,
    pub forced_tools: Vec<String>,
    pub document_ids: Vec<String>,
    pub text_ids: Vec<String>,
    pub clean_text: String,
}

/// Byte span of a recognized token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentionSpan {
    pub start: usize,
    pub end: usize,
    pub trigger: Trigger,
}

/// A mention being typed at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMention {
    pub trigger: Trigger,
    pub query: String,
    /// Byte offset of the trigger character
    pub start: usize,
}

/// Candidate token before resolution.
struct Token<'t> {
    span: MentionSpan,
    raw: &'t str,
    alias: &'t str,
}

pub struct MentionParser<'a> {
    registry: &'a MentionRegistry,
    default_agent_id: &'a str,
}

impl<'a> MentionParser<'a> {
    pub fn new(registry: &'a MentionRegistry, default_agent_id: &'a str) -> Self {
        Self {
            registry,
            default_agent_id,
        }
    }

    /// Parse `text` into routing directives and cleaned text.
    pub fn parse(&self, text: &str) -> ParsedMentions {
        let mut agent_id: Option<String> = None;
        let mut parsed = ParsedMentions::default();
        let mut spans: Vec<MentionSpan> = Vec::new();

        for token in scan_tokens(text) {
            if PLACEHOLDER_TOKENS
                .iter()
                .any(|p| p.eq_ignore_ascii_case(token.raw))
            {
                spans.push(token.span);
                continue;
            }

            if token.span.trigger == Trigger::At {
                if let Some(slug) = token.alias.strip_prefix(DOCUMENT_REF_PREFIX) {
                    if let Some(reference) = self.registry.resolve_document_reference(slug) {
                        let target = match reference.source {
                            DocumentSourceKind::Document => &mut parsed.document_ids,
                            DocumentSourceKind::Text => &mut parsed.text_ids,
                        };
                        push_unique(target, &reference.id);
                        spans.push(token.span);
                    }
                    continue;
                }
            }

            let Some(entry) = self.registry.resolve(token.alias) else {
                continue;
            };

            match (token.span.trigger, entry.kind) {
                (_, MentionKind::Agent) => {
                    // Last agent directive wins.
                    agent_id = Some(entry.routed_id());
                }
                (Trigger::Slash, _) => continue,
                (Trigger::At, MentionKind::Tool) => {
                    push_unique(&mut parsed.forced_tools, &entry.routed_id())
                }
                (Trigger::At, MentionKind::Notebook) => {
                    push_unique(&mut parsed.notebook_ids, &entry.routed_id())
                }
                (Trigger::At, MentionKind::Document) => {
                    push_unique(&mut parsed.document_ids, &entry.routed_id())
                }
            }
            spans.push(token.span);
        }

        parsed.agent_id = agent_id.unwrap_or_else(|| self.default_agent_id.to_string());
        parsed.clean_text = strip_spans(text, spans);

        if !parsed.forced_tools.is_empty() || !parsed.notebook_ids.is_empty() {
            tracing::debug!(
                agent = %parsed.agent_id,
                tools = ?parsed.forced_tools,
                notebooks = ?parsed.notebook_ids,
                "Parsed mention directives"
            );
        }

        parsed
    }

    /// Detect a mention being typed at the end of `text_before_cursor`.
    pub fn active_query(text_before_cursor: &str) -> Option<ActiveMention> {
        let start = text_before_cursor
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);

        let word = &text_before_cursor[start..];
        let first = word.chars().next()?;
        let trigger = Trigger::from_char(first)?;

        Some(ActiveMention {
            trigger,
            query: word[first.len_utf8()..].to_string(),
            start,
        })
    }
}

fn scan_tokens(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut prev: Option<char> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((idx, c)) = iter.next() {
        let at_boundary = prev.map_or(true, char::is_whitespace);
        prev = Some(c);

        let Some(trigger) = Trigger::from_char(c) else {
            continue;
        };
        // Triggers only open a token at a word start, so the slashes and `@`
        // inside URLs and e-mail addresses never count.
        if !at_boundary {
            continue;
        }

        let alias_start = idx + c.len_utf8();
        let mut end = alias_start;
        while let Some(&(next_idx, next)) = iter.peek() {
            if next.is_whitespace() {
                break;
            }
            end = next_idx + next.len_utf8();
            prev = Some(next);
            iter.next();
        }

        if end == alias_start {
            continue;
        }

        tokens.push(Token {
            span: MentionSpan {
                start: idx,
                end,
                trigger,
            },
            raw: &text[idx..end],
            alias: &text[alias_start..end],
        });
    }

    tokens
}

/// Remove spans back to front so earlier offsets stay valid, then collapse
/// whitespace runs and trim.
fn strip_spans(text: &str, mut spans: Vec<MentionSpan>) -> String {
    spans.sort_by(|a, b| b.start.cmp(&a.start));

    let mut cleaned = text.to_string();
    for span in spans {
        cleaned.replace_range(span.start..span.end, "");
    }

    WHITESPACE_RUN.replace_all(&cleaned, " ").trim().to_string()
}

fn push_unique(target: &mut Vec<String>, id: &str) {
    if !target.iter().any(|existing| existing == id) {
        target.push(id.to_string());
    }
}
