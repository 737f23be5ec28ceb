//! Mentionable registry
//!
//! Maps lower-cased aliases to addressable agents, tools, notebooks and
//! documents. Built-in entries always win over dynamically registered
//! entries that share an alias.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::builtin::builtin_mentionables;

/// What a mention addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    Agent,
    Tool,
    Notebook,
    Document,
}

/// Trigger character that introduces a mention token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "@")]
    At,
    #[serde(rename = "/")]
    Slash,
}

impl Trigger {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '@' => Some(Trigger::At),
            '/' => Some(Trigger::Slash),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Trigger::At => '@',
            Trigger::Slash => '/',
        }
    }
}

/// An entry that can be addressed from chat text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mentionable {
    pub kind: MentionKind,
    /// Trigger the picker inserts for this entry
    pub trigger: Trigger,
    pub id: String,
    pub alias: String,
    /// Namespace of the backing catalog (e.g. an MCP server name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Mentionable {
    pub fn new(kind: MentionKind, trigger: Trigger, id: &str, alias: &str) -> Self {
        Self {
            kind,
            trigger,
            id: id.to_string(),
            alias: alias.to_string(),
            context_prefix: None,
            description: None,
        }
    }

    pub fn agent(id: &str, alias: &str) -> Self {
        Self::new(MentionKind::Agent, Trigger::Slash, id, alias)
    }

    pub fn tool(id: &str, alias: &str) -> Self {
        Self::new(MentionKind::Tool, Trigger::At, id, alias)
    }

    pub fn notebook(id: &str, alias: &str) -> Self {
        Self::new(MentionKind::Notebook, Trigger::At, id, alias)
    }

    pub fn document(id: &str, alias: &str) -> Self {
        Self::new(MentionKind::Document, Trigger::At, id, alias)
    }

    pub fn with_context_prefix(mut self, prefix: &str) -> Self {
        self.context_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Identifier sent to the backend: `prefix:id` when namespaced.
    pub fn routed_id(&self) -> String {
        match self.context_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}:{}", prefix, self.id),
            None => self.id.clone(),
        }
    }
}

/// Where a back-referenced document lives on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSourceKind {
    /// Uploaded file, routed to `documentIds`
    Document,
    /// Pasted or generated text, routed to `textIds`
    Text,
}

/// Descriptor registered by the file picker for a `@doc:<slug>` token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub id: String,
    pub title: String,
    pub source: DocumentSourceKind,
}

/// Alias index over built-in and dynamic mentionables.
#[derive(Debug, Clone, Default)]
pub struct MentionRegistry {
    builtin: HashMap<String, Mentionable>,
    index: HashMap<String, Mentionable>,
    dynamic_count: usize,
    document_refs: HashMap<String, DocumentReference>,
}

impl MentionRegistry {
    /// Empty registry without built-ins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in catalog.
    pub fn with_builtins() -> Self {
        Self::from_builtins(builtin_mentionables())
    }

    pub fn from_builtins(entries: Vec<Mentionable>) -> Self {
        let mut builtin = HashMap::new();
        for entry in entries {
            builtin.insert(entry.alias.to_lowercase(), entry);
        }
        let index = builtin.clone();
        Self {
            builtin,
            index,
            dynamic_count: 0,
            document_refs: HashMap::new(),
        }
    }

    /// Case-insensitive alias lookup.
    pub fn resolve(&self, alias: &str) -> Option<&Mentionable> {
        self.index.get(&alias.to_lowercase())
    }

    /// Replace all dynamic entries and rebuild the alias index.
    ///
    /// Built-in aliases are never overwritten; among dynamic entries the
    /// first one registered for an alias wins.
    pub fn register_dynamic(&mut self, entries: Vec<Mentionable>) {
        let mut index = self.builtin.clone();
        let mut shadowed = 0usize;
        let mut accepted = 0usize;

        for entry in entries {
            let key = entry.alias.to_lowercase();
            if index.contains_key(&key) {
                shadowed += 1;
                continue;
            }
            index.insert(key, entry);
            accepted += 1;
        }

        if shadowed > 0 {
            tracing::debug!(shadowed, "Dynamic mentionables shadowed by existing aliases");
        }
        tracing::info!(
            builtin = self.builtin.len(),
            dynamic = accepted,
            "Rebuilt mention alias index"
        );

        self.index = index;
        self.dynamic_count = accepted;
    }

    pub fn register_document_reference(&mut self, slug: &str, reference: DocumentReference) {
        self.document_refs.insert(slug.to_string(), reference);
    }

    pub fn resolve_document_reference(&self, slug: &str) -> Option<&DocumentReference> {
        self.document_refs.get(slug)
    }

    /// Drop all session-scoped document back-references.
    pub fn clear_document_references(&mut self) {
        self.document_refs.clear();
    }

    /// Entries whose alias starts with `query`, for menu filtering.
    ///
    /// `/` only offers agents; `@` offers everything.
    pub fn suggest(&self, trigger: Trigger, query: &str) -> Vec<&Mentionable> {
        let query = query.to_lowercase();
        let mut matches: Vec<&Mentionable> = self
            .index
            .iter()
            .filter(|(alias, entry)| {
                alias.starts_with(&query)
                    && (trigger == Trigger::At || entry.kind == MentionKind::Agent)
            })
            .map(|(_, entry)| entry)
            .collect();
        matches.sort_by(|a, b| a.alias.len().cmp(&b.alias.len()).then(a.alias.cmp(&b.alias)));
        matches
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamic_count
    }
}
