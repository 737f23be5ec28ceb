//! Conversation-scoped document references
//!
//! Documents attached to a conversation once stay in scope for every later
//! turn of it. Where they are persisted is up to the embedding application.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::TurnResult;
use crate::mentions::DocumentReference;

#[async_trait]
pub trait DocumentReferenceStore: Send + Sync {
    /// References persisted for `thread_id`.
    async fn load(&self, thread_id: &str) -> TurnResult<Vec<DocumentReference>>;
}

/// Store kept in process memory for the lifetime of a session.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    references: RwLock<HashMap<String, Vec<DocumentReference>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to a conversation; duplicates by id are ignored.
    pub fn remember(&self, thread_id: &str, reference: DocumentReference) {
        let mut references = self.references.write();
        let entry = references.entry(thread_id.to_string()).or_default();
        if !entry.iter().any(|r| r.id == reference.id) {
            entry.push(reference);
        }
    }

    pub fn forget(&self, thread_id: &str) {
        self.references.write().remove(thread_id);
    }
}

#[async_trait]
impl DocumentReferenceStore for InMemoryDocumentStore {
    async fn load(&self, thread_id: &str) -> TurnResult<Vec<DocumentReference>> {
        Ok(self
            .references
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mentions::DocumentSourceKind;

    fn reference(id: &str) -> DocumentReference {
        DocumentReference {
            id: id.to_string(),
            title: id.to_uppercase(),
            source: DocumentSourceKind::Document,
        }
    }

    #[tokio::test]
    async fn test_remember_and_load() {
        let store = InMemoryDocumentStore::new();
        store.remember("t-1", reference("doc-1"));
        store.remember("t-1", reference("doc-1"));
        store.remember("t-1", reference("doc-2"));

        let loaded = store.load("t-1").await.expect("load");
        assert_eq!(loaded.len(), 2);
        assert!(store.load("t-2").await.expect("load").is_empty());

        store.forget("t-1");
        assert!(store.load("t-1").await.expect("load").is_empty());
    }
}
