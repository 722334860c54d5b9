//! In-memory [`DocumentStore`] for tests and one-off runs.
//!
//! Collections are `Vec`s of `(id, document)` behind a `std::sync::RwLock`;
//! replacing a document keeps its original position.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Document;

use super::{document_id, DocumentStore};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<(String, Document)>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of collections that hold at least one document.
    pub fn collection_names(&self) -> Vec<String> {
        let guard = match self.collections.read() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        let mut names: Vec<String> = guard
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        let entries = guard.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            let id = document_id(collection, doc);
            match entries.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = doc.clone(),
                None => entries.push((id.clone(), doc.clone())),
            }
            ids.push(id);
        }
        Ok(ids)
    }

    async fn fetch(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        let docs = guard
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotParsedDocument, ParsedDocument};

    fn web(title: &str, url: &str) -> Document {
        NotParsedDocument::web(title, url, "snippet").into()
    }

    #[tokio::test]
    async fn test_upsert_and_fetch_in_order() {
        let store = InMemoryDocumentStore::new();
        let ids = store
            .upsert("raw", &[web("a", "u1"), web("b", "u2"), web("c", "u3")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let docs = store.fetch("raw", None).await.unwrap();
        let titles: Vec<&str> = docs.iter().map(Document::title).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);

        assert_eq!(store.fetch("raw", Some(2)).await.unwrap().len(), 2);
        assert!(store.fetch("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_write_wins_in_place() {
        let store = InMemoryDocumentStore::new();
        store.upsert("parsed", &[web("a", "u1"), web("b", "u2")]).await.unwrap();

        let source = NotParsedDocument::web("a", "u1", "");
        let replacement: Document = ParsedDocument::from_not_parsed(source, "full text").into();
        store.upsert("parsed", &[replacement]).await.unwrap();

        let docs = store.fetch("parsed", None).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text(), Some("full text"));
        assert_eq!(docs[1].title(), "b");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryDocumentStore::new();
        store.upsert("raw", &[web("a", "u1")]).await.unwrap();
        assert!(store.fetch("filtered", None).await.unwrap().is_empty());
        assert_eq!(store.collection_names(), vec!["raw".to_string()]);
    }
}
