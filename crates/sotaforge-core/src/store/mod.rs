//! Document storage abstraction.
//!
//! Every pipeline stage reads documents from one named collection and
//! writes to another. The [`DocumentStore`] trait is all the tools need;
//! the application crate provides a SQLite backend and this crate ships
//! [`memory::InMemoryDocumentStore`] for tests.
//!
//! Implementations must be `Send + Sync` to be shared across tool calls.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::Document;

/// Collection names used by the fixed pipeline.
pub mod collections {
    pub const RAW: &str = "raw";
    pub const FILTERED: &str = "filtered";
    pub const PARSED: &str = "parsed";
    pub const ANALYZED: &str = "analyzed";
    pub const SYNTHESIZED: &str = "synthesized";
    pub const FINAL_SOTA: &str = "final_sota";
}

/// Abstract document store keyed by collection name.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](DocumentStore::upsert) | Insert or replace a batch of documents |
/// | [`fetch`](DocumentStore::fetch) | Read a collection in insertion order |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace `documents` in `collection` as one batch.
    ///
    /// Ids come from [`document_id`]; a document with the same id as an
    /// existing one replaces it in place (last write wins). Returns the ids
    /// in input order.
    async fn upsert(&self, collection: &str, documents: &[Document]) -> Result<Vec<String>>;

    /// Documents in `collection`, oldest first, at most `limit` of them.
    /// An unknown collection yields an empty list.
    async fn fetch(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Document>>;
}

/// Deterministic document id derived from `(collection, url, title)`.
pub fn document_id(collection: &str, document: &Document) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.url().as_bytes());
    hasher.update([0u8]);
    hasher.update(document.title().as_bytes());
    format!("{:x}", hasher.finalize())
}
