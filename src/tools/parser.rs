//! Full-text extraction for filtered documents.
//!
//! Documents are fetched concurrently, bounded by `parse.concurrency`.
//! Web pages go through the HTML extractor and fall back to their snippet;
//! papers try the PDF (arXiv `abs` links are rewritten to `pdf`) and keep
//! the abstract unless the PDF yields more text. A document that cannot be
//! processed at all is kept with [`PARSE_FAILED_TEXT`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use sotaforge_core::models::{
    truncate_chars, Document, NotParsedDocument, ParsedDocument, SourceType,
};

use super::extract::{arxiv_pdf_url, extract_pdf, html_to_text};
use super::{required_str, Tool, ToolContext};

pub const PARSE_FAILED_TEXT: &str = "Failed to parse content.";

pub struct ParseDocumentsTool;

struct Fetched {
    content_type: String,
    bytes: Vec<u8>,
}

async fn fetch(ctx: &ToolContext, url: &str, timeout_secs: u64) -> Result<Fetched> {
    let response = ctx
        .http
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .header(reqwest::header::USER_AGENT, &ctx.config.parse.user_agent)
        .send()
        .await?
        .error_for_status()?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let bytes = response.bytes().await?.to_vec();
    Ok(Fetched {
        content_type,
        bytes,
    })
}

async fn pdf_text(bytes: Vec<u8>) -> Result<String> {
    Ok(tokio::task::spawn_blocking(move || extract_pdf(&bytes)).await??)
}

async fn parse_web(ctx: &ToolContext, doc: &NotParsedDocument) -> Result<String> {
    if doc.url.trim().is_empty() {
        bail!("document has no url");
    }

    let fetched = match fetch(ctx, &doc.url, ctx.config.parse.web_timeout_secs).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(url = %doc.url, error = %e, "fetch failed, using snippet");
            return Ok(doc.snippet.clone());
        }
    };

    let extracted = if fetched.content_type.contains("pdf") {
        pdf_text(fetched.bytes).await
    } else {
        let html = String::from_utf8_lossy(&fetched.bytes);
        html_to_text(&html).map_err(anyhow::Error::from)
    };

    match extracted {
        Ok(text) => Ok(text),
        Err(e) => {
            tracing::debug!(url = %doc.url, error = %e, "no extractable text, using snippet");
            Ok(doc.snippet.clone())
        }
    }
}

async fn parse_paper(ctx: &ToolContext, doc: &NotParsedDocument) -> Result<String> {
    if doc.url.trim().is_empty() {
        bail!("document has no url");
    }
    let fallback = doc.abstract_text.clone();

    let fetched = match arxiv_pdf_url(&doc.url) {
        Some(pdf_url) => fetch(ctx, &pdf_url, ctx.config.parse.pdf_timeout_secs).await,
        None => fetch(ctx, &doc.url, ctx.config.parse.web_timeout_secs).await,
    };
    let fetched = match fetched {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(url = %doc.url, error = %e, "paper fetch failed, using abstract");
            return Ok(fallback);
        }
    };

    let is_pdf = arxiv_pdf_url(&doc.url).is_some() || fetched.content_type.contains("pdf");
    if !is_pdf {
        tracing::debug!(
            url = %doc.url,
            content_type = %fetched.content_type,
            "not a PDF, using abstract"
        );
        return Ok(fallback);
    }

    match pdf_text(fetched.bytes).await {
        Ok(text) if text.chars().count() > fallback.chars().count() => Ok(text),
        Ok(_) => {
            tracing::debug!(url = %doc.url, "PDF shorter than abstract, keeping abstract");
            Ok(fallback)
        }
        Err(e) => {
            tracing::warn!(url = %doc.url, error = %e, "PDF extraction failed, using abstract");
            Ok(fallback)
        }
    }
}

async fn parse_one(ctx: &ToolContext, doc: Document) -> ParsedDocument {
    let base = match doc {
        Document::Parsed(parsed) => {
            tracing::debug!(title = %parsed.base.title, "already parsed, passing through");
            return parsed;
        }
        Document::NotParsed(base) => base,
    };

    ctx.progress.emit(
        "parse",
        format!(
            "Parsing: {}... ({})",
            truncate_chars(&base.title, 50),
            truncate_chars(&base.url, 40)
        ),
        "parse",
    );

    let result = match base.source_type {
        SourceType::Paper => parse_paper(ctx, &base).await,
        SourceType::Web | SourceType::Unknown => parse_web(ctx, &base).await,
    };

    let text = match result {
        Ok(text) => truncate_chars(&text, ctx.config.parse.full_text_limit).to_string(),
        Err(e) => {
            tracing::warn!(url = %base.url, error = %e, "failed to parse document");
            PARSE_FAILED_TEXT.to_string()
        }
    };
    ParsedDocument::from_not_parsed(base, text)
}

#[async_trait]
impl Tool for ParseDocumentsTool {
    fn name(&self) -> &str {
        "parse_documents"
    }

    fn description(&self) -> &str {
        "Parses documents from a source collection to extract full text content \
         (web pages and PDFs), stores the parsed documents into a destination \
         collection, and returns a trimmed summary. Use to move filtered→parsed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_to_process_collection": {
                    "type": "string",
                    "description": "Collection to read documents from"
                },
                "document_processed_collection": {
                    "type": "string",
                    "description": "Collection to store parsed documents into"
                }
            },
            "required": ["document_to_process_collection", "document_processed_collection"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let source = required_str(&params, "document_to_process_collection")?;
        let destination = required_str(&params, "document_processed_collection")?;

        let documents = ctx.store.fetch(source, None).await?;
        if documents.is_empty() {
            tracing::warn!(collection = source, "no documents to parse");
            return Ok(json!({
                "source_collection": source,
                "destination_collection": destination,
                "count": 0,
                "stored_count": 0,
                "results": [],
            }));
        }

        ctx.progress.emit(
            "parse",
            format!("Retrieved {} documents from: {}", documents.len(), source),
            "parse",
        );

        let total = documents.len();
        let semaphore = Arc::new(Semaphore::new(ctx.config.parse.concurrency.max(1)));
        let tasks = documents.into_iter().map(|doc| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await;
                parse_one(ctx, doc).await
            }
        });
        let parsed: Vec<ParsedDocument> = futures::future::join_all(tasks).await;

        let stored: Vec<Document> = parsed.iter().cloned().map(Document::Parsed).collect();
        let ids = ctx.store.upsert(destination, &stored).await?;
        tracing::info!(parsed = parsed.len(), total, destination, "parsed documents stored");

        let limit = ctx.config.parse.return_text_limit;
        Ok(json!({
            "source_collection": source,
            "destination_collection": destination,
            "count": parsed.len(),
            "stored_count": ids.len(),
            "results": parsed
                .iter()
                .map(|d| Document::Parsed(d.with_text_limit(limit)).to_value())
                .collect::<Vec<_>>(),
        }))
    }
}
