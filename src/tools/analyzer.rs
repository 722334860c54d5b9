//! Thematic analysis of parsed documents.
//!
//! One JSON completion per document yields `themes` and `insights`. A
//! document whose analysis fails is stored unenriched rather than dropped.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use sotaforge_core::models::{truncate_chars, Document, ParsedDocument};

use super::{parse_json_answer, required_str, Tool, ToolContext};
use crate::llm::CompletionRequest;

const ANALYZER_SYSTEM_PROMPT: &str = "You are a research analyst reviewing one document for a \
    state-of-the-art survey. Reply with a JSON object with two keys. \"themes\" is a list of \
    short strings, each formatted as \"Category: Description\" where Category is one of Trend, \
    Challenge, Opportunity, Method or Finding. \"insights\" is a list of one-sentence takeaways \
    a reviewer should remember. Use only what the document supports.";

pub struct AnalyzeDocumentsTool;

#[derive(Debug, Default, Deserialize)]
struct Analysis {
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    insights: Vec<String>,
}

fn analysis_prompt(doc: &ParsedDocument, text_limit: usize) -> String {
    format!(
        "Analyze this document and list its key themes, trends, challenges and opportunities.\n\n\
         Title: {}\nSource Type: {}\n\nDocument text (truncated):\n{}",
        doc.base.title,
        doc.base.source_type,
        truncate_chars(&doc.text, text_limit)
    )
}

async fn analyze_one(ctx: &ToolContext, doc: &ParsedDocument) -> Result<Analysis> {
    let request = CompletionRequest::new(
        ANALYZER_SYSTEM_PROMPT,
        analysis_prompt(doc, ctx.config.analyze.prompt_text_limit),
    )
    .json()
    .temperature(ctx.config.llm.temperature);
    let answer = ctx.llm.complete(&request).await?;
    let raw = parse_json_answer(&answer)?;
    if !raw.is_object() {
        bail!("analysis must be a JSON object");
    }
    Ok(serde_json::from_value(raw)?)
}

#[async_trait]
impl Tool for AnalyzeDocumentsTool {
    fn name(&self) -> &str {
        "analyze_documents"
    }

    fn description(&self) -> &str {
        "Analyzes parsed documents from a source collection to extract themes and \
         insights, stores the enriched documents into a destination collection, and \
         returns a trimmed summary. Use to move parsed→analyzed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_to_process_collection": {
                    "type": "string",
                    "description": "Collection of parsed documents to analyze"
                },
                "document_processed_collection": {
                    "type": "string",
                    "description": "Collection to store analyzed documents into"
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
            tracing::warn!(collection = source, "no documents to analyze");
            return Ok(json!({
                "source_collection": source,
                "results": [],
                "count": 0,
            }));
        }

        let mut analyzed = Vec::with_capacity(documents.len());
        for doc in documents {
            let mut doc = doc.into_parsed();
            ctx.progress.emit(
                "analyze",
                format!("Analyzing: {}...", truncate_chars(&doc.base.title, 60)),
                "analyze",
            );
            match analyze_one(ctx, &doc).await {
                Ok(analysis) => {
                    doc.themes = analysis.themes;
                    doc.insights = analysis.insights;
                }
                Err(e) => {
                    tracing::warn!(
                        title = %doc.base.title,
                        error = %e,
                        "analysis failed, keeping document as is"
                    );
                }
            }
            analyzed.push(doc);
        }

        let stored: Vec<Document> = analyzed.iter().cloned().map(Document::Parsed).collect();
        let ids = ctx.store.upsert(destination, &stored).await?;
        tracing::info!(count = analyzed.len(), destination, "analyzed documents stored");

        let limit = ctx.config.parse.return_text_limit;
        Ok(json!({
            "source_collection": source,
            "destination_collection": destination,
            "count": analyzed.len(),
            "stored_count": ids.len(),
            "results": analyzed
                .iter()
                .map(|d| Document::Parsed(d.with_text_limit(limit)).to_value())
                .collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sotaforge_core::models::NotParsedDocument;

    #[test]
    fn prompt_truncates_text() {
        let base = NotParsedDocument::web("Edge AI", "https://e.x", "s");
        let doc = ParsedDocument::from_not_parsed(base, "x".repeat(5000));
        let prompt = analysis_prompt(&doc, 1200);
        assert!(prompt.contains("Title: Edge AI"));
        assert!(prompt.contains("Source Type: web"));
        assert!(prompt.ends_with(&"x".repeat(1200)));
        assert!(!prompt.contains(&"x".repeat(1201)));
    }

    #[test]
    fn analysis_tolerates_missing_keys() {
        let a: Analysis = serde_json::from_value(json!({"themes": ["Trend: offload"]})).unwrap();
        assert_eq!(a.themes, vec!["Trend: offload"]);
        assert!(a.insights.is_empty());
    }
}
