//! SOTA report writer.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use sotaforge_core::models::{Document, ParsedDocument};

use super::{required_str, Tool, ToolContext};
use crate::llm::CompletionRequest;

/// Full text shorter than this goes into the prompt verbatim; longer
/// documents are represented by their snippet or abstract.
const INLINE_TEXT_CHARS: usize = 1500;

pub const NO_DOCUMENTS_TEXT: &str = "No documents found in collection";
pub const NO_SUMMARY_TEXT: &str = "No summary generated.";

const SYNTHESIZER_SYSTEM_PROMPT: &str =
    "You are an expert technical writer specializing in state-of-the-art reviews.";

const SYNTHESIZER_PROMPT: &str = "Write a state-of-the-art review in Markdown from the sources \
    below. Use these sections, in order: \
    ## Overview (what the field is and why it matters now); \
    ## Key Themes (the recurring themes across sources); \
    ## Current Trends (where work is heading); \
    ## Methods and Approaches (the main techniques in use); \
    ## Open Challenges (unsolved problems and limitations); \
    ## Opportunities (promising directions); \
    ## Notable Sources (the most relevant sources with their URLs); \
    ## Conclusion (a short synthesis). \
    Ground every claim in the sources and cite them by title.\n\nSources:\n";

pub struct WriteSotaTool;

fn join_or_na(items: &[String]) -> String {
    if items.is_empty() {
        "N/A".to_string()
    } else {
        items.join(", ")
    }
}

fn source_block(doc: &ParsedDocument) -> String {
    let content = if doc.text.chars().count() < INLINE_TEXT_CHARS {
        doc.text.as_str()
    } else {
        doc.base.summary()
    };
    let content = if content.is_empty() { "N/A" } else { content };

    format!(
        "Source: {}\nURL: {}\nType: {}\nThemes: {}\nInsights: {}\nContent: {}",
        doc.base.title,
        doc.base.url,
        doc.base.source_type,
        join_or_na(&doc.themes),
        join_or_na(&doc.insights),
        content
    )
}

fn sources_block(documents: &[ParsedDocument]) -> String {
    documents
        .iter()
        .map(source_block)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for WriteSotaTool {
    fn name(&self) -> &str {
        "write_sota"
    }

    fn description(&self) -> &str {
        "Writes a structured state-of-the-art summary in Markdown from the analyzed \
         documents of a collection. Returns {status, text}."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection": {
                    "type": "string",
                    "description": "Collection of analyzed documents to summarize"
                }
            },
            "required": ["collection"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let collection = required_str(&params, "collection")?;

        let documents: Vec<ParsedDocument> = ctx
            .store
            .fetch(collection, None)
            .await?
            .into_iter()
            .filter(Document::is_parsed)
            .map(Document::into_parsed)
            .collect();

        if documents.is_empty() {
            tracing::warn!(collection, "no parsed documents to synthesize");
            return Ok(json!({ "status": "error", "text": NO_DOCUMENTS_TEXT }));
        }

        ctx.progress.emit(
            "synthesize",
            format!("Synthesizing {} documents", documents.len()),
            "synthesize",
        );

        let request = CompletionRequest::new(
            SYNTHESIZER_SYSTEM_PROMPT,
            format!("{}{}", SYNTHESIZER_PROMPT, sources_block(&documents)),
        )
        .temperature(ctx.config.llm.synthesis_temperature);
        let answer = ctx.llm.complete(&request).await?;

        let text = if answer.trim().is_empty() {
            NO_SUMMARY_TEXT.to_string()
        } else {
            answer
        };
        tracing::info!(sources = documents.len(), chars = text.len(), "SOTA report written");
        Ok(json!({ "status": "completed", "text": text }))
    }
}
