//! Criteria-based relevance filtering.
//!
//! The model proposes the criteria; this tool scores every document in the
//! source collection against them with one JSON completion per document and
//! keeps those whose mean score is above [`KEEP_THRESHOLD`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use sotaforge_core::models::{
    truncate_chars, validate_criterion_scores, Document, DocumentScore, KEEP_THRESHOLD,
};

use super::{parse_json_answer, required_str, string_list, Tool, ToolContext};
use crate::llm::CompletionRequest;

/// Characters of snippet/abstract/text shown to the scorer.
const EXCERPT_CHARS: usize = 600;

/// Number of criteria the pipeline asks for.
const EXPECTED_CRITERIA: usize = 5;

const SCORER_SYSTEM_PROMPT: &str = "You are a strict reviewer. Score the document from 1 (poor) \
    to 5 (excellent) on each criterion. Return exactly one integer score per criterion as a JSON \
    object mapping each criterion, verbatim, to its score.";

pub struct FilterResultsTool;

fn scoring_prompt(query: &str, criteria: &[String], doc: &Document) -> String {
    let criteria_list = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    let base = doc.base();
    let excerpt = if !base.snippet.is_empty() {
        base.snippet.as_str()
    } else if !base.abstract_text.is_empty() {
        base.abstract_text.as_str()
    } else {
        doc.text().unwrap_or("")
    };

    format!(
        "Topic: {}\n\nCriteria:\n{}\n\nDocument:\nTitle: {}\nExcerpt: {}\n\n\
         Score this document on each criterion (1-5).",
        query,
        criteria_list,
        display_title(doc),
        truncate_chars(excerpt, EXCERPT_CHARS)
    )
}

fn display_title(doc: &Document) -> &str {
    if doc.title().is_empty() {
        "Untitled"
    } else {
        doc.title()
    }
}

async fn score_document(
    ctx: &ToolContext,
    query: &str,
    criteria: &[String],
    doc: &Document,
) -> Result<DocumentScore> {
    let request = CompletionRequest::new(SCORER_SYSTEM_PROMPT, scoring_prompt(query, criteria, doc))
        .json()
        .temperature(ctx.config.llm.temperature);
    let answer = ctx.llm.complete(&request).await?;
    let raw = parse_json_answer(&answer)?;
    let scores = validate_criterion_scores(criteria, &raw)?;
    Ok(DocumentScore::new(display_title(doc), scores))
}

#[async_trait]
impl Tool for FilterResultsTool {
    fn name(&self) -> &str {
        "filter_results"
    }

    fn description(&self) -> &str {
        "Filters documents from a collection based on provided criteria. \
         Scores each document on the 5 given criteria (1-5 scale) and \
         keeps only documents with mean > 2."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Research topic used as scoring context"
                },
                "collection": {
                    "type": "string",
                    "description": "Collection to read documents from"
                },
                "criteria": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Exactly 5 quality/relevance criteria"
                }
            },
            "required": ["query", "collection", "criteria"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let collection = required_str(&params, "collection")?;
        let criteria = string_list(&params, "criteria");

        let documents = ctx.store.fetch(collection, None).await?;
        if documents.is_empty() {
            tracing::warn!(collection, "no documents to filter");
            return Ok(json!({
                "query": query,
                "collection": collection,
                "criteria": [],
                "scored_documents": [],
                "results": [],
                "count": 0,
            }));
        }

        if criteria.len() != EXPECTED_CRITERIA {
            tracing::warn!(
                expected = EXPECTED_CRITERIA,
                received = criteria.len(),
                "unexpected number of filter criteria"
            );
        }
        if criteria.is_empty() {
            anyhow::bail!("criteria must not be empty");
        }

        ctx.progress.emit(
            "filter",
            format!("Retrieved {} documents from collection: {}", documents.len(), collection),
            "filter",
        );

        let mut scored = Vec::new();
        let mut kept = Vec::new();
        for doc in &documents {
            ctx.progress.emit(
                "filter",
                format!("Scoring: {}...", truncate_chars(display_title(doc), 60)),
                "filter",
            );
            match score_document(ctx, query, &criteria, doc).await {
                Ok(score) => {
                    tracing::debug!(
                        title = %score.title,
                        mean = score.mean_score,
                        keep = score.keep,
                        "scored document"
                    );
                    if score.keep {
                        kept.push(doc.to_value());
                    }
                    scored.push(score);
                }
                Err(e) => {
                    tracing::warn!(
                        title = doc.title(),
                        error = %e,
                        "failed to score document, skipping"
                    );
                }
            }
        }

        tracing::info!(
            kept = kept.len(),
            total = documents.len(),
            threshold = KEEP_THRESHOLD,
            "filtered documents"
        );
        Ok(json!({
            "query": query,
            "collection": collection,
            "criteria": criteria,
            "scored_documents": scored,
            "count": kept.len(),
            "results": kept,
        }))
    }
}
