//! Web search (Serper) and paper search (arXiv Atom API).

use anyhow::{bail, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use serde_json::{json, Value};
use std::time::Duration;

use sotaforge_core::models::{NotParsedDocument, SourceType};

use super::{Tool, ToolContext};
use crate::config::SERPER_API_KEY_ENV;

/// Serper returns at most this many organic results per page.
const SERPER_PAGE_SIZE: u32 = 10;

fn search_schema(kind: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": format!("{} search query", kind) },
            "max_results": {
                "type": "integer",
                "description": "Maximum number of results (1-100)",
                "default": 10
            }
        },
        "required": ["query"]
    })
}

fn parse_query_args(params: &Value, default_max: u32) -> Result<(String, u32)> {
    let query = params
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if query.is_empty() {
        bail!("Search query cannot be empty");
    }
    let max_results = match params.get("max_results") {
        None | Some(Value::Null) => i64::from(default_max),
        Some(v) => match v.as_i64() {
            Some(n) => n,
            None => bail!("max_results must be an integer"),
        },
    };
    if !(1..=100).contains(&max_results) {
        bail!("max_results must be between 1 and 100");
    }
    Ok((query.to_string(), max_results as u32))
}

/// `search_web(query, max_results = 10)`
pub struct SearchWebTool;

#[async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Searches the web for HTML pages on a given topic using the Serper API. \
         Returns an object containing the original 'query' and 'results'."
    }

    fn parameters_schema(&self) -> Value {
        search_schema("Web")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let (query, max_results) = parse_query_args(&params, ctx.config.search.max_results)?;

        let api_key = match std::env::var(SERPER_API_KEY_ENV) {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("{} environment variable is not set", SERPER_API_KEY_ENV),
        };

        tracing::info!(%query, max_results, "searching web");
        let num_pages = max_results.div_ceil(SERPER_PAGE_SIZE);
        let mut results: Vec<NotParsedDocument> = Vec::new();

        for page in 1..=num_pages {
            if results.len() >= max_results as usize {
                break;
            }
            let data = match fetch_serper_page(ctx, &api_key, &query, page).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(%query, page, error = %e, "web search page failed, skipping");
                    continue;
                }
            };

            let organic = data
                .get("organic")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in organic {
                if results.len() >= max_results as usize {
                    break;
                }
                let field = |key: &str, default: &str| {
                    item.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or(default)
                        .to_string()
                };
                results.push(NotParsedDocument::web(
                    field("title", "No title"),
                    field("link", ""),
                    field("snippet", "No snippet available"),
                ));
            }
        }

        tracing::info!(%query, count = results.len(), "collected web results");
        Ok(json!({ "query": query, "results": results }))
    }
}

async fn fetch_serper_page(
    ctx: &ToolContext,
    api_key: &str,
    query: &str,
    page: u32,
) -> Result<Value> {
    let response = ctx
        .http
        .post(&ctx.config.search.serper_url)
        .timeout(Duration::from_secs(ctx.config.search.timeout_secs))
        .header("X-API-KEY", api_key)
        .json(&json!({ "q": query, "page": page }))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

/// `search_papers(query, max_results = 10)`
pub struct SearchPapersTool;

#[async_trait]
impl Tool for SearchPapersTool {
    fn name(&self) -> &str {
        "search_papers"
    }

    fn description(&self) -> &str {
        "Searches arXiv for papers on a given topic. \
         Returns an object containing the original 'query' and 'results'."
    }

    fn parameters_schema(&self) -> Value {
        search_schema("Paper")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let (query, max_results) = parse_query_args(&params, ctx.config.search.max_results)?;
        tracing::info!(%query, max_results, "searching arXiv");

        let feed = match fetch_arxiv_feed(ctx, &query, max_results).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(%query, error = %e, "arXiv query failed");
                return Ok(json!({ "query": query, "results": [] }));
            }
        };

        let results = match parse_arxiv_feed(&feed, max_results as usize) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(%query, error = %e, "unreadable arXiv feed");
                Vec::new()
            }
        };

        tracing::info!(%query, count = results.len(), "collected arXiv papers");
        Ok(json!({ "query": query, "results": results }))
    }
}

async fn fetch_arxiv_feed(ctx: &ToolContext, query: &str, max_results: u32) -> Result<String> {
    let response = ctx
        .http
        .get(&ctx.config.search.arxiv_url)
        .timeout(Duration::from_secs(ctx.config.search.timeout_secs))
        .query(&[
            ("search_query", format!("all:{}", query)),
            ("start", "0".to_string()),
            ("max_results", max_results.to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ])
        .send()
        .await?
        .error_for_status()?;
    Ok(response.text().await?)
}

#[derive(Clone, Copy, PartialEq)]
enum EntryField {
    None,
    Title,
    Summary,
    Id,
    Published,
    AuthorName,
    JournalRef,
}

#[derive(Default)]
struct EntryBuilder {
    title: String,
    summary: String,
    id: String,
    link: String,
    published: String,
    authors: Vec<String>,
    journal_ref: String,
    primary_category: String,
}

impl EntryBuilder {
    fn build(self, index: usize) -> NotParsedDocument {
        let title = collapse(&self.title);
        let year = self
            .published
            .get(..4)
            .and_then(|y| y.parse::<i32>().ok())
            .unwrap_or(0);
        let venue = if !self.journal_ref.trim().is_empty() {
            collapse(&self.journal_ref)
        } else {
            self.primary_category
        };
        NotParsedDocument {
            title: if title.is_empty() {
                format!("Untitled arXiv paper {}", index)
            } else {
                title
            },
            url: if self.link.is_empty() {
                self.id.trim().to_string()
            } else {
                self.link
            },
            source_type: SourceType::Paper,
            abstract_text: collapse(&self.summary),
            authors: self.authors,
            year,
            venue,
            ..Default::default()
        }
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Documents from an arXiv Atom feed, at most `max_results` of them.
pub fn parse_arxiv_feed(xml: &str, max_results: usize) -> Result<Vec<NotParsedDocument>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut results = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut field = EntryField::None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name();
                let name = local.as_ref();
                if name == b"entry" {
                    entry = Some(EntryBuilder::default());
                    continue;
                }
                let Some(current) = entry.as_mut() else {
                    continue;
                };
                field = match name {
                    b"title" => EntryField::Title,
                    b"summary" => EntryField::Summary,
                    b"id" => EntryField::Id,
                    b"published" => EntryField::Published,
                    b"name" => {
                        current.authors.push(String::new());
                        EntryField::AuthorName
                    }
                    b"journal_ref" => EntryField::JournalRef,
                    _ => EntryField::None,
                };
            }
            Event::Empty(e) => {
                let Some(current) = entry.as_mut() else {
                    continue;
                };
                match e.local_name().as_ref() {
                    b"link" => {
                        let rel = attr(&e, b"rel").unwrap_or_else(|| "alternate".to_string());
                        if rel == "alternate" && current.link.is_empty() {
                            current.link = attr(&e, b"href").unwrap_or_default();
                        }
                    }
                    b"primary_category" => {
                        current.primary_category = attr(&e, b"term").unwrap_or_default();
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let Some(current) = entry.as_mut() else {
                    continue;
                };
                let text = t.unescape()?;
                let target = match field {
                    EntryField::Title => &mut current.title,
                    EntryField::Summary => &mut current.summary,
                    EntryField::Id => &mut current.id,
                    EntryField::Published => &mut current.published,
                    EntryField::JournalRef => &mut current.journal_ref,
                    EntryField::AuthorName => match current.authors.last_mut() {
                        Some(name) => name,
                        None => continue,
                    },
                    EntryField::None => continue,
                };
                if !target.is_empty() {
                    target.push(' ');
                }
                target.push_str(&text);
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"entry" {
                    if let Some(done) = entry.take() {
                        if results.len() < max_results {
                            results.push(done.build(results.len() + 1));
                        }
                    }
                }
                field = EntryField::None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    for doc in &mut results {
        doc.authors.retain(|a| !a.trim().is_empty());
        for a in &mut doc.authors {
            *a = a.trim().to_string();
        }
    }
    Ok(results)
}
