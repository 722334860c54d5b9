//! Document models that flow between pipeline stages.
//!
//! A search tool creates [`NotParsedDocument`]s, the parse tool promotes them
//! to [`ParsedDocument`]s (full text attached), and the analyze tool enriches
//! parsed documents with themes and insights. Synthesis only reads them.
//!
//! On the wire every document is a flat JSON object. A record carrying a
//! string `text` field is parsed; one without is not.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Suffix appended to text cut by [`ParsedDocument::with_text_limit`].
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Documents with a mean criterion score strictly above this are kept.
pub const KEEP_THRESHOLD: f64 = 2.0;

/// Where a document came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Web,
    Paper,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Web => "web",
            SourceType::Paper => "paper",
            SourceType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LLM-produced records routinely carry `null` where a list or string is
/// expected; treat those as the field default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A search hit before its content has been fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotParsedDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_type: SourceType,
    /// Web results only.
    #[serde(default, deserialize_with = "null_as_default")]
    pub snippet: String,
    /// Papers only.
    #[serde(
        rename = "abstract",
        default,
        deserialize_with = "null_as_default"
    )]
    pub abstract_text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub year: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub venue: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
}

impl NotParsedDocument {
    pub fn web(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            source_type: SourceType::Web,
            snippet: snippet.into(),
            ..Default::default()
        }
    }

    /// Short excerpt used when scoring or summarizing without full text.
    pub fn summary(&self) -> &str {
        if !self.snippet.is_empty() {
            &self.snippet
        } else {
            &self.abstract_text
        }
    }
}

/// A document with extracted text, optionally enriched by analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(flatten)]
    pub base: NotParsedDocument,
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub themes: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub insights: Vec<String>,
}

impl ParsedDocument {
    /// Promote a search hit, attaching its extracted text.
    pub fn from_not_parsed(base: NotParsedDocument, text: impl Into<String>) -> Self {
        Self {
            base,
            text: text.into(),
            themes: Vec::new(),
            insights: Vec::new(),
        }
    }

    /// Copy of this document whose text is cut to `char_limit` characters.
    pub fn with_text_limit(&self, char_limit: usize) -> Self {
        let mut doc = self.clone();
        if self.text.chars().count() > char_limit {
            doc.text = format!("{}{}", truncate_chars(&self.text, char_limit), TRUNCATION_MARKER);
        }
        doc
    }
}

/// Either lifecycle stage of a document.
///
/// Deserialization tries the parsed shape first, so a record is only
/// treated as parsed when it has a string `text` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Parsed(ParsedDocument),
    NotParsed(NotParsedDocument),
}

impl Document {
    pub fn base(&self) -> &NotParsedDocument {
        match self {
            Document::Parsed(d) => &d.base,
            Document::NotParsed(d) => d,
        }
    }

    pub fn title(&self) -> &str {
        &self.base().title
    }

    pub fn url(&self) -> &str {
        &self.base().url
    }

    pub fn source_type(&self) -> SourceType {
        self.base().source_type
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Document::Parsed(d) => Some(&d.text),
            Document::NotParsed(_) => None,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Document::Parsed(_))
    }

    /// Parsed view of this document; unparsed documents get empty text.
    pub fn into_parsed(self) -> ParsedDocument {
        match self {
            Document::Parsed(d) => d,
            Document::NotParsed(d) => ParsedDocument::from_not_parsed(d, ""),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<NotParsedDocument> for Document {
    fn from(doc: NotParsedDocument) -> Self {
        Document::NotParsed(doc)
    }
}

impl From<ParsedDocument> for Document {
    fn from(doc: ParsedDocument) -> Self {
        Document::Parsed(doc)
    }
}

/// Turn a batch of JSON records into documents.
///
/// Every item must be an object. Either all items carry a string `text`
/// field (parsed) or none carries a `text` key at all (not parsed); a mix
/// is rejected.
pub fn parse_document_batch(items: &[Value]) -> Result<Vec<Document>> {
    if !items.iter().all(Value::is_object) {
        bail!("all items must be JSON objects");
    }

    let all_parsed = items
        .iter()
        .all(|item| item.get("text").map(Value::is_string).unwrap_or(false));
    let none_parsed = items.iter().all(|item| item.get("text").is_none());

    if all_parsed {
        items
            .iter()
            .map(|item| Ok(Document::Parsed(serde_json::from_value(item.clone())?)))
            .collect()
    } else if none_parsed {
        items
            .iter()
            .map(|item| Ok(Document::NotParsed(serde_json::from_value(item.clone())?)))
            .collect()
    } else {
        bail!(
            "items must either all be parsed documents with a 'text' field \
             or all be unparsed documents without one"
        )
    }
}

/// Per-criterion scores for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentScore {
    pub title: String,
    pub scores: BTreeMap<String, u8>,
    pub mean_score: f64,
    pub keep: bool,
}

impl DocumentScore {
    pub fn new(title: impl Into<String>, scores: BTreeMap<String, u8>) -> Self {
        let mean_score = if scores.is_empty() {
            0.0
        } else {
            scores.values().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
        };
        Self {
            title: title.into(),
            scores,
            mean_score,
            keep: mean_score > KEEP_THRESHOLD,
        }
    }
}

/// Validate a model's scoring answer against the requested criteria.
///
/// `raw` must be an object mapping every criterion name to an integer in
/// `1..=5`. Extra keys are ignored.
pub fn validate_criterion_scores(criteria: &[String], raw: &Value) -> Result<BTreeMap<String, u8>> {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => bail!("scores must be a JSON object"),
    };

    let mut scores = BTreeMap::new();
    for criterion in criteria {
        let value = match obj.get(criterion) {
            Some(v) => v,
            None => bail!("missing score for criterion '{}'", criterion),
        };
        let score = match value.as_u64() {
            Some(s @ 1..=5) => s as u8,
            _ => bail!("score for '{}' must be an integer from 1 to 5, got {}", criterion, value),
        };
        scores.insert(criterion.clone(), score);
    }
    Ok(scores)
}

/// Longest prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
