//! Text extraction for fetched documents.
//!
//! Two inputs matter to the parse tool: HTML pages (main content container
//! via `scraper`, boilerplate elements skipped) and PDFs (`pdf-extract`).
//! Everything here is pure; fetching lives in [`super::parser`].

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Elements whose text never belongs to the readable content.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg", "template",
];

/// Content containers tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &["article", "[role=\"main\"]", "main", ".content", "body"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("no readable text found")]
    Empty,
}

/// Plain text from PDF bytes, whitespace-normalized.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let text = normalize_whitespace(&text);
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Readable text of an HTML page.
pub fn html_to_text(html: &str) -> Result<String, ExtractError> {
    let doc = Html::parse_document(html);

    for sel_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let text = element_text(el);
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    Err(ExtractError::Empty)
}

fn element_text(el: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if skipped {
            continue;
        }
        let t = text.trim();
        if !t.is_empty() {
            parts.push(t);
        }
    }
    normalize_whitespace(&parts.join(" "))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// PDF location for an arXiv URL (`/abs/<id>` or `/pdf/<id>`), if it is one.
pub fn arxiv_pdf_url(url: &str) -> Option<String> {
    if !url.contains("arxiv.org") {
        return None;
    }
    let id = url.trim_end_matches('/').rsplit('/').next()?;
    if id.is_empty() {
        return None;
    }
    let id = id.trim_end_matches(".pdf");
    Some(format!("https://arxiv.org/pdf/{}.pdf", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_prefers_article_and_skips_scripts() {
        let html = r#"
            <html><head><title>T</title><script>var x = 1;</script></head>
            <body>
              <nav>Home | About</nav>
              <article><h1>Edge Computing</h1><p>Compute near   the data.</p>
                <script>track()</script></article>
              <footer>(c) 2024</footer>
            </body></html>"#;
        assert_eq!(html_to_text(html).unwrap(), "Edge Computing Compute near the data.");
    }

    #[test]
    fn html_falls_back_to_body() {
        let html = "<html><body><div>Only body text</div><footer>foot</footer></body></html>";
        assert_eq!(html_to_text(html).unwrap(), "Only body text");
    }

    #[test]
    fn empty_html_is_an_error() {
        assert!(matches!(
            html_to_text("<html><body><script>x</script></body></html>"),
            Err(ExtractError::Empty)
        ));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        assert!(extract_pdf(b"not a pdf").is_err());
    }

    #[test]
    fn arxiv_urls() {
        assert_eq!(
            arxiv_pdf_url("http://arxiv.org/abs/2401.01234v2").as_deref(),
            Some("https://arxiv.org/pdf/2401.01234v2.pdf")
        );
        assert_eq!(
            arxiv_pdf_url("https://arxiv.org/pdf/2401.01234.pdf").as_deref(),
            Some("https://arxiv.org/pdf/2401.01234.pdf")
        );
        assert_eq!(arxiv_pdf_url("https://example.com/paper"), None);
    }
}
