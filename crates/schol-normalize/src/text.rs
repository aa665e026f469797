//! HTML to bounded plain text.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use schol_core::{ExtractedText, MAX_EXTRACTED_TEXT_CHARS};
use scraper::node::Element;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static META_DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#).unwrap()
});
static META_KEYWORDS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="keywords"]"#).unwrap());

/// Containers that always hold page content, whatever their class says.
const CONTENT_ROOT_TAGS: &[&str] = &["html", "body", "main"];

const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "nav", "header", "footer", "aside",
];

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => input[..byte_idx].to_string(),
        None => input.to_string(),
    }
}

pub fn source_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}

fn is_non_content(element: &Element) -> bool {
    if NON_CONTENT_TAGS.contains(&element.name()) {
        return true;
    }
    if element.attr("role").is_some_and(|role| role.eq_ignore_ascii_case("navigation")) {
        return true;
    }
    if CONTENT_ROOT_TAGS.contains(&element.name()) {
        return false;
    }
    let marks_sidebar = |value: &str| value.to_ascii_lowercase().starts_with("sidebar");
    element.id().is_some_and(marks_sidebar) || element.classes().any(marks_sidebar)
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    (!text.is_empty()).then_some(text)
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|m| m.value().attr("content"))
        .map(collapse_whitespace)
        .find(|s| !s.is_empty())
}

fn body_text(document: &Html) -> String {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());
    let mut pieces = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .any(|ancestor| ancestor.value().as_element().is_some_and(is_non_content));
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed);
        }
    }
    collapse_whitespace(&pieces.join(" "))
}

/// Strip a page to title, meta description, meta keywords and visible body
/// text, in that order, capped at [`MAX_EXTRACTED_TEXT_CHARS`].
pub fn extract_text(html: &str, url: &str, fetched_at: DateTime<Utc>) -> ExtractedText {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .and_then(element_text)
        .or_else(|| document.select(&H1).next().and_then(element_text));
    let description = meta_content(&document, &META_DESCRIPTION);
    let keywords = meta_content(&document, &META_KEYWORDS);
    let body = body_text(&document);

    let combined = [title.as_deref(), description.as_deref(), keywords.as_deref(), Some(body.as_str())]
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    ExtractedText {
        url: Some(url.to_string()),
        source_domain: source_domain(url),
        title,
        description,
        text: truncate_chars(&combined, MAX_EXTRACTED_TEXT_CHARS),
        fetched_at,
    }
}
