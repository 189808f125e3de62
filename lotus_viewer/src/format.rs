//! Body and header formatting for display

use lotus_common::{HeaderPair, RequestBody};
use serde_json::Value;

/// Render a request body: form fields as JSON, raw chunks as text
/// (pretty-printed when they parse as JSON), upload errors verbatim.
pub fn format_request_body(body: Option<&RequestBody>) -> String {
    let Some(body) = body else {
        return String::new();
    };

    if let Some(form) = &body.form_data {
        return serde_json::to_string_pretty(form).unwrap_or_default();
    }
    if let Some(text) = body.raw_text() {
        return format_text_content(&text);
    }
    if let Some(error) = &body.error {
        return error.clone();
    }
    String::new()
}

/// Pretty-print JSON; anything else is shown as-is
pub fn format_text_content(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

/// One `Name: value` line per header, in arrival order
pub fn format_headers(headers: &[HeaderPair]) -> String {
    headers
        .iter()
        .map(|h| format!("{}: {}", h.name, h.value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Header list as an editable JSON object (last duplicate wins)
pub fn headers_to_json(headers: &[HeaderPair]) -> String {
    serde_json::to_string_pretty(&HeaderPair::flatten(headers)).unwrap_or_else(|_| "{}".to_string())
}

/// Path and query of a URL, or the input when it does not parse
pub fn display_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => url.to_string(),
    }
}
