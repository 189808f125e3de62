//! Terminal rendering of mirrored requests

use crate::format::{display_path, format_headers, format_request_body, format_text_content};
use crate::mirror::{Relation, Source, ViewerRequest};
use console::{style, StyledObject};

fn status_style(status: u16) -> StyledObject<String> {
    let text = if status == 0 {
        "---".to_string()
    } else {
        status.to_string()
    };
    match status {
        200..=299 => style(text).green(),
        300..=399 => style(text).cyan(),
        400..=499 => style(text).yellow(),
        500..=599 => style(text).red(),
        _ => style(text).dim(),
    }
}

/// One summary line for the request list
pub fn request_line(request: &ViewerRequest) -> String {
    let record = &request.record;
    let mut line = format!(
        "{} {:<7} {} {}",
        style(record.timestamp.format("%H:%M:%S")).dim(),
        style(&record.method).bold(),
        status_style(record.status),
        display_path(&record.url),
    );

    if request.source == Source::Modified {
        line.push_str(&format!(" {}", style("modified").magenta()));
    }
    if request.orphaned {
        line.push_str(&format!(" {}", style("orphaned").yellow()));
    }
    line.push_str(&format!("  {}", style(&request.id).dim()));
    line
}

fn section(out: &mut String, title: &str, content: &str) {
    out.push_str(&format!("\n{}\n", style(title).cyan().bold()));
    if content.is_empty() {
        out.push_str(&format!("{}\n", style("(empty)").dim()));
    } else {
        out.push_str(content);
        out.push('\n');
    }
}

fn lineage(relation: &Relation) -> String {
    match relation {
        Relation::Root { children } => format!("{} replay(s): {}", children.len(), children.join(", ")),
        Relation::Replay { parent, orphaned: false } => format!("replay of {}", parent),
        Relation::Replay { parent, orphaned: true } => format!("replay of {} (deleted)", parent),
        Relation::Unrelated => String::new(),
    }
}

/// Full detail view of one request
pub fn request_detail(request: &ViewerRequest, relation: &Relation) -> String {
    let record = &request.record;
    let mut out = String::new();

    let mut general = format!(
        "Request URL: {}\nRequest Method: {}\nStatus Code: {} {}\nId: {}",
        record.url,
        record.method,
        status_style(record.status),
        record.status_text,
        request.id,
    );
    let lineage = lineage(relation);
    if !lineage.is_empty() {
        general.push_str(&format!("\nLineage: {}", lineage));
    }
    section(&mut out, "General", &general);

    section(&mut out, "Request Headers", &format_headers(&record.request_headers));
    section(
        &mut out,
        "Request Body",
        &format_request_body(record.request_body.as_ref()),
    );
    section(&mut out, "Response Headers", &format_headers(&record.response_headers));

    let response_body = record
        .response_body
        .as_deref()
        .map(format_text_content)
        .unwrap_or_default();
    section(&mut out, "Response Body", &response_body);

    out
}
