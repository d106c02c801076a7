use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const HEADER_OPEN: &str = "---\n";
const HEADER_CLOSE: &str = "\n---\n";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Frontmatter {
    pub notion_id: String,
    pub last_sync: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument<'a> {
    pub frontmatter: Option<Frontmatter>,
    pub body: &'a str,
}

/// ISO-8601 in UTC with millisecond precision and a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn render_document(notion_id: &str, synced_at: DateTime<Utc>, body: &str) -> String {
    format!(
        "---\nnotion_id: {notion_id}\nlast_sync: {}\n---\n\n{body}",
        format_timestamp(synced_at)
    )
}

/// Split a mirrored file into its raw header block and body.
/// Files without a leading header come back as `(None, content)`.
pub fn split_document(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix(HEADER_OPEN) else {
        return (None, content);
    };
    match rest.find(HEADER_CLOSE) {
        Some(end) => {
            let body = &rest[end + HEADER_CLOSE.len()..];
            (Some(&rest[..end]), body.strip_prefix('\n').unwrap_or(body))
        }
        None => match rest.strip_suffix("\n---") {
            Some(header) => (Some(header), ""),
            None => (None, content),
        },
    }
}

pub fn parse_document(content: &str) -> Result<ParsedDocument<'_>> {
    let (header, body) = split_document(content);
    let frontmatter = match header {
        Some(header) => Some(
            serde_yaml::from_str::<Frontmatter>(header)
                .context("failed to parse mirrored file header")?,
        ),
        None => None,
    };
    Ok(ParsedDocument { frontmatter, body })
}
