use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::debug;

use crate::notion::{Block, CHILD_PAGE_TYPE, PageTreeApi, RichText, list_all_children};

const LIST_INDENT: &str = "    ";

/// Turns one remote page into a markup body.
pub trait PageConverter {
    fn convert<A: PageTreeApi>(&mut self, api: &mut A, page_id: &str) -> Result<String>;
}

/// Renders every nested level by default. With a depth limit, a page nested
/// past it fails to convert instead of losing the deeper blocks.
#[derive(Debug, Clone, Default)]
pub struct MarkdownConverter {
    max_depth: Option<usize>,
}

impl MarkdownConverter {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
        }
    }

    fn render_blocks<A: PageTreeApi>(
        &self,
        api: &mut A,
        blocks: &[Block],
        depth: usize,
    ) -> Result<String> {
        let mut output = String::new();
        let mut previous_list: Option<&str> = None;
        let mut number = 0usize;

        for block in blocks {
            let next = if block.kind == "numbered_list_item" {
                number + 1
            } else {
                0
            };
            // Blocks that render nothing leave list numbering untouched.
            let Some(rendered) = self.render_block(api, block, depth, next)? else {
                continue;
            };
            number = next;

            let list_kind = Some(block.kind.as_str()).filter(|kind| is_list_kind(kind));
            if !output.is_empty() {
                output.push_str(if list_kind.is_some() && list_kind == previous_list {
                    "\n"
                } else {
                    "\n\n"
                });
            }
            output.push_str(&rendered);
            previous_list = list_kind;
        }

        Ok(output)
    }

    fn render_children<A: PageTreeApi>(
        &self,
        api: &mut A,
        block: &Block,
        depth: usize,
    ) -> Result<Option<String>> {
        if !block.has_children {
            return Ok(None);
        }
        if let Some(max_depth) = self.max_depth
            && depth >= max_depth
        {
            bail!(
                "block {} has children nested deeper than {max_depth} levels",
                block.id
            );
        }
        let children = list_all_children(api, &block.id)
            .with_context(|| format!("failed to list children of block {}", block.id))?;
        let rendered = self.render_blocks(api, &children, depth + 1)?;
        Ok(Some(rendered).filter(|text| !text.is_empty()))
    }

    fn render_block<A: PageTreeApi>(
        &self,
        api: &mut A,
        block: &Block,
        depth: usize,
        number: usize,
    ) -> Result<Option<String>> {
        let payload = block.payload().unwrap_or(&Value::Null);
        let text = rich_text_field(payload, "rich_text");

        let rendered = match block.kind.as_str() {
            "paragraph" => {
                let children = self.render_children(api, block, depth)?;
                match (text.is_empty(), children) {
                    (true, None) => None,
                    (true, Some(children)) => Some(children),
                    (false, None) => Some(text),
                    (false, Some(children)) => Some(format!("{text}\n\n{children}")),
                }
            }
            "heading_1" | "heading_2" | "heading_3" => {
                let level = match block.kind.as_str() {
                    "heading_1" => "#",
                    "heading_2" => "##",
                    _ => "###",
                };
                let heading = format!("{level} {text}");
                match self.render_children(api, block, depth)? {
                    Some(children) => Some(format!("{heading}\n\n{children}")),
                    None => Some(heading),
                }
            }
            "bulleted_list_item" => {
                let item = format!("- {text}");
                Some(self.with_nested(api, block, depth, item)?)
            }
            "numbered_list_item" => {
                let item = format!("{number}. {text}");
                Some(self.with_nested(api, block, depth, item)?)
            }
            "to_do" => {
                let checked = payload
                    .get("checked")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let item = format!("- [{}] {text}", if checked { "x" } else { " " });
                Some(self.with_nested(api, block, depth, item)?)
            }
            "toggle" => {
                let inner = self.render_children(api, block, depth)?.unwrap_or_default();
                Some(format!(
                    "<details>\n<summary>{text}</summary>\n\n{inner}\n\n</details>"
                ))
            }
            "quote" => {
                let mut quoted = text;
                if let Some(children) = self.render_children(api, block, depth)? {
                    quoted = format!("{quoted}\n\n{children}");
                }
                Some(prefix_lines(&quoted, "> "))
            }
            "callout" => {
                let icon = payload
                    .get("icon")
                    .and_then(|icon| icon.get("emoji"))
                    .and_then(Value::as_str);
                let mut body = match icon {
                    Some(icon) => format!("{icon} {text}"),
                    None => text,
                };
                if let Some(children) = self.render_children(api, block, depth)? {
                    body = format!("{body}\n\n{children}");
                }
                Some(prefix_lines(&body, "> "))
            }
            "code" => {
                let language = payload
                    .get("language")
                    .and_then(Value::as_str)
                    .filter(|language| *language != "plain text")
                    .unwrap_or("");
                let source = plain_text_field(payload, "rich_text");
                Some(format!("```{language}\n{source}\n```"))
            }
            "equation" => payload
                .get("expression")
                .and_then(Value::as_str)
                .map(|expression| format!("$$\n{expression}\n$$")),
            "divider" => Some("---".to_string()),
            "image" | "video" | "file" | "pdf" | "audio" => {
                let url = media_url(payload);
                let caption = rich_text_field(payload, "caption");
                url.map(|url| {
                    if block.kind == "image" {
                        format!("![{caption}]({url})")
                    } else {
                        let label = if caption.is_empty() {
                            block.kind.clone()
                        } else {
                            caption
                        };
                        format!("[{label}]({url})")
                    }
                })
            }
            "bookmark" | "embed" | "link_preview" => {
                let caption = rich_text_field(payload, "caption");
                payload.get("url").and_then(Value::as_str).map(|url| {
                    let label = if caption.is_empty() {
                        url.to_string()
                    } else {
                        caption
                    };
                    format!("[{label}]({url})")
                })
            }
            "table" => self.render_table(api, block)?,
            "column_list" | "column" | "synced_block" => {
                self.render_children(api, block, depth)?
            }
            CHILD_PAGE_TYPE => None,
            other => {
                debug!("skipping unsupported block type {other} ({})", block.id);
                None
            }
        };

        Ok(rendered)
    }

    fn with_nested<A: PageTreeApi>(
        &self,
        api: &mut A,
        block: &Block,
        depth: usize,
        item: String,
    ) -> Result<String> {
        match self.render_children(api, block, depth)? {
            Some(children) => Ok(format!("{item}\n{}", prefix_lines(&children, LIST_INDENT))),
            None => Ok(item),
        }
    }

    fn render_table<A: PageTreeApi>(&self, api: &mut A, block: &Block) -> Result<Option<String>> {
        let rows = list_all_children(api, &block.id)
            .with_context(|| format!("failed to list rows of table {}", block.id))?;
        let mut lines = Vec::new();
        for row in rows.iter().filter(|row| row.kind == "table_row") {
            let cells = row
                .payload()
                .and_then(|payload| payload.get("cells"))
                .and_then(Value::as_array)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| render_rich_text(&parse_runs(cell)).replace('|', "\\|"))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if cells.is_empty() {
                continue;
            }
            let width = cells.len();
            lines.push(format!("| {} |", cells.join(" | ")));
            if lines.len() == 1 {
                lines.push(format!("|{}", " --- |".repeat(width)));
            }
        }
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(lines.join("\n")))
    }
}

impl PageConverter for MarkdownConverter {
    fn convert<A: PageTreeApi>(&mut self, api: &mut A, page_id: &str) -> Result<String> {
        let blocks = list_all_children(api, page_id)
            .with_context(|| format!("failed to list blocks of page {page_id}"))?;
        let mut body = self.render_blocks(api, &blocks, 0)?;
        if !body.is_empty() {
            body.push('\n');
        }
        Ok(body)
    }
}

pub fn render_rich_text(runs: &[RichText]) -> String {
    runs.iter().map(render_run).collect()
}

fn render_run(run: &RichText) -> String {
    let text = run.plain_text.as_str();
    if text.is_empty() {
        return String::new();
    }
    if run.kind == "equation" {
        return format!("${}$", text.trim());
    }

    let core = text.trim();
    if core.is_empty() {
        return text.to_string();
    }
    let leading = &text[..text.len() - text.trim_start().len()];
    let trailing = &text[text.trim_end().len()..];

    let mut styled = core.to_string();
    if run.annotations.code {
        styled = format!("`{styled}`");
    }
    if run.annotations.bold {
        styled = format!("**{styled}**");
    }
    if run.annotations.italic {
        styled = format!("_{styled}_");
    }
    if run.annotations.strikethrough {
        styled = format!("~~{styled}~~");
    }
    if let Some(href) = run.href.as_deref().filter(|href| !href.is_empty()) {
        styled = format!("[{styled}]({href})");
    }
    format!("{leading}{styled}{trailing}")
}

fn parse_runs(value: &Value) -> Vec<RichText> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn rich_text_field(payload: &Value, field: &str) -> String {
    payload
        .get(field)
        .map(|value| render_rich_text(&parse_runs(value)))
        .unwrap_or_default()
}

fn plain_text_field(payload: &Value, field: &str) -> String {
    payload
        .get(field)
        .map(|value| {
            parse_runs(value)
                .iter()
                .map(|run| run.plain_text.as_str())
                .collect()
        })
        .unwrap_or_default()
}

fn media_url(payload: &Value) -> Option<String> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    payload
        .get(kind)
        .and_then(|source| source.get("url"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn is_list_kind(kind: &str) -> bool {
    matches!(kind, "bulleted_list_item" | "numbered_list_item" | "to_do")
}

fn prefix_lines(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                prefix.trim_end().to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MarkdownConverter, PageConverter, render_rich_text};
    use crate::notion::RichText;
    use crate::testing::{MockApi, block, parent_block, text_block};

    fn runs(value: serde_json::Value) -> Vec<RichText> {
        serde_json::from_value(value).expect("runs")
    }

    #[test]
    fn rich_text_annotations_render_as_markdown() {
        let rendered = render_rich_text(&runs(json!([
            {"type": "text", "plain_text": "plain "},
            {"type": "text", "plain_text": "bold ", "annotations": {"bold": true}},
            {"type": "text", "plain_text": "both", "annotations": {"bold": true, "italic": true}},
            {"type": "text", "plain_text": " and "},
            {"type": "text", "plain_text": "code", "annotations": {"code": true}},
            {"type": "text", "plain_text": " gone", "annotations": {"strikethrough": true}},
            {"type": "text", "plain_text": " link", "href": "https://example.org"},
            {"type": "equation", "plain_text": "e=mc^2"}
        ])));
        assert_eq!(
            rendered,
            "plain **bold** _**both**_ and `code` ~~gone~~ [link](https://example.org)$e=mc^2$"
        );
    }

    #[test]
    fn page_blocks_render_in_order() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        api.add_block("page", text_block("h", "heading_1", "Title"));
        api.add_block("page", text_block("p", "paragraph", "Intro text."));
        api.add_block("page", text_block("b1", "bulleted_list_item", "one"));
        api.add_block("page", text_block("b2", "bulleted_list_item", "two"));
        api.add_block("page", text_block("n1", "numbered_list_item", "first"));
        api.add_block("page", text_block("n2", "numbered_list_item", "second"));
        api.add_block(
            "page",
            block(
                "t",
                "to_do",
                json!({"rich_text": [{"plain_text": "done"}], "checked": true}),
            ),
        );
        api.add_block("page", block("d", "divider", json!({})));
        api.add_block(
            "page",
            block(
                "c",
                "code",
                json!({"rich_text": [{"plain_text": "fn main() {}"}], "language": "rust"}),
            ),
        );
        api.add_block("page", text_block("q", "quote", "quoted"));
        api.add_child_page("page", "child", "Child");
        api.add_block("page", text_block("empty", "paragraph", ""));

        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        assert_eq!(
            body,
            "# Title\n\nIntro text.\n\n- one\n- two\n\n1. first\n2. second\n\n- [x] done\n\n---\n\n```rust\nfn main() {}\n```\n\n> quoted\n"
        );
    }

    #[test]
    fn nested_children_are_indented_under_list_items() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        api.add_block("page", parent_block("b1", "bulleted_list_item", "parent"));
        api.add_block("b1", text_block("b1a", "bulleted_list_item", "child"));
        api.add_block("b1", text_block("b1b", "bulleted_list_item", "sibling"));
        api.add_block("page", parent_block("tg", "toggle", "More"));
        api.add_block("tg", text_block("tgp", "paragraph", "hidden"));

        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        assert_eq!(
            body,
            "- parent\n    - child\n    - sibling\n\n<details>\n<summary>More</summary>\n\nhidden\n\n</details>\n"
        );
    }

    #[test]
    fn tables_media_and_callouts_render() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        let mut table = block("tbl", "table", json!({"table_width": 2, "has_column_header": true}));
        table.has_children = true;
        api.add_block("page", table);
        api.add_block(
            "tbl",
            block(
                "r1",
                "table_row",
                json!({"cells": [[{"plain_text": "Name"}], [{"plain_text": "Value"}]]}),
            ),
        );
        api.add_block(
            "tbl",
            block(
                "r2",
                "table_row",
                json!({"cells": [[{"plain_text": "a|b"}], [{"plain_text": "1"}]]}),
            ),
        );
        api.add_block(
            "page",
            block(
                "img",
                "image",
                json!({"type": "external", "external": {"url": "https://img.example/x.png"},
                       "caption": [{"plain_text": "diagram"}]}),
            ),
        );
        api.add_block(
            "page",
            block(
                "co",
                "callout",
                json!({"rich_text": [{"plain_text": "Heads up"}], "icon": {"type": "emoji", "emoji": "💡"}}),
            ),
        );
        api.add_block(
            "page",
            block("bm", "bookmark", json!({"url": "https://example.org", "caption": []})),
        );

        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        assert_eq!(
            body,
            "| Name | Value |\n| --- | --- |\n| a\\|b | 1 |\n\n![diagram](https://img.example/x.png)\n\n> 💡 Heads up\n\n[https://example.org](https://example.org)\n"
        );
    }

    #[test]
    fn empty_page_converts_to_empty_body() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        assert_eq!(body, "");
    }

    #[test]
    fn block_listing_failure_fails_conversion() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        api.failing_children.insert("page".to_string());
        let error = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to list blocks of page page"));
    }

    #[test]
    fn depth_limit_fails_instead_of_truncating() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        api.add_block("page", parent_block("b1", "bulleted_list_item", "top"));
        api.add_block("b1", text_block("b2", "bulleted_list_item", "nested"));

        let body = MarkdownConverter::with_max_depth(1)
            .convert(&mut api, "page")
            .expect("within limit");
        assert_eq!(body, "- top\n    - nested\n");

        let error = MarkdownConverter::with_max_depth(0)
            .convert(&mut api, "page")
            .expect_err("past limit");
        assert!(error.to_string().contains("nested deeper than 0 levels"));
    }

    #[test]
    fn deep_nesting_renders_every_level_by_default() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        let mut parent = "page".to_string();
        for level in 0..11 {
            let id = format!("l{level}");
            let text = format!("L{level}");
            let block = if level < 10 {
                parent_block(&id, "bulleted_list_item", &text)
            } else {
                text_block(&id, "bulleted_list_item", &text)
            };
            api.add_block(&parent, block);
            parent = id;
        }

        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        let lines = body.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[10], format!("{}- L10", "    ".repeat(10)));
    }

    #[test]
    fn numbering_continues_past_blocks_that_render_nothing() {
        let mut api = MockApi::default();
        api.add_page("page", "Page");
        api.add_block("page", text_block("n1", "numbered_list_item", "first"));
        api.add_child_page("page", "child", "Child");
        api.add_block("page", block("x", "unsupported", json!({})));
        api.add_block("page", text_block("n2", "numbered_list_item", "second"));
        api.add_block("page", text_block("p", "paragraph", "break"));
        api.add_block("page", text_block("n3", "numbered_list_item", "restart"));

        let body = MarkdownConverter::default()
            .convert(&mut api, "page")
            .expect("convert");
        assert_eq!(body, "1. first\n2. second\n\nbreak\n\n1. restart\n");
    }
}
