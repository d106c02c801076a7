use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};

use crate::markdown::PageConverter;
use crate::notion::{Block, CHILD_PAGE_TYPE, ChildrenPage, MAX_PAGE_SIZE, PageMetadata, PageTreeApi};

/// In-memory page tree. Cursors are the decimal offset of the next result.
#[derive(Debug)]
pub struct MockApi {
    pub pages: BTreeMap<String, PageMetadata>,
    pub children: BTreeMap<String, Vec<Block>>,
    pub page_size: usize,
    pub failing_pages: BTreeSet<String>,
    pub failing_children: BTreeSet<String>,
    pub failing_cursors: BTreeSet<(String, String)>,
    pub stuck_cursor: BTreeSet<String>,
    pub request_count: usize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::with_page_size(MAX_PAGE_SIZE)
    }
}

impl MockApi {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            pages: BTreeMap::new(),
            children: BTreeMap::new(),
            page_size: page_size.max(1),
            failing_pages: BTreeSet::new(),
            failing_children: BTreeSet::new(),
            failing_cursors: BTreeSet::new(),
            stuck_cursor: BTreeSet::new(),
            request_count: 0,
        }
    }

    pub fn add_page(&mut self, id: &str, title: &str) {
        self.pages.insert(id.to_string(), page(id, title));
    }

    pub fn add_child_page(&mut self, parent: &str, id: &str, title: &str) {
        self.add_page(id, title);
        self.add_block(parent, child_page_block(id, title));
    }

    pub fn add_block(&mut self, parent: &str, block: Block) {
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(block);
    }
}

impl PageTreeApi for MockApi {
    fn get_page(&mut self, page_id: &str) -> Result<PageMetadata> {
        self.request_count += 1;
        if self.failing_pages.contains(page_id) {
            bail!("page {page_id} is unavailable");
        }
        match self.pages.get(page_id) {
            Some(page) => Ok(page.clone()),
            None => bail!("page {page_id} not found"),
        }
    }

    fn list_children(
        &mut self,
        block_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<ChildrenPage> {
        self.request_count += 1;
        if self.failing_children.contains(block_id) {
            bail!("children of {block_id} are unavailable");
        }
        if self.stuck_cursor.contains(block_id) {
            return Ok(ChildrenPage {
                results: Vec::new(),
                has_more: true,
                next_cursor: None,
            });
        }
        if let Some(cursor) = start_cursor
            && self
                .failing_cursors
                .contains(&(block_id.to_string(), cursor.to_string()))
        {
            bail!("cursor {cursor} of {block_id} expired");
        }

        let offset = match start_cursor {
            Some(cursor) => cursor.parse::<usize>()?,
            None => 0,
        };
        let all = self.children.get(block_id).cloned().unwrap_or_default();
        let end = (offset + self.page_size).min(all.len());
        let results = all.get(offset..end).map(<[Block]>::to_vec).unwrap_or_default();
        let has_more = end < all.len();

        Ok(ChildrenPage {
            results,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Converter with canned bodies, independent of the block tree.
#[derive(Debug, Default)]
pub struct ScriptedConverter {
    pub bodies: BTreeMap<String, String>,
    pub failing: BTreeSet<String>,
    pub calls: Vec<String>,
}

impl PageConverter for ScriptedConverter {
    fn convert<A: PageTreeApi>(&mut self, _api: &mut A, page_id: &str) -> Result<String> {
        self.calls.push(page_id.to_string());
        if self.failing.contains(page_id) {
            bail!("conversion of {page_id} failed");
        }
        Ok(self
            .bodies
            .get(page_id)
            .cloned()
            .unwrap_or_else(|| format!("body of {page_id}\n")))
    }
}

pub fn page(id: &str, title: &str) -> PageMetadata {
    page_with_properties(
        id,
        json!({"title": {"id": "title", "type": "title", "title": [{"type": "text", "plain_text": title}]}}),
    )
}

pub fn page_with_properties(id: &str, properties: Value) -> PageMetadata {
    serde_json::from_value(json!({"object": "page", "id": id, "properties": properties}))
        .expect("page metadata")
}

pub fn block(id: &str, kind: &str, payload: Value) -> Block {
    let mut fields = Map::new();
    fields.insert(kind.to_string(), payload);
    Block {
        id: id.to_string(),
        kind: kind.to_string(),
        has_children: false,
        fields,
    }
}

pub fn text_block(id: &str, kind: &str, text: &str) -> Block {
    block(
        id,
        kind,
        json!({"rich_text": [{"type": "text", "plain_text": text}]}),
    )
}

pub fn parent_block(id: &str, kind: &str, text: &str) -> Block {
    let mut block = text_block(id, kind, text);
    block.has_children = true;
    block
}

pub fn child_page_block(id: &str, title: &str) -> Block {
    let mut block = block(id, CHILD_PAGE_TYPE, json!({"title": title}));
    block.has_children = true;
    block
}
