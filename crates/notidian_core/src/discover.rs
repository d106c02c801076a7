//! Pre-order discovery of a page tree.
//!
//! Traversal is iterative: frames are pushed in reverse sibling order so the
//! pop order matches a recursive depth-first walk. Each node claims its
//! directory segment when it is popped, so the first sibling in pre-order
//! keeps the plain sanitized title and later duplicates get an id suffix.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::filesystem::{
    INDEX_FILENAME, UNTITLED, is_placeable_segment, relative_location, sanitize_segment,
};
use crate::notion::{CHILD_PAGE_TYPE, PageMetadata, PageTreeApi, list_all_children};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub id: String,
    pub title: String,
    /// Segments below the vault root; empty for the root page.
    pub path: Vec<String>,
}

impl NodeRecord {
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn relative_location(&self) -> String {
        relative_location(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStage {
    Title,
    Children,
}

impl DiscoveryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Children => "children",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryFailure {
    pub page_id: String,
    pub stage: DiscoveryStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCollision {
    pub page_id: String,
    pub title: String,
    pub wanted: String,
    pub placed: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub records: Vec<NodeRecord>,
    pub failures: Vec<DiscoveryFailure>,
    pub collisions: Vec<PathCollision>,
}

struct Frame {
    page_id: String,
    parent_path: Vec<String>,
    is_root: bool,
}

/// Walk the tree below `root_id`.
///
/// Only a failure to resolve the root page itself is returned as an error.
/// Any other node failure is recorded in [`Discovery::failures`] and the
/// node's subtree is dropped while its siblings continue.
pub fn discover<A: PageTreeApi + ?Sized>(api: &mut A, root_id: &str) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    let mut seen = HashSet::new();
    let mut claimed = HashSet::new();
    let mut stack = vec![Frame {
        page_id: root_id.to_string(),
        parent_path: Vec::new(),
        is_root: true,
    }];

    while let Some(frame) = stack.pop() {
        if !seen.insert(frame.page_id.clone()) {
            warn!("page {} was reached twice; skipping repeat visit", frame.page_id);
            continue;
        }

        let title = match resolve_title(api, &frame.page_id) {
            Ok(title) => title,
            Err(error) if frame.is_root => {
                return Err(error).context(format!("failed to resolve root page {root_id}"));
            }
            Err(error) => {
                warn!("skipping subtree of {}: {error:#}", frame.page_id);
                discovery.failures.push(DiscoveryFailure {
                    page_id: frame.page_id,
                    stage: DiscoveryStage::Title,
                    message: format!("{error:#}"),
                });
                continue;
            }
        };

        let path = if frame.is_root {
            Vec::new()
        } else {
            let sanitized = sanitize_segment(&title);
            let wanted = placeable_segment(&sanitized);
            let placed = claim_segment(&frame.parent_path, &wanted, &frame.page_id, &mut claimed);
            if placed != wanted || (placed != sanitized && !sanitized.is_empty()) {
                let shown = if sanitized.is_empty() { &wanted } else { &sanitized };
                let collision = PathCollision {
                    page_id: frame.page_id.clone(),
                    title: title.clone(),
                    wanted: joined(&frame.parent_path, shown),
                    placed: joined(&frame.parent_path, &placed),
                };
                warn!(
                    "path collision: {} already taken, placing {} at {}",
                    collision.wanted, collision.page_id, collision.placed
                );
                discovery.collisions.push(collision);
            }
            let mut path = frame.parent_path;
            path.push(placed);
            path
        };

        debug!("discovered {} ({})", relative_location(&path), frame.page_id);
        discovery.records.push(NodeRecord {
            id: frame.page_id.clone(),
            title,
            path: path.clone(),
        });

        let children = match list_all_children(api, &frame.page_id) {
            Ok(children) => children,
            Err(error) => {
                warn!("skipping children of {}: {error:#}", frame.page_id);
                discovery.failures.push(DiscoveryFailure {
                    page_id: frame.page_id,
                    stage: DiscoveryStage::Children,
                    message: format!("{error:#}"),
                });
                continue;
            }
        };

        let child_ids = children
            .into_iter()
            .filter(|block| block.kind == CHILD_PAGE_TYPE)
            .map(|block| block.id)
            .collect::<Vec<_>>();
        for child_id in child_ids.into_iter().rev() {
            stack.push(Frame {
                page_id: child_id,
                parent_path: path.clone(),
                is_root: false,
            });
        }
    }

    Ok(discovery)
}

pub fn resolve_title<A: PageTreeApi + ?Sized>(api: &mut A, page_id: &str) -> Result<String> {
    let page = api
        .get_page(page_id)
        .with_context(|| format!("failed to fetch page {page_id}"))?;
    Ok(page_title(&page))
}

/// The property literally named `title` wins; otherwise the first title-typed
/// property in key order. Properties without text runs are passed over.
pub fn page_title(page: &PageMetadata) -> String {
    let has_runs = |property: &&crate::notion::PageProperty| {
        property.is_title() && !property.title.is_empty()
    };
    let property = page
        .properties
        .get("title")
        .filter(has_runs)
        .or_else(|| page.properties.values().find(has_runs));

    match property {
        Some(property) => property
            .title
            .iter()
            .map(|run| run.plain_text.as_str())
            .collect(),
        None => UNTITLED.to_string(),
    }
}

/// Dot-only names become `Untitled`; other dot-prefixed names get a `_` so the
/// directory is neither hidden nor mistaken for vault configuration.
fn placeable_segment(sanitized: &str) -> String {
    if is_placeable_segment(sanitized) {
        sanitized.to_string()
    } else if sanitized.trim_start_matches('.').is_empty() {
        UNTITLED.to_string()
    } else {
        format!("_{sanitized}")
    }
}

fn claim_segment(
    parent_path: &[String],
    wanted: &str,
    page_id: &str,
    claimed: &mut HashSet<String>,
) -> String {
    let compact = page_id.replace('-', "");
    let short = compact.chars().take(SHORT_ID_LEN).collect::<String>();
    let candidates = [
        wanted.to_string(),
        format!("{wanted} {short}"),
        format!("{wanted} {compact}"),
    ];
    for candidate in candidates {
        if try_claim(parent_path, &candidate, claimed) {
            return candidate;
        }
    }

    let mut counter = 2usize;
    loop {
        let candidate = format!("{wanted} {compact} {counter}");
        if try_claim(parent_path, &candidate, claimed) {
            return candidate;
        }
        counter += 1;
    }
}

/// Sibling names compare case-insensitively, and `index.md` is never free.
fn try_claim(parent_path: &[String], segment: &str, claimed: &mut HashSet<String>) -> bool {
    if segment.eq_ignore_ascii_case(INDEX_FILENAME) {
        return false;
    }
    claimed.insert(joined(parent_path, segment).to_lowercase())
}

fn joined(parent_path: &[String], segment: &str) -> String {
    let mut parts = parent_path.iter().map(String::as_str).collect::<Vec<_>>();
    parts.push(segment);
    parts.join("/")
}
