use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::discover::{Discovery, NodeRecord, PathCollision, discover};
use crate::document::{parse_document, render_document};
use crate::filesystem::{
    absolute_location, compute_hash, display_path, ensure_parent_dir, scan_vault,
    validate_scoped_path,
};
use crate::markdown::{MarkdownConverter, PageConverter};
use crate::notion::{NotionClient, PageTreeApi};
use crate::runtime::SyncConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Created,
    Updated,
    Unchanged,
    Skipped,
    Failed,
    WouldWrite,
}

impl PageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::WouldWrite => "would_write",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPageResult {
    pub page_id: String,
    pub title: String,
    pub relative_path: String,
    pub action: PageAction,
    pub detail: Option<String>,
}

/// A mirrored file whose id was not placed at that location by this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaleFile {
    pub relative_path: String,
    pub notion_id: String,
    /// Where the page lives now, when it was discovered under another path.
    pub current_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub dry_run: bool,
    pub discovered: usize,
    pub written: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub pages: Vec<SyncPageResult>,
    pub collisions: Vec<PathCollision>,
    pub stale: Vec<StaleFile>,
    pub request_count: usize,
}

impl SyncReport {
    fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            dry_run,
            discovered: 0,
            written: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
            errors: Vec::new(),
            pages: Vec::new(),
            collisions: Vec::new(),
            stale: Vec::new(),
            request_count: 0,
        }
    }

    fn record(&mut self, node: &NodeRecord, action: PageAction, detail: Option<String>) {
        match action {
            PageAction::Created => self.created += 1,
            PageAction::Updated => self.updated += 1,
            PageAction::Unchanged => self.unchanged += 1,
            PageAction::Skipped | PageAction::Failed => self.skipped += 1,
            PageAction::WouldWrite => {}
        }
        if matches!(
            action,
            PageAction::Created | PageAction::Updated | PageAction::Unchanged
        ) {
            self.written += 1;
        }
        self.pages.push(SyncPageResult {
            page_id: node.id.clone(),
            title: node.title.clone(),
            relative_path: node.relative_location(),
            action,
            detail,
        });
    }
}

pub fn sync_vault(config: &SyncConfig, options: &SyncOptions) -> Result<SyncReport> {
    let mut client = NotionClient::new(&config.token, config.client.clone())?;
    let mut converter = MarkdownConverter::default();
    sync_vault_with_api(
        &config.vault_root,
        &config.root_page_id,
        options,
        &mut client,
        &mut converter,
    )
}

pub fn sync_vault_with_api<A, C>(
    vault_root: &Path,
    root_page_id: &str,
    options: &SyncOptions,
    api: &mut A,
    converter: &mut C,
) -> Result<SyncReport>
where
    A: PageTreeApi,
    C: PageConverter,
{
    let mut report = SyncReport::new(options.dry_run);

    if !options.dry_run {
        fs::create_dir_all(vault_root)
            .with_context(|| format!("failed to create vault {}", vault_root.display()))?;
    }

    info!("discovering pages below {root_page_id}");
    let Discovery {
        records,
        failures,
        collisions,
    } = discover(api, root_page_id)?;
    report.discovered = records.len();
    report.collisions = collisions;
    for failure in &failures {
        report.errors.push(format!(
            "{}: {} lookup failed: {}",
            failure.page_id,
            failure.stage.as_str(),
            failure.message
        ));
    }
    info!("discovered {} pages", records.len());

    let synced_at = Utc::now();
    for node in &records {
        let relative_path = node.relative_location();
        if options.dry_run {
            report.record(node, PageAction::WouldWrite, None);
            continue;
        }

        info!("processing {relative_path}");
        let body = match converter.convert(api, &node.id) {
            Ok(body) => body,
            Err(error) => {
                warn!("skipping {relative_path}: {error:#}");
                report.errors.push(format!("{}: {error:#}", node.id));
                report.record(node, PageAction::Skipped, Some(format!("{error:#}")));
                continue;
            }
        };

        match write_mirrored_file(vault_root, node, synced_at, &body) {
            Ok(action) => report.record(node, action, None),
            Err(error) => {
                warn!("failed to write {relative_path}: {error:#}");
                report.errors.push(format!("{relative_path}: {error:#}"));
                report.record(node, PageAction::Failed, Some(format!("{error:#}")));
            }
        }
    }

    match find_stale_files(vault_root, &records) {
        Ok(stale) => {
            for file in &stale {
                warn!(
                    "stale mirrored file {} (notion_id {})",
                    file.relative_path, file.notion_id
                );
            }
            report.stale = stale;
        }
        Err(error) => warn!("failed to scan vault for stale files: {error:#}"),
    }

    report.request_count = api.request_count();
    report.success = report.errors.is_empty();
    info!(
        "sync finished: {} written, {} skipped, {} errors",
        report.written,
        report.skipped,
        report.errors.len()
    );
    Ok(report)
}

/// Overwrite the node's file in full and classify the change by body hash.
fn write_mirrored_file(
    vault_root: &Path,
    node: &NodeRecord,
    synced_at: DateTime<Utc>,
    body: &str,
) -> Result<PageAction> {
    let absolute_path = absolute_location(vault_root, &node.path);
    validate_scoped_path(vault_root, &absolute_path)?;
    ensure_parent_dir(&absolute_path)?;

    let action = match fs::read_to_string(&absolute_path) {
        Ok(existing) => match parse_document(&existing) {
            Ok(parsed)
                if parsed
                    .frontmatter
                    .as_ref()
                    .is_some_and(|header| header.notion_id == node.id)
                    && compute_hash(parsed.body) == compute_hash(body) =>
            {
                PageAction::Unchanged
            }
            _ => PageAction::Updated,
        },
        Err(_) => PageAction::Created,
    };

    fs::write(&absolute_path, render_document(&node.id, synced_at, body))
        .with_context(|| format!("failed to write {}", display_path(&absolute_path)))?;
    Ok(action)
}

fn find_stale_files(vault_root: &Path, records: &[NodeRecord]) -> Result<Vec<StaleFile>> {
    let placed = records
        .iter()
        .map(|node| (node.id.as_str(), node.relative_location()))
        .collect::<BTreeMap<_, _>>();

    let scan = scan_vault(vault_root)?;
    let mut stale = Vec::new();
    for file in scan.files {
        let Some(notion_id) = file.notion_id else {
            continue;
        };
        match placed.get(notion_id.as_str()) {
            Some(current) if *current == file.relative_path => {}
            current => stale.push(StaleFile {
                relative_path: file.relative_path,
                current_path: current.cloned(),
                notion_id,
            }),
        }
    }
    Ok(stale)
}
