use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::document::parse_document;

/// Every mirrored node, root included, lives in a file with this name.
pub const INDEX_FILENAME: &str = "index.md";
pub const UNTITLED: &str = "Untitled";

const BYTE_ORDER_MARK: char = '\u{feff}';
const ILLEGAL_SEGMENT_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Serialize)]
pub struct MirroredFile {
    pub relative_path: String,
    pub notion_id: Option<String>,
    pub last_sync: Option<String>,
    pub body_hash: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VaultScan {
    pub files: Vec<MirroredFile>,
    pub without_header: usize,
    pub duplicate_ids: BTreeMap<String, Vec<String>>,
}

/// Turn a display title into a single filesystem-legal path segment.
///
/// Illegal characters become `-`. Whitespace runs, byte order marks included,
/// collapse to one space and the result is trimmed. Empty input yields an empty segment; callers decide what
/// to do with it.
pub fn sanitize_segment(title: &str) -> String {
    let replaced = title
        .chars()
        .map(|ch| {
            if ILLEGAL_SEGMENT_CHARS.contains(&ch) {
                '-'
            } else if ch == BYTE_ORDER_MARK {
                ' '
            } else {
                ch
            }
        })
        .collect::<String>();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a sanitized segment can name a visible directory of its own.
/// Dot-prefixed names are refused: vault scans skip hidden entries.
pub fn is_placeable_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.starts_with('.')
}

pub fn relative_location(path: &[String]) -> String {
    let mut parts = path.iter().map(String::as_str).collect::<Vec<_>>();
    parts.push(INDEX_FILENAME);
    parts.join("/")
}

pub fn absolute_location(vault_root: &Path, path: &[String]) -> PathBuf {
    let mut output = vault_root.to_path_buf();
    for segment in path {
        output.push(segment);
    }
    output.push(INDEX_FILENAME);
    output
}

pub fn validate_scoped_path(vault_root: &Path, candidate: &Path) -> Result<()> {
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        vault_root.join(candidate)
    };
    let normalized = normalize_pathbuf(&absolute);
    let allowed = normalize_pathbuf(vault_root);
    if normalized.starts_with(&allowed) && normalized != allowed {
        return Ok(());
    }

    bail!(
        "path escapes the vault: {}\nvault root: {}",
        display_path(&normalized),
        display_path(&allowed)
    )
}

pub fn scan_vault(vault_root: &Path) -> Result<VaultScan> {
    let mut scan = VaultScan::default();
    if !vault_root.exists() {
        return Ok(scan);
    }

    let walker = WalkDir::new(vault_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", vault_root.display()))?;
        if !entry.file_type().is_file() || entry.file_name() != INDEX_FILENAME {
            continue;
        }
        let relative_path = relative_from_root(vault_root, entry.path())?;
        let content = match fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(error) => {
                warn!("skipping unreadable {relative_path}: {error}");
                continue;
            }
        };

        let (notion_id, last_sync, body_hash) = match parse_document(&content) {
            Ok(parsed) => {
                let body_hash = compute_hash(parsed.body);
                match parsed.frontmatter {
                    Some(frontmatter) => (
                        Some(frontmatter.notion_id),
                        Some(frontmatter.last_sync),
                        body_hash,
                    ),
                    None => (None, None, body_hash),
                }
            }
            Err(error) => {
                warn!("{relative_path}: {error:#}");
                (None, None, compute_hash(&content))
            }
        };
        if notion_id.is_none() {
            scan.without_header += 1;
        }

        scan.files.push(MirroredFile {
            relative_path,
            notion_id,
            last_sync,
            body_hash,
            bytes: content.len() as u64,
        });
    }

    let mut by_id: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for file in &scan.files {
        if let Some(id) = &file.notion_id {
            by_id
                .entry(id.clone())
                .or_default()
                .push(file.relative_path.clone());
        }
    }
    scan.duplicate_ids = by_id
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .collect();

    Ok(scan)
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))
}

pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

pub fn display_path(path: &Path) -> String {
    normalize_separators(&path.to_string_lossy())
}

fn relative_from_root(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    Ok(display_path(relative))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn normalize_pathbuf(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(std::path::MAIN_SEPARATOR_STR)),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
