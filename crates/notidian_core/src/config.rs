use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "notidian.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NotidianConfig {
    #[serde(default)]
    pub notion: NotionSection,
    #[serde(default)]
    pub vault: VaultSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct NotionSection {
    pub root_page_id: Option<String>,
    pub api_url: Option<String>,
    pub notion_version: Option<String>,
    pub user_agent: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct VaultSection {
    pub path: Option<PathBuf>,
}

/// Load and parse a config file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<NotidianConfig> {
    if !config_path.exists() {
        return Ok(NotidianConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: NotidianConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Accept a bare id, a dashed UUID or a page URL and return the dashed UUID.
pub fn normalize_page_id(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let last_segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_query);
    let compact = last_segment
        .chars()
        .filter(|ch| *ch != '-')
        .collect::<Vec<_>>();
    if compact.len() < 32 {
        bail!("not a Notion page id or URL: {trimmed}");
    }

    let hex = compact[compact.len() - 32..]
        .iter()
        .collect::<String>()
        .to_ascii_lowercase();
    if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        bail!("not a Notion page id or URL: {trimmed}");
    }

    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::{NotidianConfig, load_config, normalize_page_id};

    #[test]
    fn missing_config_file_yields_defaults() {
        let temp = tempdir().expect("tempdir");
        let config = load_config(&temp.path().join("notidian.toml")).expect("load");
        assert_eq!(config, NotidianConfig::default());
    }

    #[test]
    fn config_file_sections_are_parsed() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notidian.toml");
        fs::write(
            &path,
            "[notion]\nroot_page_id = \"0123456789abcdef0123456789abcdef\"\npage_size = 25\n\n[vault]\npath = \"/srv/vault\"\n",
        )
        .expect("write config");

        let config = load_config(&path).expect("load");
        assert_eq!(
            config.notion.root_page_id.as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
        assert_eq!(config.notion.page_size, Some(25));
        assert_eq!(config.vault.path, Some(PathBuf::from("/srv/vault")));
        assert!(config.notion.api_url.is_none());
    }

    #[test]
    fn invalid_config_reports_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("notidian.toml");
        fs::write(&path, "[notion\n").expect("write config");
        let error = load_config(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn page_ids_normalize_from_ids_and_urls() {
        let expected = "01234567-89ab-cdef-0123-456789abcdef";
        for input in [
            "0123456789abcdef0123456789abcdef",
            "01234567-89ab-cdef-0123-456789abcdef",
            " 0123456789ABCDEF0123456789ABCDEF ",
            "https://www.notion.so/acme/Team-Wiki-0123456789abcdef0123456789abcdef",
            "https://www.notion.so/Team-Wiki-0123456789abcdef0123456789abcdef?pvs=4#section",
        ] {
            assert_eq!(normalize_page_id(input).expect("normalize"), expected, "input={input}");
        }
    }

    #[test]
    fn page_id_normalization_rejects_garbage() {
        for input in ["", "root", "https://www.notion.so/Team-Wiki", "zz23456789abcdef0123456789abcdef"] {
            assert!(normalize_page_id(input).is_err(), "input={input}");
        }
    }
}
