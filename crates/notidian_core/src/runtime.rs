use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{DEFAULT_CONFIG_FILENAME, NotidianConfig, load_config, normalize_page_id};
use crate::filesystem::display_path;
use crate::notion::NotionClientConfig;

pub const TOKEN_ENV: &str = "NOTION_TOKEN";
pub const ROOT_PAGE_ENV: &str = "NOTION_ROOT_PAGE_ID";
pub const VAULT_PATH_ENV: &str = "OBSIDIAN_VAULT_PATH";
pub const CONFIG_ENV: &str = "NOTIDIAN_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
    Missing,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingOverrides {
    pub config: Option<PathBuf>,
    pub vault_path: Option<PathBuf>,
    pub root_page_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Clone)]
pub struct ResolvedSettings {
    pub config_path: Option<PathBuf>,
    pub config_source: ValueSource,
    pub vault_root: Option<PathBuf>,
    pub vault_source: ValueSource,
    pub root_page_id: Option<String>,
    pub root_source: ValueSource,
    pub token: Option<String>,
    pub client: NotionClientConfig,
}

/// Everything a sync run needs, resolved once at startup.
#[derive(Clone)]
pub struct SyncConfig {
    pub token: String,
    pub root_page_id: String,
    pub vault_root: PathBuf,
    pub client: NotionClientConfig,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("token", &"<redacted>")
            .field("root_page_id", &self.root_page_id)
            .field("vault_root", &self.vault_root)
            .field("client", &self.client)
            .finish()
    }
}

impl ResolvedSettings {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\nvault_root={} ({})\nroot_page_id={} ({})\ntoken={}\napi_url={}\nnotion_version={}\npage_size={}\nrate_limit_ms={}\nmax_retries={}",
            self.config_path
                .as_deref()
                .map(display_path)
                .unwrap_or_else(|| "<none>".to_string()),
            self.config_source.as_str(),
            self.vault_root
                .as_deref()
                .map(display_path)
                .unwrap_or_else(|| "<missing>".to_string()),
            self.vault_source.as_str(),
            self.root_page_id.as_deref().unwrap_or("<missing>"),
            self.root_source.as_str(),
            if self.token.is_some() { "set" } else { "missing" },
            self.client.api_url,
            self.client.notion_version,
            self.client.page_size,
            self.client.rate_limit_ms,
            self.client.max_retries,
        )
    }

    pub fn require_vault_root(&self) -> Result<&Path> {
        self.vault_root.as_deref().ok_or_else(|| {
            anyhow::anyhow!("vault path is not configured (set {VAULT_PATH_ENV} or pass --vault)")
        })
    }

    /// Fails listing every missing required value, before any work starts.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        let mut missing = Vec::new();
        if self.token.is_none() {
            missing.push(TOKEN_ENV);
        }
        if self.root_page_id.is_none() {
            missing.push(ROOT_PAGE_ENV);
        }
        if self.vault_root.is_none() {
            missing.push(VAULT_PATH_ENV);
        }
        if !missing.is_empty() {
            bail!(
                "Missing required configuration: {}. Set them in the environment or a .env file.",
                missing.join(", ")
            );
        }

        let (Some(token), Some(root_page_id), Some(vault_root)) =
            (&self.token, &self.root_page_id, &self.vault_root)
        else {
            bail!("Missing required configuration");
        };

        Ok(SyncConfig {
            token: token.clone(),
            root_page_id: normalize_page_id(root_page_id)
                .with_context(|| format!("invalid {ROOT_PAGE_ENV}"))?,
            vault_root: vault_root.clone(),
            client: self.client.clone(),
        })
    }
}

pub fn resolve_settings(
    context: &ResolutionContext,
    overrides: &SettingOverrides,
) -> Result<ResolvedSettings> {
    resolve_settings_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_settings_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &SettingOverrides,
    lookup_env: F,
) -> Result<ResolvedSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (Some(absolutize(path, &context.cwd)), ValueSource::Flag)
    } else if let Some(value) = lookup(CONFIG_ENV) {
        (
            Some(absolutize(Path::new(&value), &context.cwd)),
            ValueSource::Env,
        )
    } else {
        let candidate = context.cwd.join(DEFAULT_CONFIG_FILENAME);
        if candidate.exists() {
            (Some(candidate), ValueSource::Default)
        } else {
            (None, ValueSource::Missing)
        }
    };

    let config = match &config_path {
        Some(path) if config_source != ValueSource::Default && !path.exists() => {
            bail!("config file not found: {}", display_path(path));
        }
        Some(path) => load_config(path)?,
        None => NotidianConfig::default(),
    };
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| context.cwd.clone());

    let (vault_root, vault_source) = if let Some(path) = overrides.vault_path.as_deref() {
        (Some(absolutize(path, &context.cwd)), ValueSource::Flag)
    } else if let Some(value) = lookup(VAULT_PATH_ENV) {
        (
            Some(absolutize(Path::new(&value), &context.cwd)),
            ValueSource::Env,
        )
    } else if let Some(path) = config.vault.path.as_deref() {
        (Some(absolutize(path, &config_dir)), ValueSource::Config)
    } else {
        (None, ValueSource::Missing)
    };

    let (root_page_id, root_source) = if let Some(value) = overrides
        .root_page_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        (Some(value.to_string()), ValueSource::Flag)
    } else if let Some(value) = lookup(ROOT_PAGE_ENV) {
        (Some(value), ValueSource::Env)
    } else if let Some(value) = config
        .notion
        .root_page_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        (Some(value.to_string()), ValueSource::Config)
    } else {
        (None, ValueSource::Missing)
    };

    let token = lookup(TOKEN_ENV);
    let client = NotionClientConfig::resolve(&config.notion, &lookup);

    Ok(ResolvedSettings {
        config_path,
        config_source,
        vault_root,
        vault_source,
        root_page_id,
        root_source,
        token,
        client,
    })
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
