use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::{RETRY_AFTER, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::NotionSection;

pub const DEFAULT_API_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
pub const DEFAULT_USER_AGENT: &str = "notidian/0.1";
pub const MAX_PAGE_SIZE: usize = 100;
pub const CHILD_PAGE_TYPE: &str = "child_page";
pub const TITLE_PROPERTY_TYPE: &str = "title";

#[derive(Debug, Clone, Deserialize)]
pub struct PageMetadata {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PageProperty>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageProperty {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Vec<RichText>,
}

impl PageProperty {
    pub fn is_title(&self) -> bool {
        self.kind == TITLE_PROPERTY_TYPE
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RichText {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub code: bool,
}

/// One child block. The type-specific payload sits under the key named by
/// `kind`, the same way the API nests it.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Block {
    pub fn payload(&self) -> Option<&Value> {
        self.fields.get(&self.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildrenPage {
    #[serde(default)]
    pub results: Vec<Block>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

pub trait PageTreeApi {
    fn get_page(&mut self, page_id: &str) -> Result<PageMetadata>;
    fn list_children(&mut self, block_id: &str, start_cursor: Option<&str>)
    -> Result<ChildrenPage>;
    fn request_count(&self) -> usize;
}

/// Follow `next_cursor` until the provider reports no further pages.
pub fn list_all_children<A: PageTreeApi + ?Sized>(api: &mut A, block_id: &str) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = api.list_children(block_id, cursor.as_deref())?;
        blocks.extend(page.results);
        if !page.has_more {
            break;
        }
        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => bail!("children listing for {block_id} reported more results without a new cursor"),
        }
    }

    Ok(blocks)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionClientConfig {
    pub api_url: String,
    pub notion_version: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Upper bound for a server-requested `Retry-After` wait.
    pub max_retry_after_ms: u64,
    pub page_size: usize,
}

impl Default for NotionClientConfig {
    fn default() -> Self {
        Self::resolve(&NotionSection::default(), |_| None)
    }
}

impl NotionClientConfig {
    /// Resolve each value as env > config file > built-in default.
    pub fn resolve<F>(section: &NotionSection, lookup_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, file: Option<&String>, default: &str| {
            non_empty(lookup_env(key))
                .or_else(|| file.cloned())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| {
            non_empty(lookup_env(key))
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let page_size = non_empty(lookup_env("NOTION_PAGE_SIZE"))
            .and_then(|value| value.parse::<usize>().ok())
            .or(section.page_size)
            .unwrap_or(MAX_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        Self {
            api_url: text("NOTION_API_URL", section.api_url.as_ref(), DEFAULT_API_URL),
            notion_version: text(
                "NOTION_VERSION",
                section.notion_version.as_ref(),
                DEFAULT_NOTION_VERSION,
            ),
            user_agent: text(
                "NOTION_USER_AGENT",
                section.user_agent.as_ref(),
                DEFAULT_USER_AGENT,
            ),
            timeout_ms: number("NOTION_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: number("NOTION_RATE_LIMIT_MS", 350),
            max_retries: usize::try_from(number("NOTION_HTTP_RETRIES", 3)).unwrap_or(3),
            retry_delay_ms: number("NOTION_HTTP_RETRY_DELAY_MS", 500),
            max_retry_after_ms: number("NOTION_MAX_RETRY_AFTER_MS", 60_000),
            page_size,
        }
    }
}

pub struct NotionClient {
    client: Client,
    config: NotionClientConfig,
    token: String,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl NotionClient {
    pub fn new(token: &str, config: NotionClientConfig) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("a Notion integration token is required");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Notion HTTP client")?;

        Ok(Self {
            client,
            config,
            token: token.trim().to_string(),
            last_request_at: None,
            request_count: 0,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}/{}", self.config.api_url.trim_end_matches('/'), path);
        Url::parse(&raw).with_context(|| format!("invalid Notion API URL: {raw}"))
    }

    fn request_json<T: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path)?;

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&self.token)
                .header("Notion-Version", self.config.notion_version.clone())
                .header(USER_AGENT, self.config.user_agent.clone())
                .query(query)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let retry_after = response
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|value| value.to_str().ok())
                            .and_then(|value| value.trim().parse::<u64>().ok())
                            .map(Duration::from_secs);
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            debug!("retrying {path} after HTTP {status} (attempt {attempt})");
                            self.wait_before_retry(attempt, retry_after);
                            continue;
                        }
                        let payload = response.json::<Value>().unwrap_or(Value::Null);
                        let code = payload
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let message = payload
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("no message");
                        bail!("Notion API error [{code}] (HTTP {status}): {message}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode Notion API JSON response")?;
                    return serde_json::from_value(payload)
                        .with_context(|| format!("unexpected Notion API payload for {path}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        debug!("retrying {path} after transport error: {error}");
                        self.wait_before_retry(attempt, None);
                        continue;
                    }
                    return Err(error).context("failed to call Notion API");
                }
            }
        }

        bail!("Notion API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, retry_after: Option<Duration>) {
        let jitter_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(retry_delay(&self.config, attempt, retry_after, jitter_ms));
    }
}

/// `Retry-After` wins when present, capped at `max_retry_after_ms`; otherwise
/// exponential backoff plus jitter.
fn retry_delay(
    config: &NotionClientConfig,
    attempt: usize,
    retry_after: Option<Duration>,
    jitter_ms: u64,
) -> Duration {
    if let Some(wait) = retry_after {
        return wait.min(Duration::from_millis(config.max_retry_after_ms));
    }
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = config
        .retry_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(base.saturating_add(jitter_ms))
}

impl PageTreeApi for NotionClient {
    fn get_page(&mut self, page_id: &str) -> Result<PageMetadata> {
        self.request_json(&format!("pages/{page_id}"), &[])
    }

    fn list_children(
        &mut self,
        block_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<ChildrenPage> {
        let mut query = vec![("page_size", self.config.page_size.to_string())];
        if let Some(cursor) = start_cursor {
            query.push(("start_cursor", cursor.to_string()));
        }
        self.request_json(&format!("blocks/{block_id}/children"), &query)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
