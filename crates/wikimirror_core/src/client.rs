use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::MirrorConfig;

/// A non-redirect page as reported by the remote wiki.
#[derive(Debug, Clone)]
pub struct RemotePageInfo {
    pub title: String,
    pub touched: DateTime<Utc>,
    pub url: String,
}

/// An uploaded file as reported by the remote wiki.
#[derive(Debug, Clone)]
pub struct RemoteImageInfo {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
}

/// One redirect edge. `to_fragment` is set when the redirect points at a
/// section of the target page.
#[derive(Debug, Clone)]
pub struct RedirectRow {
    pub from: String,
    pub to: String,
    pub to_fragment: Option<String>,
}

/// Read-only view of the remote wiki. The mirror run loop and the redirect
/// loader go through this seam, so tests can substitute a mock.
pub trait WikiApi {
    fn list_pages(&mut self, namespace: i32) -> Result<Vec<RemotePageInfo>>;
    fn list_images(&mut self, max_bytes: u64) -> Result<Vec<RemoteImageInfo>>;
    fn list_redirects(&mut self, namespaces: &[i32]) -> Result<Vec<RedirectRow>>;
    fn fetch_text(&mut self, url: &str) -> Result<String>;
    fn fetch_bytes(&mut self, url: &str) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_env() -> Self {
        Self::from_env_with_defaults("", crate::config::DEFAULT_USER_AGENT)
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        let api_default = config.api_url_owned().unwrap_or_default();
        Self::from_env_with_defaults(&api_default, &config.user_agent())
    }

    fn from_env_with_defaults(api_url_default: &str, user_agent_default: &str) -> Self {
        Self {
            api_url: env_value("WIKI_API_URL", api_url_default),
            user_agent: env_value("WIKI_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("WIKI_RATE_LIMIT_MS", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn from_env() -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_env())
    }

    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_raw(&mut self, url: &str) -> Result<reqwest::blocking::Response> {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(url)
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("request for {url} failed with HTTP {status}");
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to fetch {url}"));
                }
            }
        }

        bail!("request for {url} exhausted retry budget")
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

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl WikiApi for MediaWikiClient {
    fn list_pages(&mut self, namespace: i32) -> Result<Vec<RemotePageInfo>> {
        let mut pages = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("generator", "allpages".to_string()),
                ("gapnamespace", namespace.to_string()),
                ("gapfilterredir", "nonredirects".to_string()),
                ("gaplimit", "500".to_string()),
                ("prop", "info".to_string()),
                ("inprop", "url".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("gapcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allpages API response")?;

            for item in parsed.query.pages {
                pages.push(RemotePageInfo {
                    title: item.title,
                    touched: item.touched,
                    url: item.full_url,
                });
            }

            continue_token = parsed.continuation.and_then(|cont| cont.gapcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(pages)
    }

    fn list_images(&mut self, max_bytes: u64) -> Result<Vec<RemoteImageInfo>> {
        let mut images = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allimages".to_string()),
                ("ailimit", "500".to_string()),
                ("aiprop", "timestamp|url".to_string()),
                ("aimaxsize", max_bytes.to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("aicontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allimages API response")?;

            for item in parsed.query.allimages {
                images.push(RemoteImageInfo {
                    name: item.name,
                    timestamp: item.timestamp,
                    url: item.url,
                });
            }

            continue_token = parsed.continuation.and_then(|cont| cont.aicontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(images)
    }

    fn list_redirects(&mut self, namespaces: &[i32]) -> Result<Vec<RedirectRow>> {
        let mut rows = Vec::new();

        for namespace in namespaces {
            let mut continue_token: Option<String> = None;
            loop {
                let mut params = vec![
                    ("action", "query".to_string()),
                    ("generator", "allpages".to_string()),
                    ("gapnamespace", namespace.to_string()),
                    ("gapfilterredir", "redirects".to_string()),
                    ("gaplimit", "500".to_string()),
                    ("redirects", "1".to_string()),
                ];
                if let Some(token) = &continue_token {
                    params.push(("gapcontinue", token.clone()));
                }

                let response = self.request_json_get(&params)?;
                let parsed: QueryResponse = serde_json::from_value(response)
                    .context("failed to decode redirects API response")?;

                for item in parsed.query.redirects {
                    rows.push(RedirectRow {
                        from: item.from,
                        to: item.to,
                        to_fragment: item.to_fragment,
                    });
                }

                continue_token = parsed.continuation.and_then(|cont| cont.gapcontinue);
                if continue_token.is_none() {
                    break;
                }
            }
        }

        Ok(rows)
    }

    fn fetch_text(&mut self, url: &str) -> Result<String> {
        self.request_raw(url)?
            .text()
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn fetch_bytes(&mut self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .request_raw(url)?
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageItem>,
    #[serde(default)]
    allimages: Vec<ImageItem>,
    #[serde(default)]
    redirects: Vec<RedirectItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    gapcontinue: Option<String>,
    aicontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    title: String,
    touched: DateTime<Utc>,
    #[serde(rename = "fullurl")]
    full_url: String,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    name: String,
    timestamp: DateTime<Utc>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RedirectItem {
    from: String,
    to: String,
    #[serde(default, rename = "tofragment")]
    to_fragment: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::QueryResponse;

    #[test]
    fn decodes_page_listing_with_continuation() {
        let payload = json!({
            "continue": { "gapcontinue": "Pacman", "continue": "gapcontinue||" },
            "query": {
                "pages": [
                    {
                        "pageid": 10,
                        "ns": 0,
                        "title": "Installation guide",
                        "touched": "2026-01-05T08:00:00Z",
                        "fullurl": "https://wiki.archlinux.org/title/Installation_guide"
                    }
                ]
            }
        });
        let parsed: QueryResponse =
            serde_json::from_value(payload).expect("payload should decode");
        assert_eq!(parsed.query.pages.len(), 1);
        assert_eq!(parsed.query.pages[0].title, "Installation guide");
        assert_eq!(
            parsed.continuation.and_then(|cont| cont.gapcontinue).as_deref(),
            Some("Pacman")
        );
    }

    #[test]
    fn decodes_redirect_rows_with_and_without_fragments() {
        let payload = json!({
            "query": {
                "redirects": [
                    { "from": "Grub", "to": "GRUB" },
                    { "from": "Swap file", "to": "Swap", "tofragment": "Swap file" }
                ]
            }
        });
        let parsed: QueryResponse =
            serde_json::from_value(payload).expect("payload should decode");
        assert_eq!(parsed.query.redirects.len(), 2);
        assert_eq!(parsed.query.redirects[0].to_fragment, None);
        assert_eq!(
            parsed.query.redirects[1].to_fragment.as_deref(),
            Some("Swap file")
        );
    }

    #[test]
    fn empty_query_decodes_to_defaults() {
        let payload = json!({ "batchcomplete": true });
        let parsed: QueryResponse =
            serde_json::from_value(payload).expect("payload should decode");
        assert!(parsed.query.pages.is_empty());
        assert!(parsed.query.allimages.is_empty());
        assert!(parsed.continuation.is_none());
    }
}
