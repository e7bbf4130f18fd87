use answerpipe_core::{Error, FetchOutcome};
use std::time::Duration;
use url::Url;

pub mod arxiv;
pub mod extract;
pub mod model;
pub mod ratelimit;
pub mod robots;
pub mod search;

use model::ModelClient;
use ratelimit::RateLimiter;

/// Desktop User-Agents rotated across retry attempts. A 403/429 on one UA
/// sometimes clears on the next.
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per URL, not extra attempts after the first.
    pub retry_count: u32,
    /// Base delay: anti-scraping retries wait `retry_delay × attempt`,
    /// generic retries wait `retry_delay × 2^attempt`.
    pub retry_delay: Duration,
    /// Minimum spacing between requests to one host.
    pub rate_limit_interval: Duration,
    /// Extracted content longer than this is summarized, worst case
    /// hard-truncated, to exactly this many chars.
    pub max_content_length: usize,
    pub request_timeout: Duration,
    pub robots_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            rate_limit_interval: Duration::from_secs(1),
            max_content_length: 2000,
            request_timeout: Duration::from_secs(10),
            robots_timeout: Duration::from_secs(5),
        }
    }
}

/// Resilient single-URL fetcher: robots gate, per-host rate limit, retry
/// with backoff, static content extraction, size-capped summarization.
///
/// `fetch` never returns `Err`; every failure mode lands in the returned
/// [`FetchOutcome`] so one bad page can never take down a batch. The rate
/// limiter is instance state, shared by whoever shares the engine.
#[derive(Debug)]
pub struct FetchEngine {
    client: reqwest::Client,
    config: FetchConfig,
    limiter: RateLimiter,
    summarizer: Option<ModelClient>,
}

impl FetchEngine {
    pub fn new(client: reqwest::Client, config: FetchConfig, summarizer: Option<ModelClient>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_interval);
        Self {
            client,
            config,
            limiter,
            summarizer,
        }
    }

    /// A reqwest client with the settings every outbound call here wants.
    /// Build one and share it across the engine and the API clients.
    pub fn default_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default()
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let parsed = match Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            Ok(u) => {
                return FetchOutcome::error(
                    Error::InvalidUrl(format!("unsupported scheme {}", u.scheme())).to_string(),
                    0,
                )
            }
            Err(e) => return FetchOutcome::error(Error::InvalidUrl(e.to_string()).to_string(), 0),
        };
        let host = parsed.host_str().unwrap_or_default().to_string();

        if !robots::path_allowed(&self.client, &parsed, self.config.robots_timeout).await {
            return FetchOutcome::error(
                Error::PolicyDenied(parsed.path().to_string()).to_string(),
                0,
            );
        }

        self.limiter.acquire(&host).await;

        let mut last_error = Error::Transport("no attempts made".to_string());
        let mut attempt = 0;
        while attempt < self.config.retry_count {
            attempt += 1;
            match self.attempt(&parsed, attempt).await {
                Ok(html) => return self.finish(html, attempt).await,
                Err(e) => {
                    let retryable = e.is_retryable();
                    tracing::debug!(url = %parsed, attempt, error = %e, retryable, "fetch attempt failed");
                    last_error = e;
                    if !retryable {
                        break;
                    }
                    if attempt < self.config.retry_count {
                        tokio::time::sleep(self.backoff(&last_error, attempt)).await;
                    }
                }
            }
        }
        tracing::warn!(url = %parsed, attempts = attempt, error = %last_error, "fetch gave up");
        FetchOutcome::error(last_error.to_string(), attempt)
    }

    /// One HTTP round trip. Non-HTML responses are unusable and fail without
    /// retry; that guard also catches the binary assets and app shells a
    /// JS-only site serves.
    async fn attempt(&self, url: &Url, attempt: u32) -> answerpipe_core::Result<String> {
        let ua = USER_AGENTS[((attempt - 1) as usize) % USER_AGENTS.len()];
        let resp = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, ua)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::http_status(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty()
            && !content_type.contains("text/html")
            && !content_type.contains("application/xhtml")
        {
            return Err(Error::UnsupportedContent(content_type));
        }

        resp.text().await.map_err(|e| Error::Transport(e.to_string()))
    }

    fn backoff(&self, error: &Error, attempt: u32) -> Duration {
        match error {
            // Bot-detection pushback gets the gentler linear schedule plus a
            // UA rotation on the next attempt.
            Error::HttpStatus {
                anti_scraping: true,
                ..
            } => self.config.retry_delay * attempt,
            _ => self.config.retry_delay * 2u32.saturating_pow(attempt),
        }
    }

    async fn finish(&self, html: String, attempts: u32) -> FetchOutcome {
        let page = extract::extract_main_content(&html);
        let (content, summarized) = self.cap_content(page.content).await;
        FetchOutcome::success(page.title, page.description, content, attempts, summarized)
    }

    /// Over-length content goes to the summarizer; any trouble there
    /// degrades to hard truncation. Never an error.
    async fn cap_content(&self, content: String) -> (String, bool) {
        let max = self.config.max_content_length;
        if content.chars().count() <= max {
            return (content, false);
        }
        if let Some(model) = &self.summarizer {
            match model.summarize(&content, max).await {
                Ok(summary) => return (summary, true),
                Err(e) => {
                    tracing::warn!(error = %e, "summarization failed, truncating");
                }
            }
        }
        (extract::truncate_to_chars(&content, max), false)
    }
}
