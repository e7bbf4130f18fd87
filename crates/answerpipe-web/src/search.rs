use answerpipe_core::{Error, Result, SearchResultItem};
use serde::Deserialize;
use std::time::Duration;

fn serper_api_key_from_env() -> Option<String> {
    std::env::var("ANSWERPIPE_SERPER_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            std::env::var("SERPER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}

fn serper_endpoint_from_env() -> Option<String> {
    std::env::var("ANSWERPIPE_SERPER_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Organic results requested and kept, after the answer box.
    pub result_count: usize,
    /// Interface language hint (`hl`).
    pub locale: String,
    /// Region hint (`gl`).
    pub region: String,
    /// Freshness window (`tbs`); the default keeps results within a year.
    pub freshness: String,
    pub timeout: Duration,
}

impl SearchConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            endpoint: SerperClient::default_endpoint(),
            api_key,
            result_count: 10,
            locale: "en".to_string(),
            region: "us".to_string(),
            freshness: "qdr:y".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerperClient {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SerperClient {
    pub fn new(client: reqwest::Client, config: SearchConfig) -> Self {
        Self { client, config }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serper_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing ANSWERPIPE_SERPER_API_KEY (or SERPER_API_KEY)".to_string(),
            )
        })?;
        let mut config = SearchConfig::new(api_key);
        if let Some(endpoint) = serper_endpoint_from_env() {
            config.endpoint = endpoint;
        }
        Ok(Self::new(client, config))
    }

    fn default_endpoint() -> String {
        "https://google.serper.dev/search".to_string()
    }

    /// Runs one web search. The answer box, when present, leads the list as
    /// an already-terminal item; organic hits follow in provider order,
    /// marked for fetching.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResultItem>> {
        let body = serde_json::json!({
            "q": query,
            "num": self.config.result_count,
            "hl": self.config.locale,
            "gl": self.config.region,
            "tbs": self.config.freshness,
        });

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("X-API-KEY", &self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("serper search HTTP {status}")));
        }

        let parsed: SerperResponse = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(into_items(parsed, self.config.result_count))
    }
}

fn into_items(parsed: SerperResponse, limit: usize) -> Vec<SearchResultItem> {
    let mut out = Vec::new();
    if let Some(b) = parsed.answer_box {
        let mut item = SearchResultItem::answer_box(
            b.title.unwrap_or_default(),
            b.answer.unwrap_or_default(),
        );
        item.source = b.source.filter(|s| !s.is_empty());
        out.push(item);
    }
    for r in parsed.organic.into_iter().take(limit) {
        // A hit without a link cannot be fetched or merged; drop it.
        let Some(link) = r.link.filter(|l| !l.is_empty()) else {
            continue;
        };
        out.push(SearchResultItem::organic(
            r.title.unwrap_or_default(),
            r.snippet.unwrap_or_default(),
            link,
        ));
    }
    out
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(rename = "answerBox")]
    answer_box: Option<SerperAnswerBox>,
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperAnswerBox {
    title: Option<String>,
    answer: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    title: Option<String>,
    snippet: Option<String>,
    link: Option<String>,
}
