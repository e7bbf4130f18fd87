use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {status} (anti-scraping: {anti_scraping})")]
    HttpStatus { status: u16, anti_scraping: bool },
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("denied by robots policy: {0}")]
    PolicyDenied(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("bad tool arguments: {0}")]
    Argument(String),
    #[error("upstream service failed: {0}")]
    Upstream(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// 403/429 responses are bot-detection pushback, retried on a gentler
    /// schedule than generic server errors.
    pub fn http_status(status: u16) -> Self {
        Error::HttpStatus {
            status,
            anti_scraping: matches!(status, 403 | 429),
        }
    }

    /// True when another attempt against the same URL can still succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::HttpStatus { status, .. } => *status == 403 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One tool invocation as requested by the model service. `arguments` is the
/// raw JSON string; it is parsed at most once via [`ToolCall::parse_arguments`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

impl ToolCall {
    pub fn parse_arguments(&self) -> Result<ToolArguments> {
        match serde_json::from_str::<serde_json::Value>(&self.arguments) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::Argument(format!(
                "expected a JSON object, got {other}"
            ))),
            Err(e) => Err(Error::Argument(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Pending,
    Fetching,
    Completed,
    Error,
}

impl FetchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FetchStatus::Completed | FetchStatus::Error)
    }
}

/// One search hit. Answer-box items arrive already terminal (`link` empty,
/// nothing to fetch); organic items start `pending` and are enriched in
/// place. `link` is the merge identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub title: String,
    pub content: String,
    pub link: String,
    pub is_answer_box: bool,
    pub needs_fetch: bool,
    pub fetch_status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attribution for answer-box content, when the provider names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResultItem {
    pub fn answer_box(title: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: answer.into(),
            link: String::new(),
            is_answer_box: true,
            needs_fetch: false,
            fetch_status: FetchStatus::Completed,
            description: None,
            source: None,
            error: None,
        }
    }

    pub fn organic(
        title: impl Into<String>,
        snippet: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: snippet.into(),
            link: link.into(),
            is_answer_box: false,
            needs_fetch: true,
            fetch_status: FetchStatus::Pending,
            description: None,
            source: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaperResult {
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: String,
    pub link: String,
    pub submitted_date: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetadata {
    pub retry_count: u32,
    /// Unix seconds at which the outcome was produced.
    pub fetch_timestamp: u64,
    pub content_length: usize,
    pub was_summarized: bool,
}

/// Terminal result of one fetch sequence (after internal retries). The fetch
/// engine returns this for every URL; it never surfaces an `Err` for
/// per-page trouble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub status: OutcomeStatus,
    pub title: String,
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub metadata: FetchMetadata,
}

impl FetchOutcome {
    pub fn success(
        title: String,
        description: String,
        content: String,
        retry_count: u32,
        was_summarized: bool,
    ) -> Self {
        let content_length = content.chars().count();
        Self {
            status: OutcomeStatus::Success,
            title,
            description,
            content,
            error_detail: None,
            metadata: FetchMetadata {
                retry_count,
                fetch_timestamp: unix_now(),
                content_length,
                was_summarized,
            },
        }
    }

    pub fn error(detail: String, retry_count: u32) -> Self {
        Self {
            status: OutcomeStatus::Error,
            title: String::new(),
            description: String::new(),
            content: String::new(),
            error_detail: Some(detail),
            metadata: FetchMetadata {
                retry_count,
                fetch_timestamp: unix_now(),
                content_length: 0,
                was_summarized: false,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FetchProgress {
    pub total: usize,
    pub completed: usize,
    pub percentage: f32,
}

impl FetchProgress {
    pub fn new(total: usize, completed: usize) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            (completed as f32 / total as f32) * 100.0
        };
        Self {
            total,
            completed,
            percentage,
        }
    }
}

/// Everything the server pushes to the client, in the order it happened.
/// The variant tag is the SSE event name; the payload is the `data:` JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        status: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<FetchProgress>,
    },
    SearchResults {
        status: String,
        results: Vec<SearchResultItem>,
        #[serde(rename = "isInitialResults")]
        is_initial_results: bool,
        message: String,
    },
    SearchResultUpdate {
        result: SearchResultItem,
    },
    ToolResult {
        tool_name: String,
        result: serde_json::Value,
    },
    Answer {
        status: String,
        content: String,
    },
    Complete {
        status: String,
        message: String,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn status(status: impl Into<String>, message: impl Into<String>) -> Self {
        StreamEvent::Status {
            status: status.into(),
            message: message.into(),
            progress: None,
        }
    }

    pub fn answer(content: impl Into<String>) -> Self {
        StreamEvent::Answer {
            status: "streaming".to_string(),
            content: content.into(),
        }
    }

    pub fn complete() -> Self {
        StreamEvent::Complete {
            status: "completed".to_string(),
            message: "Answer complete".to_string(),
        }
    }

    /// True for the two events after which nothing else may be emitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Wire description of one tool: name, natural-language description, and a
/// JSON-schema object for its parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What a tool produced. Search output flows through the per-item
/// enrichment pipeline; everything else is attached as one `tool_result`
/// event.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Search(Vec<SearchResultItem>),
    Papers(Vec<PaperResult>),
    Value(serde_json::Value),
}

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    fn schema(&self) -> &ToolSchema;
    async fn execute(&self, args: ToolArguments) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: "search_web".to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn malformed_arguments_are_an_argument_error_not_a_panic() {
        assert!(matches!(
            call("{not json").parse_arguments(),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            call("[1, 2]").parse_arguments(),
            Err(Error::Argument(_))
        ));
        let args = call(r#"{"query": "rust"}"#).parse_arguments().unwrap();
        assert_eq!(args["query"], "rust");
    }

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(Error::Transport("timeout".to_string()).is_retryable());
        assert!(Error::http_status(429).is_retryable());
        assert!(Error::http_status(403).is_retryable());
        assert!(Error::http_status(503).is_retryable());
        assert!(!Error::http_status(404).is_retryable());
        assert!(!Error::UnsupportedContent("application/pdf".to_string()).is_retryable());
        assert!(matches!(
            Error::http_status(429),
            Error::HttpStatus {
                anti_scraping: true,
                ..
            }
        ));
    }

    #[test]
    fn answer_box_items_are_born_terminal() {
        let item = SearchResultItem::answer_box("t", "a");
        assert!(item.fetch_status.is_terminal());
        assert!(!item.needs_fetch);
        assert!(item.link.is_empty());

        let organic = SearchResultItem::organic("t", "s", "https://x.test/");
        assert!(!organic.fetch_status.is_terminal());
        assert!(organic.needs_fetch);
    }

    #[test]
    fn stream_events_serialize_under_their_wire_tags() {
        let v = serde_json::to_value(StreamEvent::answer("hi")).unwrap();
        assert_eq!(v["event"], "answer");
        assert_eq!(v["data"]["status"], "streaming");

        let v = serde_json::to_value(StreamEvent::SearchResultUpdate {
            result: SearchResultItem::organic("t", "s", "https://x.test/"),
        })
        .unwrap();
        assert_eq!(v["event"], "search_result_update");
        assert_eq!(v["data"]["result"]["fetchStatus"], "pending");
    }

    #[test]
    fn progress_percentage_handles_the_empty_batch() {
        assert_eq!(FetchProgress::new(0, 0).percentage, 100.0);
        assert_eq!(FetchProgress::new(4, 1).percentage, 25.0);
    }
}
