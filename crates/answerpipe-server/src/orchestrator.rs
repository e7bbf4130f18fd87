//! The per-request state machine: tool-necessity check, tool dispatch,
//! context assembly, answer streaming, one terminal event.

use crate::coordinator::FanOutCoordinator;
use crate::registry::ToolRegistry;
use answerpipe_core::{
    Error, FetchStatus, PaperResult, SearchResultItem, StreamEvent, ToolOutput,
};
use answerpipe_web::model::{ChatMessage, ModelClient};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// The only error text a client ever sees; internals stay in the logs.
const GENERIC_ERROR: &str = "Something went wrong while answering. Please try again.";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub request_id: String,
    /// `None` enables every registered tool.
    pub enabled_tools: Option<Vec<String>>,
}

pub struct Orchestrator {
    model: ModelClient,
    registry: Arc<ToolRegistry>,
    coordinator: FanOutCoordinator,
}

impl Orchestrator {
    pub fn new(
        model: ModelClient,
        registry: Arc<ToolRegistry>,
        coordinator: FanOutCoordinator,
    ) -> Self {
        Self {
            model,
            registry,
            coordinator,
        }
    }

    /// Drive one request to its terminal event. Exactly one `complete` or
    /// `error` is emitted unless `cancel` fires first, in which case the
    /// stream just stops. Send failures mean the client is gone and are
    /// ignored; the cancellation token is the real disconnect signal.
    pub async fn run(
        &self,
        request: ChatRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!(request_id = %request.request_id, "request accepted");
        let _ = events
            .send(StreamEvent::status("generating", "Analyzing the question..."))
            .await;

        let schemas = self.registry.schemas(request.enabled_tools.as_deref());
        let user = ChatMessage::user(request.message.clone());

        let verdict = self
            .model
            .check_tool_calls(std::slice::from_ref(&user), &schemas)
            .await;
        if cancel.is_cancelled() {
            return;
        }
        let calls = match verdict {
            Ok(calls) => calls,
            Err(e) => {
                return self.fail(&events, &request.request_id, e).await;
            }
        };

        let mut context = String::new();
        if let Some(calls) = calls {
            tracing::info!(request_id = %request.request_id, count = calls.len(), "tool calls requested");
            match self.execute_tools(&request, calls, &events, &cancel).await {
                Ok(built) => context = built,
                Err(e) => return self.fail(&events, &request.request_id, e).await,
            }
            if cancel.is_cancelled() {
                return;
            }
        }

        let _ = events
            .send(StreamEvent::status("generating", "Generating the answer..."))
            .await;
        let mut messages = Vec::new();
        if !context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Answer the user's question using the reference material below. \
                 Prefer it over your own knowledge when they conflict, and say \
                 so when it does not cover the question.\n\n{context}"
            )));
        }
        messages.push(user);

        let mut rx = match self.model.chat_stream(&messages).await {
            Ok(rx) => rx,
            Err(e) => return self.fail(&events, &request.request_id, e).await,
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                delta = rx.recv() => match delta {
                    Some(Ok(content)) => {
                        let _ = events.send(StreamEvent::answer(content)).await;
                    }
                    Some(Err(e)) => {
                        return self.fail(&events, &request.request_id, e).await;
                    }
                    None => break,
                },
            }
        }

        tracing::info!(request_id = %request.request_id, "request complete");
        let _ = events.send(StreamEvent::complete()).await;
    }

    /// Dispatch every requested call, stream search enrichment, and return
    /// the assembled context block. Malformed arguments and unknown names
    /// skip that call; an upstream service failure aborts the request.
    async fn execute_tools(
        &self,
        request: &ChatRequest,
        calls: Vec<answerpipe_core::ToolCall>,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> answerpipe_core::Result<String> {
        let items: Arc<Mutex<Vec<SearchResultItem>>> = Arc::new(Mutex::new(Vec::new()));
        let mut papers: Vec<PaperResult> = Vec::new();
        let mut other: Vec<(String, serde_json::Value)> = Vec::new();
        let enabled: Vec<String> = self
            .registry
            .schemas(request.enabled_tools.as_deref())
            .into_iter()
            .map(|s| s.name)
            .collect();

        for call in calls {
            if cancel.is_cancelled() {
                return Ok(String::new());
            }
            if !enabled.iter().any(|n| n == &call.name) {
                tracing::warn!(tool = %call.name, "skipping call to unknown or disabled tool");
                continue;
            }
            let args = match call.parse_arguments() {
                Ok(args) => args,
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "skipping call with malformed arguments");
                    continue;
                }
            };
            // The registry only holds enabled names checked above.
            let Some(handler) = self.registry.get(&call.name) else {
                continue;
            };

            if call.name == crate::registry::SEARCH_WEB {
                let _ = events
                    .send(StreamEvent::status("searching", "Searching the web..."))
                    .await;
            }
            let output = match handler.execute(args).await {
                Ok(output) => output,
                // The web-search backbone failing leaves nothing to ground
                // the answer on; any other tool's failure is its own loss.
                Err(e @ Error::Upstream(_)) if call.name == crate::registry::SEARCH_WEB => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed, continuing");
                    continue;
                }
            };
            match output {
                ToolOutput::Search(new_items) => {
                    let snapshot = {
                        let mut items = items.lock().await;
                        items.extend(new_items);
                        items.clone()
                    };
                    let count = snapshot.len();
                    let _ = events
                        .send(StreamEvent::SearchResults {
                            status: "success".to_string(),
                            results: snapshot,
                            is_initial_results: true,
                            message: format!("Found {count} results"),
                        })
                        .await;
                }
                ToolOutput::Papers(found) => {
                    let _ = events
                        .send(StreamEvent::ToolResult {
                            tool_name: call.name.clone(),
                            result: serde_json::json!({ "papers": found }),
                        })
                        .await;
                    papers.extend(found);
                }
                ToolOutput::Value(value) => {
                    let _ = events
                        .send(StreamEvent::ToolResult {
                            tool_name: call.name.clone(),
                            result: value.clone(),
                        })
                        .await;
                    other.push((call.name.clone(), value));
                }
            }
        }

        let needs_enrichment = items
            .lock()
            .await
            .iter()
            .any(|i| i.needs_fetch && i.fetch_status == FetchStatus::Pending);
        if needs_enrichment {
            let (batch_tx, mut batch_rx) = mpsc::channel(32);
            let coordinator = self.coordinator.clone();
            let batch_items = items.clone();
            let batch_cancel = cancel.clone();
            let batch = tokio::spawn(async move {
                coordinator.enrich(batch_items, batch_tx, batch_cancel).await;
            });
            // The phase flip to "parsing" rides just ahead of the first
            // update, once page work is actually observable.
            let mut announced = false;
            while let Some(event) = batch_rx.recv().await {
                if !announced {
                    announced = true;
                    let _ = events
                        .send(StreamEvent::status("parsing", "Reading pages..."))
                        .await;
                }
                let _ = events.send(event).await;
            }
            let _ = batch.await;
        }

        let items = items.lock().await;
        Ok(build_context(&items, &papers, &other))
    }

    async fn fail(
        &self,
        events: &mpsc::Sender<StreamEvent>,
        request_id: &str,
        error: Error,
    ) {
        tracing::error!(request_id, error = %error, "request failed");
        let _ = events
            .send(StreamEvent::Error {
                error: GENERIC_ERROR.to_string(),
            })
            .await;
    }
}

/// Assemble the grounding context in fixed priority order: answer boxes,
/// then organic results (fetched body over snippet), then papers, then any
/// other tool output. Empty sections are omitted entirely.
pub fn build_context(
    items: &[SearchResultItem],
    papers: &[PaperResult],
    other: &[(String, serde_json::Value)],
) -> String {
    let mut sections: Vec<String> = Vec::new();

    let boxes: Vec<&SearchResultItem> = items.iter().filter(|i| i.is_answer_box).collect();
    if !boxes.is_empty() {
        let mut s = String::from("[Key reference]");
        for b in boxes {
            s.push('\n');
            if !b.title.is_empty() {
                s.push_str(&format!("{}\n", b.title));
            }
            s.push_str(&b.content);
            if let Some(source) = &b.source {
                s.push_str(&format!("\n(Source: {source})"));
            }
        }
        sections.push(s);
    }

    let organic: Vec<&SearchResultItem> = items.iter().filter(|i| !i.is_answer_box).collect();
    if !organic.is_empty() {
        let mut s = String::from("[Search results]");
        for item in organic {
            s.push_str(&format!("\nTitle: {}\nLink: {}\n", item.title, item.link));
            if item.fetch_status == FetchStatus::Completed && !item.content.is_empty() {
                s.push_str(&format!("Body: {}\n", item.content));
            } else {
                s.push_str(&format!("Snippet: {}\n", item.content));
            }
        }
        sections.push(s);
    }

    if !papers.is_empty() {
        let mut s = String::from("[Paper search results]");
        for p in papers {
            s.push_str(&format!(
                "\nTitle: {}\nAuthors: {}\nSubmitted: {}\nAbstract: {}\nLink: {}\n",
                p.title,
                p.authors.join(", "),
                p.submitted_date,
                p.abstract_text,
                p.link
            ));
        }
        sections.push(s);
    }

    if !other.is_empty() {
        let mut s = String::from("[Tool results]");
        for (name, value) in other {
            s.push_str(&format!("\n{name}: {value}\n"));
        }
        sections.push(s);
    }

    sections.join("\n\n")
}
