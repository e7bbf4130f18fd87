//! Tool registration and dispatch.
//!
//! Tools are registered explicitly at startup as trait objects; there is no
//! dynamic lookup beyond resolving the name the model service asked for
//! against this fixed set.

use answerpipe_core::{Error, Result, ToolArguments, ToolHandler, ToolOutput, ToolSchema};
use answerpipe_web::arxiv::ArxivClient;
use answerpipe_web::search::SerperClient;

pub const SEARCH_WEB: &str = "search_web";
pub const SEARCH_ARXIV: &str = "search_arxiv";

#[derive(Default)]
pub struct ToolRegistry {
    handlers: Vec<Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        self.handlers.push(handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.handlers
            .iter()
            .find(|h| h.schema().name == name)
            .map(|h| h.as_ref())
    }

    /// Schemas advertised to the model service. `enabled = None` means every
    /// registered tool; otherwise only the named ones, unknown names ignored.
    pub fn schemas(&self, enabled: Option<&[String]>) -> Vec<ToolSchema> {
        self.handlers
            .iter()
            .map(|h| h.schema())
            .filter(|s| match enabled {
                None => true,
                Some(names) => names.iter().any(|n| n == &s.name),
            })
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn required_str(args: &ToolArguments, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Argument(format!("missing required string argument `{key}`")))
}

fn query_schema(name: &str, description: &str) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query",
                }
            },
            "required": ["query"],
        }),
    }
}

/// Web search via the Serper-shaped API. Its output flows through the
/// per-item enrichment pipeline rather than a single tool_result event.
pub struct WebSearchTool {
    client: SerperClient,
    schema: ToolSchema,
}

impl WebSearchTool {
    pub fn new(client: SerperClient) -> Self {
        Self {
            client,
            schema: query_schema(
                SEARCH_WEB,
                "Search the web for current information. Use for questions about \
                 recent events, facts, or anything outside your training data.",
            ),
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for WebSearchTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: ToolArguments) -> Result<ToolOutput> {
        let query = required_str(&args, "query")?;
        let items = self.client.search(&query).await?;
        Ok(ToolOutput::Search(items))
    }
}

/// Academic paper search against the arXiv listing page.
pub struct ArxivSearchTool {
    client: ArxivClient,
    schema: ToolSchema,
}

impl ArxivSearchTool {
    pub fn new(client: ArxivClient) -> Self {
        Self {
            client,
            schema: query_schema(
                SEARCH_ARXIV,
                "Search arXiv for academic papers. Use for questions about \
                 research, papers, or scientific literature.",
            ),
        }
    }
}

#[async_trait::async_trait]
impl ToolHandler for ArxivSearchTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn execute(&self, args: ToolArguments) -> Result<ToolOutput> {
        let query = required_str(&args, "query")?;
        let papers = self.client.search(&query).await?;
        Ok(ToolOutput::Papers(papers))
    }
}
