//! MCP Tool Registry
//!
//! Declares the `get_instagram_posts` tool, validates its arguments and maps
//! fetch outcomes onto MCP tool results. Argument problems are protocol
//! errors and never reach the fetch service; fetch failures come back as
//! completed results flagged `isError`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::instagram::{
    FetchCursor, FetchLimit, FetchRequest, PostFetcher, ProfileIdentity, ProgressReporter,
    MAX_BATCH_SIZE,
};
use crate::mcp::error_codes;

pub const GET_INSTAGRAM_POSTS: &str = "get_instagram_posts";

/// Tool definition for MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Hard failures that abort a call before any fetching
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    MethodNotFound(String),
}

impl ToolError {
    /// JSON-RPC error code
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
        }
    }
}

/// Completed tool call (possibly a soft error)
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(text: String, structured: Value) -> Self {
        Self {
            text,
            structured: Some(structured),
            is_error: false,
        }
    }

    pub fn error(text: String) -> Self {
        Self {
            text,
            structured: None,
            is_error: true,
        }
    }

    /// MCP `tools/call` result object
    pub fn into_result(self) -> Value {
        let mut result = json!({
            "content": [{
                "type": "text",
                "text": self.text
            }]
        });
        if let Some(structured) = self.structured {
            result["structuredContent"] = structured;
        }
        if self.is_error {
            result["isError"] = json!(true);
        }
        result
    }
}

/// Tool registry
pub struct ToolRegistry {
    posts: Arc<dyn PostFetcher>,
}

impl ToolRegistry {
    pub fn new(posts: Arc<dyn PostFetcher>) -> Self {
        Self { posts }
    }

    /// List all tool definitions
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: GET_INSTAGRAM_POSTS.to_string(),
            description: format!(
                "Get recent posts from an Instagram profile using the logged-in browser session. \
                 Fetches up to {max} posts per call, or every post with limit \"all\" (progress is \
                 streamed while it runs). Resume with startFrom = pagination.nextStartFrom. \
                 pagination.hasMore is a guess: it is true whenever a full batch of {max} came back, \
                 so it can be wrong when the remaining post count is an exact multiple of {max}.",
                max = MAX_BATCH_SIZE
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "username": {
                        "type": "string",
                        "description": "Instagram username (with or without @)"
                    },
                    "limit": {
                        "oneOf": [
                            { "type": "integer", "minimum": 1, "maximum": MAX_BATCH_SIZE },
                            { "type": "string", "const": "all" }
                        ],
                        "description": "Posts to fetch (1-3), or \"all\" for every post",
                        "default": MAX_BATCH_SIZE
                    },
                    "startFrom": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Number of posts already fetched (pagination cursor)",
                        "default": 0
                    }
                },
                "required": ["username"]
            }),
        }]
    }

    /// Validate `get_instagram_posts` arguments
    pub fn parse_posts_args(args: &Value) -> Result<FetchRequest, ToolError> {
        let obj = args
            .as_object()
            .ok_or_else(|| ToolError::InvalidParams("arguments must be an object".to_string()))?;

        let profile = match obj.get("username") {
            Some(Value::String(raw)) => ProfileIdentity::parse(raw)
                .ok_or_else(|| ToolError::InvalidParams("username must not be empty".to_string()))?,
            Some(_) => return Err(ToolError::InvalidParams("username must be a string".to_string())),
            None => return Err(ToolError::InvalidParams("Missing required parameter: username".to_string())),
        };

        let limit = match obj.get("limit") {
            None | Some(Value::Null) => FetchLimit::default(),
            Some(Value::String(s)) if s == "all" => FetchLimit::All,
            Some(value @ Value::Number(_)) => whole_number(value)
                .and_then(|n| FetchLimit::count(n as usize))
                .ok_or_else(|| {
                    ToolError::InvalidParams(format!(
                        "limit must be an integer between 1 and {} or \"all\", got {}",
                        MAX_BATCH_SIZE, value
                    ))
                })?,
            Some(other) => {
                return Err(ToolError::InvalidParams(format!(
                    "limit must be a number or \"all\", got {}",
                    other
                )))
            }
        };

        let start_from = match obj.get("startFrom") {
            None | Some(Value::Null) => FetchCursor::default(),
            Some(value @ Value::Number(_)) => whole_number(value)
                .map(|n| FetchCursor(n as usize))
                .ok_or_else(|| {
                    ToolError::InvalidParams(format!(
                        "startFrom must be a non-negative integer, got {}",
                        value
                    ))
                })?,
            Some(other) => {
                return Err(ToolError::InvalidParams(format!(
                    "startFrom must be a number, got {}",
                    other
                )))
            }
        };

        Ok(FetchRequest {
            profile,
            limit,
            start_from,
        })
    }

    /// Execute a tool
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();

        let output = match name {
            GET_INSTAGRAM_POSTS => {
                let request = Self::parse_posts_args(&args)?;
                debug!(?request, "get_instagram_posts");

                match self.posts.fetch_posts(request, reporter, cancel).await {
                    Ok(envelope) => match serde_json::to_value(&envelope) {
                        Ok(payload) => {
                            let text = serde_json::to_string_pretty(&payload)
                                .unwrap_or_else(|_| payload.to_string());
                            ToolOutput::success(text, payload)
                        }
                        Err(e) => ToolOutput::error(format!("Instagram error: could not encode posts: {}", e)),
                    },
                    Err(e) => ToolOutput::error(e.soft_message()),
                }
            }
            other => return Err(ToolError::MethodNotFound(other.to_string())),
        };

        info!(
            tool = name,
            is_error = output.is_error,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool completed"
        );

        Ok(output)
    }

    /// Release resources held by tool backends
    pub async fn shutdown(&self) {
        self.posts.shutdown().await;
    }
}

/// Non-negative integral JSON number (accepts `2` and `2.0`)
fn whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u32::MAX as f64)
            .map(|f| f as u64)
    })
}
