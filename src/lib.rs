//! Instagram MCP Server
//!
//! Model Context Protocol server exposing one tool, `get_instagram_posts`,
//! backed by a browser the user is already logged in to.
//!
//! # Features
//!
//! - **MCP Protocol**: JSON-RPC 2.0 over stdio with progress notifications
//! - **Pagination**: caller-owned `startFrom` cursor, 1-3 posts per call
//! - **Fetch-all mode**: sequential batches with keep-alive progress
//! - **Browser session reuse**: attaches over the DevTools protocol, no login flow
//! - **Graceful shutdown**: fetches stop between batches, the session is released
//!
//! # Architecture
//!
//! ```text
//! MCP client ──► MCP Protocol ──► ToolRegistry ──► InstagramService
//!                  (stdio)                             │
//!                     ▲                                ├── PaginationEngine
//!                     │                                ├── BrowserSessionProvider (CDP)
//!                     └──── notifications/progress ◄───┴── BrowserPostExtractor
//! ```

pub mod config;
pub mod instagram;
pub mod mcp;
pub mod tools;

pub use config::Config;
pub use instagram::{
    BrowserPostExtractor, BrowserSessionProvider, InstagramError, InstagramService,
    PaginationEngine, PostFetcher,
};
pub use mcp::{McpRequest, McpResponse, McpServer};
pub use tools::{ToolError, ToolRegistry};
