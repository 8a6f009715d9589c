//! Pagination Data Model
//!
//! Profile handles, cursors, limits and the records that flow between the
//! extractor, the pagination engine and the tool adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest number of posts the data source yields per request
pub const MAX_BATCH_SIZE: usize = 3;

/// Caller-supplied Instagram username
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileIdentity(String);

impl ProfileIdentity {
    /// Normalize a raw handle ("@alice " -> "alice"). Returns None when empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let handle = raw.trim().trim_start_matches('@').trim();
        if handle.is_empty() {
            None
        } else {
            Some(Self(handle.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for single-flight tracking (usernames are case-insensitive)
    pub fn flight_key(&self) -> String {
        self.0.to_lowercase()
    }

    /// Public profile URL
    pub fn profile_url(&self) -> String {
        format!("https://www.instagram.com/{}/", self.0)
    }
}

impl fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Offset into a profile timeline: number of posts already yielded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchCursor(pub usize);

impl FetchCursor {
    pub fn offset(self) -> usize {
        self.0
    }

    /// Cursor after `count` more posts have been yielded
    pub fn advance(self, count: usize) -> Self {
        Self(self.0 + count)
    }
}

/// How many posts a call asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchLimit {
    /// One round of up to `n` posts, `n` in `1..=MAX_BATCH_SIZE`
    Count(usize),
    /// Sequential rounds until the profile is exhausted
    All,
}

impl FetchLimit {
    /// Bounded limit, or None when outside `1..=MAX_BATCH_SIZE`
    pub fn count(n: usize) -> Option<Self> {
        if (1..=MAX_BATCH_SIZE).contains(&n) {
            Some(Self::Count(n))
        } else {
            None
        }
    }
}

impl Default for FetchLimit {
    fn default() -> Self {
        Self::Count(MAX_BATCH_SIZE)
    }
}

impl fmt::Display for FetchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{}", n),
            Self::All => f.write_str("all"),
        }
    }
}

/// Kind of timeline entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Post,
    Reel,
}

/// One extracted post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    /// Shortcode from the post URL
    pub id: String,
    pub url: String,
    pub post_type: PostType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
    #[serde(default)]
    pub is_video: bool,
}

/// Records returned by one extraction round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub records: Vec<PostRecord>,
    pub count: usize,
}

impl BatchResult {
    pub fn new(records: Vec<PostRecord>) -> Self {
        let count = records.len();
        Self { records, count }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drop anything beyond `max` records
    pub fn truncate(&mut self, max: usize) {
        self.records.truncate(max);
        self.count = self.records.len();
    }
}

/// One extraction request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub profile: ProfileIdentity,
    pub cursor: FetchCursor,
    pub count: usize,
}

/// Window covered by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentBatch {
    pub start: usize,
    pub end: usize,
    pub size: usize,
}

/// Continuation metadata returned alongside posts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_batch: CurrentBatch,
    pub next_start_from: usize,
    /// Heuristic: a full batch is taken to mean more posts may exist
    pub has_more: bool,
}

impl Pagination {
    pub fn new(start: FetchCursor, size: usize, has_more: bool) -> Self {
        let end = start.advance(size).offset();
        Self {
            current_batch: CurrentBatch {
                start: start.offset(),
                end,
                size,
            },
            next_start_from: end,
            has_more,
        }
    }
}

/// Final payload of a successful call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationEnvelope {
    pub posts: Vec<PostRecord>,
    pub pagination: Pagination,
}

/// Validated arguments of one `get_instagram_posts` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub profile: ProfileIdentity,
    pub limit: FetchLimit,
    pub start_from: FetchCursor,
}
