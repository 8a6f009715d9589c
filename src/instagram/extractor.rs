//! Post Extraction
//!
//! [`PostExtractor`] is the seam between the pagination engine and the live
//! page. [`BrowserPostExtractor`] implements it against an attached Chrome tab:
//! it opens the profile grid, scrolls until the requested window of post links
//! is known, then visits each post and reads its fields from the DOM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{InstagramError, Result};
use super::session::InstagramSession;
use super::types::{BatchRequest, BatchResult, PostRecord, PostType};

/// Retrieves one bounded batch of posts using a borrowed session
#[async_trait]
pub trait PostExtractor<S: Send + Sync>: Send + Sync {
    /// Up to `request.count` posts starting at `request.cursor`.
    /// An empty batch means the profile has no more posts.
    async fn extract(&self, session: &S, request: &BatchRequest) -> Result<BatchResult>;
}

/// Extraction tuning
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Scroll budget per batch. Spending it while the grid still grows is an error.
    pub max_scrolls: usize,
    /// Wait after a navigation or scroll for the page to settle
    pub settle: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_scrolls: 25,
            settle: Duration::from_millis(1200),
        }
    }
}

/// DOM state reported right after navigating to a page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Page chrome text, without any rendered post (`article`) content
    #[serde(default)]
    pub body_text: String,
    /// A post body rendered, so this is not an error or interstitial page
    #[serde(default)]
    pub has_article: bool,
}

/// Raw fields read from a post page
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    pub url: String,
    pub caption: Option<String>,
    pub datetime: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    pub likes_text: Option<String>,
    pub comments_text: Option<String>,
}

const PAGE_STATE_JS: &str = r#"(() => {
    const body = document.body ? document.body.cloneNode(true) : null;
    if (body) body.querySelectorAll('article').forEach(a => a.remove());
    return {
        url: location.href,
        title: document.title || '',
        bodyText: (body ? body.textContent : '').slice(0, 2000),
        hasArticle: !!document.querySelector('article')
    };
})()"#;

const POST_LINKS_JS: &str = r#"(() => {
    const seen = new Set();
    const out = [];
    for (const a of document.querySelectorAll('main a[href]')) {
        const href = a.href;
        if (!/\/(p|reel)\/[^/]+/.test(href)) continue;
        if (seen.has(href)) continue;
        seen.add(href);
        out.push(href);
    }
    return out;
})()"#;

const SCROLL_JS: &str = "window.scrollTo(0, document.body.scrollHeight)";

const POST_DETAILS_JS: &str = r#"(() => {
    const meta = (p) => {
        const el = document.querySelector(`meta[property="${p}"]`);
        return el ? el.getAttribute('content') : null;
    };
    const root = document.querySelector('article') || document.querySelector('main') || document.body;
    const h1 = root.querySelector('h1');
    const time = root.querySelector('time[datetime]');
    const images = Array.from(root.querySelectorAll('img[src]'))
        .filter(img => img.naturalWidth >= 150 || img.width >= 150)
        .map(img => img.src);
    const videos = Array.from(root.querySelectorAll('video[src]')).map(v => v.src);
    const texts = Array.from(root.querySelectorAll('section span, section a'))
        .map(el => el.innerText || '');
    const likes = texts.find(t => /\blikes?\b/i.test(t)) || null;
    const comments = texts.find(t => /\bcomments?\b/i.test(t)) || null;
    return {
        url: location.href,
        caption: h1 ? h1.innerText : meta('og:description'),
        datetime: time ? time.getAttribute('datetime') : null,
        images: images.length ? images : [meta('og:image')].filter(Boolean),
        videos,
        likesText: likes,
        commentsText: comments
    };
})()"#;

static POST_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(p|reel|reels)/([A-Za-z0-9_-]+)").expect("valid regex"));

static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d][\d.,]*)\s*([km]?)\b").expect("valid regex"));

/// Shortcode and kind of a post link, None for anything that isn't a post
pub fn parse_post_link(href: &str) -> Option<(String, PostType)> {
    let caps = POST_LINK_RE.captures(href)?;
    let kind = match &caps[1] {
        "p" => PostType::Post,
        _ => PostType::Reel,
    };
    Some((caps[2].to_string(), kind))
}

/// Parse "1,234 likes", "12.5K likes", "3 comments" style counters
pub fn parse_count(text: &str) -> Option<u64> {
    let caps = COUNT_RE.captures(text)?;
    let digits = &caps[1];
    let suffix = caps[2].to_lowercase();

    if suffix.is_empty() {
        let plain: String = digits.chars().filter(|c| c.is_ascii_digit()).collect();
        return plain.parse().ok();
    }

    let multiplier = if suffix == "k" { 1_000.0 } else { 1_000_000.0 };
    let value: f64 = digits.replace(',', ".").parse().ok()?;
    Some((value * multiplier).round() as u64)
}

/// Which page a [`PageState`] was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Profile,
    Post,
}

/// Map a freshly loaded page to the failure it represents, if any.
///
/// Redirects are judged by URL alone. Page text is only consulted when no
/// post body rendered, so captions can never read as error banners.
pub fn classify_page(state: &PageState, profile: &str, kind: PageKind) -> Result<()> {
    let url = state.url.to_lowercase();

    if url.contains("/accounts/login") {
        return Err(InstagramError::SessionExpired);
    }
    if url.contains("/challenge") || url.contains("/accounts/suspended") {
        return Err(InstagramError::Blocked(format!("checkpoint at {}", state.url)));
    }
    if state.has_article {
        return Ok(());
    }

    let text = state.body_text.to_lowercase();
    if text.contains("try again later") || text.contains("suspicious activity") {
        return Err(InstagramError::Blocked("rate limited, try again later".to_string()));
    }
    if text.contains("page isn't available") || text.contains("page not found") {
        return Err(match kind {
            PageKind::Profile => InstagramError::ProfileNotFound(profile.to_string()),
            PageKind::Post => InstagramError::Extraction(format!("post page unavailable: {}", state.url)),
        });
    }
    Ok(())
}

/// Consecutive scrolls without new links before the grid counts as fully loaded
const STALL_LIMIT: usize = 3;

/// What the grid scroller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStep {
    /// Need more links and budget remains
    Continue,
    /// The requested window is known
    Enough,
    /// The grid stopped growing: the profile has no more posts
    EndOfGrid,
    /// Out of scrolls while the grid was still growing
    OutOfBudget,
}

/// Decide the next step of link discovery.
///
/// Only a stalled grid means end of data. Running out of scrolls while new
/// links were still arriving is a failure, not a short profile.
pub fn scroll_step(known: usize, wanted: usize, stalled: usize, scrolls: usize, max_scrolls: usize) -> ScrollStep {
    if known >= wanted {
        ScrollStep::Enough
    } else if stalled >= STALL_LIMIT {
        ScrollStep::EndOfGrid
    } else if scrolls >= max_scrolls {
        ScrollStep::OutOfBudget
    } else {
        ScrollStep::Continue
    }
}

impl RawPost {
    /// Convert to a record. Fails when the URL is not a post link.
    pub fn into_record(self) -> Result<PostRecord> {
        let (id, post_type) = parse_post_link(&self.url)
            .ok_or_else(|| InstagramError::Extraction(format!("not a post URL: {}", self.url)))?;

        let timestamp = self
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let caption = self
            .caption
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let is_video = !self.videos.is_empty() || post_type == PostType::Reel;
        let mut media_urls = self.images;
        media_urls.extend(self.videos);
        media_urls.dedup();

        Ok(PostRecord {
            id,
            url: canonical_post_url(&self.url),
            post_type,
            caption,
            timestamp,
            media_urls,
            likes: self.likes_text.as_deref().and_then(parse_count),
            comments: self.comments_text.as_deref().and_then(parse_count),
            is_video,
        })
    }
}

/// Strip query strings and profile prefixes: https://www.instagram.com/p/<code>/
fn canonical_post_url(href: &str) -> String {
    match parse_post_link(href) {
        Some((code, PostType::Post)) => format!("https://www.instagram.com/p/{}/", code),
        Some((code, PostType::Reel)) => format!("https://www.instagram.com/reel/{}/", code),
        None => href.to_string(),
    }
}

/// Extractor that reads posts from an attached browser tab
pub struct BrowserPostExtractor {
    config: ExtractorConfig,
}

impl BrowserPostExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    async fn open(&self, session: &InstagramSession, url: &str) -> Result<PageState> {
        session.page().goto(url).await?;
        tokio::time::sleep(self.config.settle).await;
        evaluate(session, PAGE_STATE_JS).await
    }

    /// Post links in grid order, scrolling until `wanted` are known or the grid stops growing
    async fn collect_links(&self, session: &InstagramSession, wanted: usize) -> Result<Vec<String>> {
        let mut links: Vec<String> = evaluate(session, POST_LINKS_JS).await?;
        let mut stalled = 0;
        let mut scrolls = 0;

        loop {
            match scroll_step(links.len(), wanted, stalled, scrolls, self.config.max_scrolls) {
                ScrollStep::Continue => {}
                ScrollStep::Enough => return Ok(links),
                ScrollStep::EndOfGrid => {
                    debug!(known = links.len(), wanted, "profile grid fully loaded");
                    return Ok(links);
                }
                ScrollStep::OutOfBudget => {
                    warn!(known = links.len(), wanted, scrolls, "profile grid still loading, giving up");
                    return Err(InstagramError::Extraction(format!(
                        "profile grid still loading after {} scrolls ({} of {} posts found)",
                        scrolls,
                        links.len(),
                        wanted
                    )));
                }
            }

            scrolls += 1;
            session.page().evaluate(SCROLL_JS).await?;
            tokio::time::sleep(self.config.settle).await;

            let fresh: Vec<String> = evaluate(session, POST_LINKS_JS).await?;
            // The grid virtualizes rows, so merge instead of replacing
            let before = links.len();
            for link in fresh {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
            debug!(scrolls, known = links.len(), wanted, "scrolled profile grid");

            if links.len() == before {
                stalled += 1;
            } else {
                stalled = 0;
            }
        }
    }
}

#[async_trait]
impl PostExtractor<InstagramSession> for BrowserPostExtractor {
    async fn extract(&self, session: &InstagramSession, request: &BatchRequest) -> Result<BatchResult> {
        let profile = request.profile.as_str();
        let start = request.cursor.offset();
        let wanted = start + request.count;

        let state = self.open(session, &request.profile.profile_url()).await?;
        classify_page(&state, profile, PageKind::Profile)?;

        let links = self.collect_links(session, wanted).await?;
        if links.len() <= start {
            info!(username = %profile, start, known = links.len(), "no posts beyond cursor");
            return Ok(BatchResult::empty());
        }

        let window: Vec<String> = links.into_iter().skip(start).take(request.count).collect();
        let mut records = Vec::with_capacity(window.len());

        for link in window {
            let state = self.open(session, &link).await?;
            classify_page(&state, profile, PageKind::Post)?;

            let raw: RawPost = evaluate(session, POST_DETAILS_JS).await?;
            match raw.into_record() {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(username = %profile, link = %link, error = %e, "post page did not parse");
                    return Err(e);
                }
            }
        }

        info!(username = %profile, start, count = records.len(), "extracted batch");
        Ok(BatchResult::new(records))
    }
}

async fn evaluate<T: serde::de::DeserializeOwned>(session: &InstagramSession, script: &str) -> Result<T> {
    session
        .page()
        .evaluate(script)
        .await?
        .into_value::<T>()
        .map_err(|e| InstagramError::Extraction(format!("unexpected page data: {}", e)))
}
