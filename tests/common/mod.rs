//! Shared fixtures: scripted session provider and extractor

#![allow(dead_code)]

use async_trait::async_trait;
use instagram_mcp::instagram::error::Result;
use instagram_mcp::instagram::{
    BatchRequest, BatchResult, EngineConfig, InstagramError, PostExtractor, PostRecord, PostType,
    ProgressNotification, ProgressSink, SessionProvider,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn post(index: usize) -> PostRecord {
    PostRecord {
        id: format!("post{}", index),
        url: format!("https://www.instagram.com/p/post{}/", index),
        post_type: PostType::Post,
        caption: Some(format!("caption {}", index)),
        timestamp: None,
        media_urls: vec![format!("https://cdn.example/post{}.jpg", index)],
        likes: Some(index as u64),
        comments: None,
        is_video: false,
    }
}

pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        round_delay: Duration::ZERO,
        keep_alive_interval: Duration::ZERO,
        round_timeout: Duration::from_secs(5),
        probe_has_more: false,
    }
}

/// Session provider with a switchable login state
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub logged_out: Arc<std::sync::atomic::AtomicBool>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn logged_out() -> Self {
        let browser = Self::default();
        browser.logged_out.store(true, Ordering::SeqCst);
        browser
    }
}

#[async_trait]
impl SessionProvider for FakeBrowser {
    type Session = ();

    async fn acquire(&self) -> Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.logged_out.load(Ordering::SeqCst) {
            Err(InstagramError::SessionUnavailable(
                "browser is not logged in to Instagram".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One scripted round outcome
#[derive(Debug, Clone)]
pub enum Round {
    Posts(usize),
    Fail(InstagramError),
    /// Wait for the gate, then return that many posts
    Held(Arc<Notify>, usize),
    /// Never completes
    Hang,
}

/// Extractor that replays scripted rounds, numbering posts by cursor
#[derive(Clone, Default)]
pub struct ScriptedExtractor {
    rounds: Arc<Mutex<VecDeque<Round>>>,
    pub requests: Arc<Mutex<Vec<BatchRequest>>>,
}

impl ScriptedExtractor {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Arc::new(Mutex::new(rounds.into())),
            requests: Arc::default(),
        }
    }

    pub fn batches(sizes: &[usize]) -> Self {
        Self::new(sizes.iter().map(|&n| Round::Posts(n)).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl PostExtractor<()> for ScriptedExtractor {
    async fn extract(&self, _session: &(), request: &BatchRequest) -> Result<BatchResult> {
        self.requests.lock().push(request.clone());
        let round = self.rounds.lock().pop_front().unwrap_or(Round::Posts(0));
        let start = request.cursor.offset();
        match round {
            Round::Posts(n) => Ok(BatchResult::new((start..start + n).map(post).collect())),
            Round::Fail(e) => Err(e),
            Round::Held(gate, n) => {
                gate.notified().await;
                Ok(BatchResult::new((start..start + n).map(post).collect()))
            }
            Round::Hang => std::future::pending::<Result<BatchResult>>().await,
        }
    }
}

/// Progress sink recording notifications in order
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<ProgressNotification>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|n| n.message.clone()).collect()
    }
}

impl ProgressSink for Recorder {
    fn emit(&self, notification: ProgressNotification) {
        self.events.lock().push(notification);
    }
}
