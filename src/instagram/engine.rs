//! Pagination Engine
//!
//! Drives extraction rounds for one call:
//! - **Bounded** (`limit` 1..=3): a single round at the caller's cursor
//! - **Unbounded** (`limit = "all"`): rounds of [`MAX_BATCH_SIZE`] until a
//!   short or empty round, cancellation, or failure
//!
//! The engine keeps no state between calls. The cursor belongs to the caller.
//!
//! `hasMore` is a heuristic. A bounded call that returns a full batch reports
//! `true` even when the profile has exactly that many posts left. Enable
//! `probe_has_more` to spend one extra round checking the next offset instead.

use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{InstagramError, Result};
use super::extractor::PostExtractor;
use super::progress::{ProgressEvent, ProgressReporter};
use super::types::{
    BatchRequest, BatchResult, FetchCursor, FetchLimit, FetchRequest, Pagination,
    PaginationEnvelope, PostRecord, MAX_BATCH_SIZE,
};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause between unbounded rounds
    pub round_delay: Duration,
    /// Keep-alive cadence while a round is in flight (zero disables)
    pub keep_alive_interval: Duration,
    /// Upper bound on a single extraction round
    pub round_timeout: Duration,
    /// Check the next offset instead of trusting "full batch means more"
    pub probe_has_more: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_delay: Duration::from_millis(1500),
            keep_alive_interval: Duration::from_secs(10),
            round_timeout: Duration::from_secs(90),
            probe_has_more: false,
        }
    }
}

/// Stateless retrieval loop
#[derive(Debug, Clone, Default)]
pub struct PaginationEngine {
    config: EngineConfig,
}

impl PaginationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one call to completion.
    ///
    /// Cancellation is observed between rounds only. In unbounded mode a
    /// failure discards whatever earlier rounds accumulated.
    pub async fn fetch<S, E>(
        &self,
        extractor: &E,
        session: &S,
        request: &FetchRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PaginationEnvelope>
    where
        S: Send + Sync,
        E: PostExtractor<S> + ?Sized,
    {
        match request.limit {
            FetchLimit::Count(n) => self.fetch_bounded(extractor, session, request, n, reporter, cancel).await,
            FetchLimit::All => self.fetch_all(extractor, session, request, reporter, cancel).await,
        }
    }

    async fn fetch_bounded<S, E>(
        &self,
        extractor: &E,
        session: &S,
        request: &FetchRequest,
        limit: usize,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PaginationEnvelope>
    where
        S: Send + Sync,
        E: PostExtractor<S> + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(InstagramError::Cancelled);
        }

        let start = request.start_from;
        reporter.report(format!(
            "Fetching up to {} posts from @{} starting at {}",
            limit,
            request.profile,
            start.offset()
        ));

        let batch_request = BatchRequest {
            profile: request.profile.clone(),
            cursor: start,
            count: limit,
        };
        let batch = self.round(extractor, session, &batch_request, reporter, 0).await?;
        let size = batch.count;

        let has_more = if size == MAX_BATCH_SIZE {
            if self.config.probe_has_more && !cancel.is_cancelled() {
                // A failed look-ahead only costs precision, never the batch
                match self.probe(extractor, session, request, start.advance(size), reporter).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(
                            username = %request.profile,
                            next = start.advance(size).offset(),
                            error = %e,
                            "look-ahead failed, assuming more posts"
                        );
                        true
                    }
                }
            } else {
                true
            }
        } else {
            false
        };

        reporter.report(ProgressEvent::detailed(
            format!("Fetched {} posts from @{}", size, request.profile),
            size as u64,
            size as u64,
        ));

        info!(
            username = %request.profile,
            start = start.offset(),
            size,
            has_more,
            "bounded fetch complete"
        );

        Ok(PaginationEnvelope {
            posts: batch.records,
            pagination: Pagination::new(start, size, has_more),
        })
    }

    async fn fetch_all<S, E>(
        &self,
        extractor: &E,
        session: &S,
        request: &FetchRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PaginationEnvelope>
    where
        S: Send + Sync,
        E: PostExtractor<S> + ?Sized,
    {
        let start = request.start_from;
        let mut cursor = start;
        let mut posts: Vec<PostRecord> = Vec::new();
        let mut round_no = 0usize;

        reporter.report(format!(
            "Fetching all posts from @{} starting at {}",
            request.profile,
            start.offset()
        ));

        loop {
            if cancel.is_cancelled() {
                warn!(username = %request.profile, rounds = round_no, "fetch cancelled, discarding {} posts", posts.len());
                return Err(InstagramError::Cancelled);
            }

            round_no += 1;
            let batch_request = BatchRequest {
                profile: request.profile.clone(),
                cursor,
                count: MAX_BATCH_SIZE,
            };

            let batch = match self
                .round(extractor, session, &batch_request, reporter, posts.len() as u64)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        username = %request.profile,
                        round = round_no,
                        discarded = posts.len(),
                        error = %e,
                        "round failed"
                    );
                    return Err(e);
                }
            };

            let got = batch.count;
            posts.extend(batch.records);
            cursor = cursor.advance(got);

            let exhausted = got < MAX_BATCH_SIZE;
            let total = if exhausted { posts.len() } else { posts.len() + MAX_BATCH_SIZE };
            reporter.report(ProgressEvent::detailed(
                format!("Batch {}: {} posts (total {})", round_no, got, posts.len()),
                posts.len() as u64,
                total as u64,
            ));
            debug!(username = %request.profile, round = round_no, got, cursor = cursor.offset(), "round done");

            if exhausted {
                break;
            }

            if !self.config.round_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.round_delay) => {}
                }
            }
        }

        let size = posts.len();
        reporter.report(ProgressEvent::detailed(
            format!("Fetched all {} posts from @{} in {} batches", size, request.profile, round_no),
            size as u64,
            size as u64,
        ));

        info!(
            username = %request.profile,
            start = start.offset(),
            size,
            rounds = round_no,
            "unbounded fetch complete"
        );

        Ok(PaginationEnvelope {
            posts,
            pagination: Pagination::new(start, size, false),
        })
    }

    /// One extraction round under the round timeout, with keep-alives while waiting
    async fn round<S, E>(
        &self,
        extractor: &E,
        session: &S,
        request: &BatchRequest,
        reporter: &ProgressReporter,
        progress: u64,
    ) -> Result<BatchResult>
    where
        S: Send + Sync,
        E: PostExtractor<S> + ?Sized,
    {
        let timeout = self.config.round_timeout;
        let work = tokio::time::timeout(timeout, extractor.extract(session, request));
        tokio::pin!(work);

        let outcome = if self.config.keep_alive_interval.is_zero() {
            work.await
        } else {
            let period = self.config.keep_alive_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    res = &mut work => break res,
                    _ = ticker.tick() => {
                        reporter.report(ProgressEvent::keep_alive(
                            format!("Still fetching posts from @{} at {}", request.profile, request.cursor.offset()),
                            progress,
                            progress + request.count as u64,
                        ));
                    }
                }
            }
        };

        let mut batch = outcome.map_err(|_| InstagramError::Timeout(timeout))??;

        if batch.count > request.count {
            warn!(
                username = %request.profile,
                requested = request.count,
                returned = batch.count,
                "extractor over-delivered, truncating"
            );
            batch.truncate(request.count);
        }

        Ok(batch)
    }

    /// One-record look-ahead at `next`. Records found here are not returned.
    async fn probe<S, E>(
        &self,
        extractor: &E,
        session: &S,
        request: &FetchRequest,
        next: FetchCursor,
        reporter: &ProgressReporter,
    ) -> Result<bool>
    where
        S: Send + Sync,
        E: PostExtractor<S> + ?Sized,
    {
        let probe = BatchRequest {
            profile: request.profile.clone(),
            cursor: next,
            count: 1,
        };
        let batch = self.round(extractor, session, &probe, reporter, MAX_BATCH_SIZE as u64).await?;
        debug!(username = %request.profile, next = next.offset(), found = batch.count, "probed next offset");
        Ok(!batch.is_empty())
    }
}
