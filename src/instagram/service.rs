//! Instagram Fetch Service
//!
//! Binds a session provider and an extractor to the pagination engine.
//!
//! A second fetch of a profile that is already being fetched is rejected with
//! `Busy`. Fetches of different profiles still share the provider's session,
//! and when that session is a single tab they queue behind one another so no
//! two fetches navigate the same tab at once.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::engine::PaginationEngine;
use super::error::{InstagramError, Result};
use super::extractor::PostExtractor;
use super::progress::ProgressReporter;
use super::session::SessionProvider;
use super::types::{FetchRequest, PaginationEnvelope, ProfileIdentity};

/// What the tool layer needs from a post source
#[async_trait]
pub trait PostFetcher: Send + Sync {
    async fn fetch_posts(
        &self,
        request: FetchRequest,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<PaginationEnvelope>;

    /// Release external resources (browser connection)
    async fn shutdown(&self);
}

/// Profiles with a fetch in flight
#[derive(Default)]
pub struct InFlight {
    profiles: Mutex<HashSet<String>>,
}

/// Marks a profile busy until dropped
pub struct FlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
}

impl InFlight {
    /// Claim a profile, or `Busy` if another fetch holds it
    pub fn begin(&self, profile: &ProfileIdentity) -> Result<FlightGuard<'_>> {
        let key = profile.flight_key();
        let mut profiles = self.profiles.lock();
        if !profiles.insert(key.clone()) {
            return Err(InstagramError::Busy(profile.to_string()));
        }
        Ok(FlightGuard { owner: self, key })
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.profiles.lock().remove(&self.key);
    }
}

/// Post fetching over a browser session
pub struct InstagramService<P, E> {
    provider: P,
    extractor: E,
    engine: PaginationEngine,
    in_flight: InFlight,
    /// Held for a whole fetch when sessions share one tab
    lane: AsyncMutex<()>,
}

impl<P, E> InstagramService<P, E>
where
    P: SessionProvider,
    E: PostExtractor<P::Session>,
{
    pub fn new(provider: P, extractor: E, engine: PaginationEngine) -> Self {
        Self {
            provider,
            extractor,
            engine,
            in_flight: InFlight::default(),
            lane: AsyncMutex::new(()),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Fetch posts for one validated request
    pub async fn get_posts(
        &self,
        request: &FetchRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PaginationEnvelope> {
        let _guard = self.in_flight.begin(&request.profile)?;
        let started = Instant::now();

        info!(
            username = %request.profile,
            limit = %request.limit,
            start_from = request.start_from.offset(),
            "Fetching Instagram posts"
        );

        let _lane = self.enter_lane(request, reporter, cancel).await?;
        let session = self.provider.acquire().await?;
        let result = self
            .engine
            .fetch(&self.extractor, &session, request, reporter, cancel)
            .await;

        match &result {
            Ok(envelope) => info!(
                username = %request.profile,
                posts = envelope.posts.len(),
                next_start_from = envelope.pagination.next_start_from,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetch complete"
            ),
            Err(e) => warn!(
                username = %request.profile,
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetch failed"
            ),
        }

        result
    }

    /// Wait for exclusive use of a shared tab. Cancellation ends the wait.
    async fn enter_lane(
        &self,
        request: &FetchRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Option<AsyncMutexGuard<'_, ()>>> {
        if self.provider.isolated_sessions() {
            return Ok(None);
        }
        if let Ok(guard) = self.lane.try_lock() {
            return Ok(Some(guard));
        }

        info!(username = %request.profile, "Browser tab busy, queueing fetch");
        reporter.report(format!(
            "Waiting for another fetch to finish before reading @{}",
            request.profile
        ));

        tokio::select! {
            guard = self.lane.lock() => Ok(Some(guard)),
            _ = cancel.cancelled() => Err(InstagramError::Cancelled),
        }
    }
}

#[async_trait]
impl<P, E> PostFetcher for InstagramService<P, E>
where
    P: SessionProvider,
    E: PostExtractor<P::Session>,
{
    async fn fetch_posts(
        &self,
        request: FetchRequest,
        reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<PaginationEnvelope> {
        self.get_posts(&request, &reporter, &cancel).await
    }

    async fn shutdown(&self) {
        self.provider.release().await;
    }
}
