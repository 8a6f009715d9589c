//! Instagram Post Retrieval
//!
//! Paginated post fetching through an already logged-in browser:
//! - Session provider (Chrome DevTools attach)
//! - Post extractor (DOM reads)
//! - Pagination engine (bounded and "all" modes)
//! - Progress reporter (ordered, fire-and-forget)

pub mod engine;
pub mod error;
pub mod extractor;
pub mod progress;
pub mod service;
pub mod session;
pub mod types;

pub use engine::{EngineConfig, PaginationEngine};
pub use error::InstagramError;
pub use extractor::{BrowserPostExtractor, ExtractorConfig, PostExtractor};
pub use progress::{ProgressEvent, ProgressNotification, ProgressReporter, ProgressSink};
pub use service::{InstagramService, PostFetcher};
pub use session::{BrowserSessionProvider, InstagramSession, SessionConfig, SessionProvider};
pub use types::{
    BatchRequest, BatchResult, FetchCursor, FetchLimit, FetchRequest, Pagination,
    PaginationEnvelope, PostRecord, PostType, ProfileIdentity, MAX_BATCH_SIZE,
};
