//! Instagram fetch error taxonomy

use std::time::Duration;

/// Failures from the browser session, the extractor or the engine itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstagramError {
    #[error("no logged-in browser session available: {0}")]
    SessionUnavailable(String),

    #[error("browser session expired, log in to Instagram again")]
    SessionExpired,

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("blocked by Instagram: {0}")]
    Blocked(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("round timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("a fetch for '{0}' is already in progress")]
    Busy(String),
}

impl InstagramError {
    /// Session-level failures (the browser login itself is unusable)
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::SessionUnavailable(_) | Self::SessionExpired)
    }

    /// Text returned to callers as a soft error
    pub fn soft_message(&self) -> String {
        format!("Instagram error: {}", self)
    }
}

impl From<chromiumoxide::error::CdpError> for InstagramError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Navigation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InstagramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_message_prefix() {
        let e = InstagramError::SessionUnavailable("no sessionid cookie".to_string());
        assert_eq!(
            e.soft_message(),
            "Instagram error: no logged-in browser session available: no sessionid cookie"
        );
    }

    #[test]
    fn test_timeout_display() {
        let e = InstagramError::Timeout(Duration::from_secs(90));
        assert_eq!(e.to_string(), "round timed out after 90s");
    }

    #[test]
    fn test_session_classification() {
        assert!(InstagramError::SessionExpired.is_session_error());
        assert!(!InstagramError::Blocked("challenge".to_string()).is_session_error());
    }
}
