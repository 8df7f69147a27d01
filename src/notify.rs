//! User-facing notification port.
//!
//! The pipeline and commit gate report degraded outcomes through a
//! [`Notifier`] handed to them at construction time. The HTTP layer collects
//! notices per request with [`NoticeBuffer`] and returns them as toasts.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A transient banner message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
}

impl Notice {
    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Collects notices for one request and mirrors them to the log.
#[derive(Debug, Clone, Default)]
pub struct NoticeBuffer {
    inner: Arc<Mutex<Vec<Notice>>>,
}

impl NoticeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for NoticeBuffer {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Warning => warn!("{}: {}", notice.title, notice.detail),
            Severity::Error => error!("{}: {}", notice.title, notice.detail),
        }
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_collects_and_drains() {
        let buffer = NoticeBuffer::new();
        buffer.notify(Notice::warning("AI Service Unavailable", "timeout"));
        buffer.notify(Notice::error("Save failed", "500"));

        let notices = buffer.take();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].severity, Severity::Warning);
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = NoticeBuffer::new();
        let handle: Arc<dyn Notifier> = Arc::new(buffer.clone());
        handle.notify(Notice::warning("x", "y"));
        assert_eq!(buffer.take().len(), 1);
    }
}
