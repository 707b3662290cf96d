//! User-visible notices.
//!
//! The engines call [`Notifier::notify`] and never look at the outcome.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// Fire-and-forget sink for short status messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Writes notices to the tracing log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Info => tracing::info!(target: "calmwave::notice", "{message}"),
            NoticeKind::Success => tracing::info!(target: "calmwave::notice", success = true, "{message}"),
            NoticeKind::Error => tracing::warn!(target: "calmwave::notice", "{message}"),
        }
    }
}
