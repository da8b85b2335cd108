//! Directory change notification.
//!
//! A [`ChangeSource`] yields creation events for one flat directory. [`NotifySource`] wraps the
//! OS watcher; [`ChannelSource`] feeds paths from an in-process channel (tests, manual replays).

mod notify_source;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub use notify_source::NotifySource;

/// A file appeared in the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationEvent {
    pub path: PathBuf,
}

impl CreationEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Result of one poll on a [`ChangeSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePoll {
    Event(CreationEvent),
    /// Nothing arrived before the timeout.
    Idle,
    /// The source ended and will never yield again.
    Closed,
}

/// A lazy, non-restartable stream of creation events.
///
/// Delivery order is whatever the backend reports; the same path may arrive more than once.
pub trait ChangeSource {
    /// Wait up to `timeout` for the next event.
    fn poll_event(&mut self, timeout: Duration) -> SourcePoll;
}

/// Events pushed through an in-process channel.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<CreationEvent>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it. Dropping every sender closes the source.
    pub fn new() -> (Sender<CreationEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl ChangeSource for ChannelSource {
    fn poll_event(&mut self, timeout: Duration) -> SourcePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => SourcePoll::Event(event),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Closed,
        }
    }
}

/// `true` for an existing regular file whose name ends with `.{extension}` (case-insensitive).
///
/// `extension` may be given with or without the leading dot.
pub fn is_candidate(path: &Path, extension: &str) -> bool {
    if !has_extension(path, extension) {
        return false;
    }
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    let ext = extension.trim().trim_start_matches('.');
    if ext.is_empty() {
        return false;
    }
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    name.ends_with(&format!(".{}", ext.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::{ChangeSource, ChannelSource, CreationEvent, SourcePoll, has_extension};

    #[test]
    fn extension_match_is_case_insensitive_on_the_name() {
        assert!(has_extension(Path::new("inbox/order123.pdf"), "pdf"));
        assert!(has_extension(Path::new("inbox/ORDER124.PDF"), ".pdf"));
        assert!(!has_extension(Path::new("inbox/order.pdf.tmp"), "pdf"));
        assert!(!has_extension(Path::new("inbox/pdf"), "pdf"));
        assert!(!has_extension(Path::new("inbox/report.xlsx"), "pdf"));
    }

    #[test]
    fn channel_source_reports_idle_then_closed() {
        let (tx, mut source) = ChannelSource::new();
        tx.send(CreationEvent::new("a.pdf")).unwrap();

        assert_eq!(
            source.poll_event(Duration::from_millis(1)),
            SourcePoll::Event(CreationEvent::new("a.pdf"))
        );
        assert_eq!(source.poll_event(Duration::from_millis(1)), SourcePoll::Idle);
        drop(tx);
        assert_eq!(source.poll_event(Duration::from_millis(1)), SourcePoll::Closed);
    }
}
