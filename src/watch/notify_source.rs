use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::PipelineResult;

use super::{ChangeSource, CreationEvent, SourcePoll};

/// OS-backed watcher for a single directory (non-recursive).
///
/// Reports file creations and files renamed or moved into the directory.
pub struct NotifySource {
    dir: PathBuf,
    rx: Receiver<notify::Result<Event>>,
    pending: VecDeque<PathBuf>,
    // Dropping the watcher stops notifications.
    _watcher: RecommendedWatcher,
}

impl NotifySource {
    /// Start watching `dir`.
    pub fn watch(dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %dir.display(), "watching");

        Ok(Self {
            dir,
            rx,
            pending: VecDeque::new(),
            _watcher: watcher,
        })
    }

    /// The watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn accept(&mut self, event: Event) {
        if !is_creation(&event.kind) {
            return;
        }
        debug!(event = ?event.kind, paths = ?event.paths, "fs creation");
        self.pending.extend(event.paths);
    }
}

impl ChangeSource for NotifySource {
    fn poll_event(&mut self, timeout: Duration) -> SourcePoll {
        if let Some(path) = self.pending.pop_front() {
            return SourcePoll::Event(CreationEvent::new(path));
        }

        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => self.accept(event),
            Ok(Err(error)) => warn!(error = %error, "watch backend emitted error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return SourcePoll::Closed,
        }
        while let Ok(next) = self.rx.try_recv() {
            match next {
                Ok(event) => self.accept(event),
                Err(error) => warn!(error = %error, "watch backend emitted error"),
            }
        }

        match self.pending.pop_front() {
            Some(path) => SourcePoll::Event(CreationEvent::new(path)),
            None => SourcePoll::Idle,
        }
    }
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}
