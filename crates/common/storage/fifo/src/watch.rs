// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::Path, time::Duration};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Wakes a reader parked at the end of a file.
///
/// Change events come from `notify`; a timer fires as well so a missed or
/// unsupported event only delays the reader by one poll interval.
pub(crate) struct FileWatch {
    watcher: Option<RecommendedWatcher>,
    events:  mpsc::UnboundedReceiver<()>,
}

impl FileWatch {
    pub(crate) fn new(path: &Path) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        })
        .and_then(|mut watcher| {
            watcher.watch(path, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        let watcher = match watcher {
            Ok(watcher) => {
                debug!(path = %path.display(), "watching fifo for appends");
                Some(watcher)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "file watch unavailable, polling instead");
                None
            }
        };
        Self { watcher, events }
    }

    /// Resolve on the next change notification or after `poll`, whichever
    /// comes first.
    pub(crate) async fn changed(&mut self, poll: Duration) {
        if self.watcher.is_none() {
            tokio::time::sleep(poll).await;
            return;
        }
        tokio::select! {
            Some(()) = self.events.recv() => {
                while self.events.try_recv().is_ok() {}
            }
            () = tokio::time::sleep(poll) => {}
        }
    }
}
