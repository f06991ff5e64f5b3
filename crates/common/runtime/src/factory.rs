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

use std::sync::atomic::{AtomicUsize, Ordering};

use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};
use tracing::debug;

use crate::{
    error::{self, Result},
    options::{RuntimeFlavor, RuntimeOptions, cpu_threads},
};

impl RuntimeOptions {
    /// Build the runtime with every driver enabled. Threads are named
    /// `<thread_name>-<n>`.
    pub fn create(self) -> Result<Runtime> {
        let mut builder = match self.flavor {
            RuntimeFlavor::CurrentThread => TokioBuilder::new_current_thread(),
            RuntimeFlavor::MultiThread => {
                let mut builder = TokioBuilder::new_multi_thread();
                builder.worker_threads(self.worker_threads.unwrap_or_else(cpu_threads));
                builder
            }
        };
        builder
            .enable_all()
            .max_blocking_threads(self.max_blocking_threads.max(1))
            .thread_keep_alive(self.blocking_keep_alive);

        let counter = AtomicUsize::new(0);
        let thread_name = self.thread_name.clone();
        builder.thread_name_fn(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            format!("{thread_name}-{idx}")
        });

        debug!(
            flavor = ?self.flavor,
            max_blocking_threads = self.max_blocking_threads,
            "building runtime"
        );
        builder.build().context(error::BuildSnafu)
    }
}

/// Build a single-threaded runtime named `thread_name` with default pool
/// settings.
pub fn create_current_thread_runtime(thread_name: impl Into<String>) -> Result<Runtime> {
    RuntimeOptions::builder()
        .flavor(RuntimeFlavor::CurrentThread)
        .thread_name(thread_name)
        .build()
        .create()
}
