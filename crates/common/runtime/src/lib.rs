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

//! Tokio runtime construction for the linefifo binaries.

mod error;
mod factory;
mod options;

pub use error::{Error, Result};
pub use factory::create_current_thread_runtime;
pub use options::{RuntimeFlavor, RuntimeOptions};
pub use tokio::runtime::Runtime;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn blocking_thread_name(runtime: &Runtime) -> String {
        let _guard = runtime.enter();
        runtime
            .block_on(tokio::task::spawn_blocking(|| {
                std::thread::current().name().map(str::to_owned)
            }))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn multi_thread_workers_are_named() {
        let runtime = RuntimeOptions::builder()
            .flavor(RuntimeFlavor::MultiThread)
            .thread_name("test-rt")
            .worker_threads(2)
            .build()
            .create()
            .unwrap();
        let handle = runtime.spawn(async move { std::thread::current().name().map(str::to_owned) });
        let name = runtime.block_on(handle).unwrap().unwrap();
        assert!(name.starts_with("test-rt-"));
    }

    #[test]
    fn current_thread_runtime_names_blocking_threads() {
        let runtime = create_current_thread_runtime("fifo-io").unwrap();
        assert!(blocking_thread_name(&runtime).starts_with("fifo-io-"));
    }

    #[test]
    fn current_thread_runtime_drives_timers() {
        let runtime = create_current_thread_runtime("timers").unwrap();
        let value = runtime.block_on(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            7
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn blocking_pool_of_one_still_runs_every_job() {
        let runtime = RuntimeOptions::builder()
            .max_blocking_threads(1)
            .build()
            .create()
            .unwrap();
        let total = runtime.block_on(async {
            let jobs: Vec<_> = (0..4).map(|i| tokio::task::spawn_blocking(move || i)).collect();
            let mut total = 0;
            for job in jobs {
                total += job.await.unwrap();
            }
            total
        });
        assert_eq!(total, 6);
    }

    #[test]
    fn defaults() {
        let options = RuntimeOptions::default();
        assert_eq!(options.flavor, RuntimeFlavor::CurrentThread);
        assert_eq!(options.thread_name, "linefifo-rt");
        assert_eq!(options.max_blocking_threads, 32);
        assert!(options.worker_threads.is_none());
    }
}
