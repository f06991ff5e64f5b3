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

//! Coalesce individually submitted items into batches.
//!
//! Producers submit items one at a time; a background task gathers them into
//! batches of at most `max_batch_size`, waiting up to `max_wait` for a
//! batch to fill, and hands each batch to an async processor. Every item's
//! ticket resolves with the result of the batch it landed in. Batches are
//! `Vec`s unless [`Batcher::spawn_with`] supplies another container.
//!
//! ```no_run
//! # async fn demo(fifo: fifo::LineFifo) {
//! use fifo::{BatchOptions, Batcher};
//!
//! let sink = fifo.clone();
//! let batcher = Batcher::spawn(BatchOptions::default(), move |lines: Vec<String>| {
//!     let sink = sink.clone();
//!     async move {
//!         for line in &lines {
//!             sink.put_line(line);
//!         }
//!         sink.flush().await
//!     }
//! });
//! let ticket = batcher.submit("hello".to_string());
//! ticket.wait().await;
//! # }
//! ```

use std::{future::Future, time::Duration};

use bon::Builder;
use smart_default::SmartDefault;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct BatchOptions {
    /// How long a batch may wait for more items. Zero gathers only what is
    /// already queued when the batch starts.
    #[builder(default)]
    pub max_wait: Duration,

    #[default(10)]
    #[builder(default = 10)]
    pub max_batch_size: usize,
}

struct Submission<T, E> {
    item: T,
    done: oneshot::Sender<Result<(), E>>,
}

/// Handle for submitting items to a batching task. Dropping every handle
/// stops the task once queued items are processed.
pub struct Batcher<T, E> {
    tx: mpsc::UnboundedSender<Submission<T, E>>,
}

impl<T, E> Clone for Batcher<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Completion of one submitted item.
#[derive(Debug)]
pub struct BatchTicket<E>(oneshot::Receiver<Result<(), E>>);

impl<E> BatchTicket<E> {
    /// The result of the batch the item was processed in, or `None` if the
    /// batching task went away first.
    pub async fn wait(self) -> Option<Result<(), E>> { self.0.await.ok() }
}

impl<T, E> Batcher<T, E>
where
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    /// Start the batching task on the current runtime. Batches are processed
    /// one after another, in submission order.
    pub fn spawn<F, Fut>(options: BatchOptions, process: F) -> Self
    where
        F: FnMut(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self::spawn_with(options, Vec::with_capacity, Vec::push, process)
    }

    /// Like [`spawn`](Self::spawn), with a custom batch container: `start`
    /// builds an empty batch given the size cap, and `grow` adds one item to
    /// it.
    pub fn spawn_with<B, S, G, F, Fut>(
        options: BatchOptions,
        mut start: S,
        mut grow: G,
        mut process: F,
    ) -> Self
    where
        B: Send + 'static,
        S: FnMut(usize) -> B + Send + 'static,
        G: FnMut(&mut B, T) + Send + 'static,
        F: FnMut(B) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Submission<T, E>>();
        let max_batch_size = options.max_batch_size.max(1);

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = start(max_batch_size);
                grow(&mut batch, first.item);
                let mut tickets = vec![first.done];

                if options.max_wait.is_zero() {
                    tokio::task::yield_now().await;
                    while tickets.len() < max_batch_size {
                        let Ok(next) = rx.try_recv() else { break };
                        grow(&mut batch, next.item);
                        tickets.push(next.done);
                    }
                } else {
                    let deadline = Instant::now() + options.max_wait;
                    while tickets.len() < max_batch_size {
                        match tokio::time::timeout_at(deadline, rx.recv()).await {
                            Ok(Some(next)) => {
                                grow(&mut batch, next.item);
                                tickets.push(next.done);
                            }
                            _ => break,
                        }
                    }
                }

                debug!(size = tickets.len(), "processing batch");
                let result = process(batch).await;
                for ticket in tickets {
                    let _ = ticket.send(result.clone());
                }
            }
        });

        Self { tx }
    }

    /// Queue `item` for the next batch.
    pub fn submit(&self, item: T) -> BatchTicket<E> {
        let (done, rx) = oneshot::channel();
        // A send only fails once the task is gone; the ticket then reports
        // `None`.
        let _ = self.tx.send(Submission { item, done });
        BatchTicket(rx)
    }
}
