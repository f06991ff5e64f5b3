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

use std::{
    fs::File,
    io::{self, Write as _},
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use snafu::{IntoError, ResultExt, ensure};
use tokio::sync::{Notify, RwLock, oneshot, watch};
use tracing::{debug, error, info};

use crate::{
    config::{FifoConfig, FlushMode, HeaderPlacement, OpenMode},
    error::{
        AbandonedSnafu, FifoError, JoinSnafu, MissingPathSnafu, ReadSnafu, RemoveSnafu,
        RenameSnafu, Result, WriteSnafu,
    },
    handle::{Descriptor, open_descriptor},
    header::{Checkpoint, HEADER_READ_LIMIT, HeaderLocation, sidecar_path},
    line::Line,
    reader::{AfterRead, ReadBuffer},
    watch::FileWatch,
    writer::WriteQueue,
};

/// A FIFO of newline-delimited records stored in one file.
///
/// Cloning is cheap and every clone drives the same handle. The descriptor is
/// opened lazily by the first operation that needs it; persisted cursors are
/// loaded from the header on that first open only. Operations that touch the
/// file spawn Tokio tasks, so they must run inside a Tokio runtime.
///
/// Once an open, read or write fails the handle is faulted: the error is
/// stored and returned by every later flush, read and open. A new handle
/// has to be built to recover.
#[derive(Clone)]
pub struct LineFifo {
    pub(crate) shared: Arc<Shared>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LoopControl {
    paused:     bool,
    /// Bumped by every new `read_lines` loop and by `close`; a loop whose
    /// generation is stale returns.
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) descriptor: Descriptor,
    /// Cursors have been loaded from the header.
    pub(crate) loaded:     bool,
    pub(crate) slot:       usize,
    pub(crate) cursors:    Checkpoint,
    pub(crate) eof:        bool,
    pub(crate) fault:      Option<FifoError>,
    pub(crate) reader:     ReadBuffer,
    pub(crate) writer:     WriteQueue,
}

impl State {
    fn set_fault(&mut self, err: &FifoError) {
        if self.fault.is_none() {
            self.fault = Some(err.clone());
        }
        self.eof = true;
        self.writer.fail(err);
    }

    /// Shift every cursor down after `reclaimed` bytes were cut from the
    /// front of the record region.
    pub(crate) fn rebase(&mut self, reclaimed: u64) {
        let reserved = self.cursors.reserved;
        self.cursors.position = self.cursors.position.saturating_sub(reclaimed).max(reserved);
        self.cursors.write_position = self
            .cursors
            .write_position
            .saturating_sub(reclaimed)
            .max(reserved);
        self.reader.rebase(reclaimed);
    }
}

pub(crate) struct Shared {
    pub(crate) config:      FifoConfig,
    path:                   Mutex<PathBuf>,
    pub(crate) state:       Mutex<State>,
    data_ready:             Notify,
    control:                watch::Sender<LoopControl>,
    /// Held shared by physical reads and writes, exclusively by compaction.
    pub(crate) io_gate:     RwLock<()>,
    /// Serializes header writes.
    pub(crate) header_lock: Mutex<()>,
}

enum Acquire {
    Wait(oneshot::Receiver<Result<Arc<File>>>),
    Open {
        load_header: bool,
        rx:          oneshot::Receiver<Result<Arc<File>>>,
    },
}

enum WriteTrigger {
    Now,
    Later,
    Pending,
}

/// Run blocking file work on Tokio's blocking pool.
pub(crate) async fn blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job).await.context(JoinSnafu)
}

fn now_millis() -> u64 { u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default() }

impl Shared {
    pub(crate) fn data_path(&self) -> PathBuf { self.path.lock().clone() }

    pub(crate) fn header_location(&self) -> HeaderLocation {
        HeaderLocation::new(&self.data_path(), self.config.header)
    }

    /// The open descriptor, opening or reopening it as needed. Concurrent
    /// callers share a single physical open.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<Arc<File>> {
        let (next, expired) = {
            let mut state = self.state.lock();
            if let Some(err) = &state.fault {
                return Err(err.clone());
            }
            let expired = match &state.descriptor {
                Descriptor::Open { opened_at, .. } => self
                    .config
                    .reopen_interval
                    .is_some_and(|every| opened_at.elapsed() >= every),
                _ => false,
            };
            let load_header = !state.loaded;
            let (tx, rx) = oneshot::channel();
            let next = match &mut state.descriptor {
                Descriptor::Open { file, .. } if !expired => return Ok(Arc::clone(file)),
                Descriptor::Opening(waiters) => {
                    waiters.push(tx);
                    Acquire::Wait(rx)
                }
                _ => {
                    state.descriptor = Descriptor::Opening(vec![tx]);
                    Acquire::Open { load_header, rx }
                }
            };
            (next, expired)
        };

        let rx = match next {
            Acquire::Wait(rx) => rx,
            Acquire::Open { load_header, rx } => {
                if expired {
                    let path = self.data_path();
                    debug!(path = %path.display(), "recycling fifo descriptor");
                }
                // The open settles every waiter even if this caller goes away.
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.open_physical(load_header).await });
                rx
            }
        };
        rx.await.unwrap_or_else(|_| AbandonedSnafu.fail())
    }

    async fn open_physical(self: Arc<Self>, load_header: bool) {
        let path = self.data_path();
        let config = self.config.clone();
        let opened = {
            let path = path.clone();
            blocking(move || open_descriptor(&path, &config, load_header))
                .await
                .and_then(|opened| opened)
        };

        let (waiters, outcome) = {
            let mut state = self.state.lock();
            let waiters = match std::mem::take(&mut state.descriptor) {
                Descriptor::Opening(waiters) => waiters,
                _ => Vec::new(),
            };
            let outcome = match opened {
                Ok(opened) => {
                    if let Some(cursors) = opened.checkpoint {
                        state.cursors = cursors;
                        state.slot = opened.slot;
                        state.reader.seek_to(cursors.position);
                        state.loaded = true;
                    }
                    state.descriptor = Descriptor::Open {
                        file:      Arc::clone(&opened.file),
                        opened_at: Instant::now(),
                    };
                    Ok(opened.file)
                }
                Err(err) => {
                    state.set_fault(&err);
                    Err(err)
                }
            };
            (waiters, outcome)
        };

        if let Err(err) = &outcome {
            error!(path = %path.display(), error = %err, "fifo open failed");
            self.data_ready.notify_waiters();
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Write `cursors` to the header. A handle only persists the cursors its
    /// mode moves: the read cursor when it can read and the write cursor when
    /// it can write. The others are carried over from the stored header,
    /// shifted down by `reclaimed` when a compaction just cut the file.
    ///
    /// Callers hold `header_lock`.
    pub(crate) fn store_cursors(
        &self,
        cursors: Checkpoint,
        slot: usize,
        reclaimed: u64,
    ) -> Result<()> {
        let location = self.header_location();
        let mode = self.config.mode;
        let mut record = cursors;
        if !(mode.can_read() && mode.can_write())
            && let Some(stored) = location.load(slot.max(HEADER_READ_LIMIT))
        {
            let shift = |offset: u64| offset.saturating_sub(reclaimed).max(cursors.reserved);
            if !mode.can_read() {
                record.position = shift(stored.position);
                record.last_read_ms = stored.last_read_ms;
            }
            if !mode.can_write() {
                record.write_position = shift(stored.write_position);
            }
        }
        location.store(&record.encode(slot)?)
    }

    /// Hand out the next buffered line, if any.
    fn take_line(&self) -> Option<Line> {
        let mut state = self.state.lock();
        let line = state.reader.next_line();
        let at_end = match &line {
            Some(line) => {
                if self.config.update_position {
                    state.cursors.position += line.len() as u64;
                }
                state.reader.is_drained()
            }
            // Only a partial line, if anything, is left.
            None => true,
        };
        if at_end && state.reader.short_read() {
            state.eof = true;
        }
        line
    }

    /// Start a physical read unless one is already running.
    fn request_read(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.fault.is_some() || !state.reader.try_begin() {
                return;
            }
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.read_loop().await });
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            let Ok(file) = self.acquire().await else {
                self.state.lock().reader.finish();
                self.data_ready.notify_waiters();
                return;
            };

            let gate = self.io_gate.read().await;
            let path = self.data_path();
            let (chunk, offset) = self.state.lock().reader.take_chunk();
            let read = blocking(move || {
                let mut chunk = chunk;
                let n = file.read_at(&mut chunk, offset);
                (chunk, n)
            })
            .await;
            drop(gate);

            let outcome = {
                let mut state = self.state.lock();
                match read {
                    Ok((chunk, Ok(n))) => {
                        if n > 0 {
                            state.eof = false;
                            state.cursors.last_read_ms = now_millis();
                        }
                        debug!(path = %path.display(), offset, n, "fifo chunk read");
                        Ok(state.reader.complete(chunk, n))
                    }
                    Ok((chunk, Err(source))) => {
                        state.reader.abort(Some(chunk));
                        let err = ReadSnafu { path: &path, offset }.into_error(source);
                        state.set_fault(&err);
                        Err(err)
                    }
                    Err(err) => {
                        state.reader.abort(None);
                        state.set_fault(&err);
                        Err(err)
                    }
                }
            };
            self.data_ready.notify_waiters();

            match outcome {
                Ok(AfterRead::ReadAhead) => {}
                Ok(AfterRead::Done) => return,
                Err(err) => {
                    error!(path = %path.display(), offset, error = %err, "fifo read failed");
                    return;
                }
            }
        }
    }

    fn submit(self: &Arc<Self>, parts: &[&[u8]]) {
        let trigger = {
            let mut state = self.state.lock();
            if state.fault.is_some() {
                return;
            }
            state.writer.push(parts);
            if state.writer.pending_len() >= self.config.write_size {
                WriteTrigger::Now
            } else if state.writer.arm_timer() {
                WriteTrigger::Later
            } else {
                WriteTrigger::Pending
            }
        };

        match trigger {
            WriteTrigger::Now => self.start_write(),
            WriteTrigger::Later => {
                let shared = Arc::clone(self);
                let delay = self.config.write_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.state.lock().writer.disarm_timer();
                    shared.start_write();
                });
            }
            WriteTrigger::Pending => {}
        }
    }

    /// Start a physical write unless one is running or nothing is pending.
    fn start_write(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.fault.is_some() || !state.writer.try_begin() {
                return;
            }
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.write_loop().await });
    }

    async fn write_loop(self: Arc<Self>) {
        let sync = self.config.flush_mode == FlushMode::Sync;
        loop {
            let file = match self.acquire().await {
                Ok(file) => file,
                Err(err) => {
                    self.state.lock().writer.fail(&err);
                    return;
                }
            };

            let gate = self.io_gate.read().await;
            let chunk = {
                let mut state = self.state.lock();
                match state.writer.take_chunk() {
                    Some(chunk) => chunk,
                    None => {
                        state.writer.finish();
                        return;
                    }
                }
            };
            let len = chunk.len() as u64;
            let path = self.data_path();
            let written = blocking(move || -> io::Result<()> {
                (&*file).write_all(&chunk)?;
                if sync {
                    file.sync_data()?;
                }
                Ok(())
            })
            .await
            .and_then(|res| res.context(WriteSnafu { path: &path }));
            drop(gate);

            let mut state = self.state.lock();
            match written {
                Ok(()) => {
                    state.cursors.write_position += len;
                    state.writer.complete(len);
                    debug!(path = %path.display(), len, "fifo chunk written");
                    if state.fault.is_some() || state.writer.pending_len() == 0 {
                        state.writer.finish();
                        return;
                    }
                }
                Err(err) => {
                    state.set_fault(&err);
                    drop(state);
                    error!(path = %path.display(), error = %err, "fifo write failed");
                    self.data_ready.notify_waiters();
                    return;
                }
            }
        }
    }
}

fn halted(control: &watch::Receiver<LoopControl>, generation: u64) -> bool {
    let current = *control.borrow();
    current.paused || current.generation != generation
}

impl LineFifo {
    pub fn new(path: impl Into<PathBuf>, config: FifoConfig) -> Result<Self> {
        let path = path.into();
        ensure!(!path.as_os_str().is_empty(), MissingPathSnafu);
        config.validate()?;

        let state = State {
            descriptor: Descriptor::Closed,
            loaded:     false,
            slot:       config.header_size,
            cursors:    Checkpoint::default(),
            eof:        false,
            fault:      None,
            reader:     ReadBuffer::new(config.read_size),
            writer:     WriteQueue::default(),
        };
        let (control, _) = watch::channel(LoopControl::default());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                path: Mutex::new(path),
                state: Mutex::new(state),
                data_ready: Notify::new(),
                control,
                io_gate: RwLock::new(()),
                header_lock: Mutex::new(()),
            }),
        })
    }

    /// Build a handle from an intent flag (`"r"`, `"a"`, `"r+"`, `"a+"`)
    /// with default settings.
    pub fn with_flag(path: impl Into<PathBuf>, flag: &str) -> Result<Self> {
        Self::new(path, FifoConfig::with_mode(OpenMode::from_flag(flag)?))
    }

    /// Open the file and load the header. Idempotent; concurrent callers
    /// share one physical open and all see its outcome.
    pub async fn open(&self) -> Result<()> { self.shared.acquire().await.map(drop) }

    /// Release the descriptor and end any running `read_lines` loop. The next
    /// operation reopens the file without reloading the header.
    pub fn close(&self) {
        let released = {
            let mut state = self.shared.state.lock();
            if state.descriptor.is_open() {
                std::mem::take(&mut state.descriptor)
            } else {
                Descriptor::Closed
            }
        };
        self.shared.control.send_modify(|c| c.generation += 1);
        if released.is_open() {
            let path = self.path();
            info!(path = %path.display(), "fifo closed");
        }
    }

    /// The next buffered line. When none is buffered this starts a read in
    /// the background and returns `None`; call again once data has arrived.
    pub fn get_line(&self) -> Option<Line> {
        let line = self.shared.take_line();
        if line.is_none() {
            self.shared.request_read();
        }
        line
    }

    /// Wait for the next line. Returns `None` once a fresh read finds no
    /// complete line left in the file.
    pub async fn read_line(&self) -> Result<Option<Line>> {
        let shared = &self.shared;
        let mut observed_read = false;
        loop {
            let notified = shared.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(line) = shared.take_line() {
                return Ok(Some(line));
            }
            {
                let state = shared.state.lock();
                if let Some(err) = &state.fault {
                    return Err(err.clone());
                }
                if observed_read && state.reader.short_read() && !state.reader.in_flight() {
                    return Ok(None);
                }
            }
            shared.request_read();
            notified.await;
            observed_read = true;
        }
    }

    /// Feed every line to `visitor` in file order, waiting for more as the
    /// file grows.
    ///
    /// Returns the fault if the handle faults, and `Ok(())` once the handle is
    /// closed or another `read_lines` call takes over. Between
    /// [`pause`](Self::pause) and [`resume`](Self::resume) no lines are
    /// delivered; the visitor may call either.
    pub async fn read_lines<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(Line),
    {
        let shared = &self.shared;
        let mut control = shared.control.subscribe();
        let mut generation = 0;
        shared.control.send_modify(|c| {
            c.generation += 1;
            generation = c.generation;
        });
        let mut watch: Option<FileWatch> = None;
        let path = self.path();
        debug!(path = %path.display(), generation, "read_lines started");

        loop {
            let current = *control.borrow_and_update();
            if current.generation != generation {
                debug!(generation, "read_lines finished");
                return Ok(());
            }
            if current.paused {
                let resumed = control
                    .wait_for(|c| !c.paused || c.generation != generation)
                    .await
                    .is_ok();
                if !resumed {
                    return Ok(());
                }
                continue;
            }

            let notified = shared.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !shared.state.lock().reader.short_read() {
                shared.request_read();
            }
            while !halted(&control, generation) {
                match shared.take_line() {
                    Some(line) => visitor(line),
                    None => break,
                }
            }
            if halted(&control, generation) {
                continue;
            }

            let (fault, in_flight, at_end) = {
                let state = shared.state.lock();
                (state.fault.clone(), state.reader.in_flight(), state.reader.short_read())
            };
            if let Some(err) = fault {
                return Err(err);
            }

            if in_flight {
                tokio::select! {
                    () = &mut notified => {}
                    _ = control.changed() => {}
                }
            } else if at_end {
                let watch = watch.get_or_insert_with(|| FileWatch::new(&path));
                tokio::select! {
                    () = watch.changed(shared.config.poll_interval) => shared.request_read(),
                    _ = control.changed() => {}
                }
            } else {
                shared.request_read();
                tokio::select! {
                    () = &mut notified => {}
                    _ = control.changed() => {}
                }
            }
        }
    }

    /// Stop delivering lines to `read_lines` until [`resume`](Self::resume).
    pub fn pause(&self) { self.shared.control.send_modify(|c| c.paused = true); }

    pub fn resume(&self) { self.shared.control.send_modify(|c| c.paused = false); }

    pub fn is_paused(&self) -> bool { self.shared.control.borrow().paused }

    /// Append one record, adding the newline if `line` lacks one.
    pub fn put_line(&self, line: impl AsRef<[u8]>) {
        let line = line.as_ref();
        if line.ends_with(b"\n") {
            self.shared.submit(&[line]);
        } else {
            self.shared.submit(&[line, b"\n"]);
        }
    }

    /// Append raw bytes. Ignored once the handle has faulted.
    pub fn write(&self, bytes: impl AsRef<[u8]>) { self.shared.submit(&[bytes.as_ref()]); }

    /// Wait until everything submitted so far is written.
    pub async fn flush(&self) -> Result<()> {
        let waiter = {
            let mut state = self.shared.state.lock();
            if let Some(err) = &state.fault {
                return Err(err.clone());
            }
            match state.writer.register() {
                Some(waiter) => waiter,
                None => return Ok(()),
            }
        };
        self.shared.start_write();
        waiter.await.unwrap_or_else(|_| AbandonedSnafu.fail())
    }

    /// Persist the cursors to the header and sync it. Does nothing before
    /// the handle has been opened.
    ///
    /// A read-only handle leaves the stored write cursor alone and an
    /// append-only handle leaves the stored read cursor alone, so a producer
    /// and a consumer can share one header.
    pub fn checkpoint(&self) -> Result<()> {
        let shared = &self.shared;
        let _serial = shared.header_lock.lock();
        let (cursors, slot) = {
            let state = shared.state.lock();
            if !state.loaded {
                drop(state);
                let path = self.path();
                debug!(path = %path.display(), "checkpoint skipped, fifo never opened");
                return Ok(());
            }
            (state.cursors, state.slot)
        };
        shared.store_cursors(cursors, slot, 0)
    }

    /// Alias of [`checkpoint`](Self::checkpoint).
    pub fn rsync(&self) -> Result<()> { self.checkpoint() }

    /// Flush pending writes, then checkpoint. On an append-only handle this
    /// only advances the stored write cursor.
    pub async fn wsync(&self) -> Result<()> {
        self.flush().await?;
        self.checkpoint()
    }

    /// Delete the data file and its sidecar header. The handle stays usable.
    pub async fn remove(&self) -> Result<()> {
        let path = self.path();
        tokio::fs::remove_file(&path)
            .await
            .context(RemoveSnafu { path: &path })?;
        if self.shared.config.header == HeaderPlacement::Sidecar {
            let header = sidecar_path(&path);
            match tokio::fs::remove_file(&header).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(err).context(RemoveSnafu { path: header });
                }
                _ => {}
            }
        }
        info!(path = %path.display(), "fifo removed");
        Ok(())
    }

    /// Move the data file, and its sidecar header with it. The handle
    /// follows the file to its new name.
    pub async fn rename(&self, to: impl Into<PathBuf>) -> Result<()> {
        let to = to.into();
        let from = self.path();
        tokio::fs::rename(&from, &to)
            .await
            .context(RenameSnafu { from: &from, to: &to })?;
        *self.shared.path.lock() = to.clone();

        if self.shared.config.header == HeaderPlacement::Sidecar {
            let (header_from, header_to) = (sidecar_path(&from), sidecar_path(&to));
            match tokio::fs::rename(&header_from, &header_to).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(err).context(RenameSnafu {
                        from: header_from,
                        to:   header_to,
                    });
                }
                _ => {}
            }
        }
        info!(from = %from.display(), to = %to.display(), "fifo renamed");
        Ok(())
    }

    /// Offset of the first line not yet handed out.
    pub fn position(&self) -> u64 { self.shared.state.lock().cursors.position }

    /// Set the read cursor that the next checkpoint persists. Meant for
    /// callers that run with `update_position` off; it does not move the
    /// read stream.
    pub fn set_position(&self, position: u64) {
        let mut state = self.shared.state.lock();
        state.cursors.position = position.max(state.cursors.reserved);
    }

    pub fn write_position(&self) -> u64 { self.shared.state.lock().cursors.write_position }

    pub fn reserved(&self) -> u64 { self.shared.state.lock().cursors.reserved }

    /// Snapshot of the cursors a checkpoint would write.
    pub fn cursors(&self) -> Checkpoint { self.shared.state.lock().cursors }

    pub fn is_eof(&self) -> bool { self.shared.state.lock().eof }

    pub fn fault(&self) -> Option<FifoError> { self.shared.state.lock().fault.clone() }

    pub fn last_read_time(&self) -> Option<DateTime<Utc>> {
        let millis = self.shared.state.lock().cursors.last_read_ms;
        if millis == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(i64::try_from(millis).ok()?)
    }

    pub fn path(&self) -> PathBuf { self.shared.data_path() }

    pub fn header_path(&self) -> PathBuf { self.shared.header_location().path().to_path_buf() }

    pub fn config(&self) -> &FifoConfig { &self.shared.config }
}

impl std::fmt::Debug for LineFifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineFifo")
            .field("path", &self.path())
            .field("mode", &self.shared.config.mode)
            .field("cursors", &self.cursors())
            .finish_non_exhaustive()
    }
}
