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
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::Poll,
    time::Duration,
};

use fifo::{
    BatchOptions, Batcher, Checkpoint, CompactOptions, CompactOutcome, FifoConfig, FifoError,
    FlushMode, HeaderPlacement, LineFifo, OpenMode, SkipReason, rotate_files,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn setup() -> (TempDir, PathBuf) {
    linefifo_common_telemetry::init_default_ut_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fifo");
    (dir, path)
}

async fn drain(fifo: &LineFifo) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = fifo.read_line().await.unwrap() {
        lines.push(line.to_string_lossy().into_owned());
    }
    lines
}

async fn write_lines(path: &Path, lines: &[&str]) {
    let writer = LineFifo::with_flag(path, "a").unwrap();
    for line in lines {
        writer.put_line(line);
    }
    writer.flush().await.unwrap();
    writer.close();
}

#[tokio::test]
async fn test_lines_come_back_in_order() {
    let (_dir, path) = setup();
    let lines: Vec<String> = (0..100).map(|i| format!("message-{i:04}")).collect();

    let writer = LineFifo::with_flag(&path, "a").unwrap();
    for line in &lines {
        writer.put_line(line);
    }
    writer.flush().await.unwrap();
    assert_eq!(writer.write_position(), 100 * 13);

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    let read = drain(&reader).await;
    let expected: Vec<String> = lines.iter().map(|l| format!("{l}\n")).collect();
    assert_eq!(read, expected);
    assert_eq!(reader.position(), 100 * 13);
}

#[tokio::test]
async fn test_reader_reports_eof_after_last_line() {
    let (_dir, path) = setup();
    write_lines(&path, &["a", "bb", "ccc"]).await;

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "a\n");
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "bb\n");
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "ccc\n");
    assert!(reader.read_line().await.unwrap().is_none());
    assert!(reader.is_eof());
    assert!(reader.get_line().is_none());
    assert_eq!(reader.position(), 9);
    assert!(reader.last_read_time().is_some());
}

#[tokio::test]
async fn test_checkpoint_resumes_in_new_handle() {
    let (_dir, path) = setup();
    write_lines(&path, &["one", "two", "three", "four", "five"]).await;

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "one\n");
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "two\n");
    reader.checkpoint().unwrap();
    reader.close();
    assert!(reader.header_path().exists());

    let resumed = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(drain(&resumed).await, vec!["three\n", "four\n", "five\n"]);
    assert_eq!(resumed.position(), 8 + 6 + 5 + 5);
}

#[tokio::test]
async fn test_producer_checkpoint_keeps_consumer_cursor() {
    let (_dir, path) = setup();
    let writer = LineFifo::with_flag(&path, "a").unwrap();
    for line in ["one", "two", "three"] {
        writer.put_line(line);
    }
    writer.wsync().await.unwrap();

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "one\n");
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "two\n");
    reader.checkpoint().unwrap();
    reader.close();

    writer.put_line("four");
    writer.wsync().await.unwrap();
    let stored = Checkpoint::decode(&std::fs::read(writer.header_path()).unwrap()).unwrap();
    assert_eq!(stored.position, 8);
    assert_eq!(stored.write_position, 19);

    let resumed = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(drain(&resumed).await, vec!["three\n", "four\n"]);
    resumed.checkpoint().unwrap();
    let stored = Checkpoint::decode(&std::fs::read(resumed.header_path()).unwrap()).unwrap();
    assert_eq!(stored.position, 19);
    assert_eq!(stored.write_position, 19);
}

#[tokio::test]
async fn test_checkpoint_before_open_writes_nothing() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();
    fifo.checkpoint().unwrap();
    assert!(!fifo.header_path().exists());
}

#[tokio::test]
async fn test_flushes_resolve_in_submission_order() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();

    fifo.put_line("first");
    let first = fifo.flush();
    tokio::pin!(first);
    assert!(futures::poll!(&mut first).is_pending());

    fifo.put_line("second");
    let second = fifo.flush();
    tokio::pin!(second);
    assert!(futures::poll!(&mut second).is_pending());

    second.await.unwrap();
    // The earlier flush covers fewer bytes, so it is already released.
    assert!(matches!(futures::poll!(&mut first), Poll::Ready(Ok(()))));
    assert_eq!(std::fs::read(&path).unwrap(), b"first\nsecond\n");
}

#[tokio::test]
async fn test_flush_with_nothing_pending_returns_immediately() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();
    fifo.flush().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_raw_write_and_put_line_share_the_stream() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a+").unwrap();
    fifo.write("par");
    fifo.write("tial\n");
    fifo.put_line("whole\n");
    fifo.flush().await.unwrap();

    assert_eq!(drain(&fifo).await, vec!["partial\n", "whole\n"]);
}

#[tokio::test]
async fn test_multibyte_characters_survive_small_reads() {
    let (_dir, path) = setup();
    write_lines(&path, &["x€y", "日本語", "naïve"]).await;

    let config = FifoConfig::builder().read_size(3).build();
    let reader = LineFifo::new(&path, config).unwrap();
    let lines = drain(&reader).await;
    assert_eq!(lines, vec!["x€y\n", "日本語\n", "naïve\n"]);
    assert_eq!(reader.position(), std::fs::metadata(&path).unwrap().len());
}

#[tokio::test]
async fn test_partial_trailing_line_is_held_back() {
    let (_dir, path) = setup();
    std::fs::write(&path, b"done\nhalf").unwrap();

    let fifo = LineFifo::with_flag(&path, "r+").unwrap();
    assert_eq!(fifo.read_line().await.unwrap().unwrap(), "done\n");
    assert!(fifo.read_line().await.unwrap().is_none());

    fifo.write("-way\n");
    fifo.flush().await.unwrap();
    assert_eq!(fifo.read_line().await.unwrap().unwrap(), "half-way\n");
}

#[tokio::test]
async fn test_compaction_rebases_cursors_and_header() {
    let (_dir, path) = setup();
    let lines: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(&path, &refs).await;

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    for i in 0..8 {
        assert_eq!(reader.read_line().await.unwrap().unwrap(), format!("line-{i}\n").as_str());
    }
    assert_eq!(reader.position(), 56);

    let outcome = reader.compact(&CompactOptions::default()).await.unwrap();
    assert_eq!(
        outcome,
        CompactOutcome::Compacted {
            reclaimed: 56,
            new_len:   14,
        }
    );
    assert_eq!(reader.position(), 0);
    assert_eq!(std::fs::read(&path).unwrap(), b"line-8\nline-9\n");

    assert_eq!(drain(&reader).await, vec!["line-8\n", "line-9\n"]);

    let fresh = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(drain(&fresh).await, vec!["line-8\n", "line-9\n"]);
}

#[tokio::test]
async fn test_compaction_waits_for_in_flight_write() {
    let (_dir, path) = setup();
    let lines: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(&path, &refs).await;

    let fifo = LineFifo::with_flag(&path, "a+").unwrap();
    for _ in 0..8 {
        fifo.read_line().await.unwrap().unwrap();
    }
    assert_eq!(fifo.position(), 56);

    fifo.put_line("late");
    let compact_opts = CompactOptions::default();
    let (flushed, outcome) = tokio::join!(fifo.flush(), fifo.compact(&compact_opts));
    flushed.unwrap();
    assert!(matches!(outcome.unwrap(), CompactOutcome::Compacted { reclaimed: 56, .. }));

    // Whichever ran first, the late line lands after the surviving tail.
    assert_eq!(std::fs::read(&path).unwrap(), b"line-8\nline-9\nlate\n");
    assert_eq!(fifo.position(), 0);
    assert_eq!(fifo.write_position(), 19);

    assert_eq!(drain(&fifo).await, vec!["line-8\n", "line-9\n", "late\n"]);
    assert_eq!(fifo.position(), 19);
}

#[tokio::test]
async fn test_compaction_under_running_read_lines() {
    let (_dir, path) = setup();
    let lines: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(&path, &refs).await;

    let config = FifoConfig::builder()
        .mode(OpenMode::ReadWrite)
        .poll_interval(Duration::from_millis(10))
        .build();
    let fifo = LineFifo::new(&path, config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = {
        let reader = fifo.clone();
        tokio::spawn(async move {
            reader
                .read_lines(move |line| tx.send(line.to_string_lossy().into_owned()).unwrap())
                .await
        })
    };
    for i in 0..10 {
        assert_eq!(rx.recv().await.unwrap(), format!("line-{i}\n"));
    }
    assert_eq!(fifo.position(), 70);

    let outcome = fifo.compact(&CompactOptions::default()).await.unwrap();
    assert_eq!(
        outcome,
        CompactOutcome::Compacted {
            reclaimed: 70,
            new_len:   0,
        }
    );
    assert_eq!(fifo.position(), 0);
    assert_eq!(fifo.write_position(), 0);

    fifo.put_line("after");
    fifo.flush().await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(next.unwrap(), "after\n");
    assert_eq!(fifo.position(), 6);
    assert_eq!(fifo.write_position(), 6);
    assert_eq!(std::fs::read(&path).unwrap(), b"after\n");

    fifo.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_compaction_rewrites_embedded_header() {
    let (_dir, path) = setup();
    let fifo = LineFifo::new(&path, embedded(OpenMode::ReadWrite)).unwrap();
    for i in 0..10 {
        fifo.put_line(format!("line-{i}"));
    }
    fifo.flush().await.unwrap();
    for _ in 0..8 {
        fifo.read_line().await.unwrap().unwrap();
    }
    assert_eq!(fifo.position(), 256);

    let outcome = fifo.compact(&CompactOptions::default()).await.unwrap();
    assert_eq!(
        outcome,
        CompactOutcome::Compacted {
            reclaimed: 56,
            new_len:   214,
        }
    );
    assert_eq!(fifo.position(), 200);
    assert_eq!(fifo.write_position(), 214);

    let data = std::fs::read(&path).unwrap();
    assert_eq!(data.len(), 214);
    assert_eq!(data[199], b'\n');
    assert_eq!(&data[200..], b"line-8\nline-9\n");
    assert_eq!(Checkpoint::decode(&data), Some(fifo.cursors()));
    assert!(!fifo::header::sidecar_path(&path).exists());

    let fresh = LineFifo::new(&path, embedded(OpenMode::ReadOnly)).unwrap();
    assert_eq!(drain(&fresh).await, vec!["line-8\n", "line-9\n"]);
    assert_eq!(fresh.position(), 214);
}

#[tokio::test]
async fn test_compaction_below_ratio_leaves_file_alone() {
    let (_dir, path) = setup();
    let lines: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_lines(&path, &refs).await;
    let before = std::fs::read(&path).unwrap();

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    reader.read_line().await.unwrap().unwrap();
    reader.read_line().await.unwrap().unwrap();

    let outcome = reader.compact(&CompactOptions::default()).await.unwrap();
    assert_eq!(outcome, CompactOutcome::Skipped(SkipReason::BelowRatio));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(reader.position(), 14);
    assert!(!reader.header_path().exists());
}

#[tokio::test]
async fn test_writing_through_read_only_handle_faults() {
    let (_dir, path) = setup();
    write_lines(&path, &["existing"]).await;

    let fifo = LineFifo::with_flag(&path, "r").unwrap();
    fifo.put_line("rejected");
    let first = fifo.flush().await.unwrap_err();
    assert!(matches!(first, FifoError::Write { .. }));

    fifo.put_line("ignored");
    let second = fifo.flush().await.unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
    assert!(fifo.fault().is_some());
    assert!(fifo.is_eof());
    assert_eq!(std::fs::read(&path).unwrap(), b"existing\n");
}

#[tokio::test]
async fn test_reading_through_append_handle_faults() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();

    let err = fifo.read_line().await.unwrap_err();
    assert!(matches!(err, FifoError::Read { .. }));

    fifo.put_line("after");
    let flushed = fifo.flush().await.unwrap_err();
    assert_eq!(err.to_string(), flushed.to_string());
}

#[tokio::test]
async fn test_open_of_missing_file_is_sticky() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "r").unwrap();

    let err = fifo.open().await.unwrap_err();
    assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));

    std::fs::write(&path, b"late\n").unwrap();
    assert!(fifo.open().await.is_err());
    assert!(fifo.read_line().await.is_err());
}

#[tokio::test]
async fn test_concurrent_opens_share_outcome() {
    let (_dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();

    let opens = (0..8).map(|_| {
        let fifo = fifo.clone();
        tokio::spawn(async move { fifo.open().await })
    });
    for result in futures::future::join_all(opens).await {
        result.unwrap().unwrap();
    }
    assert!(path.exists());
}

#[tokio::test]
async fn test_invalid_flag_is_rejected() {
    let (_dir, path) = setup();
    let err = LineFifo::with_flag(&path, "w").unwrap_err();
    assert!(matches!(err, FifoError::InvalidMode { .. }));
    assert!(matches!(
        LineFifo::with_flag("", "r").unwrap_err(),
        FifoError::MissingPath { .. }
    ));
}

fn embedded(mode: OpenMode) -> FifoConfig {
    FifoConfig::builder()
        .mode(mode)
        .header(HeaderPlacement::Embedded)
        .build()
}

#[tokio::test]
async fn test_embedded_header_reserves_front_of_file() {
    let (_dir, path) = setup();
    let writer = LineFifo::new(&path, embedded(OpenMode::AppendOnly)).unwrap();
    writer.put_line("alpha");
    writer.put_line("beta");
    writer.flush().await.unwrap();
    assert_eq!(writer.reserved(), 200);
    assert_eq!(writer.write_position(), 200 + 11);

    let data = std::fs::read(&path).unwrap();
    assert_eq!(data.len(), 211);
    assert_eq!(data[199], b'\n');
    assert_eq!(&data[200..], b"alpha\nbeta\n");

    let reader = LineFifo::new(&path, embedded(OpenMode::ReadOnly)).unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "alpha\n");
    reader.checkpoint().unwrap();
    assert_eq!(reader.header_path(), path);
    assert!(!fifo::header::sidecar_path(&path).exists());

    let resumed = LineFifo::new(&path, embedded(OpenMode::ReadOnly)).unwrap();
    assert_eq!(drain(&resumed).await, vec!["beta\n"]);
    assert_eq!(resumed.position(), 211);
}

#[tokio::test]
async fn test_read_lines_follows_growth_and_pauses() {
    let (_dir, path) = setup();
    write_lines(&path, &["one", "two", "three"]).await;

    let config = FifoConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .build();
    let reader = LineFifo::new(&path, config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let seen = Arc::new(AtomicUsize::new(0));

    let task = {
        let reader = reader.clone();
        let pauser = reader.clone();
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            reader
                .read_lines(move |line| {
                    if seen.fetch_add(1, Ordering::SeqCst) == 1 {
                        pauser.pause();
                    }
                    tx.send(line.to_string_lossy().into_owned()).unwrap();
                })
                .await
        })
    };

    assert_eq!(rx.recv().await.unwrap(), "one\n");
    assert_eq!(rx.recv().await.unwrap(), "two\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert!(reader.is_paused());

    reader.resume();
    assert_eq!(rx.recv().await.unwrap(), "three\n");

    write_lines(&path, &["four"]).await;
    let grown = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(grown.unwrap(), "four\n");

    reader.close();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_read_lines_displaces_running_loop() {
    let (_dir, path) = setup();
    write_lines(&path, &["only"]).await;

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let first = {
        let reader = reader.clone();
        tokio::spawn(async move {
            reader
                .read_lines(move |line| tx.send(line.into_bytes()).unwrap())
                .await
        })
    };
    assert_eq!(&rx.recv().await.unwrap()[..], b"only\n");

    let second = {
        let reader = reader.clone();
        tokio::spawn(async move { reader.read_lines(|_| {}).await })
    };
    tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    reader.close();
    second.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rename_and_remove_carry_the_sidecar() {
    let (dir, path) = setup();
    let fifo = LineFifo::with_flag(&path, "a").unwrap();
    fifo.put_line("kept");
    fifo.wsync().await.unwrap();
    assert!(fifo.header_path().exists());

    let moved = dir.path().join("moved");
    fifo.rename(&moved).await.unwrap();
    assert_eq!(fifo.path(), moved);
    assert!(!path.exists());
    assert!(moved.exists());
    assert!(fifo::header::sidecar_path(&moved).exists());
    assert!(!fifo::header::sidecar_path(&path).exists());

    fifo.remove().await.unwrap();
    assert!(!moved.exists());
    assert!(!fifo::header::sidecar_path(&moved).exists());
}

#[tokio::test]
async fn test_remove_without_sidecar_succeeds() {
    let (_dir, path) = setup();
    write_lines(&path, &["x"]).await;
    let fifo = LineFifo::with_flag(&path, "r").unwrap();
    fifo.remove().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_sync_flush_mode_round_trip() {
    let (_dir, path) = setup();
    let config = FifoConfig::builder()
        .mode(OpenMode::ReadWrite)
        .flush_mode(FlushMode::Sync)
        .build();
    let fifo = LineFifo::new(&path, config).unwrap();
    fifo.put_line("durable");
    fifo.flush().await.unwrap();
    assert_eq!(drain(&fifo).await, vec!["durable\n"]);
}

#[tokio::test]
async fn test_large_burst_writes_without_waiting_for_delay() {
    let (_dir, path) = setup();
    let config = FifoConfig::builder()
        .mode(OpenMode::AppendOnly)
        .write_size(64)
        .write_delay(Duration::from_secs(3600))
        .build();
    let fifo = LineFifo::new(&path, config).unwrap();
    let line = "x".repeat(99);
    for _ in 0..10 {
        fifo.put_line(&line);
    }
    tokio::time::timeout(Duration::from_secs(5), fifo.flush())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 1000);
}

#[tokio::test]
async fn test_reopen_interval_picks_up_replaced_file() {
    let (dir, path) = setup();
    std::fs::write(&path, b"one\n").unwrap();

    let config = FifoConfig::builder()
        .reopen_interval(Duration::from_millis(1))
        .build();
    let reader = LineFifo::new(&path, config).unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "one\n");

    let replacement = dir.path().join("replacement");
    std::fs::write(&replacement, b"one\ntwo\n").unwrap();
    std::fs::rename(&replacement, &path).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(reader.read_line().await.unwrap().unwrap(), "two\n");
}

#[tokio::test]
async fn test_close_then_reuse_keeps_cursors() {
    let (_dir, path) = setup();
    write_lines(&path, &["a", "b"]).await;

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "a\n");
    reader.close();
    reader.close();
    assert_eq!(reader.read_line().await.unwrap().unwrap(), "b\n");
    assert_eq!(reader.position(), 4);
}

#[tokio::test]
async fn test_rotated_file_starts_fresh() {
    let (dir, path) = setup();
    let writer = LineFifo::with_flag(&path, "a").unwrap();
    writer.put_line("old");
    writer.put_line("older");
    writer.wsync().await.unwrap();
    writer.close();

    let consumer = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(consumer.read_line().await.unwrap().unwrap(), "old\n");
    consumer.checkpoint().unwrap();
    consumer.close();

    let report = rotate_files(&path).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.renamed, vec![dir.path().join("fifo.1")]);
    assert!(dir.path().join("fifo.1.hd").exists());
    assert!(!fifo::header::sidecar_path(&path).exists());

    write_lines(&path, &["new", "newer"]).await;
    let reader = LineFifo::with_flag(&path, "r").unwrap();
    assert_eq!(drain(&reader).await, vec!["new\n", "newer\n"]);

    let archived = LineFifo::with_flag(dir.path().join("fifo.1"), "r").unwrap();
    assert_eq!(drain(&archived).await, vec!["older\n"]);
}

#[tokio::test]
async fn test_batcher_feeds_fifo() {
    let (_dir, path) = setup();
    let sink = LineFifo::with_flag(&path, "a").unwrap();
    let batches = Arc::new(AtomicUsize::new(0));

    let batcher = {
        let batches = Arc::clone(&batches);
        Batcher::spawn(
            BatchOptions::builder().max_batch_size(4).build(),
            move |lines: Vec<String>| {
                let sink = sink.clone();
                batches.fetch_add(1, Ordering::SeqCst);
                async move {
                    for line in &lines {
                        sink.put_line(line);
                    }
                    sink.flush().await
                }
            },
        )
    };

    let tickets: Vec<_> = (0..10).map(|i| batcher.submit(format!("item-{i}"))).collect();
    for ticket in tickets {
        ticket.wait().await.unwrap().unwrap();
    }
    assert!(batches.load(Ordering::SeqCst) >= 3);

    let reader = LineFifo::with_flag(&path, "r").unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("item-{i}\n")).collect();
    assert_eq!(drain(&reader).await, expected);
}
