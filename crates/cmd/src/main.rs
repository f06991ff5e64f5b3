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
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use fifo::{
    CompactOptions, CompactOutcome, FifoConfig, FifoError, FlushMode, HeaderPlacement, Line,
    LineFifo, OpenMode, config::DEFAULT_MIN_RATIO, error::StatSnafu, rotate_files,
};
use linefifo_common_runtime::{Runtime, create_current_thread_runtime};
use linefifo_common_telemetry::{LoggingOptions, WorkerGuard, init_global_logging, set_panic_hook};
use linefifo_error::{ErrorExt, InvalidSettingSnafu, StatusCode};
use snafu::{ResultExt, Snafu, Whatever};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod build_info;

const APP_NAME: &str = "linefifo";

#[derive(Debug, Parser)]
#[clap(
name = "linefifo",
about = "Append to, read from and maintain line FIFO files",
author = build_info::AUTHOR,
version = build_info::VERSION,
long_version = build_info::LONG_VERSION)]
struct Cli {
    /// Log filter directives, e.g. `debug` or `info,fifo=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory for hourly log files. Logs only go to stderr when empty.
    #[arg(long, global = true, default_value = "")]
    log_dir: String,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Put(PutArgs),
    Get(GetArgs),
    Compact(CompactArgs),
    Rotate(RotateArgs),
    Stat(StatArgs),
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(transparent)]
    Fifo { source: FifoError },

    #[snafu(transparent)]
    Setting { source: linefifo_error::Error },

    #[snafu(transparent)]
    Other { source: Whatever },
}

type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Fifo { source } => source.status_code(),
            Self::Setting { source } => source.status_code(),
            Self::Other { .. } => StatusCode::Unknown,
        }
    }

    fn output_msg(&self) -> String {
        match self {
            Self::Fifo { source } => source.output_msg(),
            Self::Setting { source } => source.output_msg(),
            Self::Other { source } => snafu::Report::from_error(source).to_string(),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct HeaderArgs {
    /// Keep the checkpoint header at the front of the data file instead of
    /// in a `.hd` sidecar.
    #[arg(long)]
    embedded: bool,
}

impl HeaderArgs {
    fn config(&self, mode: OpenMode) -> FifoConfig {
        let header = if self.embedded {
            HeaderPlacement::Embedded
        } else {
            HeaderPlacement::Sidecar
        };
        FifoConfig::builder().mode(mode).header(header).build()
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Append lines, then flush and checkpoint.
Lines come from the arguments, or from stdin when none are given.
Examples:

linefifo put events.log first second
printf 'a\nb\n' | linefifo put events.log

")]
struct PutArgs {
    file: PathBuf,

    lines: Vec<String>,

    #[command(flatten)]
    header: HeaderArgs,

    /// Sync the data file after every physical write.
    #[arg(long)]
    sync: bool,
}

impl PutArgs {
    async fn run(self) -> Result<()> {
        let mut config = self.header.config(OpenMode::AppendOnly);
        if self.sync {
            config.flush_mode = FlushMode::Sync;
        }
        let fifo = LineFifo::new(&self.file, config)?;

        let count = if self.lines.is_empty() {
            append_stdin(&fifo).await?
        } else {
            for line in &self.lines {
                fifo.put_line(line);
            }
            self.lines.len()
        };
        fifo.wsync().await?;

        info!(path = %self.file.display(), count, write_position = fifo.write_position(), "lines appended");
        Ok(())
    }
}

async fn append_stdin(fifo: &LineFifo) -> Result<usize, Whatever> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .whatever_context("Failed to read stdin")?
    {
        fifo.put_line(line);
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print lines from the checkpointed position and checkpoint what was printed.
Examples:

linefifo get events.log --limit 10
linefifo get events.log --follow

")]
struct GetArgs {
    file: PathBuf,

    /// Stop after this many lines.
    #[arg(long)]
    limit: Option<usize>,

    /// Keep waiting for new lines until interrupted.
    #[arg(long)]
    follow: bool,

    /// Checkpoint after every this many lines.
    #[arg(long, default_value_t = 100)]
    checkpoint_every: usize,

    #[command(flatten)]
    header: HeaderArgs,
}

impl GetArgs {
    async fn run(self) -> Result<()> {
        let fifo = LineFifo::new(&self.file, self.header.config(OpenMode::ReadOnly))?;
        let limit = self.limit.unwrap_or(usize::MAX);
        let every = self.checkpoint_every.max(1);
        let mut out = io::stdout().lock();
        let mut count = 0;

        if limit == 0 {
            return Ok(());
        }

        if self.follow {
            let stopper = fifo.clone();
            let mut failure: Option<CliError> = None;
            let visit = |line: Line| {
                let step = emit(&mut out, &line).map_err(CliError::from).and_then(|()| {
                    count += 1;
                    if count % every == 0 {
                        stopper.checkpoint()?;
                    }
                    Ok(())
                });
                match step {
                    Ok(()) if count < limit => {}
                    Ok(()) => stopper.close(),
                    Err(err) => {
                        failure.get_or_insert(err);
                        stopper.close();
                    }
                }
            };
            tokio::select! {
                result = fifo.read_lines(visit) => result?,
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
            if let Some(err) = failure {
                return Err(err);
            }
        } else {
            while count < limit {
                let Some(line) = fifo.read_line().await? else {
                    break;
                };
                emit(&mut out, &line)?;
                count += 1;
                if count % every == 0 {
                    fifo.checkpoint()?;
                }
            }
        }

        fifo.checkpoint()?;
        info!(path = %self.file.display(), count, position = fifo.position(), "lines consumed");
        Ok(())
    }
}

fn emit(out: &mut impl Write, line: &Line) -> Result<(), Whatever> {
    out.write_all(line.as_bytes())
        .whatever_context("Failed to write to stdout")
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Reclaim the consumed front of a FIFO file.
Examples:

linefifo compact events.log
linefifo compact events.log --min-size 1048576 --min-ratio 0.8

")]
struct CompactArgs {
    file: PathBuf,

    /// Leave files smaller than this many bytes alone.
    #[arg(long, default_value_t = 0)]
    min_size: u64,

    /// Consumed share of the file required before compacting, in (0, 1].
    /// Values below 0.5 are raised to 0.5.
    #[arg(long, default_value_t = DEFAULT_MIN_RATIO)]
    min_ratio: f64,

    #[command(flatten)]
    header: HeaderArgs,
}

impl CompactArgs {
    async fn run(self) -> Result<()> {
        if !(self.min_ratio > 0.0 && self.min_ratio <= 1.0) {
            return Err(InvalidSettingSnafu {
                name:  "min_ratio",
                value: self.min_ratio.to_string(),
            }
            .build()
            .into());
        }

        let fifo = LineFifo::new(&self.file, self.header.config(OpenMode::ReadOnly))?;
        let options = CompactOptions::builder()
            .min_size(self.min_size)
            .min_ratio(self.min_ratio)
            .build();
        match fifo.compact(&options).await? {
            CompactOutcome::Compacted { reclaimed, new_len } => println!(
                "compacted {}: reclaimed {reclaimed} bytes, {new_len} bytes remain",
                self.file.display()
            ),
            CompactOutcome::Skipped(reason) => {
                println!("skipped {}: {reason}", self.file.display());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Shift FILE to FILE.1, FILE.1 to FILE.2 and so on, printing every new name.
Examples:

linefifo rotate events.log

")]
struct RotateArgs {
    file: PathBuf,
}

impl RotateArgs {
    fn run(&self) -> Result<()> {
        let report = rotate_files(&self.file)?;
        for path in &report.renamed {
            println!("{}", path.display());
        }
        match report.first_error() {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the persisted cursors and the file size as JSON.
Examples:

linefifo stat events.log

")]
struct StatArgs {
    file: PathBuf,

    #[command(flatten)]
    header: HeaderArgs,
}

impl StatArgs {
    async fn run(&self) -> Result<()> {
        let fifo = LineFifo::new(&self.file, self.header.config(OpenMode::ReadOnly))?;
        fifo.open().await?;
        let size = tokio::fs::metadata(&self.file)
            .await
            .context(StatSnafu { path: &self.file })?
            .len();
        let cursors = fifo.cursors();

        let report = serde_json::json!({
            "path": self.file.display().to_string(),
            "header": fifo.header_path().display().to_string(),
            "size": size,
            "reserved": cursors.reserved,
            "position": cursors.position,
            "write_position": cursors.write_position,
            "unread": size.saturating_sub(cursors.position),
            "last_read": fifo.last_read_time().map(|at| at.to_rfc3339()),
        });
        println!("{report:#}");
        Ok(())
    }
}

fn init_logging(level: Option<String>, dir: String) -> Result<Vec<WorkerGuard>, Whatever> {
    let options = LoggingOptions::builder().dir(dir).maybe_level(level).build();
    init_global_logging(APP_NAME, &options).whatever_context("Failed to initialize logging")
}

fn runtime() -> Result<Runtime, Whatever> {
    create_current_thread_runtime(APP_NAME).whatever_context("Failed to build the runtime")
}

impl Cli {
    fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_dir,
            commands,
        } = self;
        let _guards = init_logging(log_level, log_dir)?;
        set_panic_hook();

        runtime()?.block_on(async move {
            match commands {
                Commands::Put(args) => args.run().await,
                Commands::Get(args) => args.run().await,
                Commands::Compact(args) => args.run().await,
                Commands::Rotate(args) => args.run(),
                Commands::Stat(args) => args.run().await,
            }
        })
    }
}

fn main() -> ExitCode {
    human_panic::setup_panic!();

    match Cli::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err.output_msg());
            ExitCode::from(u8::try_from(err.status_code().exit_code()).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() { Cli::command().debug_assert(); }

    #[test]
    fn get_defaults() {
        let cli = Cli::parse_from(["linefifo", "get", "events.log"]);
        let Commands::Get(args) = cli.commands else {
            panic!("expected get");
        };
        assert_eq!(args.checkpoint_every, 100);
        assert!(args.limit.is_none());
        assert!(!args.follow);
        assert!(!args.header.embedded);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::parse_from([
            "linefifo",
            "put",
            "events.log",
            "a",
            "b",
            "--log-level",
            "debug",
            "--sync",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Put(args) = cli.commands else {
            panic!("expected put");
        };
        assert_eq!(args.lines, vec!["a", "b"]);
        assert!(args.sync);
    }

    #[test]
    fn fifo_errors_keep_their_exit_code() {
        let err = CliError::from(fifo::error::InvalidModeSnafu { flag: "w" }.build());
        assert_eq!(err.status_code(), StatusCode::InvalidArgument);
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        let args = CompactArgs {
            file:      PathBuf::from("unused"),
            min_size:  0,
            min_ratio: 1.5,
            header:    HeaderArgs { embedded: false },
        };
        let runtime = runtime().unwrap();
        let err = runtime.block_on(args.run()).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidArgument);
        assert_eq!(err.status_code().exit_code(), 64);
        assert!(err.output_msg().contains("min_ratio"));
    }
}
