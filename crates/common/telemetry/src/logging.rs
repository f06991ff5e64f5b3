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
    env,
    io::IsTerminal,
    sync::{Mutex, Once},
};

use bon::Builder;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::{self, LevelFilter},
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// # Errors
/// Returns an error if deserialization fails.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to create rolling log file {prefix} in {dir}"))]
    Appender {
        dir:    String,
        prefix: String,
        source: InitError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid log filter {directives:?}"))]
    Filter {
        directives: String,
        source:     filter::ParseError,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },

    #[snafu(display("Failed to bridge log records into tracing"))]
    LogBridge {
        source: tracing_log::log::SetLoggerError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("A global tracing subscriber is already installed"))]
    Install {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for hourly-rolled log files. Empty disables file output.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Filter directives such as `"info"` or `"info,fifo=debug"`. Falls
    /// back to `RUST_LOG`, then to `info`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log stream. The default keeps 30 days of
    /// hourly files.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Mirror logs to stderr. Standard output is left to the data the
    /// binaries print.
    #[default = true]
    #[builder(default = true)]
    pub append_stderr: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, with the current span and span list.
    Json,

    /// Human-readable text.
    #[default]
    Text,
}

const DEFAULT_LOG_TARGETS: &str = "info";

static GLOBAL_UT_LOG_GUARD: Lazy<Mutex<Option<Vec<WorkerGuard>>>> = Lazy::new(|| Mutex::new(None));

/// Initialize stderr logging with default options.
pub fn init_tracing_subscriber(app_name: &str) -> Result<Vec<WorkerGuard>> {
    init_global_logging(app_name, &LoggingOptions::default())
}

/// Initialize logging for unit tests.
///
/// Logs go to `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) at
/// `UNITTEST_LOG_LEVEL` (default `debug`). Safe to call from every test; only
/// the first call installs anything, and a subscriber installed by someone
/// else is left alone.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            append_stderr: false,
            ..Default::default()
        };

        if let Ok(guards) = init_global_logging("unittest", &opts) {
            if let Ok(mut slot) = GLOBAL_UT_LOG_GUARD.lock() {
                *slot = Some(guards);
            }
            tracing::info!("logs dir = {}", dir);
        }
    });
}

/// Install the global subscriber.
///
/// Layers, each present only when configured:
/// - **Console**: stderr, when `append_stderr` is set
/// - **File**: `<dir>/<app_name>.<hour>`, all events passing the filter
/// - **Error file**: `<dir>/<app_name>-err.<hour>`, errors only
///
/// Only the first call in a process does anything; later calls return no
/// guards. The returned guards must outlive the program's logging, dropping
/// them flushes and stops the background writers.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    static START: Once = Once::new();
    let mut outcome = Ok(Vec::new());
    START.call_once(|| outcome = install(app_name, opts));
    outcome
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    let mut guards = vec![];

    let console_layer = if opts.append_stderr {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        guards.push(guard);
        Some(format_layer(
            writer,
            opts.log_format,
            std::io::stderr().is_terminal(),
            LevelFilter::TRACE,
        ))
    } else {
        None
    };

    let (file_layer, err_file_layer) = if opts.dir.is_empty() {
        (None, None)
    } else {
        let (writer, guard) =
            tracing_appender::non_blocking(rolling_appender(opts, app_name.to_string())?);
        guards.push(guard);
        let all = format_layer(writer, opts.log_format, false, LevelFilter::TRACE);

        let (writer, guard) =
            tracing_appender::non_blocking(rolling_appender(opts, format!("{app_name}-err"))?);
        guards.push(guard);
        let errors = format_layer(writer, opts.log_format, false, LevelFilter::ERROR);

        (Some(all), Some(errors))
    };

    let directives = opts
        .level
        .clone()
        .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
        .unwrap_or_else(|| DEFAULT_LOG_TARGETS.to_string());
    let filter = directives
        .parse::<filter::Targets>()
        .context(FilterSnafu {
            directives: directives.clone(),
        })?;

    LogTracer::init().context(LogBridgeSnafu)?;

    let subscriber = Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(err_file_layer);
    tracing::subscriber::set_global_default(subscriber).context(InstallSnafu)?;

    Ok(guards)
}

fn rolling_appender(opts: &LoggingOptions, prefix: String) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix.clone())
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .context(AppenderSnafu {
            dir: opts.dir.clone(),
            prefix,
        })
}

fn format_layer<S, W>(
    writer: W,
    format: LogFormat,
    ansi: bool,
    level: LevelFilter,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(level)
            .boxed(),
        LogFormat::Text => fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_filter(level)
            .boxed(),
    }
}
