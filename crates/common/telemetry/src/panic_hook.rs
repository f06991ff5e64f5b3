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

//! # Panic Hook
//!
//! Routes panics through `tracing` with a captured backtrace, so a crash in
//! a background reader or writer task lands in the same log files as
//! everything else.

use std::{
    panic::{self, PanicHookInfo},
    thread,
};

use backtrace::Backtrace;

/// Replace the panic handler with one that logs the panic as a structured
/// error event, then delegates to the previous handler.
pub fn set_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let backtrace = format!("{:?}", Backtrace::new());
        let thread = thread::current();
        let thread = thread.name().unwrap_or("<unnamed>");
        let message = payload_message(info);

        match info.location() {
            Some(location) => tracing::error!(
                message,
                thread,
                backtrace = %backtrace,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            ),
            None => tracing::error!(message, thread, backtrace = %backtrace),
        }
        previous(info);
    }));
}

/// The panic message, when the payload is a string.
fn payload_message<'a>(info: &'a PanicHookInfo<'_>) -> &'a str {
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>")
}
