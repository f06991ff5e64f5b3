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

use std::{any::Any, error::Error as StdError, sync::Arc};

use serde::Serialize;
use snafu::Snafu;
use strum::EnumProperty;

/// Coarse classification shared by every linefifo error, mapped onto the
/// process exit codes of `sysexits.h`.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    #[strum(props(exit_code = "64"))]
    InvalidArgument,
    #[strum(props(exit_code = "66"))]
    NotFound,
    #[strum(props(exit_code = "77"))]
    PermissionDenied,
    #[strum(props(exit_code = "73"))]
    StorageFull,
    #[strum(props(exit_code = "74"))]
    Io,
    #[strum(props(exit_code = "70"))]
    Internal,
    #[strum(props(exit_code = "1"))]
    Unknown,
}

impl StatusCode {
    pub fn exit_code(self) -> i32 {
        self.get_str("exit_code")
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(1)
    }
}

pub trait StackError: StdError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>);

    fn next(&self) -> Option<&dyn StackError>;

    fn last(&self) -> &dyn StackError
    where
        Self: Sized,
    {
        let Some(mut result) = self.next() else {
            return self;
        };
        while let Some(err) = result.next() {
            result = err;
        }
        result
    }

    fn transparent(&self) -> bool { false }
}

pub trait ErrorExt: StackError {
    fn status_code(&self) -> StatusCode { StatusCode::Unknown }

    fn as_any(&self) -> &dyn Any;

    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => {
                format!("Internal error: {}", self.status_code().exit_code())
            }
            _ => {
                let error = self.last();
                if let Some(external_error) = error.source() {
                    let mut root = external_error;
                    while let Some(source) = root.source() {
                        root = source;
                    }
                    if error.transparent() {
                        format!("{root}")
                    } else {
                        format!("{error}: {root}")
                    }
                } else {
                    format!("{error}")
                }
            }
        }
    }

    fn root_cause(&self) -> Option<&dyn StdError>
    where
        Self: Sized,
    {
        let error = self.last();
        let mut source = error.source()?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source)
    }
}

impl<T: ?Sized + StackError> StackError for Arc<T> {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) { self.as_ref().debug_fmt(layer, buf) }

    fn next(&self) -> Option<&dyn StackError> { self.as_ref().next() }
}

impl<T: StackError> StackError for Box<T> {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) { self.as_ref().debug_fmt(layer, buf) }

    fn next(&self) -> Option<&dyn StackError> { self.as_ref().next() }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while interpreting user-supplied settings, shared by the
/// binaries built on top of the storage crates.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid value {value:?} for {name}"))]
    InvalidSetting {
        name:  String,
        value: String,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },
}

impl StackError for Error {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        match self {
            Self::InvalidSetting { loc, .. } => buf.push(format!("{layer}: {self}, at {loc}")),
        }
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode { StatusCode::InvalidArgument }

    fn as_any(&self) -> &dyn Any { self }
}
