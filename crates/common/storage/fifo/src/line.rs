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

use std::{borrow::Cow, fmt, str::Utf8Error};

use bytes::Bytes;

/// One record as stored, terminator included.
///
/// Backed by a slice of the read buffer, so handing a line out copies
/// nothing.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Line(Bytes);

impl Line {
    pub(crate) const fn new(bytes: Bytes) -> Self { Self(bytes) }

    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    /// The record without its trailing newline.
    pub fn content(&self) -> &[u8] { self.0.strip_suffix(b"\n").unwrap_or(&self.0) }

    /// Length on disk, terminator included.
    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn to_str(&self) -> Result<&str, Utf8Error> { std::str::from_utf8(&self.0) }

    pub fn to_string_lossy(&self) -> Cow<'_, str> { String::from_utf8_lossy(&self.0) }

    pub fn into_bytes(self) -> Bytes { self.0 }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Line").field(&self.to_string_lossy()).finish()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl AsRef<[u8]> for Line {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl PartialEq<str> for Line {
    fn eq(&self, other: &str) -> bool { self.0 == other.as_bytes() }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool { self.0 == other.as_bytes() }
}

impl From<Line> for Bytes {
    fn from(line: Line) -> Self { line.0 }
}
