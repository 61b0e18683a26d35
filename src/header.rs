//Copyright 2024 Felix Engl
//
//Licensed under the Apache License, Version 2.0 (the "License");
//you may not use this file except in compliance with the License.
//You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
//Unless required by applicable law or agreed to in writing, software
//distributed under the License is distributed on an "AS IS" BASIS,
//WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//See the License for the specific language governing permissions and
//limitations under the License.

// https://iipc.github.io/warc-specifications/specifications/warc-format/warc-1.1-annotated/

use std::fmt::{Display, Formatter};
use std::io;
use std::io::Write;
use std::str::FromStr;

use compact_str::{CompactString, ToCompactString};
use itertools::Itertools;
use thiserror::Error;

use crate::field::WarcFieldName;

/// A protocol version token, e.g. `WARC/1.1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const WARC_1_0: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    pub const WARC_1_1: ProtocolVersion = ProtocolVersion { major: 1, minor: 1 };

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "WARC/{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Error)]
#[error("not a WARC version token: {0:?}")]
pub struct ProtocolVersionParseError(String);

impl FromStr for ProtocolVersion {
    type Err = ProtocolVersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ProtocolVersionParseError(s.to_string());
        let rest = s.strip_prefix("WARC/").ok_or_else(err)?;
        let (major, minor) = rest.split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

/// A record invariant did not hold.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("the mandatory header {0} is missing")]
    MissingField(WarcFieldName),
    #[error("the header {name} carries {count} values where exactly one is expected")]
    AmbiguousField { name: CompactString, count: usize },
    #[error("the declared Content-Length {declared} does not match the {actual} body bytes")]
    LengthMismatch { declared: u64, actual: u64 },
    #[error("the header {name} carries a malformed value: {message}")]
    MalformedField {
        name: WarcFieldName,
        message: String,
    },
}

/// One header line: the name as it appeared on the wire (or as the builder
/// canonicalized it) plus its value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HeaderEntry {
    name: CompactString,
    value: String,
}

impl HeaderEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An insertion-ordered multimap of WARC header lines.
///
/// Names compare case-insensitively on lookup and keep their original casing
/// for writeback. Repeated names accumulate values in order; iteration and
/// serialization preserve insertion order, which makes a parse/serialize
/// round trip byte-stable.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct WarcHeaderMap {
    entries: Vec<HeaderEntry>,
}

impl WarcHeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl ToCompactString, value: impl Into<String>) {
        self.entries.push(HeaderEntry {
            name: name.to_compact_string(),
            value: value.into(),
        });
    }

    /// Replaces every value of `name` with a single value. The replacement
    /// keeps the position of the first occurrence, or appends when absent.
    pub fn set(&mut self, name: impl ToCompactString, value: impl Into<String>) {
        let name = name.to_compact_string();
        match self
            .entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(&name))
        {
            Some(first) => {
                self.entries[first].value = value.into();
                let mut index = 0;
                self.entries.retain(|entry| {
                    let keep = index <= first || !entry.name.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.entries.push(HeaderEntry {
                name,
                value: value.into(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// The first value of `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.all(name).next()
    }

    /// All values of `name` in insertion order.
    pub fn all<'s>(&'s self, name: &str) -> impl Iterator<Item = &'s str> {
        // An owned key keeps the iterator free of the lookup name's
        // lifetime; header names fit the inline representation.
        let name = name.to_compact_string();
        self.entries
            .iter()
            .filter(move |entry| entry.name.eq_ignore_ascii_case(&name))
            .map(|entry| entry.value.as_str())
    }

    /// The sole value of `name`.
    ///
    /// Absence is first-class (`Ok(None)`); more than one value is an
    /// [InvariantViolation::AmbiguousField]. An empty value is present, not
    /// absent.
    pub fn sole(&self, name: &str) -> Result<Option<&str>, InvariantViolation> {
        let mut values = self.all(name);
        let first = values.next();
        let extra = values.count();
        if extra > 0 {
            return Err(InvariantViolation::AmbiguousField {
                name: name.to_compact_string(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    /// [sole](Self::sole) keyed by a well-known field name.
    pub fn sole_field(&self, name: &WarcFieldName) -> Result<Option<&str>, InvariantViolation> {
        self.sole(name.as_ref())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.entries.iter()
    }

    /// Returns the mandatory fields that are missing from this map.
    pub fn validate(&self) -> Result<(), Vec<WarcFieldName>> {
        let missing = WarcFieldName::MANDATORY
            .into_iter()
            .filter(|field| !self.contains(field.as_ref()))
            .collect_vec();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Writes `version CRLF` followed by every entry and the blank line that
    /// terminates the header block. Returns the number of bytes written.
    pub fn write_to(
        &self,
        out: &mut impl Write,
        version: ProtocolVersion,
    ) -> io::Result<usize> {
        let mut written = 0usize;
        let version = version.to_string();
        out.write_all(version.as_bytes())?;
        out.write_all(b"\r\n")?;
        written += version.len() + 2;
        for entry in &self.entries {
            out.write_all(entry.name.as_bytes())?;
            out.write_all(b": ")?;
            out.write_all(entry.value.as_bytes())?;
            out.write_all(b"\r\n")?;
            written += entry.name.len() + entry.value.len() + 4;
        }
        out.write_all(b"\r\n")?;
        Ok(written + 2)
    }
}

impl<'a> IntoIterator for &'a WarcHeaderMap {
    type Item = &'a HeaderEntry;
    type IntoIter = std::slice::Iter<'a, HeaderEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
