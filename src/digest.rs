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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use compact_str::{CompactString, ToCompactString};
use data_encoding::{BASE32, BASE32_NOPAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a digest header value does not have the
/// `algorithm:base32` shape.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("no ':' between algorithm and digest value")]
    MissingAlgorithm,
    #[error("the algorithm label {0:?} is not a token")]
    BadAlgorithm(String),
    #[error("the digest value is not RFC 4648 base32: {0}")]
    BadEncoding(String),
}

/// A labelled digest as carried by `WARC-Block-Digest` and
/// `WARC-Payload-Digest`: an algorithm token and an RFC 4648 base32 value,
/// padded or unpadded.
///
/// This crate only validates and transports the shape; computing digests is
/// the caller's concern.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    algorithm: CompactString,
    value: CompactString,
}

impl Digest {
    pub fn new(
        algorithm: impl ToCompactString,
        value: impl ToCompactString,
    ) -> Result<Self, DigestError> {
        let algorithm = algorithm.to_compact_string();
        let value = value.to_compact_string();
        if algorithm.is_empty() || !algorithm.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
            return Err(DigestError::BadAlgorithm(algorithm.into()));
        }
        let decoder = if value.ends_with('=') { &BASE32 } else { &BASE32_NOPAD };
        decoder
            .decode(value.as_bytes())
            .map_err(|err| DigestError::BadEncoding(err.to_string()))?;
        Ok(Self { algorithm, value })
    }

    /// The algorithm label, e.g. `sha1`.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The base32 digest value exactly as given.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, value) = s.split_once(':').ok_or(DigestError::MissingAlgorithm)?;
        Self::new(algorithm, value)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}
