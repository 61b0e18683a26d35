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

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Why a record block holds fewer bytes than the original content.
///
/// The wire vocabulary is closed. An absent `WARC-Truncated` header maps to
/// [NotTruncated](TruncatedReason::NotTruncated), which has no wire form and
/// is never parsed or serialized.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, EnumString, Serialize, Deserialize)]
pub enum TruncatedReason {
    #[strum(serialize = "length")]
    Length,
    #[strum(serialize = "time")]
    Time,
    #[strum(serialize = "disconnect")]
    Disconnect,
    #[strum(serialize = "unspecified")]
    Unspecified,
    #[strum(disabled)]
    NotTruncated,
}

impl TruncatedReason {
    /// The wire token, absent for [NotTruncated](TruncatedReason::NotTruncated).
    pub fn wire_token(self) -> Option<&'static str> {
        match self {
            TruncatedReason::Length => Some("length"),
            TruncatedReason::Time => Some("time"),
            TruncatedReason::Disconnect => Some("disconnect"),
            TruncatedReason::Unspecified => Some("unspecified"),
            TruncatedReason::NotTruncated => None,
        }
    }
}

impl Display for TruncatedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_token().unwrap_or("not truncated"))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::TruncatedReason;

    #[test]
    fn closed_vocabulary() {
        assert_eq!(TruncatedReason::Length, TruncatedReason::from_str("length").unwrap());
        assert_eq!(
            TruncatedReason::Disconnect,
            TruncatedReason::from_str("disconnect").unwrap()
        );
        assert!(TruncatedReason::from_str("melted").is_err());
        assert!(TruncatedReason::from_str("NotTruncated").is_err());
        assert_eq!(None, TruncatedReason::NotTruncated.wire_token());
    }
}
