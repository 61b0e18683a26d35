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

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// The well-known WARC header names.
///
/// Lookup is case-insensitive; rendering yields the canonical casing used by
/// the standard. Names outside the standard vocabulary are carried verbatim
/// in [Unknown](WarcFieldName::Unknown).
#[allow(missing_docs)]
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, EnumString, AsRefStr, Display, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum WarcFieldName {
    #[strum(to_string = "Content-Length")]
    ContentLength,
    #[strum(to_string = "Content-Type")]
    ContentType,
    #[strum(to_string = "WARC-Block-Digest")]
    BlockDigest,
    #[strum(to_string = "WARC-Concurrent-To")]
    ConcurrentTo,
    #[strum(to_string = "WARC-Date")]
    Date,
    #[strum(to_string = "WARC-Filename")]
    Filename,
    #[strum(to_string = "WARC-Identified-Payload-Type")]
    IdentifiedPayloadType,
    #[strum(to_string = "WARC-IP-Address")]
    IPAddress,
    #[strum(to_string = "WARC-Payload-Digest")]
    PayloadDigest,
    #[strum(to_string = "WARC-Profile")]
    Profile,
    #[strum(to_string = "WARC-Record-ID")]
    WarcRecordId,
    #[strum(to_string = "WARC-Refers-To")]
    RefersTo,
    #[strum(to_string = "WARC-Refers-To-Date")]
    RefersToDate,
    #[strum(to_string = "WARC-Refers-To-Target-URI")]
    RefersToTargetUri,
    #[strum(to_string = "WARC-Segment-Number")]
    SegmentNumber,
    #[strum(to_string = "WARC-Segment-Origin-ID")]
    SegmentOriginId,
    #[strum(to_string = "WARC-Segment-Total-Length")]
    SegmentTotalLength,
    #[strum(to_string = "WARC-Target-URI")]
    TargetUri,
    #[strum(to_string = "WARC-Truncated")]
    Truncated,
    #[strum(to_string = "WARC-Type")]
    WarcType,
    #[strum(to_string = "WARC-Warcinfo-ID")]
    WarcinfoId,
    #[strum(default)]
    Unknown(String),
}

impl WarcFieldName {
    /// The header names every record must carry exactly once.
    pub const MANDATORY: [WarcFieldName; 4] = [
        WarcFieldName::WarcType,
        WarcFieldName::WarcRecordId,
        WarcFieldName::Date,
        WarcFieldName::ContentLength,
    ];

    /// Canonical casing for `name`, or `name` verbatim when it is not part of
    /// the standard vocabulary.
    pub fn canonicalize(name: &str) -> String {
        match name.parse::<WarcFieldName>() {
            Ok(WarcFieldName::Unknown(raw)) => raw,
            Ok(known) => known.to_string(),
            Err(_) => name.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::WarcFieldName;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(
            WarcFieldName::WarcRecordId,
            WarcFieldName::from_str("warc-record-id").unwrap()
        );
        assert_eq!(
            WarcFieldName::ContentLength,
            WarcFieldName::from_str("CONTENT-LENGTH").unwrap()
        );
    }

    #[test]
    fn rendering_is_canonical() {
        assert_eq!("WARC-Target-URI", WarcFieldName::TargetUri.to_string());
        assert_eq!("Content-Length", WarcFieldName::ContentLength.as_ref());
    }

    #[test]
    fn unknown_names_survive() {
        let parsed = WarcFieldName::from_str("X-Crawler-Hint").unwrap();
        assert_eq!(WarcFieldName::Unknown("X-Crawler-Hint".into()), parsed);
        assert_eq!("X-Crawler-Hint", WarcFieldName::canonicalize("X-Crawler-Hint"));
        assert_eq!("WARC-Date", WarcFieldName::canonicalize("warc-date"));
    }
}
