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

/// The tagged set of record kinds selected by `WARC-Type`.
///
/// Types outside the standard set are carried in
/// [Unknown](WarcRecordType::Unknown) so that archives written by newer or
/// nonstandard tools never fail to read.
#[derive(Clone, Debug, Hash, Eq, PartialEq, EnumString, AsRefStr, Display, Serialize, Deserialize)]
pub enum WarcRecordType {
    /// Metadata about the archive itself.
    #[strum(to_string = "warcinfo")]
    Warcinfo,
    /// The full HTTP response as captured from the network.
    #[strum(to_string = "response")]
    Response,
    /// A directly harvested resource without protocol framing.
    #[strum(to_string = "resource")]
    Resource,
    /// The HTTP request that produced a response record.
    #[strum(to_string = "request")]
    Request,
    #[strum(to_string = "metadata")]
    Metadata,
    /// A capture whose content duplicates an earlier record.
    #[strum(to_string = "revisit")]
    Revisit,
    /// A transformed rendition of another record.
    #[strum(to_string = "conversion")]
    Conversion,
    /// A later segment of a record split across files.
    #[strum(to_string = "continuation")]
    Continuation,
    #[strum(default)]
    Unknown(String),
}

impl WarcRecordType {
    /// Whether a record of this kind holds captured content worth cataloging:
    /// the kinds a capture index records. Revisits point at earlier captures
    /// instead of carrying content and are not included.
    pub fn is_capture(&self) -> bool {
        matches!(self, WarcRecordType::Response | WarcRecordType::Resource)
    }
}
