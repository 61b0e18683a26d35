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

use std::cmp::min;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ubyte::ByteUnit;

use crate::body::LengthedBody;
use crate::digest::Digest;
use crate::field::WarcFieldName;
use crate::header::{InvariantViolation, ProtocolVersion, WarcHeaderMap};
use crate::media_type::MediaType;
use crate::record_type::WarcRecordType;
use crate::truncated_reason::TruncatedReason;

// How far into an application/http body the payload type sniff will look for
// the end of the embedded header block.
const PAYLOAD_SNIFF_LIMIT: u64 = ByteUnit::Kibibyte(16).as_u64();

/// Removes the WARC serialization convention of wrapping URIs in angle
/// brackets. The brackets are not URI syntax; bare values pass through.
pub fn strip_angle_brackets(uri: &str) -> &str {
    uri.strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(uri)
}

/// Errors raised while resolving the payload type of a capture record.
#[derive(Debug, Error)]
pub enum PayloadTypeError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    IOError(#[from] io::Error),
}

macro_rules! uri_accessor {
    ($(#[$meta:meta])* $fn_name:ident => $field:ident) => {
        $(#[$meta])*
        pub fn $fn_name(&self) -> Result<Option<&str>, InvariantViolation> {
            Ok(self
                .headers
                .sole_field(&WarcFieldName::$field)?
                .map(strip_angle_brackets))
        }
    };
}

macro_rules! parsed_accessor {
    ($(#[$meta:meta])* $fn_name:ident => $field:ident as $typ:ty) => {
        paste::paste! {
            $(#[$meta])*
            pub fn $fn_name(&self) -> Result<Option<$typ>, InvariantViolation> {
                match self.[<$fn_name _raw>]()? {
                    None => Ok(None),
                    Some(raw) => raw.parse::<$typ>().map(Some).map_err(|err| {
                        InvariantViolation::MalformedField {
                            name: WarcFieldName::$field,
                            message: err.to_string(),
                        }
                    }),
                }
            }

            /// The unparsed wire value of the same header.
            pub fn [<$fn_name _raw>](&self) -> Result<Option<&str>, InvariantViolation> {
                self.headers.sole_field(&WarcFieldName::$field)
            }
        }
    };
}

/// One WARC record as yielded by a [WarcReader](crate::reader::WarcReader):
/// the version token, the header multimap, the tag selected by `WARC-Type`,
/// and the lazily-consumed body view.
///
/// The record borrows the reader; requesting the next record first requires
/// letting this one go, at which point the reader drains whatever part of
/// the body was left unread.
pub struct WarcRecord<'a, R> {
    version: ProtocolVersion,
    record_type: WarcRecordType,
    headers: WarcHeaderMap,
    body: LengthedBody<'a, R>,
}

impl<'a, R> WarcRecord<'a, R> {
    /// The reader has already enforced the mandatory header set and resolved
    /// the type tag when it hands the parts over.
    pub(crate) fn new(
        version: ProtocolVersion,
        record_type: WarcRecordType,
        headers: WarcHeaderMap,
        body: LengthedBody<'a, R>,
    ) -> Self {
        Self {
            version,
            record_type,
            headers,
            body,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn record_type(&self) -> &WarcRecordType {
        &self.record_type
    }

    pub fn headers(&self) -> &WarcHeaderMap {
        &self.headers
    }

    /// The body view. At most `Content-Length` bytes, consumable once.
    pub fn body(&mut self) -> &mut LengthedBody<'a, R> {
        &mut self.body
    }

    /// The globally unique record identifier, angle brackets stripped.
    pub fn id(&self) -> Result<&str, InvariantViolation> {
        self.headers
            .sole_field(&WarcFieldName::WarcRecordId)?
            .map(strip_angle_brackets)
            .ok_or(InvariantViolation::MissingField(WarcFieldName::WarcRecordId))
    }

    /// The capture instant from `WARC-Date`.
    pub fn date(&self) -> Result<OffsetDateTime, InvariantViolation> {
        let raw = self
            .headers
            .sole_field(&WarcFieldName::Date)?
            .ok_or(InvariantViolation::MissingField(WarcFieldName::Date))?;
        OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| InvariantViolation::MalformedField {
            name: WarcFieldName::Date,
            message: err.to_string(),
        })
    }

    /// The declared body length.
    pub fn content_length(&self) -> Result<u64, InvariantViolation> {
        let raw = self
            .headers
            .sole_field(&WarcFieldName::ContentLength)?
            .ok_or(InvariantViolation::MissingField(WarcFieldName::ContentLength))?;
        raw.parse()
            .map_err(|_| InvariantViolation::MalformedField {
                name: WarcFieldName::ContentLength,
                message: format!("not a non-negative integer: {raw:?}"),
            })
    }

    uri_accessor!(
        /// The URI this capture observed, for capture records.
        target_uri => TargetUri
    );
    uri_accessor!(
        /// The record this one refers to (revisit, conversion, metadata).
        refers_to => RefersTo
    );
    uri_accessor!(
        /// The target URI of the record referred to (WARC/1.1 revisits).
        refers_to_target_uri => RefersToTargetUri
    );
    uri_accessor!(
        /// The warcinfo record describing this record's origin.
        warcinfo_id => WarcinfoId
    );
    uri_accessor!(
        /// The profile URI describing a revisit's deduplication rule.
        profile => Profile
    );
    uri_accessor!(
        /// The first segment's record id, on continuation records.
        segment_origin_id => SegmentOriginId
    );

    /// Records captured concurrently with this one, in header order.
    pub fn concurrent_to(&self) -> impl Iterator<Item = &str> {
        self.headers
            .all("WARC-Concurrent-To")
            .map(strip_angle_brackets)
    }

    parsed_accessor!(
        /// The digest over the full record block.
        block_digest => BlockDigest as Digest
    );
    parsed_accessor!(
        /// The digest over the record payload.
        payload_digest => PayloadDigest as Digest
    );
    parsed_accessor!(
        /// The media type of the record block.
        content_type => ContentType as MediaType
    );
    parsed_accessor!(
        /// The payload type identified by an independent inspection, when an
        /// indexing process recorded one.
        identified_payload_type => IdentifiedPayloadType as MediaType
    );
    parsed_accessor!(
        /// The address the capture was made from.
        ip_address => IPAddress as IpAddr
    );
    parsed_accessor!(
        /// This record's position in a segmented logical record; 1 on the
        /// first segment, strictly increasing on continuations.
        segment_number => SegmentNumber as u64
    );
    parsed_accessor!(
        /// Total length of the reassembled logical record, on the last
        /// continuation segment.
        segment_total_length => SegmentTotalLength as u64
    );
    /// The capture instant of the record a revisit refers to.
    pub fn refers_to_date(&self) -> Result<Option<OffsetDateTime>, InvariantViolation> {
        match self.headers.sole_field(&WarcFieldName::RefersToDate)? {
            None => Ok(None),
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339).map(Some).map_err(|err| {
                InvariantViolation::MalformedField {
                    name: WarcFieldName::RefersToDate,
                    message: err.to_string(),
                }
            }),
        }
    }

    /// The archive filename stated by a warcinfo record.
    pub fn filename(&self) -> Result<Option<&str>, InvariantViolation> {
        self.headers.sole_field(&WarcFieldName::Filename)
    }

    /// Why the block was truncated; absence of the header means it was not.
    pub fn truncated(&self) -> Result<TruncatedReason, InvariantViolation> {
        match self.headers.sole_field(&WarcFieldName::Truncated)? {
            None => Ok(TruncatedReason::NotTruncated),
            Some(raw) => {
                TruncatedReason::from_str(raw).map_err(|_| InvariantViolation::MalformedField {
                    name: WarcFieldName::Truncated,
                    message: format!("not a truncation reason: {raw:?}"),
                })
            }
        }
    }

    /// Whether the body is itself an HTTP message per the record's
    /// `Content-Type`.
    pub fn has_http_payload(&self) -> bool {
        matches!(
            self.content_type(),
            Ok(Some(content_type)) if content_type.base_matches("application", "http")
        )
    }
}

impl<'a, R: io::Read> WarcRecord<'a, R> {
    /// The media type of the record payload.
    ///
    /// For an `application/http` block this is the `Content-Type` announced
    /// by the embedded HTTP message, found by scanning its header block;
    /// otherwise it is the record's own `Content-Type`. The scan consumes
    /// the read bytes from the body view, so callers that also want the
    /// payload bytes must resolve the type first or re-read the record.
    pub fn payload_type(&mut self) -> Result<Option<MediaType>, PayloadTypeError> {
        let own = match self.content_type()? {
            None => return Ok(None),
            Some(own) => own,
        };
        if !own.base_matches("application", "http") {
            return Ok(Some(own));
        }

        let cap = min(self.body.remaining(), PAYLOAD_SNIFF_LIMIT) as usize;
        let mut head = vec![0u8; cap];
        let mut filled = 0usize;
        while filled < cap {
            let read = self.body.read_some(&mut head[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
            if memchr::memmem::find(&head[..filled], b"\r\n\r\n").is_some() {
                break;
            }
        }
        let head = &head[..filled];
        let head = match memchr::memmem::find(head, b"\r\n\r\n") {
            Some(end) => &head[..end],
            None => head,
        };

        // First line is the request or status line; header lines follow.
        for line in head.split(|b| *b == b'\n').skip(1) {
            let line = match line.strip_suffix(b"\r") {
                Some(stripped) => stripped,
                None => line,
            };
            let Some(colon) = memchr::memchr(b':', line) else {
                continue;
            };
            let name = &line[..colon];
            if !name.eq_ignore_ascii_case(b"content-type") {
                continue;
            }
            let Ok(value) = std::str::from_utf8(&line[colon + 1..]) else {
                continue;
            };
            return Ok(value.trim().parse::<MediaType>().ok());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::strip_angle_brackets;

    #[test]
    fn angle_brackets_strip_only_in_pairs() {
        assert_eq!(
            "urn:uuid:0cb7f72b-d621-4bd6-b3bb-2cd0d6e4b9e5",
            strip_angle_brackets("<urn:uuid:0cb7f72b-d621-4bd6-b3bb-2cd0d6e4b9e5>")
        );
        assert_eq!("http://example.org/", strip_angle_brackets("http://example.org/"));
        assert_eq!("<broken", strip_angle_brackets("<broken"));
    }
}
