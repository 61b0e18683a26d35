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

use std::io;
use std::io::{Read, Write};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ubyte::ByteUnit;
use uuid::Uuid;

use crate::digest::Digest;
use crate::field::WarcFieldName;
use crate::header::{InvariantViolation, ProtocolVersion, WarcHeaderMap};
use crate::media_type::MediaType;
use crate::record_type::WarcRecordType;
use crate::states::State;
use crate::truncated_reason::TruncatedReason;

const BODY_TAIL: &[u8; 4] = b"\r\n\r\n";

/// The errors of the writer.
#[derive(Debug, Error)]
pub enum WarcWriteError {
    #[error(transparent)]
    IOError(#[from] io::Error),
    #[error("current state is {current} but expected {expected}")]
    WrongState { current: State, expected: State },
    #[error("the writer is corrupted by an earlier mid-record failure")]
    Corrupt,
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Serializes records to a byte channel.
///
/// warc-file    = 1*warc-record
/// warc-record  = header block CRLF CRLF
/// header       = version CRLF *named-field CRLF
///
/// The writer alternates between header and body writes; a failure in the
/// middle of a record marks it corrupt since the output can no longer become
/// a well-formed archive.
pub struct WarcWriter<W: Write> {
    inner: W,
    bytes_written: u64,
    declared_body: u64,
    state: State,
    corrupt: bool,
}

impl<W: Write> WarcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
            declared_body: 0,
            state: State::ExpectHeader,
            corrupt: false,
        }
    }

    /// Total bytes written including headers and trailers. Between whole
    /// records this is the offset the next record will start at.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Returns true if the writer failed somewhere in a non recoverable way.
    pub fn corrupted(&self) -> bool {
        self.corrupt
    }

    fn check_state(&self, expected: State) -> Result<(), WarcWriteError> {
        if self.corrupt {
            return Err(WarcWriteError::Corrupt);
        }
        if self.state != expected {
            return Err(WarcWriteError::WrongState {
                current: self.state,
                expected,
            });
        }
        Ok(())
    }

    /// Writes the header block of a record and expects its body next.
    ///
    /// The declared `Content-Length` is remembered and cross-checked against
    /// the body bytes that follow. Mandatory headers must be present.
    pub fn write_header(
        &mut self,
        version: ProtocolVersion,
        headers: &WarcHeaderMap,
    ) -> Result<u64, WarcWriteError> {
        self.check_state(State::ExpectHeader)?;
        if let Err(mut missing) = headers.validate() {
            // validate never reports failure with an empty list
            return Err(InvariantViolation::MissingField(missing.swap_remove(0)).into());
        }
        let declared = headers
            .sole_field(&WarcFieldName::ContentLength)?
            .ok_or(InvariantViolation::MissingField(WarcFieldName::ContentLength))?
            .parse()
            .map_err(|_| InvariantViolation::MalformedField {
                name: WarcFieldName::ContentLength,
                message: "not a non-negative integer".to_string(),
            })?;
        let written = match headers.write_to(&mut self.inner, version) {
            Ok(written) => written as u64,
            Err(err) => {
                self.corrupt = true;
                return Err(err.into());
            }
        };
        self.bytes_written += written;
        self.declared_body = declared;
        self.state = State::ExpectBody;
        Ok(written)
    }

    /// Writes a complete in-memory body plus the record trailer.
    pub fn write_body(&mut self, body: &[u8]) -> Result<u64, WarcWriteError> {
        self.check_state(State::ExpectBody)?;
        if body.len() as u64 != self.declared_body {
            return Err(InvariantViolation::LengthMismatch {
                declared: self.declared_body,
                actual: body.len() as u64,
            }
            .into());
        }
        if let Err(err) = self.inner.write_all(body) {
            self.corrupt = true;
            return Err(err.into());
        }
        self.finish_record()?;
        Ok(body.len() as u64 + BODY_TAIL.len() as u64)
    }

    /// Streams a body from a reader plus the record trailer. The source must
    /// yield exactly the declared `Content-Length` bytes.
    pub fn write_body_from(&mut self, body: &mut impl Read) -> Result<u64, WarcWriteError> {
        self.check_state(State::ExpectBody)?;
        let mut buffer = [0u8; ByteUnit::Kibibyte(64).as_u64() as usize];
        let mut copied = 0u64;
        loop {
            let read = match body.read(&mut buffer) {
                Ok(read) => read,
                Err(err) => {
                    if copied > 0 {
                        self.corrupt = true;
                    }
                    return Err(err.into());
                }
            };
            if read == 0 {
                break;
            }
            if let Err(err) = self.inner.write_all(&buffer[..read]) {
                self.corrupt = true;
                return Err(err.into());
            }
            copied += read as u64;
        }
        if copied != self.declared_body {
            self.corrupt = true;
            return Err(InvariantViolation::LengthMismatch {
                declared: self.declared_body,
                actual: copied,
            }
            .into());
        }
        self.finish_record()?;
        Ok(copied + BODY_TAIL.len() as u64)
    }

    /// Serializes a whole built record.
    pub fn write_record(&mut self, record: &WarcRecordBuf) -> Result<u64, WarcWriteError> {
        let header = self.write_header(record.version, &record.headers)?;
        let body = self.write_body(&record.body)?;
        Ok(header + body)
    }

    fn finish_record(&mut self) -> Result<(), WarcWriteError> {
        if let Err(err) = self.inner.write_all(BODY_TAIL) {
            self.corrupt = true;
            return Err(err.into());
        }
        self.bytes_written += self.declared_body + BODY_TAIL.len() as u64;
        self.declared_body = 0;
        self.state = State::ExpectHeader;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// An owned, fully materialized record ready for serialization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WarcRecordBuf {
    version: ProtocolVersion,
    headers: WarcHeaderMap,
    body: Vec<u8>,
}

impl WarcRecordBuf {
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn headers(&self) -> &WarcHeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn format_id(uri: &str) -> String {
    format!("<{uri}>")
}

/// Assembles records with the mandatory defaults in place: a fresh
/// `urn:uuid` record id, `WARC-Date` of now, and a `Content-Length` of 0
/// until a body is attached.
///
/// Setters for well-known headers canonicalize the header casing; repeatable
/// headers accumulate. [body](Self::body) keeps `Content-Type` and
/// `Content-Length` consistent with the stored bytes, which is what the
/// writer later enforces.
#[derive(Debug, Clone)]
pub struct WarcRecordBuilder {
    version: ProtocolVersion,
    headers: WarcHeaderMap,
    body: Vec<u8>,
}

macro_rules! uri_setter {
    ($(#[$meta:meta])* $fn_name:ident => $field:ident) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, uri: &str) -> Self {
            self.headers
                .set(WarcFieldName::$field.as_ref(), format_id(uri));
            self
        }
    };
}

impl WarcRecordBuilder {
    pub fn new(record_type: WarcRecordType) -> Self {
        let mut headers = WarcHeaderMap::new();
        headers.set(WarcFieldName::WarcType.as_ref(), record_type.to_string());
        headers.set(
            WarcFieldName::WarcRecordId.as_ref(),
            format_id(&Uuid::new_v4().as_urn().to_string()),
        );
        let now = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let mut builder = Self {
            version: ProtocolVersion::WARC_1_0,
            headers,
            body: Vec::new(),
        };
        builder = builder.date(now);
        builder
            .headers
            .set(WarcFieldName::ContentLength.as_ref(), "0");
        builder
    }

    pub fn warcinfo() -> Self {
        Self::new(WarcRecordType::Warcinfo)
    }

    pub fn request() -> Self {
        Self::new(WarcRecordType::Request)
    }

    pub fn response() -> Self {
        Self::new(WarcRecordType::Response)
    }

    pub fn resource() -> Self {
        Self::new(WarcRecordType::Resource)
    }

    pub fn revisit() -> Self {
        Self::new(WarcRecordType::Revisit)
    }

    pub fn conversion() -> Self {
        Self::new(WarcRecordType::Conversion)
    }

    pub fn continuation() -> Self {
        Self::new(WarcRecordType::Continuation)
    }

    pub fn metadata() -> Self {
        Self::new(WarcRecordType::Metadata)
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Replaces the generated record id. The URI is stored in the angle
    /// bracket serialization.
    pub fn record_id(mut self, uri: &str) -> Self {
        self.headers.set(
            WarcFieldName::WarcRecordId.as_ref(),
            format_id(crate::record::strip_angle_brackets(uri)),
        );
        self
    }

    pub fn date(mut self, date: OffsetDateTime) -> Self {
        // Rfc3339 formatting only fails outside the four-digit-year range.
        if let Ok(formatted) = date.format(&Rfc3339) {
            self.headers.set(WarcFieldName::Date.as_ref(), formatted);
        }
        self
    }

    /// The capture instant of the record a revisit refers to (WARC/1.1).
    pub fn refers_to_date(mut self, date: OffsetDateTime) -> Self {
        if let Ok(formatted) = date.format(&Rfc3339) {
            self.headers
                .set(WarcFieldName::RefersToDate.as_ref(), formatted);
        }
        self
    }

    /// Sets the capture target. Target URIs are written bare, without the
    /// angle bracket convention.
    pub fn target_uri(mut self, uri: &str) -> Self {
        self.headers.set(WarcFieldName::TargetUri.as_ref(), uri);
        self
    }

    uri_setter!(
        /// The record this one refers to (revisit, conversion, metadata).
        refers_to => RefersTo
    );
    uri_setter!(
        /// The target URI of the record referred to (WARC/1.1 revisits).
        refers_to_target_uri => RefersToTargetUri
    );
    uri_setter!(
        /// The warcinfo record describing this record's origin.
        warcinfo_id => WarcinfoId
    );
    uri_setter!(
        /// The revisit profile URI.
        profile => Profile
    );
    uri_setter!(
        /// The first segment's record id, on continuation records.
        segment_origin_id => SegmentOriginId
    );

    /// Adds one concurrently-captured record; repeatable.
    pub fn concurrent_to(mut self, uri: &str) -> Self {
        self.headers
            .append(WarcFieldName::ConcurrentTo.as_ref(), format_id(uri));
        self
    }

    pub fn block_digest(mut self, digest: &Digest) -> Self {
        self.headers
            .set(WarcFieldName::BlockDigest.as_ref(), digest.to_string());
        self
    }

    pub fn payload_digest(mut self, digest: &Digest) -> Self {
        self.headers
            .set(WarcFieldName::PayloadDigest.as_ref(), digest.to_string());
        self
    }

    pub fn ip_address(mut self, addr: std::net::IpAddr) -> Self {
        self.headers
            .set(WarcFieldName::IPAddress.as_ref(), addr.to_string());
        self
    }

    /// Marks the block as truncated; [TruncatedReason::NotTruncated] removes
    /// nothing and writes nothing.
    pub fn truncated(mut self, reason: TruncatedReason) -> Self {
        if let Some(token) = reason.wire_token() {
            self.headers.set(WarcFieldName::Truncated.as_ref(), token);
        }
        self
    }

    pub fn segment_number(mut self, number: u64) -> Self {
        self.headers
            .set(WarcFieldName::SegmentNumber.as_ref(), number.to_string());
        self
    }

    pub fn segment_total_length(mut self, total: u64) -> Self {
        self.headers.set(
            WarcFieldName::SegmentTotalLength.as_ref(),
            total.to_string(),
        );
        self
    }

    pub fn filename(mut self, name: &str) -> Self {
        self.headers.set(WarcFieldName::Filename.as_ref(), name);
        self
    }

    pub fn identified_payload_type(mut self, media_type: &MediaType) -> Self {
        self.headers.set(
            WarcFieldName::IdentifiedPayloadType.as_ref(),
            media_type.to_string(),
        );
        self
    }

    /// Sets one arbitrary header, replacing previous values. Well-known
    /// names are canonicalized; unknown names keep their given casing.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(WarcFieldName::canonicalize(name), value);
        self
    }

    /// Adds one arbitrary header, keeping previous values.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(WarcFieldName::canonicalize(name), value);
        self
    }

    /// Stores the record body, updating `Content-Type` and `Content-Length`
    /// together.
    pub fn body(mut self, content_type: &MediaType, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = bytes.into();
        self.headers
            .set(WarcFieldName::ContentType.as_ref(), content_type.to_string());
        self.headers.set(
            WarcFieldName::ContentLength.as_ref(),
            self.body.len().to_string(),
        );
        self
    }

    pub fn build(self) -> WarcRecordBuf {
        WarcRecordBuf {
            version: self.version,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::Cursor;

    use super::{WarcRecordBuilder, WarcWriter, WarcWriteError};
    use crate::header::InvariantViolation;
    use crate::media_type::MediaType;
    use crate::reader::WarcReader;
    use crate::record_type::WarcRecordType;

    pub(crate) fn build_test_archive() -> Vec<u8> {
        let mut writer = WarcWriter::new(Vec::new());
        let info = WarcRecordBuilder::warcinfo()
            .filename("test.warc")
            .body(
                &MediaType::new("application", "warc-fields"),
                b"software: warchive\r\n".to_vec(),
            )
            .build();
        writer.write_record(&info).unwrap();
        let response = WarcRecordBuilder::response()
            .target_uri("http://example.org/")
            .body(&MediaType::new("text", "plain"), b"OK".to_vec())
            .build();
        writer.write_record(&response).unwrap();
        writer.into_inner()
    }

    #[test]
    fn generated_ids_are_uuid_urns() {
        let record = WarcRecordBuilder::response().build();
        let id = record.headers().first("WARC-Record-ID").unwrap();
        assert!(id.starts_with("<urn:uuid:"), "{id}");
        assert!(id.ends_with('>'), "{id}");
        let uuid = &id["<urn:uuid:".len()..id.len() - 1];
        assert_eq!(36, uuid.len());
        assert!(uuid
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == '-'));
    }

    #[test]
    fn two_builds_never_share_an_id() {
        let one = WarcRecordBuilder::response().build();
        let two = WarcRecordBuilder::response().build();
        assert_ne!(
            one.headers().first("WARC-Record-ID"),
            two.headers().first("WARC-Record-ID")
        );
    }

    #[test]
    fn body_updates_type_and_length_atomically() {
        let record = WarcRecordBuilder::resource()
            .target_uri("http://example.org/robots.txt")
            .body(&MediaType::new("text", "plain"), b"User-agent: *".to_vec())
            .build();
        assert_eq!(Some("13"), record.headers().first("Content-Length"));
        assert_eq!(Some("text/plain"), record.headers().first("Content-Type"));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let record = WarcRecordBuilder::response()
            .body(&MediaType::new("text", "plain"), b"OK".to_vec())
            .header("Content-Length", "17")
            .build();
        let mut writer = WarcWriter::new(Vec::new());
        assert!(matches!(
            writer.write_record(&record),
            Err(WarcWriteError::Invariant(InvariantViolation::LengthMismatch {
                declared: 17,
                actual: 2,
            }))
        ));
    }

    #[test]
    fn written_archives_read_back() {
        let bytes = build_test_archive();
        let mut reader = WarcReader::new(Cursor::new(bytes));

        let mut record = reader.next_record().unwrap().unwrap();
        assert_eq!(&WarcRecordType::Warcinfo, record.record_type());
        assert_eq!(Some("test.warc"), record.filename().unwrap());
        assert_eq!(
            b"software: warchive\r\n".as_slice(),
            record.body().read_to_end().unwrap().as_slice()
        );
        drop(record);

        let mut record = reader.next_record().unwrap().unwrap();
        assert_eq!(&WarcRecordType::Response, record.record_type());
        assert_eq!(
            Some("http://example.org/"),
            record.target_uri().unwrap()
        );
        assert_eq!(b"OK".as_slice(), record.body().read_to_end().unwrap().as_slice());
        drop(record);

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn round_trip_preserves_the_header_multimap() {
        let record = WarcRecordBuilder::metadata()
            .concurrent_to("urn:uuid:11111111-2222-3333-4444-555555555555")
            .concurrent_to("urn:uuid:66666666-7777-8888-9999-000000000000")
            .add_header("X-Custom", "one")
            .add_header("X-Custom", "two")
            .body(&MediaType::new("text", "plain"), b"meta".to_vec())
            .build();

        let mut writer = WarcWriter::new(Vec::new());
        writer.write_record(&record).unwrap();
        let mut reader = WarcReader::new(Cursor::new(writer.into_inner()));
        let mut read_back = reader.next_record().unwrap().unwrap();

        assert_eq!(record.headers(), read_back.headers());
        assert_eq!(
            record.body(),
            read_back.body().read_to_end().unwrap().as_slice()
        );
    }

    #[test]
    fn revisit_fields_round_trip_through_the_builder() {
        use time::macros::datetime;

        let referred = datetime!(2024-01-15 08:30:00 UTC);
        let record = WarcRecordBuilder::revisit()
            .target_uri("http://example.org/")
            .profile("http://netpreserve.org/warc/1.1/revisit/identical-payload-digest")
            .refers_to("urn:uuid:11111111-2222-3333-4444-555555555555")
            .refers_to_target_uri("http://example.org/")
            .refers_to_date(referred)
            .build();

        let mut writer = WarcWriter::new(Vec::new());
        writer.write_record(&record).unwrap();
        let mut reader = WarcReader::new(Cursor::new(writer.into_inner()));
        let read_back = reader.next_record().unwrap().unwrap();

        assert_eq!(&WarcRecordType::Revisit, read_back.record_type());
        assert_eq!(
            Some("urn:uuid:11111111-2222-3333-4444-555555555555"),
            read_back.refers_to().unwrap()
        );
        assert_eq!(
            Some("http://example.org/"),
            read_back.refers_to_target_uri().unwrap()
        );
        assert_eq!(Some(referred), read_back.refers_to_date().unwrap());
    }

    #[test]
    fn streaming_bodies_check_the_declared_length() {
        let headers = {
            let record = WarcRecordBuilder::response()
                .body(&MediaType::new("text", "plain"), b"stream me".to_vec())
                .build();
            record.headers().clone()
        };
        let mut writer = WarcWriter::new(Vec::new());
        writer
            .write_header(crate::header::ProtocolVersion::WARC_1_0, &headers)
            .unwrap();
        writer
            .write_body_from(&mut Cursor::new(b"stream me".to_vec()))
            .unwrap();

        let mut writer = WarcWriter::new(Vec::new());
        writer
            .write_header(crate::header::ProtocolVersion::WARC_1_0, &headers)
            .unwrap();
        assert!(matches!(
            writer.write_body_from(&mut Cursor::new(b"too".to_vec())),
            Err(WarcWriteError::Invariant(_))
        ));
    }
}
