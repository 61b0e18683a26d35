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

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::reader::{WarcReadError, WarcReader};
use crate::record::{strip_angle_brackets, WarcRecord};

/// One indexed observation: a target URI captured at an instant, stored in
/// `file` at byte offset `offset` from the start of that file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    uri: String,
    #[serde(with = "time::serde::rfc3339")]
    instant: OffsetDateTime,
    file: Utf8PathBuf,
    offset: u64,
    ordinal: u64,
}

impl Capture {
    fn new(uri: String, instant: OffsetDateTime, file: Utf8PathBuf, offset: u64, ordinal: u64) -> Self {
        Self {
            uri,
            instant,
            file,
            offset,
            ordinal,
        }
    }

    /// The uri-key: the target URI verbatim, angle brackets stripped, with
    /// no canonicalization whatsoever. `http://Example.org/` and
    /// `http://example.org/` are distinct keys.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn instant(&self) -> OffsetDateTime {
        self.instant
    }

    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Offset of the record's first header byte within [file](Self::file).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn key(&self) -> (&str, OffsetDateTime, u64) {
        (&self.uri, self.instant, self.ordinal)
    }
}

// Ordering (and therefore set identity) is the index key: uri-key, then
// instant, then insertion ordinal as the tie break.
impl PartialEq for Capture {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Capture {}

impl PartialOrd for Capture {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Capture {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Policy knobs for index construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// When set, a file that fails to read is logged and skipped, keeping
    /// the captures indexed before the failure; the default fails fast.
    pub skip_unreadable: bool,
}

/// Errors raised while building a [CaptureIndex].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("indexing {path}: {source}")]
    File {
        path: Utf8PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// An ordered multiset of [Capture]s over one or more WARC files.
///
/// Captures order by (uri-key, instant) with ties kept in insertion order.
/// The first HTML capture seen during construction becomes the entrypoint
/// and is never displaced.
#[derive(Debug, Default)]
pub struct CaptureIndex {
    entries: BTreeSet<Capture>,
    entrypoint: Option<Capture>,
    next_ordinal: u64,
}

impl CaptureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index by streaming `warcs` in the given order with the
    /// default fail-fast policy.
    pub fn from_files<I, P>(warcs: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        Self::from_files_with(warcs, IndexOptions::default())
    }

    pub fn from_files_with<I, P>(warcs: I, options: IndexOptions) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        let mut index = Self::new();
        for warc in warcs {
            let path = warc.as_ref();
            if let Err(err) = index.add_file(path) {
                if options.skip_unreadable {
                    log::warn!("skipping unreadable archive {path}: {err}");
                    continue;
                }
                return Err(err);
            }
        }
        Ok(index)
    }

    /// Streams one file into the index. Captures indexed before a failure
    /// are kept.
    pub fn add_file(&mut self, path: &Utf8Path) -> Result<(), IndexError> {
        let at = |err: Box<dyn std::error::Error + Send + Sync>| IndexError::File {
            path: path.to_owned(),
            source: err,
        };
        let file = File::open(path).map_err(|err| at(Box::new(err)))?;
        let mut reader = WarcReader::new(file);
        let before = self.entries.len();
        loop {
            // The record borrows the reader, so everything the index needs
            // is pulled out before the stable offset is read back.
            let observed = {
                let mut record = match reader.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        log::debug!(
                            "indexed {} captures from {path}",
                            self.entries.len() - before
                        );
                        return Ok(());
                    }
                    Err(err) => return Err(at(Box::new(err))),
                };
                match Self::observe(&mut record, self.entrypoint.is_none()) {
                    Ok(observed) => observed,
                    Err(err) => return Err(at(Box::new(err))),
                }
            };
            let Some((uri, instant, is_html)) = observed else {
                continue;
            };
            let capture = Capture::new(
                uri,
                instant,
                path.to_owned(),
                reader.position(),
                self.next_ordinal,
            );
            self.next_ordinal += 1;
            if is_html && self.entrypoint.is_none() {
                self.entrypoint = Some(capture.clone());
            }
            self.entries.insert(capture);
        }
    }

    /// Decides whether a record is an indexable capture and extracts its key
    /// material. `want_entrypoint` gates the payload sniff, which consumes
    /// body bytes the index does not otherwise need.
    fn observe<R: std::io::Read>(
        record: &mut WarcRecord<'_, R>,
        want_entrypoint: bool,
    ) -> Result<Option<(String, OffsetDateTime, bool)>, WarcReadError> {
        if !record.record_type().is_capture() {
            return Ok(None);
        }
        let Some(uri) = record.target_uri()? else {
            return Ok(None);
        };
        let scheme = uri.split(':').next().unwrap_or("");
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Ok(None);
        }
        let uri = strip_angle_brackets(uri).to_string();
        let instant = record.date()?;
        let is_html = want_entrypoint
            && match record.payload_type() {
                Ok(Some(payload)) => payload.base_matches("text", "html"),
                // An unreadable payload type never fails indexing, it only
                // disqualifies the record as entrypoint.
                _ => false,
            };
        Ok(Some((uri, instant, is_html)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capture> {
        self.entries.iter()
    }

    /// Every capture of `uri`'s uri-key in ascending (instant, insertion)
    /// order.
    pub fn query(&self, uri: &str) -> impl Iterator<Item = &Capture> {
        let key = strip_angle_brackets(uri);
        let lower = Capture::new(
            key.to_string(),
            PrimitiveDateTime::MIN.assume_utc(),
            Utf8PathBuf::new(),
            0,
            u64::MIN,
        );
        let upper = Capture::new(
            key.to_string(),
            PrimitiveDateTime::MAX.assume_utc(),
            Utf8PathBuf::new(),
            0,
            u64::MAX,
        );
        self.entries.range(lower..=upper)
    }

    /// The first HTML capture discovered while indexing, the default landing
    /// page for replay front ends.
    pub fn entrypoint(&self) -> Option<&Capture> {
        self.entrypoint.as_ref()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use camino::Utf8PathBuf;
    use time::macros::datetime;

    use super::{CaptureIndex, IndexOptions};
    use crate::media_type::MediaType;
    use crate::writer::{WarcRecordBuilder, WarcWriter};

    fn http_response_body(content_type: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        body.extend_from_slice(payload);
        body
    }

    fn capture_record(
        uri: &str,
        instant: time::OffsetDateTime,
        content_type: &str,
        payload: &[u8],
    ) -> crate::writer::WarcRecordBuf {
        WarcRecordBuilder::response()
            .target_uri(uri)
            .date(instant)
            .body(
                &MediaType::new("application", "http").with_parameter("msgtype", "response"),
                http_response_body(content_type, payload),
            )
            .build()
    }

    fn write_archive(dir: &std::path::Path, name: &str, records: &[crate::writer::WarcRecordBuf]) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.join(name)).unwrap();
        let mut writer = WarcWriter::new(std::fs::File::create(&path).unwrap());
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    #[test]
    fn queries_come_back_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = datetime!(2024-01-01 00:00:00 UTC);
        let t2 = datetime!(2024-02-01 00:00:00 UTC);
        let t3 = datetime!(2024-03-01 00:00:00 UTC);
        // Inserted out of time order: T2, T1, T3.
        let path = write_archive(
            dir.path(),
            "a.warc",
            &[
                capture_record("http://a/", t2, "text/plain", b"two"),
                capture_record("http://a/", t1, "text/plain", b"one"),
                capture_record("http://a/", t3, "text/plain", b"three"),
                capture_record("http://b/", t1, "text/plain", b"other"),
            ],
        );

        let index = CaptureIndex::from_files([&path]).unwrap();
        assert_eq!(4, index.len());
        let instants: Vec<_> = index.query("http://a/").map(|c| c.instant()).collect();
        assert_eq!(vec![t1, t2, t3], instants);
        assert_eq!(0, index.query("http://missing/").count());
    }

    #[test]
    fn uri_keys_are_not_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let path = write_archive(
            dir.path(),
            "case.warc",
            &[
                capture_record("http://Example.org/", t, "text/plain", b"upper"),
                capture_record("http://example.org/", t, "text/plain", b"lower"),
            ],
        );
        let index = CaptureIndex::from_files([&path]).unwrap();
        assert_eq!(1, index.query("http://Example.org/").count());
        assert_eq!(1, index.query("http://example.org/").count());
    }

    #[test]
    fn the_first_html_capture_stays_the_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let path = write_archive(
            dir.path(),
            "entry.warc",
            &[
                capture_record("http://x/", t, "image/png", b"\x89PNG"),
                capture_record("http://y/", t, "text/html", b"<html/>"),
                capture_record("http://z/", t, "text/html", b"<html/>"),
            ],
        );
        let index = CaptureIndex::from_files([&path]).unwrap();
        assert_eq!("http://y/", index.entrypoint().unwrap().uri());
    }

    #[test]
    fn offsets_point_at_record_starts() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let path = write_archive(
            dir.path(),
            "offsets.warc",
            &[
                capture_record("http://a/", t, "text/plain", b"first"),
                capture_record("http://b/", t, "text/plain", b"second"),
            ],
        );
        let index = CaptureIndex::from_files([&path]).unwrap();
        let first = index.query("http://a/").next().unwrap();
        assert_eq!(0, first.offset());
        let second = index.query("http://b/").next().unwrap();
        assert!(second.offset() > 0);

        // The offset re-opens to the same record.
        use std::io::{Read, Seek, SeekFrom};
        let mut file = std::fs::File::open(&path).unwrap();
        file.seek(SeekFrom::Start(second.offset())).unwrap();
        let mut prefix = [0u8; 8];
        file.read_exact(&mut prefix).unwrap();
        assert_eq!(b"WARC/1.0", &prefix);
    }

    #[test]
    fn non_http_schemes_and_non_capture_types_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let records = [
            capture_record("ftp://mirror/", t, "text/plain", b"ftp"),
            WarcRecordBuilder::metadata()
                .target_uri("http://a/")
                .date(t)
                .body(&MediaType::new("text", "plain"), b"notes".to_vec())
                .build(),
            capture_record("https://secure/", t, "text/plain", b"tls"),
        ];
        let path = write_archive(dir.path(), "filter.warc", &records);
        let index = CaptureIndex::from_files([&path]).unwrap();
        assert_eq!(1, index.len());
        assert_eq!("https://secure/", index.iter().next().unwrap().uri());
    }

    #[test]
    fn skip_unreadable_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let broken = Utf8PathBuf::from_path_buf(dir.path().join("broken.warc")).unwrap();
        std::fs::File::create(&broken)
            .unwrap()
            .write_all(b"not a warc file")
            .unwrap();
        let good = write_archive(
            dir.path(),
            "good.warc",
            &[capture_record("http://a/", t, "text/plain", b"fine")],
        );

        assert!(CaptureIndex::from_files([&broken, &good]).is_err());

        let index = CaptureIndex::from_files_with(
            [&broken, &good],
            IndexOptions {
                skip_unreadable: true,
            },
        )
        .unwrap();
        assert_eq!(1, index.len());
    }
}
