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
use std::fmt::{Debug, Formatter};
use std::io;
use std::io::Read;

use thiserror::Error;

use crate::body::LengthedBody;
use crate::buffer::{BufferCursor, FillError};
use crate::field::WarcFieldName;
use crate::header::{InvariantViolation, ProtocolVersion, WarcHeaderMap};
use crate::parser::{parse_header_block, HeaderParseStatus};
use crate::record::WarcRecord;
use crate::record_type::WarcRecordType;

const RECORD_TRAILER: &[u8; 4] = b"\r\n\r\n";

/// Errors raised while reading records from a channel. Every error is fatal
/// to the reader: the record boundary is lost, so further calls fail with
/// [Poisoned](WarcReadError::Poisoned) and recovery means re-opening the
/// source with a fresh reader.
#[derive(Debug, Error)]
pub enum WarcReadError {
    #[error("malformed record at byte {offset}: {message}")]
    Parse { offset: u64, message: String },
    #[error("the channel ended mid-record at byte {0}")]
    UnexpectedEof(u64),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    IOError(#[from] io::Error),
    #[error("the reader was poisoned by an earlier failure")]
    Poisoned,
}

/// A lazy, finite sequence of records over one byte channel.
///
/// The reader threads a single pre-allocated buffer through header parsing
/// and body reads. Each yielded [WarcRecord] borrows the reader, so the next
/// record cannot be requested until the current one is released; bytes the
/// consumer left unread are drained at that boundary, together with the
/// CRLF CRLF record trailer.
///
/// Compressed archives are a channel concern: for gzip files with one member
/// per record, hand a per-member decompressor stream in as `channel`.
pub struct WarcReader<R> {
    cursor: BufferCursor<R>,
    body_remaining: u64,
    trailer_pending: bool,
    last_offset: u64,
    poisoned: bool,
}

impl<R: Debug> Debug for WarcReader<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarcReader")
            .field("cursor", &self.cursor)
            .field("body_remaining", &self.body_remaining)
            .field("trailer_pending", &self.trailer_pending)
            .field("last_offset", &self.last_offset)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl<R> WarcReader<R> {
    pub fn new(channel: R) -> Self {
        Self::from_cursor(BufferCursor::new(channel))
    }

    pub fn with_capacity(channel: R, capacity: usize) -> Self {
        Self::from_cursor(BufferCursor::with_capacity(channel, capacity))
    }

    fn from_cursor(cursor: BufferCursor<R>) -> Self {
        Self {
            cursor,
            body_remaining: 0,
            trailer_pending: false,
            last_offset: 0,
            poisoned: false,
        }
    }

    /// The byte offset at which the most recently yielded record began.
    /// This is the stable pointer a capture index stores.
    pub fn position(&self) -> u64 {
        self.last_offset
    }

    pub fn into_inner(self) -> R {
        self.cursor.into_inner()
    }
}

impl<R: Read> WarcReader<R> {
    /// Yields the next record, or `None` at a clean end of the channel.
    pub fn next_record(&mut self) -> Result<Option<WarcRecord<'_, R>>, WarcReadError> {
        if self.poisoned {
            return Err(WarcReadError::Poisoned);
        }
        let parsed = match self.advance() {
            Ok(parsed) => parsed,
            Err(err) => {
                self.poisoned = true;
                return Err(err);
            }
        };
        let Some((version, record_type, headers)) = parsed else {
            return Ok(None);
        };
        let Self {
            cursor,
            body_remaining,
            ..
        } = self;
        let body = LengthedBody::new(cursor, body_remaining);
        Ok(Some(WarcRecord::new(version, record_type, headers, body)))
    }

    /// Drains whatever the previous record left behind, verifies its
    /// trailer, and parses the next header block.
    fn advance(
        &mut self,
    ) -> Result<Option<(ProtocolVersion, WarcRecordType, WarcHeaderMap)>, WarcReadError> {
        if self.body_remaining > 0 {
            let mut chunk = [0u8; 8 * 1024];
            while self.body_remaining > 0 {
                let want = min(self.body_remaining, chunk.len() as u64) as usize;
                let read = self.cursor.read_into(&mut chunk[..want])?;
                if read == 0 {
                    return Err(WarcReadError::UnexpectedEof(self.cursor.consumed()));
                }
                self.body_remaining -= read as u64;
            }
        }
        if self.trailer_pending {
            self.consume_trailer()?;
            self.trailer_pending = false;
        }

        // Where the upcoming record starts; position() only moves once that
        // record is actually yielded.
        let start = self.cursor.consumed();
        if self.cursor.remaining() == 0 {
            match self.cursor.fill_more() {
                Ok(_) => {}
                Err(FillError::EndOfInput) => return Ok(None),
                Err(FillError::Exhausted(capacity)) => {
                    return Err(self.parse_error_at(
                        start,
                        format!("header block exceeds the {capacity} byte buffer"),
                    ))
                }
                Err(FillError::IOError(err)) => return Err(err.into()),
            }
        }

        let (version, headers, consumed) = loop {
            match parse_header_block(self.cursor.peek()) {
                Ok(HeaderParseStatus::Finished {
                    version,
                    headers,
                    consumed,
                }) => break (version, headers, consumed),
                Ok(HeaderParseStatus::NeedsMore) => match self.cursor.fill_more() {
                    Ok(0) | Err(FillError::EndOfInput) => {
                        return Err(WarcReadError::UnexpectedEof(
                            self.cursor.consumed() + self.cursor.remaining() as u64,
                        ))
                    }
                    Ok(_) => {}
                    Err(FillError::Exhausted(capacity)) => {
                        return Err(self.parse_error_at(
                            start,
                            format!("header block exceeds the {capacity} byte buffer"),
                        ))
                    }
                    Err(FillError::IOError(err)) => return Err(err.into()),
                },
                Err(syntax) => {
                    return Err(self.parse_error_at(start + syntax.offset as u64, syntax.message))
                }
            }
        };
        self.cursor.advance(consumed);

        let (record_type, content_length) = validate(&headers)?;
        self.body_remaining = content_length;
        self.trailer_pending = true;
        self.last_offset = start;
        Ok(Some((version, record_type, headers)))
    }

    fn consume_trailer(&mut self) -> Result<(), WarcReadError> {
        let mut tail = [0u8; 4];
        let mut got = 0usize;
        while got < tail.len() {
            let read = self.cursor.read_into(&mut tail[got..])?;
            if read == 0 {
                return Err(WarcReadError::UnexpectedEof(self.cursor.consumed()));
            }
            got += read;
        }
        if &tail != RECORD_TRAILER {
            return Err(self.parse_error_at(
                self.cursor.consumed() - tail.len() as u64,
                format!(
                    "record body not terminated by CRLF CRLF but {:?}",
                    String::from_utf8_lossy(&tail)
                ),
            ));
        }
        Ok(())
    }

    fn parse_error_at(&self, offset: u64, message: String) -> WarcReadError {
        WarcReadError::Parse { offset, message }
    }
}

/// Checks the mandatory header set and pulls out what the reader needs for
/// body framing and type dispatch.
fn validate(headers: &WarcHeaderMap) -> Result<(WarcRecordType, u64), WarcReadError> {
    if let Err(mut missing) = headers.validate() {
        // validate never reports success with an empty list
        return Err(InvariantViolation::MissingField(missing.swap_remove(0)).into());
    }
    let tag = headers
        .sole_field(&WarcFieldName::WarcType)?
        .ok_or(InvariantViolation::MissingField(WarcFieldName::WarcType))?;
    let record_type = tag
        .parse()
        .unwrap_or_else(|_| WarcRecordType::Unknown(tag.to_string()));
    headers.sole_field(&WarcFieldName::WarcRecordId)?;
    headers.sole_field(&WarcFieldName::Date)?;
    let raw_length = headers
        .sole_field(&WarcFieldName::ContentLength)?
        .ok_or(InvariantViolation::MissingField(WarcFieldName::ContentLength))?;
    let content_length = raw_length
        .parse()
        .map_err(|_| InvariantViolation::MalformedField {
            name: WarcFieldName::ContentLength,
            message: format!("not a non-negative integer: {raw_length:?}"),
        })?;
    Ok((record_type, content_length))
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::{WarcReadError, WarcReader};
    use crate::record_type::WarcRecordType;

    fn record_bytes(record_type: &str, id: u32, body: &[u8]) -> Vec<u8> {
        let mut bytes = format!(
            "WARC/1.0\r\n\
             WARC-Type: {record_type}\r\n\
             WARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-{id:012x}>\r\n\
             WARC-Date: 2024-03-01T12:00:00Z\r\n\
             Content-Length: {}\r\n\
             \r\n",
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(b"\r\n\r\n");
        bytes
    }

    #[test]
    fn yields_records_in_file_order() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&record_bytes("warcinfo", 1, b"first"));
        stream.extend_from_slice(&record_bytes("response", 2, b"second body"));
        stream.extend_from_slice(&record_bytes("metadata", 3, b""));

        let mut reader = WarcReader::new(Cursor::new(stream));
        let mut record = reader.next_record().unwrap().expect("first record");
        assert_eq!(&WarcRecordType::Warcinfo, record.record_type());
        assert_eq!(b"first".as_slice(), record.body().read_to_end().unwrap().as_slice());
        drop(record);

        let record = reader.next_record().unwrap().expect("second record");
        // The second body is deliberately ignored.
        assert_eq!(&WarcRecordType::Response, record.record_type());
        drop(record);

        let record = reader.next_record().unwrap().expect("third record");
        assert_eq!(&WarcRecordType::Metadata, record.record_type());
        drop(record);

        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn drains_partially_consumed_bodies() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&record_bytes("response", 1, &[b'x'; 1000]));
        stream.extend_from_slice(&record_bytes("response", 2, b"tail"));

        let mut reader = WarcReader::new(Cursor::new(stream));
        let mut record = reader.next_record().unwrap().unwrap();
        let mut partial = [0u8; 10];
        record.body().read_some(&mut partial).unwrap();
        drop(record);

        let mut record = reader.next_record().unwrap().unwrap();
        assert_eq!(b"tail".as_slice(), record.body().read_to_end().unwrap().as_slice());
    }

    #[test]
    fn both_records_fit_one_small_buffer() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&record_bytes("response", 1, b"alpha body"));
        stream.extend_from_slice(&record_bytes("response", 2, b"beta body"));

        // The capacity covers the first header, part of its body and the
        // start of the second header; both records must still come out of
        // the one fixed buffer.
        let mut reader = WarcReader::with_capacity(Cursor::new(stream), 192);
        let mut record = reader.next_record().unwrap().unwrap();
        assert_eq!(b"alpha body".as_slice(), record.body().read_to_end().unwrap().as_slice());
        drop(record);
        let mut record = reader.next_record().unwrap().unwrap();
        assert_eq!(b"beta body".as_slice(), record.body().read_to_end().unwrap().as_slice());
        drop(record);
        assert!(reader.next_record().unwrap().is_none());
    }

    #[test]
    fn position_points_at_the_yielded_record() {
        let first = record_bytes("response", 1, b"one");
        let second = record_bytes("response", 2, b"two");
        let first_len = first.len() as u64;
        let mut stream = first;
        stream.extend_from_slice(&second);

        let mut reader = WarcReader::new(Cursor::new(stream));
        drop(reader.next_record().unwrap().unwrap());
        assert_eq!(0, reader.position());
        drop(reader.next_record().unwrap().unwrap());
        assert_eq!(first_len, reader.position());
    }

    #[test]
    fn garbage_poisons_the_reader() {
        let mut reader = WarcReader::new(Cursor::new(b"ARC/0.9\r\nnope\r\n".to_vec()));
        assert!(matches!(
            reader.next_record(),
            Err(WarcReadError::Parse { .. })
        ));
        assert!(matches!(reader.next_record(), Err(WarcReadError::Poisoned)));
    }

    #[test]
    fn truncated_stream_is_unexpected_eof() {
        let mut bytes = record_bytes("response", 1, b"full body");
        bytes.truncate(bytes.len() - 10);
        let mut reader = WarcReader::new(Cursor::new(bytes));
        let mut record = reader.next_record().unwrap().unwrap();
        assert!(record.body().read_to_end().is_err());
    }

    #[test]
    fn missing_trailer_is_a_parse_error() {
        let mut bytes = record_bytes("response", 1, b"body");
        let cut = bytes.len() - 4;
        bytes.truncate(cut);
        bytes.extend_from_slice(b"XXXX");
        bytes.extend_from_slice(&record_bytes("response", 2, b"next"));

        let mut reader = WarcReader::new(Cursor::new(bytes));
        drop(reader.next_record().unwrap().unwrap());
        assert!(matches!(
            reader.next_record(),
            Err(WarcReadError::Parse { .. })
        ));
    }

    #[test]
    fn missing_mandatory_header_is_an_invariant_violation() {
        let bytes = b"WARC/1.0\r\n\
            WARC-Type: response\r\n\
            WARC-Date: 2024-03-01T12:00:00Z\r\n\
            Content-Length: 0\r\n\
            \r\n\r\n\r\n"
            .to_vec();
        let mut reader = WarcReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.next_record(),
            Err(WarcReadError::Invariant(_))
        ));
    }

    #[test]
    fn unknown_record_types_are_yielded() {
        let stream = record_bytes("screenshot", 1, b"png bytes");
        let mut reader = WarcReader::new(Cursor::new(stream));
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(
            &WarcRecordType::Unknown("screenshot".to_string()),
            record.record_type()
        );
    }
}
