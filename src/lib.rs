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

//! A streaming codec for WARC (ISO 28500) files plus a capture index.
//!
//! Records are read from a byte channel through one pre-allocated buffer:
//! the [WarcReader](reader::WarcReader) parses each header block in place
//! and hands out a [WarcRecord](record::WarcRecord) whose body is consumed
//! lazily from the same buffer and channel. Writing goes through
//! [WarcRecordBuilder](writer::WarcRecordBuilder) and
//! [WarcWriter](writer::WarcWriter). [CaptureIndex](index::CaptureIndex)
//! catalogs (URI, instant) observations across many archives.
//!
//! ```no_run
//! use warchive::media_type::MediaType;
//! use warchive::reader::WarcReader;
//! use warchive::writer::{WarcRecordBuilder, WarcWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let record = WarcRecordBuilder::response()
//!     .target_uri("http://example.org/")
//!     .body(&MediaType::new("text", "plain"), b"OK".to_vec())
//!     .build();
//! let mut writer = WarcWriter::new(Vec::new());
//! writer.write_record(&record)?;
//!
//! let mut reader = WarcReader::new(std::io::Cursor::new(writer.into_inner()));
//! while let Some(mut record) = reader.next_record()? {
//!     println!("{} {:?}", record.record_type(), record.target_uri()?);
//!     let _body = record.body().read_to_end()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod buffer;
pub mod chunked;
pub mod digest;
pub mod field;
pub mod header;
pub mod index;
pub mod media_type;
pub mod parser;
pub mod reader;
pub mod record;
pub mod record_type;
pub mod states;
pub mod truncated_reason;
pub mod writer;

pub use body::LengthedBody;
pub use buffer::BufferCursor;
pub use chunked::{ChunkedBody, ChunkedBodyError};
pub use digest::{Digest, DigestError};
pub use field::WarcFieldName;
pub use header::{InvariantViolation, ProtocolVersion, WarcHeaderMap};
pub use index::{Capture, CaptureIndex, IndexError, IndexOptions};
pub use media_type::MediaType;
pub use reader::{WarcReadError, WarcReader};
pub use record::WarcRecord;
pub use record_type::WarcRecordType;
pub use truncated_reason::TruncatedReason;
pub use writer::{WarcRecordBuf, WarcRecordBuilder, WarcWriteError, WarcWriter};
