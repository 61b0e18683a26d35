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
use std::io::Read;

use thiserror::Error;

// A size or trailer line longer than this cannot be a sane chunk header.
const MAX_LINE: usize = 1024;
const REFILL: usize = 8 * 1024;

/// Errors raised while decoding a chunked transfer body. Offsets count
/// encoded source bytes.
#[derive(Debug, Error)]
pub enum ChunkedBodyError {
    #[error("chunked encoding violated at byte {offset}: {message}")]
    Parse { offset: u64, message: &'static str },
    #[error("channel ended mid-chunk at byte {0}")]
    UnexpectedEof(u64),
    #[error(transparent)]
    IOError(#[from] io::Error),
}

impl From<ChunkedBodyError> for io::Error {
    fn from(err: ChunkedBodyError) -> Self {
        match err {
            ChunkedBodyError::Parse { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            ChunkedBodyError::UnexpectedEof(_) => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            ChunkedBodyError::IOError(inner) => inner,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ChunkState {
    AwaitSize,
    InData(u64),
    AwaitDataCr,
    AwaitDataLf,
    AwaitTrailer,
    Done,
}

/// An HTTP/1.1 chunked transfer decoder over a byte source.
///
/// The source is an inner reader (a [LengthedBody](crate::body::LengthedBody)
/// or any other channel view) optionally preceded by already-buffered bytes;
/// the prefix is exhausted before the inner reader is pulled. Chunk
/// extensions and trailer headers are scanned past and discarded, never
/// surfaced.
pub struct ChunkedBody<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    state: ChunkState,
    line: Vec<u8>,
    encoded_offset: u64,
    seen_any: bool,
}

impl<R: Read> ChunkedBody<R> {
    pub fn new(inner: R) -> Self {
        Self::with_prefix(inner, Vec::new())
    }

    /// A decoder whose first bytes were already read off the channel, e.g.
    /// the residue of a shared record buffer.
    pub fn with_prefix(inner: R, prefix: impl Into<Vec<u8>>) -> Self {
        let buf = prefix.into();
        let seen_any = !buf.is_empty();
        Self {
            inner,
            buf,
            pos: 0,
            state: ChunkState::AwaitSize,
            line: Vec::new(),
            encoded_offset: 0,
            seen_any,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn parse_error(&self, message: &'static str) -> ChunkedBodyError {
        ChunkedBodyError::Parse {
            offset: self.encoded_offset,
            message,
        }
    }

    /// Refills the internal window from the inner reader. `Ok(false)` means
    /// the source is exhausted.
    fn refill(&mut self) -> Result<bool, ChunkedBodyError> {
        self.buf.resize(REFILL, 0);
        self.pos = 0;
        let read = self.inner.read(&mut self.buf)?;
        self.buf.truncate(read);
        if read > 0 {
            self.seen_any = true;
        }
        Ok(read > 0)
    }

    fn source_ended(&self) -> ChunkedBodyError {
        if self.seen_any {
            ChunkedBodyError::UnexpectedEof(self.encoded_offset)
        } else {
            self.parse_error("chunked body is empty")
        }
    }

    /// Moves window bytes into the line accumulator until a LF is consumed.
    /// `Ok(false)` means the window ran out mid-line; the accumulator keeps
    /// the partial line for the next window.
    fn take_line(&mut self) -> Result<bool, ChunkedBodyError> {
        let window = &self.buf[self.pos..];
        match memchr::memchr(b'\n', window) {
            Some(at) => {
                self.line.extend_from_slice(&window[..at]);
                self.pos += at + 1;
                self.encoded_offset += (at + 1) as u64;
                if self.line.len() > MAX_LINE {
                    return Err(self.parse_error("unterminated line"));
                }
                if self.line.last() != Some(&b'\r') {
                    return Err(self.parse_error("line feed without carriage return"));
                }
                self.line.pop();
                Ok(true)
            }
            None => {
                self.line.extend_from_slice(window);
                self.pos = self.buf.len();
                self.encoded_offset += window.len() as u64;
                if self.line.len() > MAX_LINE {
                    return Err(self.parse_error("unterminated line"));
                }
                Ok(false)
            }
        }
    }

    fn parse_chunk_size(&self) -> Result<u64, ChunkedBodyError> {
        // Everything after ";" is a chunk extension and is discarded.
        let digits = match memchr::memchr(b';', &self.line) {
            Some(split) => &self.line[..split],
            None => &self.line[..],
        };
        if digits.is_empty() || digits.len() > 16 {
            return Err(self.parse_error("bad chunk size"));
        }
        let mut size = 0u64;
        for byte in digits {
            let digit = match byte {
                b'0'..=b'9' => byte - b'0',
                b'a'..=b'f' => byte - b'a' + 10,
                b'A'..=b'F' => byte - b'A' + 10,
                _ => return Err(self.parse_error("bad chunk size")),
            };
            size = size << 4 | digit as u64;
        }
        Ok(size)
    }

    /// Decodes into `dst`, returning the number of decoded bytes. `Ok(0)` on
    /// a non-empty `dst` signals the end of the chunked body; the terminator
    /// and any trailer lines have then been consumed from the source.
    ///
    /// Decoded bytes are handed back before the next source refill, so a
    /// later failure never swallows already-produced output.
    pub fn read_decoded(&mut self, dst: &mut [u8]) -> Result<usize, ChunkedBodyError> {
        let mut produced = 0usize;
        while produced < dst.len() && self.state != ChunkState::Done {
            if self.pos == self.buf.len() {
                if produced > 0 {
                    break;
                }
                if !self.refill()? {
                    return Err(self.source_ended());
                }
            }
            match self.state {
                ChunkState::Done => unreachable!(),
                ChunkState::AwaitSize => {
                    if self.take_line()? {
                        let size = self.parse_chunk_size()?;
                        self.line.clear();
                        self.state = if size == 0 {
                            ChunkState::AwaitTrailer
                        } else {
                            ChunkState::InData(size)
                        };
                    }
                }
                ChunkState::InData(outstanding) => {
                    let window = &self.buf[self.pos..];
                    let take = min(
                        min(outstanding, window.len() as u64) as usize,
                        dst.len() - produced,
                    );
                    dst[produced..produced + take].copy_from_slice(&window[..take]);
                    self.pos += take;
                    self.encoded_offset += take as u64;
                    produced += take;
                    let outstanding = outstanding - take as u64;
                    self.state = if outstanding == 0 {
                        ChunkState::AwaitDataCr
                    } else {
                        ChunkState::InData(outstanding)
                    };
                }
                ChunkState::AwaitDataCr => {
                    if self.buf[self.pos] != b'\r' {
                        return Err(self.parse_error("chunk data not terminated by CRLF"));
                    }
                    self.pos += 1;
                    self.encoded_offset += 1;
                    self.state = ChunkState::AwaitDataLf;
                }
                ChunkState::AwaitDataLf => {
                    if self.buf[self.pos] != b'\n' {
                        return Err(self.parse_error("chunk data not terminated by CRLF"));
                    }
                    self.pos += 1;
                    self.encoded_offset += 1;
                    self.state = ChunkState::AwaitSize;
                }
                ChunkState::AwaitTrailer => {
                    // Trailer headers are read and dropped until the blank
                    // line that ends the body.
                    if self.take_line()? {
                        let blank = self.line.is_empty();
                        self.line.clear();
                        if blank {
                            self.state = ChunkState::Done;
                        }
                    }
                }
            }
        }
        Ok(produced)
    }
}

impl<R: Read> Read for ChunkedBody<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.read_decoded(dst).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::{ChunkedBody, ChunkedBodyError};

    fn decode_all<R: std::io::Read>(decoder: &mut ChunkedBody<R>) -> Vec<u8> {
        let mut decoded = Vec::new();
        let mut buf = [0u8; 32];
        loop {
            let n = decoder.read_decoded(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            decoded.extend_from_slice(&buf[..n]);
        }
        decoded
    }

    #[test]
    fn decodes_across_a_prefix_and_the_channel() {
        let prefix = b"3\r\nhel\r\n7\r\nlo ".to_vec();
        let channel = Cursor::new(b"worl\r\n1\r\nd\r\n0\r\n\r\n".to_vec());
        let mut decoder = ChunkedBody::with_prefix(channel, prefix);
        assert_eq!(b"hello world".as_slice(), decode_all(&mut decoder).as_slice());
        assert!(decoder.is_finished());
        // The channel is fully drained, terminator included.
        let inner = decoder.into_inner();
        assert_eq!(inner.get_ref().len() as u64, inner.position());
    }

    #[test]
    fn empty_input_is_a_parse_error() {
        let mut decoder = ChunkedBody::new(Cursor::new(Vec::new()));
        let mut buf = [0u8; 32];
        assert!(matches!(
            decoder.read_decoded(&mut buf),
            Err(ChunkedBodyError::Parse { .. })
        ));
    }

    #[test]
    fn truncation_mid_chunk_is_eof() {
        let mut decoder = ChunkedBody::new(Cursor::new(b"5\r\nab".to_vec()));
        let mut buf = [0u8; 32];
        // The two present data bytes come out before the failure surfaces.
        assert_eq!(2, decoder.read_decoded(&mut buf).unwrap());
        assert!(matches!(
            decoder.read_decoded(&mut buf),
            Err(ChunkedBodyError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn truncation_before_the_terminator_is_eof() {
        let mut decoder = ChunkedBody::new(Cursor::new(b"1\r\nx\r\n".to_vec()));
        let mut buf = [0u8; 32];
        assert_eq!(1, decoder.read_decoded(&mut buf).unwrap());
        assert!(matches!(
            decoder.read_decoded(&mut buf),
            Err(ChunkedBodyError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn extensions_and_trailers_are_discarded() {
        let encoded = b"4;name=value\r\nwarc\r\n0\r\nX-Trailer: ignored\r\n\r\n".to_vec();
        let mut decoder = ChunkedBody::new(Cursor::new(encoded));
        assert_eq!(b"warc".as_slice(), decode_all(&mut decoder).as_slice());
        assert!(decoder.is_finished());
    }

    #[test]
    fn bad_hex_is_a_parse_error() {
        let mut decoder = ChunkedBody::new(Cursor::new(b"zz\r\nabc\r\n0\r\n\r\n".to_vec()));
        let mut buf = [0u8; 32];
        assert!(matches!(
            decoder.read_decoded(&mut buf),
            Err(ChunkedBodyError::Parse { .. })
        ));
    }

    #[test]
    fn single_byte_reads_keep_state() {
        let mut decoder = ChunkedBody::new(Cursor::new(b"3\r\nabc\r\n0\r\n\r\n".to_vec()));
        let mut decoded = Vec::new();
        let mut one = [0u8; 1];
        loop {
            let n = decoder.read_decoded(&mut one).unwrap();
            if n == 0 {
                break;
            }
            decoded.push(one[0]);
        }
        assert_eq!(b"abc".as_slice(), decoded.as_slice());
        assert!(decoder.is_finished());
    }
}
