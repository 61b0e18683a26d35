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
use ubyte::ByteUnit;

/// Default capacity of the shared record buffer. A header block larger than
/// this fails with [FillError::Exhausted].
pub const DEFAULT_BUFFER_CAPACITY: usize = ByteUnit::Kibibyte(64).as_u64() as usize;

/// Errors raised when refilling a [BufferCursor].
#[derive(Debug, Error)]
pub enum FillError {
    /// The channel reached its end and no buffered bytes remain.
    #[error("end of input")]
    EndOfInput,
    /// The buffer is full of unconsumed bytes, nothing can be refilled.
    #[error("buffer capacity of {0} bytes exhausted")]
    Exhausted(usize),
    #[error(transparent)]
    IOError(#[from] io::Error),
}

/// A byte channel combined with a single re-used buffer.
///
/// The cursor is the only object that reads from the channel. Higher layers
/// either consume the buffered window via [peek](Self::peek)/[advance](Self::advance)
/// or bypass it with [read_into](Self::read_into), which drains any buffered
/// prefix before touching the channel. Between calls the buffer always holds
/// `pos..limit` of valid, unconsumed bytes and is never re-allocated.
pub struct BufferCursor<R> {
    channel: R,
    buf: Box<[u8]>,
    pos: usize,
    limit: usize,
    consumed: u64,
}

impl<R: Debug> Debug for BufferCursor<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCursor")
            .field("channel", &self.channel)
            .field("capacity", &self.buf.len())
            .field("pos", &self.pos)
            .field("limit", &self.limit)
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl<R> BufferCursor<R> {
    pub fn new(channel: R) -> Self {
        Self::with_capacity(channel, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(channel: R, capacity: usize) -> Self {
        assert!(capacity > 0, "a zero-sized buffer can never make progress");
        Self {
            channel,
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            limit: 0,
            consumed: 0,
        }
    }

    /// The unconsumed buffered window.
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.pos..self.limit]
    }

    /// Number of buffered bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Total number of bytes consumed from the channel since creation. This
    /// is the absolute offset of the next unconsumed byte.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Marks `n` buffered bytes as consumed.
    ///
    /// Panics if `n` exceeds [remaining](Self::remaining); callers only ever
    /// advance over bytes they have peeked.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advanced past the buffered window");
        self.pos += n;
        self.consumed += n as u64;
    }

    pub fn into_inner(self) -> R {
        self.channel
    }
}

impl<R: Read> BufferCursor<R> {
    /// Compacts consumed bytes to the front and reads more from the channel.
    ///
    /// Returns the number of freshly buffered bytes. `Ok(0)` means the channel
    /// is at EOF while buffered bytes remain; [FillError::EndOfInput] means
    /// EOF with an empty buffer.
    pub fn fill_more(&mut self) -> Result<usize, FillError> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.limit, 0);
            self.limit -= self.pos;
            self.pos = 0;
        }
        if self.limit == self.buf.len() {
            return Err(FillError::Exhausted(self.buf.len()));
        }
        let read = self.channel.read(&mut self.buf[self.limit..])?;
        if read == 0 && self.limit == 0 {
            return Err(FillError::EndOfInput);
        }
        self.limit += read;
        Ok(read)
    }

    /// Reads into `dst`, draining the buffered window before reading the
    /// channel directly. Returns `Ok(0)` only at channel EOF or for an empty
    /// `dst`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let buffered = self.remaining();
        if buffered > 0 {
            let n = min(buffered, dst.len());
            dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            self.consumed += n as u64;
            return Ok(n);
        }
        let read = self.channel.read(dst)?;
        self.consumed += read as u64;
        Ok(read)
    }
}
