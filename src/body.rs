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

use crate::buffer::BufferCursor;

/// A read view over the next `Content-Length` bytes of the shared channel.
///
/// The view borrows the reader's cursor and its countdown of unread body
/// bytes, so the borrow checker guarantees it cannot outlive the record: the
/// reader cannot advance while a body view exists, and once it advances the
/// view is gone. Bytes left unread stay accounted in the countdown and the
/// reader drains them before the next record.
pub struct LengthedBody<'a, R> {
    cursor: &'a mut BufferCursor<R>,
    remaining: &'a mut u64,
}

impl<'a, R> LengthedBody<'a, R> {
    pub(crate) fn new(cursor: &'a mut BufferCursor<R>, remaining: &'a mut u64) -> Self {
        Self { cursor, remaining }
    }

    /// Unread bytes of the declared length.
    pub fn remaining(&self) -> u64 {
        *self.remaining
    }

    pub fn is_drained(&self) -> bool {
        *self.remaining == 0
    }
}

impl<'a, R: Read> LengthedBody<'a, R> {
    /// Reads up to `min(dst.len(), remaining)` bytes. Returns `Ok(0)` once
    /// the declared length is exhausted.
    pub fn read_some(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 || dst.is_empty() {
            return Ok(0);
        }
        let want = min(dst.len() as u64, *self.remaining) as usize;
        let read = self.cursor.read_into(&mut dst[..want])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("channel ended with {} body bytes outstanding", self.remaining),
            ));
        }
        *self.remaining -= read as u64;
        Ok(read)
    }

    /// Reads the rest of the view into a vector.
    pub fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(min(*self.remaining, 1 << 20) as usize);
        let mut chunk = [0u8; 8 * 1024];
        loop {
            let read = self.read_some(&mut chunk)?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
        }
        Ok(data)
    }

    /// Reads and discards every unread byte of the view. The record trailer
    /// stays untouched; the reader consumes it at the iteration boundary.
    pub fn skip_remaining(&mut self) -> io::Result<u64> {
        let mut skipped = 0u64;
        let mut chunk = [0u8; 8 * 1024];
        loop {
            let read = self.read_some(&mut chunk)?;
            if read == 0 {
                return Ok(skipped);
            }
            skipped += read as u64;
        }
    }
}

impl<'a, R: Read> Read for LengthedBody<'a, R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.read_some(dst)
    }
}
