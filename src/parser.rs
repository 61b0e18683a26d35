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

use std::str;

use nom::bytes::streaming::{tag, take_till, take_till1};
use nom::character::streaming::digit1;
use nom::combinator::{map_res, not, verify};
use nom::multi::many0;
use nom::sequence::{delimited, separated_pair, terminated};
use nom::IResult;
use thiserror::Error;

use crate::header::{ProtocolVersion, WarcHeaderMap};

/// A header block did not match the grammar.
///
/// `offset` is relative to the start of the block; the reader adds the
/// absolute stream position.
#[derive(Debug, Error)]
#[error("header grammar violated at byte {offset}: {message}")]
pub struct HeaderSyntaxError {
    pub offset: usize,
    pub message: String,
}

/// Outcome of driving the header parser over the currently buffered bytes.
#[derive(Debug)]
pub enum HeaderParseStatus {
    /// The block is complete; `consumed` bytes belong to it.
    Finished {
        version: ProtocolVersion,
        headers: WarcHeaderMap,
        consumed: usize,
    },
    /// The buffered window ends before the block does; refill and call again.
    NeedsMore,
}

fn is_name_byte(b: u8) -> bool {
    // token bytes: visible US-ASCII without the colon separator
    b.is_ascii_graphic() && b != b':'
}

fn parse_version(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
    map_res(
        delimited(
            tag(b"WARC/".as_slice()),
            separated_pair(digit1, tag(b".".as_slice()), digit1),
            tag(b"\r\n".as_slice()),
        ),
        |(major, minor): (&[u8], &[u8])| -> Result<ProtocolVersion, std::num::ParseIntError> {
            // digit1 only yields ASCII digits
            let major = unsafe { str::from_utf8_unchecked(major) }.parse()?;
            let minor = unsafe { str::from_utf8_unchecked(minor) }.parse()?;
            Ok(ProtocolVersion::new(major, minor))
        },
    )(input)
}

fn parse_header_name(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        terminated(
            verify(take_till1(|b| b == b':' || b == b'\r' || b == b'\n'), |name: &[u8]| {
                name.iter().copied().all(is_name_byte)
            }),
            tag(b":".as_slice()),
        ),
        str::from_utf8,
    )(input)
}

fn parse_header_value(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(
        terminated(
            take_till(|b| b == b'\r' || b == b'\n'),
            tag(b"\r\n".as_slice()),
        ),
        |value: &[u8]| str::from_utf8(value).map(|v| v.trim_matches(|c| c == ' ' || c == '\t')),
    )(input)
}

fn parse_header_line(input: &[u8]) -> IResult<&[u8], (&str, &str)> {
    // A bare CRLF terminates the block instead of starting a line.
    not(tag(b"\r\n".as_slice()))(input)?;
    let (input, name) = parse_header_name(input)?;
    let (input, value) = parse_header_value(input)?;
    Ok((input, (name, value)))
}

fn parse_block(input: &[u8]) -> IResult<&[u8], (ProtocolVersion, WarcHeaderMap)> {
    let (rest, version) = parse_version(input)?;
    let (rest, lines) = terminated(many0(parse_header_line), tag(b"\r\n".as_slice()))(rest)?;
    let mut headers = WarcHeaderMap::new();
    for (name, value) in lines {
        headers.append(name, value);
    }
    Ok((rest, (version, headers)))
}

/// Drives the header grammar over `input`, the buffered prefix of a record.
///
/// The grammar is written with streaming combinators, so a truncated window
/// reports [HeaderParseStatus::NeedsMore] instead of failing; the caller
/// refills the shared buffer and re-drives the parse from the block start.
pub fn parse_header_block(input: &[u8]) -> Result<HeaderParseStatus, HeaderSyntaxError> {
    match parse_block(input) {
        Ok((rest, (version, headers))) => Ok(HeaderParseStatus::Finished {
            version,
            headers,
            consumed: input.len() - rest.len(),
        }),
        Err(nom::Err::Incomplete(_)) => Ok(HeaderParseStatus::NeedsMore),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(HeaderSyntaxError {
            offset: input.len() - err.input.len(),
            message: format!("{:?}", err.code),
        }),
    }
}
