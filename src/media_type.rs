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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use compact_str::{CompactString, ToCompactString};
use const_format::concatcp;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till, take_while1};
use nom::character::complete::multispace0;
use nom::combinator::all_consuming;
use nom::multi::many0;
use nom::sequence::{delimited, preceded, separated_pair};
use nom::IResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DELIMITERS: &str = "(),/:;<=>?@[\\]{}\"";
const DELIMITERS_WS: &str = concatcp!(DELIMITERS, " \t\r\n");

#[derive(Debug, Error)]
#[error("not a media type: {0:?}")]
pub struct MediaTypeError(String);

/// A parsed media type such as `application/http;msgtype=response`.
///
/// Type, subtype and parameter names are normalized to lowercase; parameter
/// values keep their case. Quoted parameter values are accepted but
/// backslash escapes inside them are not processed.
#[derive(Debug, Clone, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    type_: CompactString,
    sub_type: CompactString,
    parameters: Vec<(CompactString, CompactString)>,
}

impl MediaType {
    pub fn new(type_: impl ToCompactString, sub_type: impl ToCompactString) -> Self {
        Self {
            type_: type_.to_compact_string().to_lowercase().into(),
            sub_type: sub_type.to_compact_string().to_lowercase().into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl ToCompactString,
        value: impl ToCompactString,
    ) -> Self {
        self.parameters.push((
            name.to_compact_string().to_lowercase().into(),
            value.to_compact_string(),
        ));
        self
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// This media type with its parameters dropped.
    pub fn base(&self) -> MediaType {
        MediaType {
            type_: self.type_.clone(),
            sub_type: self.sub_type.clone(),
            parameters: Vec::new(),
        }
    }

    /// Compares type and subtype, ignoring parameters.
    pub fn base_matches(&self, type_: &str, sub_type: &str) -> bool {
        self.type_.eq_ignore_ascii_case(type_) && self.sub_type.eq_ignore_ascii_case(sub_type)
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.type_, self.sub_type)?;
        for (name, value) in &self.parameters {
            if value.is_empty() || value.contains(|c| DELIMITERS_WS.contains(c)) {
                write!(f, ";{}=\"{}\"", name, value)?;
            } else {
                write!(f, ";{}={}", name, value)?;
            }
        }
        Ok(())
    }
}

fn token1(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_graphic() && !DELIMITERS_WS.contains(c))(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(tag("\""), take_till(|c| c == '"'), tag("\""))(input)
}

fn parameter(input: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        delimited(multispace0, tag(";"), multispace0),
        separated_pair(token1, tag("="), alt((quoted, token1))),
    )(input)
}

fn media_type(input: &str) -> IResult<&str, MediaType> {
    let (rest, ((type_, sub_type), parameters)) = all_consuming(nom::sequence::pair(
        separated_pair(token1, tag("/"), token1),
        many0(parameter),
    ))(input)?;
    let mut parsed = MediaType::new(type_, sub_type);
    for (name, value) in parameters {
        parsed = parsed.with_parameter(name, value);
    }
    Ok((rest, parsed))
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match media_type(s.trim()) {
            Ok((_, parsed)) => Ok(parsed),
            Err(_) => Err(MediaTypeError(s.to_string())),
        }
    }
}
