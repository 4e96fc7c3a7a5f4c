// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path expression parser built with [nom](https://docs.rs/nom).
//!
//! Expressions are parsed once, when the reference context for a class
//! mapping is built; row processing never re-parses.
//!
//! ```text
//! parent.Created.CreatedBy.Email    jump to the table's root entity
//! ().Name                           one level up the context tree, chainable
//! Categories\CobieCategory.Value    subtype filter on a segment
//! Attributes['Voltage'].Value       keyed access
//! parent.[table]                    terminal meta token: mapped table name
//! Value.[type]                      terminal meta token: runtime type name
//! ```

use crate::error::{Error, Result};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_res, opt, verify},
    multi::{many1_count, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult,
};

/// How the expression re-bases the entity before the property walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    /// Start at the current entity
    None,
    /// Jump to the ultimate root of the current context
    Parent,
    /// Climb `n` levels up the context tree
    ContextUp(u8),
}

/// Index key of an `[i]` / `['key']` accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Number(i64),
    Key(String),
}

/// One dotted path part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Property {
        name: String,
        /// `name\Type` narrows a collection or property to a subtype
        type_filter: Option<String>,
        index: Option<IndexKey>,
    },
    /// `[table]` - the mapped table name of the entity's type
    TableMeta,
    /// `[type]` - the runtime type name of the entity or value
    TypeMeta,
}

impl Segment {
    pub fn is_meta(&self) -> bool {
        matches!(self, Segment::TableMeta | Segment::TypeMeta)
    }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    pub prefix: Prefix,
    pub segments: Vec<Segment>,
}

impl PathExpr {
    /// True when the path is exactly a terminal meta token.
    pub fn is_pure_meta(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].is_meta()
    }
}

fn name(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        |s: &str| !s.starts_with(|c: char| c.is_ascii_digit()),
    )(input)
}

fn type_filter(input: &str) -> IResult<&str, &str> {
    preceded(char('\\'), name)(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))(input)
}

fn index_key(input: &str) -> IResult<&str, IndexKey> {
    delimited(
        char('['),
        alt((
            map(quoted, |s: &str| IndexKey::Key(s.to_string())),
            map_res(digit1, |s: &str| s.parse::<i64>().map(IndexKey::Number)),
        )),
        char(']'),
    )(input)
}

fn meta_segment(input: &str) -> IResult<&str, Segment> {
    alt((
        map(tag("[table]"), |_| Segment::TableMeta),
        map(tag("[type]"), |_| Segment::TypeMeta),
    ))(input)
}

fn property_segment(input: &str) -> IResult<&str, Segment> {
    map(
        pair(pair(name, opt(type_filter)), opt(index_key)),
        |((n, filter), index)| Segment::Property {
            name: n.to_string(),
            type_filter: filter.map(|f| f.to_string()),
            index,
        },
    )(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    alt((meta_segment, property_segment))(input)
}

fn prefix(input: &str) -> IResult<&str, Prefix> {
    alt((
        map(tag("parent."), |_| Prefix::Parent),
        map(many1_count(tag("().")), |n| Prefix::ContextUp(n as u8)),
    ))(input)
}

fn path(input: &str) -> IResult<&str, PathExpr> {
    map(
        pair(opt(prefix), separated_list1(char('.'), segment)),
        |(prefix, segments)| PathExpr {
            prefix: prefix.unwrap_or(Prefix::None),
            segments,
        },
    )(input)
}

/// Parse a complete path expression; unknown syntax is a configuration error.
pub fn parse_path(input: &str) -> Result<PathExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::PathSyntax {
            path: input.to_string(),
            reason: "empty expression".to_string(),
        });
    }
    let (rest, expr) = path(trimmed).map_err(|e| Error::PathSyntax {
        path: input.to_string(),
        reason: e.to_string(),
    })?;
    if !rest.is_empty() {
        return Err(Error::PathSyntax {
            path: input.to_string(),
            reason: format!("unexpected trailing input '{rest}'"),
        });
    }
    // meta tokens terminate an expression; anything after them is meaningless
    if let Some(pos) = expr.segments.iter().position(Segment::is_meta) {
        if pos + 1 != expr.segments.len() {
            return Err(Error::PathSyntax {
                path: input.to_string(),
                reason: "[table]/[type] must be the last segment".to_string(),
            });
        }
    }
    Ok(expr)
}
