//! Resource paths (`index[/type][?q=...]`) and read queries.

use object_store::path::Path;
use serde_json::Value;
use snafu::prelude::*;
use std::fmt;

use crate::error::{
    EmptyIndexSnafu, InvalidNameSnafu, ResourceError, TooManySegmentsSnafu, UnsupportedQuerySnafu,
};
use crate::record::Record;

/// A parsed resource location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    index: String,
    doc_type: Option<String>,
    query: Query,
}

impl ResourcePath {
    /// Parse `index[/type][?query]`.
    pub fn parse(raw: &str) -> Result<Self, ResourceError> {
        let raw = raw.trim();
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Query::parse(query)?),
            None => (raw, Query::MatchAll),
        };

        let mut segments = path.trim_matches('/').split('/');
        let index = segments.next().unwrap_or_default();
        ensure!(!index.is_empty(), EmptyIndexSnafu { resource: raw });
        let doc_type = segments.next().filter(|s| !s.is_empty());
        ensure!(
            segments.next().is_none(),
            TooManySegmentsSnafu { resource: raw }
        );

        for segment in std::iter::once(index).chain(doc_type) {
            ensure!(
                valid_segment(segment),
                InvalidNameSnafu {
                    resource: raw,
                    segment
                }
            );
        }

        Ok(Self {
            index: index.to_string(),
            doc_type: doc_type.map(str::to_string),
            query,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Store prefix holding this resource's log, segments and staging area.
    pub fn prefix(&self) -> Path {
        match &self.doc_type {
            Some(doc_type) => Path::from_iter([self.index.as_str(), doc_type.as_str()]),
            None => Path::from(self.index.as_str()),
        }
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.starts_with('_')
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && c != '\\' && c != '*')
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)?;
        if let Some(doc_type) = &self.doc_type {
            write!(f, "/{doc_type}")?;
        }
        Ok(())
    }
}

/// Read filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    MatchAll,
    /// Exact match on a (possibly dotted) field.
    Term { field: String, value: String },
}

impl Query {
    /// Parse a query fragment: `q=*`, `q=field:value`, or empty.
    pub fn parse(raw: &str) -> Result<Self, ResourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Query::MatchAll);
        }
        let expr = raw
            .strip_prefix("q=")
            .context(UnsupportedQuerySnafu { query: raw })?
            .trim();
        if expr == "*" {
            return Ok(Query::MatchAll);
        }
        match expr.split_once(':') {
            Some((field, value)) if !field.trim().is_empty() && !value.trim().is_empty() => {
                Ok(Query::Term {
                    field: field.trim().to_string(),
                    value: value.trim().to_string(),
                })
            }
            _ => UnsupportedQuerySnafu { query: raw }.fail(),
        }
    }

    /// Whether `record` passes the filter. Arrays match when any element does.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => record
                .get_path(field)
                .is_some_and(|found| value_matches(found, value)),
        }
    }
}

fn value_matches(found: &Value, expected: &str) -> bool {
    match found {
        Value::String(s) => s == expected,
        Value::Array(items) => items.iter().any(|item| value_matches(item, expected)),
        Value::Null | Value::Object(_) => false,
        scalar => scalar.to_string() == expected,
    }
}
