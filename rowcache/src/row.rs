// Copyright 2026 rowcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Display;

use rowcache_common::error::{Error, ErrorKind, Result};
use serde::{ser::SerializeMap, Serialize, Serializer};

/// How the value of a column is decoded, decided by the type name the backing store reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Integer and floating point columns, decoded as [`Datum::Number`].
    Numeric,
    /// Everything else, decoded as [`Datum::Text`].
    Text,
}

impl ColumnKind {
    const NUMERIC: [&'static str; 4] = ["INT", "BIGINT", "FLOAT", "DOUBLE"];

    /// Classify a column by the type name reported by the backing store. Case-insensitive.
    pub fn classify(type_name: &str) -> Self {
        if Self::NUMERIC.iter().any(|t| t.eq_ignore_ascii_case(type_name)) {
            Self::Numeric
        } else {
            Self::Text
        }
    }
}

/// A typed scalar of a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Datum {
    /// Numeric column value.
    Number(f64),
    /// Text column value.
    Text(String),
}

impl Datum {
    /// Decode the raw bytes of a column with the type name reported by the backing store.
    ///
    /// Numeric columns must hold a valid float literal. Text columns are decoded lossily.
    pub fn decode(type_name: &str, raw: &[u8]) -> Result<Self> {
        match ColumnKind::classify(type_name) {
            ColumnKind::Numeric => {
                let parse_error = |source: anyhow::Error| {
                    Error::new(ErrorKind::Parse, "invalid numeric column value")
                        .with_context("type", type_name)
                        .with_context("raw", String::from_utf8_lossy(raw))
                        .with_source(source)
                };
                let s = std::str::from_utf8(raw).map_err(|e| parse_error(e.into()))?;
                let v = s.parse::<f64>().map_err(|e| parse_error(e.into()))?;
                Ok(Self::Number(v))
            }
            ColumnKind::Text => Ok(Self::Text(String::from_utf8_lossy(raw).into_owned())),
        }
    }

    /// Get the numeric value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Get the text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A row of a result set. Columns keep the order of the query.
///
/// Serialized as a map from column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Datum)>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column.
    pub fn push(&mut self, name: impl Into<String>, datum: impl Into<Datum>) {
        self.columns.push((name.into(), datum.into()));
    }

    /// Append a column, decoding its raw bytes with [`Datum::decode`].
    pub fn push_raw(&mut self, name: impl Into<String>, type_name: &str, raw: &[u8]) -> Result<()> {
        let datum = Datum::decode(type_name, raw)?;
        self.columns.push((name.into(), datum));
        Ok(())
    }

    /// Builder style [`Row::push`].
    pub fn with_column(mut self, name: impl Into<String>, datum: impl Into<Datum>) -> Self {
        self.push(name, datum);
        self
    }

    /// Get the value of the first column named `name`.
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Iterate over `(column name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Datum)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Column count.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no column.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, datum) in self.columns.iter() {
            map.serialize_entry(name, datum)?;
        }
        map.end()
    }
}

/// Ordered rows returned by a query.
///
/// The cache treats result sets as opaque values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    rows: Vec<Row>,
}

impl ResultSet {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Get the row at `index`.
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// All rows in order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Iterate over rows in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the result set has no row.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<Row> for ResultSet {
    fn from_iter<T: IntoIterator<Item = Row>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Row>> for ResultSet {
    fn from(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
