//! Equality filters over record fields.

use crate::RawRecord;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Restricts a catalog to the records whose fields equal the given values.
///
/// A filter is a flat JSON object of field names to scalar values (string,
/// number, boolean or `null`); a record matches when *every* field matches.
/// An empty filter matches everything. This is deliberately not a query
/// language.
///
/// # Examples
///
/// ```
/// use stocktake_catalog::Filter;
///
/// let filter: Filter = r#"{"bucket": "uploads", "deleted": false}"#.parse().unwrap();
/// assert_eq!(filter.len(), 2);
/// assert!(r#"{"tags": ["a", "b"]}"#.parse::<Filter>().is_err());
/// assert!("".parse::<Filter>().unwrap().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    /// Add (or replace) an equality condition.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self, Error> {
        let field = field.into();
        let value = value.into();
        check_scalar(&field, &value)?;
        self.0.insert(field, value);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Conditions in field name order.
    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    /// Does `record` satisfy every condition? A missing field only matches
    /// `null`.
    pub fn matches(&self, record: &RawRecord) -> bool {
        self.0.iter().all(|(field, expected)| match record.get(field) {
            Some(actual) => values_equal(actual, expected),
            None => expected.is_null(),
        })
    }
}

/// Numbers compare by value, so `1` matches `1.0` the same way SQLite does.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn check_scalar(field: &str, value: &Value) -> Result<(), ErrorKind> {
    match value {
        Value::Array(_) | Value::Object(_) => {
            Err(ErrorKind::InvalidFilter(format!("value for {field:?} must be a scalar")))
        },
        _ => Ok(()),
    }
}

impl TryFrom<BTreeMap<String, Value>> for Filter {
    type Error = ErrorKind;
    fn try_from(conditions: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        for (field, value) in &conditions {
            check_scalar(field, value)?;
        }
        Ok(Self(conditions))
    }
}
impl From<Filter> for BTreeMap<String, Value> {
    fn from(filter: Filter) -> Self {
        filter.0
    }
}
impl FromStr for Filter {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(s).or_raise(|| ErrorKind::InvalidFilter("expected a JSON object of scalars".to_string()))
    }
}
