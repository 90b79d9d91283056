use crate::error::{Error, ErrorKind, Result};
use serde_json::Value;
use stocktake_catalog::RawRecord;

/// A decoded catalog record: the identifier of the object it references, and
/// (optionally) the rest of the record as opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKey {
    pub id: String,
    pub record: Option<RawRecord>,
}

impl RecordKey {
    /// Decode a raw record, reading the identifier from `id_field`.
    ///
    /// String identifiers are used as they are and integer identifiers are
    /// rendered as strings. Anything else (including a missing or empty
    /// identifier) is a [`RecordDecode`](ErrorKind::RecordDecode) error.
    pub fn decode(record: RawRecord, id_field: &str, keep_record: bool) -> Result<Self> {
        let id = match record.get(id_field) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            Some(Value::String(_)) => exn::bail!(ErrorKind::RecordDecode(format!("field {id_field:?} is empty"))),
            Some(other) => {
                exn::bail!(ErrorKind::RecordDecode(format!("field {id_field:?} is not a string or integer: {other}")))
            },
            None => exn::bail!(ErrorKind::RecordDecode(format!("missing field {id_field:?}"))),
        };
        Ok(Self {
            id,
            record: keep_record.then_some(record),
        })
    }
}

/// The outcome of reconciling one record.
///
/// Either the existence of the object was determined, or it wasn't and
/// `outcome` holds the reason; never both. Results for records that could not
/// be decoded (or pages that could not be fetched) have no `id`.
#[derive(Debug)]
pub struct CheckResult {
    pub id: Option<String>,
    pub outcome: Result<bool>,
    pub record: Option<RawRecord>,
}

impl CheckResult {
    pub fn checked(key: RecordKey, outcome: Result<bool>) -> Self {
        Self {
            id: Some(key.id),
            outcome,
            record: key.record,
        }
    }

    pub fn failed(error: Error) -> Self {
        Self {
            id: None,
            outcome: Err(error),
            record: None,
        }
    }
}
