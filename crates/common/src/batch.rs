use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{MsfError, Result};
use crate::types::Schema;

/// One cell value.
///
/// The wire representation is the bare JSON scalar (`null`, `true`, `3`,
/// `1.5`, `"click"`); temporal types travel as their string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value; also carries date/time/uuid/interval text.
    Str(String),
}

impl Value {
    /// Whether this is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// SQL comparison: `None` when either side is NULL or the kinds are not
    /// comparable, so any predicate over the pair evaluates to false.
    pub fn compare_sql(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                Some(a.total_cmp(&b))
            }
        }
    }

    /// Total order used for deterministic sorting of result rows and group
    /// keys: NULL < booleans < numbers < strings.
    pub fn cmp_order(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Str(_) => 3,
            }
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = other.as_f64().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

// Group keys never contain NaN (NaN comparisons are filtered out before
// grouping), so bitwise float equality is sufficient.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Self::Int(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Self::Float(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Self::Str(v) => {
                4u8.hash(state);
                v.hash(state);
            }
        }
    }
}

/// A small in-memory table: a schema plus a batch of rows.
///
/// This is the unit workers return (one per map/reduce task) and the unit
/// the coordinator feeds back into reduce rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    /// Column names and types of every row.
    pub schema: Schema,
    /// Row-major cell values; each row has `schema.len()` cells.
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    /// An empty batch with the given schema.
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Build a batch, checking row arity against the schema.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.len() != schema.len()) {
            return Err(MsfError::SchemaMismatch(format!(
                "row arity {} does not match schema arity {}",
                bad.len(),
                schema.len()
            )));
        }
        Ok(Self { schema, rows })
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Verify the batch's column names and types match `expected`.
    ///
    /// Nullability is not part of the wire contract and is ignored.
    pub fn check_schema(&self, expected: &Schema) -> Result<()> {
        let same = self.schema.len() == expected.len()
            && self
                .schema
                .columns
                .iter()
                .zip(&expected.columns)
                .all(|(a, b)| a.name == b.name && a.ty == b.ty);
        if same {
            Ok(())
        } else {
            Err(MsfError::SchemaMismatch(format!(
                "partial schema {:?} does not match planned schema {:?}",
                self.schema.names(),
                expected.names()
            )))
        }
    }

    /// Concatenate batches in order; all must share the first batch's shape.
    pub fn concat(batches: Vec<RowBatch>) -> Result<RowBatch> {
        let mut iter = batches.into_iter();
        let mut out = iter
            .next()
            .ok_or_else(|| MsfError::Internal("concat of zero batches".to_string()))?;
        for batch in iter {
            batch.check_schema(&out.schema)?;
            out.rows.extend(batch.rows);
        }
        Ok(out)
    }

    /// Sort rows by the given column indexes using [`Value::cmp_order`].
    pub fn sort_by_columns(&mut self, keys: &[usize]) {
        self.rows.sort_by(|a, b| {
            for &k in keys {
                let ord = a[k].cmp_order(&b[k]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}
