use serde::{Deserialize, Serialize};

use crate::error::{MsfError, Result};

/// Normalized column type.
///
/// Every accepted SQL type name maps onto exactly one variant; alias groups
/// (for example `INT`/`INTEGER`, `VARCHAR`/`TEXT`/`STRING`/`CHAR`) collapse
/// to the canonical member. Serialized form is the canonical lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 8-bit signed integer.
    TinyInt,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer (`INT`, `INTEGER`).
    Integer,
    /// 64-bit signed integer (`BIGINT`, `HUGEINT`).
    BigInt,
    /// Arbitrary-precision integer.
    BigNum,
    /// 8-bit unsigned integer.
    UTinyInt,
    /// 16-bit unsigned integer.
    USmallInt,
    /// 32-bit unsigned integer.
    UInteger,
    /// 64-bit unsigned integer (`UBIGINT`, `UHUGEINT`).
    UBigInt,
    /// 32-bit float (`FLOAT`, `REAL`).
    Float,
    /// 64-bit float.
    Double,
    /// Fixed-point decimal (`DECIMAL`, `NUMERIC`).
    Decimal,
    /// Boolean (`BOOLEAN`, `BOOL`).
    Boolean,
    /// Variable-length string (`VARCHAR`, `TEXT`, `STRING`, `CHAR`).
    Varchar,
    /// UUID value.
    Uuid,
    /// Bit string.
    Bit,
    /// Binary blob (`BLOB`, `BYTEA`, `VARBINARY`).
    Blob,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Point in time (`TIMESTAMP`, `TIMESTAMPTZ`).
    Timestamp,
    /// Time interval.
    Interval,
}

impl ColumnType {
    /// Normalize an SQL type name, case-insensitively, to a variant.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "tinyint" => Self::TinyInt,
            "smallint" => Self::SmallInt,
            "int" | "integer" => Self::Integer,
            "bigint" | "hugeint" => Self::BigInt,
            "bignum" => Self::BigNum,
            "utinyint" => Self::UTinyInt,
            "usmallint" => Self::USmallInt,
            "uinteger" => Self::UInteger,
            "ubigint" | "uhugeint" => Self::UBigInt,
            "float" | "real" => Self::Float,
            "double" => Self::Double,
            "decimal" | "numeric" => Self::Decimal,
            "boolean" | "bool" => Self::Boolean,
            "varchar" | "text" | "string" | "char" => Self::Varchar,
            "uuid" => Self::Uuid,
            "bit" => Self::Bit,
            "blob" | "bytea" | "varbinary" => Self::Blob,
            "date" => Self::Date,
            "time" => Self::Time,
            "timestamp" | "timestamptz" => Self::Timestamp,
            "interval" => Self::Interval,
            _ => return None,
        })
    }

    /// Canonical lowercase name, as used on the wire.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::BigNum => "bignum",
            Self::UTinyInt => "utinyint",
            Self::USmallInt => "usmallint",
            Self::UInteger => "uinteger",
            Self::UBigInt => "ubigint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Varchar => "varchar",
            Self::Uuid => "uuid",
            Self::Bit => "bit",
            Self::Blob => "blob",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Interval => "interval",
        }
    }

    /// Whether this is a signed or unsigned integer type.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::TinyInt
                | Self::SmallInt
                | Self::Integer
                | Self::BigInt
                | Self::BigNum
                | Self::UTinyInt
                | Self::USmallInt
                | Self::UInteger
                | Self::UBigInt
        )
    }

    /// Whether this is a floating-point or decimal type.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double | Self::Decimal)
    }

    /// Whether SUM/AVG accept a column of this type.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, unique within the schema.
    pub name: String,
    /// Normalized column type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether NULL values are rejected on this column.
    #[serde(default)]
    pub not_null: bool,
}

impl ColumnDef {
    /// Construct a nullable column.
    pub fn nullable(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
        }
    }

    /// Construct a NOT NULL column.
    pub fn required(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: true,
        }
    }
}

/// Ordered table schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(MsfError::Parse(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of `name`, or `NotFound`.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MsfError::NotFound(format!("unknown column: {name}")))
    }

    /// Column definition for `name`, or `NotFound`.
    pub fn column(&self, name: &str) -> Result<&ColumnDef> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    /// Column names in order.
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Canonical type names in order.
    pub fn type_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.ty.canonical_name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_alias_groups() {
        assert_eq!(ColumnType::parse("INT"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::parse("Integer"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::parse("hugeint"), Some(ColumnType::BigInt));
        assert_eq!(ColumnType::parse("TEXT"), Some(ColumnType::Varchar));
        assert_eq!(ColumnType::parse("timestamptz"), Some(ColumnType::Timestamp));
        assert_eq!(ColumnType::parse("varbinary"), Some(ColumnType::Blob));
        assert_eq!(ColumnType::parse("geometry"), None);
    }

    #[test]
    fn schema_rejects_duplicate_columns() {
        let err = Schema::new(vec![
            ColumnDef::nullable("a", ColumnType::Integer),
            ColumnDef::nullable("a", ColumnType::Double),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column"));
    }

    #[test]
    fn column_type_serde_uses_canonical_name() {
        let json = serde_json::to_string(&ColumnType::Timestamp).unwrap();
        assert_eq!(json, "\"timestamp\"");
        let back: ColumnType = serde_json::from_str("\"varchar\"").unwrap();
        assert_eq!(back, ColumnType::Varchar);
    }
}
