//! Typed statements produced by the parser.
//!
//! The parser performs no name resolution; columns are carried by name and
//! resolved against the table schema by the planner.

use msf_common::ColumnDef;
use msf_common::ColumnType;

/// One parsed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE t (..) [IF NOT EXISTS]`
    CreateTable(CreateTable),
    /// `DROP TABLE t [IF EXISTS]`
    DropTable(DropTable),
    /// `INSERT INTO t FROM '<path>' [ROWS PER SHARD n]`
    InsertFrom(InsertFrom),
    /// `SELECT .. FROM t [WHERE ..] [GROUP BY ..]`
    Select(Select),
}

impl Statement {
    /// Statement kind label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable(_) => "create_table",
            Self::DropTable(_) => "drop_table",
            Self::InsertFrom(_) => "insert_from",
            Self::Select(_) => "select",
        }
    }
}

/// CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    /// Target table name.
    pub table: String,
    /// Declared columns in order.
    pub columns: Vec<ColumnDef>,
    /// Suppress `AlreadyExists`.
    pub if_not_exists: bool,
}

/// DROP TABLE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    /// Target table name.
    pub table: String,
    /// Suppress `NotFound`.
    pub if_exists: bool,
}

/// INSERT INTO .. FROM statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertFrom {
    /// Target table name.
    pub table: String,
    /// Source file path.
    pub source: String,
    /// Optional shard size override.
    pub rows_per_shard: Option<usize>,
}

/// SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Source table name.
    pub table: String,
    /// Projection list.
    pub projection: Projection,
    /// Conjunction of WHERE atoms; empty means no filter.
    pub predicates: Vec<Predicate>,
    /// GROUP BY columns; empty means no grouping.
    pub group_by: Vec<String>,
}

impl Select {
    /// Aggregate items of the projection, in select-list order with their
    /// positions.
    pub fn aggregates(&self) -> Vec<(usize, &AggFunc, &AggArg, Option<&str>)> {
        match &self.projection {
            Projection::Star => Vec::new(),
            Projection::Items(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| match item {
                    SelectItem::Aggregate { func, arg, alias } => {
                        Some((i, func, arg, alias.as_deref()))
                    }
                    SelectItem::Column { .. } => None,
                })
                .collect(),
        }
    }

    /// Whether the projection contains any aggregate.
    pub fn has_aggregates(&self) -> bool {
        !self.aggregates().is_empty()
    }
}

/// SELECT projection list.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `SELECT *`
    Star,
    /// Explicit select items.
    Items(Vec<SelectItem>),
}

/// One item of a SELECT projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// Bare column reference.
    Column {
        /// Referenced column name.
        name: String,
        /// Optional `AS` alias.
        alias: Option<String>,
    },
    /// Aggregate call.
    Aggregate {
        /// Aggregate function.
        func: AggFunc,
        /// `*` or a column argument.
        arg: AggArg,
        /// Optional `AS` alias.
        alias: Option<String>,
    },
}

impl SelectItem {
    /// Output column name: the alias when present, otherwise a derived name
    /// (`value`, `sum_value`, `count_star`, ...).
    pub fn output_name(&self) -> String {
        match self {
            Self::Column { name, alias } => alias.clone().unwrap_or_else(|| name.clone()),
            Self::Aggregate { func, arg, alias } => alias
                .clone()
                .unwrap_or_else(|| format!("{}_{}", func.name(), arg.safe_ident())),
        }
    }
}

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Row or non-null count.
    Count,
    /// Numeric sum.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Arithmetic mean.
    Avg,
}

impl AggFunc {
    /// Lowercase SQL name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }

    /// Parse a lowercase function name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "avg" => Self::Avg,
            _ => return None,
        })
    }

    /// Result type of the aggregate over an argument of type `arg`.
    ///
    /// Shared by planner and executor so planned and produced schemas cannot
    /// drift: COUNT is BIGINT, SUM widens integers to BIGINT and floats to
    /// DOUBLE, AVG is always DOUBLE, MIN/MAX keep the argument type.
    pub fn result_type(&self, arg: Option<ColumnType>) -> ColumnType {
        match self {
            Self::Count => ColumnType::BigInt,
            Self::Avg => ColumnType::Double,
            Self::Sum => match arg {
                Some(t) if t.is_integer() => ColumnType::BigInt,
                _ => ColumnType::Double,
            },
            Self::Min | Self::Max => arg.unwrap_or(ColumnType::Varchar),
        }
    }
}

/// Argument of an aggregate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggArg {
    /// `*`: count every row.
    Star,
    /// A column argument.
    Column(String),
}

impl AggArg {
    /// Column name, if the argument is a column.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Star => None,
            Self::Column(name) => Some(name.as_str()),
        }
    }

    /// Identifier-safe rendering used for derived aliases.
    pub fn safe_ident(&self) -> String {
        match self {
            Self::Star => "star".to_string(),
            Self::Column(name) => name.replace(['.', '-'], "_"),
        }
    }
}

/// Comparison operators accepted in WHERE atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CmpOp {
    /// SQL spelling.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// One WHERE conjunct.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `col OP literal`
    Compare {
        /// Left-hand column.
        col: String,
        /// Comparison operator.
        op: CmpOp,
        /// Right-hand literal.
        value: Literal,
    },
    /// `col IS NULL`
    IsNull {
        /// Tested column.
        col: String,
    },
    /// `col IS NOT NULL`
    IsNotNull {
        /// Tested column.
        col: String,
    },
}

impl Predicate {
    /// Column the predicate tests.
    pub fn column(&self) -> &str {
        match self {
            Self::Compare { col, .. } | Self::IsNull { col } | Self::IsNotNull { col } => col,
        }
    }

    /// SQL rendering of the predicate.
    pub fn sql(&self) -> String {
        match self {
            Self::Compare { col, op, value } => format!("{col} {} {}", op.sql(), value.sql()),
            Self::IsNull { col } => format!("{col} IS NULL"),
            Self::IsNotNull { col } => format!("{col} IS NOT NULL"),
        }
    }
}

/// Typed literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// Quoted string literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// NULL literal.
    Null,
}

impl Literal {
    /// SQL rendering, re-quoting strings.
    pub fn sql(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{v:.1}")
                } else {
                    v.to_string()
                }
            }
            Self::Str(v) => format!("'{}'", v.replace('\'', "''")),
            Self::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Self::Null => "NULL".to_string(),
        }
    }

    /// Convert to a runtime value.
    pub fn to_value(&self) -> msf_common::Value {
        match self {
            Self::Int(v) => msf_common::Value::Int(*v),
            Self::Float(v) => msf_common::Value::Float(*v),
            Self::Str(v) => msf_common::Value::Str(v.clone()),
            Self::Bool(v) => msf_common::Value::Bool(*v),
            Self::Null => msf_common::Value::Null,
        }
    }
}
