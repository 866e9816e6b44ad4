use std::cmp::Ordering;
use std::collections::HashMap;

use msf_common::{ColumnDef, MsfError, Result, RowBatch, Schema, Value};
use msf_sql::ast::{AggArg, AggFunc, CmpOp, Predicate, Projection, Select, SelectItem, Statement};
use msf_sql::parse_statement;

/// Parse and execute one subquery over the bound input batch.
///
/// The relation named in the subquery's FROM clause is decorative; the
/// caller already resolved the request inputs into `input`.
pub fn run_subquery(sql: &str, input: &RowBatch) -> Result<RowBatch> {
    let statement = parse_statement(sql)?;
    let Statement::Select(select) = statement else {
        return Err(MsfError::Parse(format!(
            "worker subquery must be a SELECT, got {}",
            statement.kind()
        )));
    };
    execute_select(&select, input)
}

/// Execute a parsed SELECT over one input batch.
pub fn execute_select(select: &Select, input: &RowBatch) -> Result<RowBatch> {
    let kept = filter_rows(select, input)?;
    if select.has_aggregates() || !select.group_by.is_empty() {
        aggregate(select, input, &kept)
    } else {
        project(select, input, &kept)
    }
}

fn filter_rows<'a>(select: &Select, input: &'a RowBatch) -> Result<Vec<&'a Vec<Value>>> {
    let mut tests = Vec::with_capacity(select.predicates.len());
    for predicate in &select.predicates {
        tests.push((input.schema.index_of(predicate.column())?, predicate));
    }
    Ok(input
        .rows
        .iter()
        .filter(|row| {
            tests
                .iter()
                .all(|(idx, predicate)| eval_predicate(predicate, &row[*idx]))
        })
        .collect())
}

fn eval_predicate(predicate: &Predicate, value: &Value) -> bool {
    match predicate {
        Predicate::IsNull { .. } => value.is_null(),
        Predicate::IsNotNull { .. } => !value.is_null(),
        Predicate::Compare { op, value: lit, .. } => {
            match value.compare_sql(&lit.to_value()) {
                None => false,
                Some(ord) => match op {
                    CmpOp::Eq => ord == Ordering::Equal,
                    CmpOp::NotEq => ord != Ordering::Equal,
                    CmpOp::Lt => ord == Ordering::Less,
                    CmpOp::LtEq => ord != Ordering::Greater,
                    CmpOp::Gt => ord == Ordering::Greater,
                    CmpOp::GtEq => ord != Ordering::Less,
                },
            }
        }
    }
}

fn project(select: &Select, input: &RowBatch, kept: &[&Vec<Value>]) -> Result<RowBatch> {
    match &select.projection {
        Projection::Star => RowBatch::new(
            input.schema.clone(),
            kept.iter().map(|row| (*row).clone()).collect(),
        ),
        Projection::Items(items) => {
            let mut indexes = Vec::with_capacity(items.len());
            let mut columns = Vec::with_capacity(items.len());
            for item in items {
                let SelectItem::Column { name, .. } = item else {
                    return Err(MsfError::Internal(
                        "aggregate reached projection path".to_string(),
                    ));
                };
                let idx = input.schema.index_of(name)?;
                let source = &input.schema.columns[idx];
                indexes.push(idx);
                columns.push(ColumnDef {
                    name: item.output_name(),
                    ty: source.ty,
                    not_null: source.not_null,
                });
            }
            let rows = kept
                .iter()
                .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
                .collect();
            RowBatch::new(Schema::new(columns)?, rows)
        }
    }
}

/// Per-group accumulator for one aggregate item.
#[derive(Debug, Clone)]
enum Acc {
    Count(i64),
    Sum {
        int_sum: i64,
        float_sum: f64,
        saw_float: bool,
        any: bool,
    },
    Extreme {
        want_max: bool,
        current: Option<Value>,
    },
    Avg {
        sum: f64,
        count: i64,
    },
}

impl Acc {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Self::Count(0),
            AggFunc::Sum => Self::Sum {
                int_sum: 0,
                float_sum: 0.0,
                saw_float: false,
                any: false,
            },
            AggFunc::Min => Self::Extreme {
                want_max: false,
                current: None,
            },
            AggFunc::Max => Self::Extreme {
                want_max: true,
                current: None,
            },
            AggFunc::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    fn update(&mut self, value: Option<&Value>) -> Result<()> {
        match self {
            Self::Count(n) => {
                // COUNT(*) sees `None`; COUNT(col) skips NULLs.
                match value {
                    None => *n += 1,
                    Some(v) if !v.is_null() => *n += 1,
                    Some(_) => {}
                }
            }
            Self::Sum {
                int_sum,
                float_sum,
                saw_float,
                any,
            } => match value {
                Some(Value::Int(v)) => {
                    *int_sum += v;
                    *float_sum += *v as f64;
                    *any = true;
                }
                Some(Value::Float(v)) => {
                    *float_sum += v;
                    *saw_float = true;
                    *any = true;
                }
                Some(Value::Null) | None => {}
                Some(other) => {
                    return Err(MsfError::Internal(format!(
                        "SUM over non-numeric value {other:?}"
                    )))
                }
            },
            Self::Extreme { want_max, current } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        let replace = match current {
                            None => true,
                            Some(best) => {
                                let ord = v.cmp_order(best);
                                if *want_max {
                                    ord == Ordering::Greater
                                } else {
                                    ord == Ordering::Less
                                }
                            }
                        };
                        if replace {
                            *current = Some(v.clone());
                        }
                    }
                }
            }
            Self::Avg { sum, count } => {
                if let Some(v) = value {
                    if let Some(x) = v.as_f64() {
                        *sum += x;
                        *count += 1;
                    } else if !v.is_null() {
                        return Err(MsfError::Internal(format!(
                            "AVG over non-numeric value {v:?}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        match self {
            Self::Count(n) => Value::Int(*n),
            Self::Sum {
                int_sum,
                float_sum,
                saw_float,
                any,
            } => {
                if !*any {
                    Value::Null
                } else if *saw_float {
                    Value::Float(*float_sum)
                } else {
                    Value::Int(*int_sum)
                }
            }
            Self::Extreme { current, .. } => current.clone().unwrap_or(Value::Null),
            Self::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / *count as f64)
                }
            }
        }
    }
}

enum ItemPlan {
    GroupKey { key_pos: usize },
    Aggregate { arg_idx: Option<usize> },
}

fn aggregate(select: &Select, input: &RowBatch, kept: &[&Vec<Value>]) -> Result<RowBatch> {
    let Projection::Items(items) = &select.projection else {
        return Err(MsfError::Parse(
            "SELECT * cannot be aggregated".to_string(),
        ));
    };

    let mut key_indexes = Vec::with_capacity(select.group_by.len());
    for col in &select.group_by {
        key_indexes.push(input.schema.index_of(col)?);
    }

    let mut plans = Vec::with_capacity(items.len());
    let mut columns = Vec::with_capacity(items.len());
    let mut acc_template = Vec::new();
    for item in items {
        match item {
            SelectItem::Column { name, .. } => {
                let key_pos = select
                    .group_by
                    .iter()
                    .position(|g| g == name)
                    .ok_or_else(|| {
                        MsfError::Parse(format!(
                            "non-aggregate column '{name}' must appear in GROUP BY"
                        ))
                    })?;
                let source = &input.schema.columns[key_indexes[key_pos]];
                columns.push(ColumnDef {
                    name: item.output_name(),
                    ty: source.ty,
                    not_null: source.not_null,
                });
                plans.push(ItemPlan::GroupKey { key_pos });
            }
            SelectItem::Aggregate { func, arg, .. } => {
                let (arg_idx, arg_ty) = match arg {
                    AggArg::Star => (None, None),
                    AggArg::Column(name) => {
                        let idx = input.schema.index_of(name)?;
                        (Some(idx), Some(input.schema.columns[idx].ty))
                    }
                };
                columns.push(ColumnDef {
                    name: item.output_name(),
                    ty: func.result_type(arg_ty),
                    not_null: *func == AggFunc::Count,
                });
                acc_template.push(Acc::new(*func));
                plans.push(ItemPlan::Aggregate { arg_idx });
            }
        }
    }

    // Group states keyed by key tuple; insertion order is tracked so float
    // accumulation folds rows deterministically, then output is re-sorted
    // by key.
    let mut groups: HashMap<Vec<Value>, Vec<Acc>> = HashMap::new();
    let mut group_order: Vec<Vec<Value>> = Vec::new();
    if select.group_by.is_empty() {
        groups.insert(Vec::new(), acc_template.clone());
        group_order.push(Vec::new());
    }

    for row in kept {
        let key: Vec<Value> = key_indexes.iter().map(|&i| row[i].clone()).collect();
        let accs = groups.entry(key.clone()).or_insert_with(|| {
            group_order.push(key);
            acc_template.clone()
        });
        let mut acc_pos = 0;
        for plan in &plans {
            if let ItemPlan::Aggregate { arg_idx, .. } = plan {
                accs[acc_pos].update(arg_idx.map(|i| &row[i]))?;
                acc_pos += 1;
            }
        }
    }

    let mut out_rows = Vec::with_capacity(group_order.len());
    for key in &group_order {
        let accs = &groups[key];
        let mut row = Vec::with_capacity(plans.len());
        let mut acc_pos = 0;
        for plan in &plans {
            match plan {
                ItemPlan::GroupKey { key_pos } => row.push(key[*key_pos].clone()),
                ItemPlan::Aggregate { .. } => {
                    row.push(accs[acc_pos].finish());
                    acc_pos += 1;
                }
            }
        }
        out_rows.push(row);
    }

    let mut batch = RowBatch::new(Schema::new(columns)?, out_rows)?;
    if !select.group_by.is_empty() {
        let key_cols: Vec<usize> = plans
            .iter()
            .enumerate()
            .filter_map(|(i, p)| matches!(p, ItemPlan::GroupKey { .. }).then_some(i))
            .collect();
        batch.sort_by_columns(&key_cols);
    }
    Ok(batch)
}
