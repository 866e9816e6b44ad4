//! Statement rewriting into map/reduce subqueries.
//!
//! The rewrite keeps one invariant: a map subquery and a reduce subquery
//! emit the *same* internal columns, so the reduce composes over arbitrary
//! tree shapes and the engine only applies a final local projection.
//!
//! Per select-list position `i`, the internal columns are:
//!
//! | aggregate  | map emits                                  | reduce emits                 |
//! |------------|--------------------------------------------|------------------------------|
//! | COUNT      | `COUNT(..) AS _c{i}`                       | `SUM(_c{i}) AS _c{i}`        |
//! | SUM        | `SUM(col) AS _s{i}`                        | `SUM(_s{i}) AS _s{i}`        |
//! | MIN / MAX  | `MIN(col) AS _m{i}`                        | `MIN(_m{i}) AS _m{i}`        |
//! | AVG        | `SUM(col) AS _sum{i}, COUNT(col) AS _cnt{i}` | per-part SUMs              |
//!
//! AVG is recomposed as `SUM / COUNT` by the engine's final projection, so a
//! single associative reduce pass over partials is always sufficient.

use msf_common::{ColumnDef, ColumnType, MsfError, Result, Schema};
use msf_sql::ast::{AggArg, AggFunc, Projection, Select, SelectItem};

use crate::plan::{AggregationMode, OutputColumn, OutputExpr, PlannedQuery};

/// Relation name reduce subqueries read from; the worker binds the union of
/// its request inputs to the single relation the subquery names.
pub const REDUCE_RELATION: &str = "partials";

/// Rewrite a parsed SELECT against its resolved table schema.
pub fn plan_select(select: &Select, schema: &Schema) -> Result<PlannedQuery> {
    for predicate in &select.predicates {
        schema.column(predicate.column())?;
    }
    for group_col in &select.group_by {
        schema.column(group_col)?;
    }

    if !select.has_aggregates() && select.group_by.is_empty() {
        return plan_pass_through(select, schema);
    }
    plan_aggregate(select, schema)
}

fn where_clause(select: &Select) -> String {
    if select.predicates.is_empty() {
        String::new()
    } else {
        let atoms: Vec<String> = select.predicates.iter().map(|p| p.sql()).collect();
        format!(" WHERE {}", atoms.join(" AND "))
    }
}

fn plan_pass_through(select: &Select, schema: &Schema) -> Result<PlannedQuery> {
    let (projection, partial_schema) = match &select.projection {
        Projection::Star => ("*".to_string(), schema.clone()),
        Projection::Items(items) => {
            let mut parts = Vec::with_capacity(items.len());
            let mut columns = Vec::with_capacity(items.len());
            for item in items {
                let SelectItem::Column { name, alias } = item else {
                    return Err(MsfError::Internal(
                        "aggregate in pass-through plan".to_string(),
                    ));
                };
                let source = schema.column(name)?;
                parts.push(match alias {
                    Some(alias) => format!("{name} AS {alias}"),
                    None => name.clone(),
                });
                columns.push(ColumnDef {
                    name: item.output_name(),
                    ty: source.ty,
                    not_null: source.not_null,
                });
            }
            (parts.join(", "), Schema::new(columns)?)
        }
    };

    let map_sql = format!(
        "SELECT {projection} FROM {}{}",
        select.table,
        where_clause(select)
    );
    Ok(PlannedQuery {
        map_sql,
        reduce_sql: None,
        mode: AggregationMode::PassThrough,
        group_by: Vec::new(),
        output_schema: partial_schema.clone(),
        partial_schema,
        finalizers: Vec::new(),
    })
}

struct AggRewrite {
    map_parts: Vec<String>,
    reduce_parts: Vec<String>,
    partial_cols: Vec<ColumnDef>,
    output_col: ColumnDef,
    expr: OutputExpr,
}

fn rewrite_aggregate(
    position: usize,
    func: AggFunc,
    arg: &AggArg,
    alias: Option<&str>,
    schema: &Schema,
) -> Result<AggRewrite> {
    let arg_type = match arg {
        AggArg::Star => None,
        AggArg::Column(name) => Some(schema.column(name)?.ty),
    };
    if matches!(func, AggFunc::Sum | AggFunc::Avg) {
        let numeric = arg_type.is_some_and(|t| t.is_numeric());
        if !numeric {
            return Err(MsfError::Parse(format!(
                "{}({}) requires a numeric column",
                func.name().to_uppercase(),
                arg.safe_ident()
            )));
        }
    }
    let output_name = alias.map(str::to_string).unwrap_or_else(|| {
        format!("{}_{}", func.name(), arg.safe_ident())
    });
    let arg_sql = match arg {
        AggArg::Star => "*".to_string(),
        AggArg::Column(name) => name.clone(),
    };

    Ok(match func {
        AggFunc::Count => {
            let internal = format!("_c{position}");
            AggRewrite {
                map_parts: vec![format!("COUNT({arg_sql}) AS {internal}")],
                reduce_parts: vec![format!("SUM({internal}) AS {internal}")],
                partial_cols: vec![ColumnDef::required(&internal, ColumnType::BigInt)],
                output_col: ColumnDef::required(&output_name, ColumnType::BigInt),
                expr: OutputExpr::Carry { internal },
            }
        }
        AggFunc::Sum => {
            let internal = format!("_s{position}");
            let ty = func.result_type(arg_type);
            AggRewrite {
                map_parts: vec![format!("SUM({arg_sql}) AS {internal}")],
                reduce_parts: vec![format!("SUM({internal}) AS {internal}")],
                partial_cols: vec![ColumnDef::nullable(&internal, ty)],
                output_col: ColumnDef::nullable(&output_name, ty),
                expr: OutputExpr::Carry { internal },
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let internal = format!("_m{position}");
            let merge = func.name().to_uppercase();
            let ty = func.result_type(arg_type);
            AggRewrite {
                map_parts: vec![format!("{merge}({arg_sql}) AS {internal}")],
                reduce_parts: vec![format!("{merge}({internal}) AS {internal}")],
                partial_cols: vec![ColumnDef::nullable(&internal, ty)],
                output_col: ColumnDef::nullable(&output_name, ty),
                expr: OutputExpr::Carry { internal },
            }
        }
        AggFunc::Avg => {
            let sum_internal = format!("_sum{position}");
            let cnt_internal = format!("_cnt{position}");
            let sum_ty = AggFunc::Sum.result_type(arg_type);
            AggRewrite {
                map_parts: vec![
                    format!("SUM({arg_sql}) AS {sum_internal}"),
                    format!("COUNT({arg_sql}) AS {cnt_internal}"),
                ],
                reduce_parts: vec![
                    format!("SUM({sum_internal}) AS {sum_internal}"),
                    format!("SUM({cnt_internal}) AS {cnt_internal}"),
                ],
                partial_cols: vec![
                    ColumnDef::nullable(&sum_internal, sum_ty),
                    ColumnDef::required(&cnt_internal, ColumnType::BigInt),
                ],
                output_col: ColumnDef::nullable(&output_name, ColumnType::Double),
                expr: OutputExpr::AvgRatio {
                    sum: sum_internal,
                    cnt: cnt_internal,
                },
            }
        }
    })
}

fn plan_aggregate(select: &Select, schema: &Schema) -> Result<PlannedQuery> {
    let Projection::Items(items) = &select.projection else {
        return Err(MsfError::Internal(
            "star projection in aggregate plan".to_string(),
        ));
    };

    let mut map_parts = Vec::new();
    let mut reduce_parts = Vec::new();
    let mut partial_cols = Vec::new();
    for group_col in &select.group_by {
        let source = schema.column(group_col)?;
        map_parts.push(group_col.clone());
        reduce_parts.push(group_col.clone());
        partial_cols.push(source.clone());
    }

    let mut output_cols = Vec::with_capacity(items.len());
    let mut finalizers = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        match item {
            SelectItem::Column { name, .. } => {
                // Parser validation guarantees the column is a group key;
                // its value is carried through the partials by name.
                let source = schema.column(name)?;
                output_cols.push(ColumnDef {
                    name: item.output_name(),
                    ty: source.ty,
                    not_null: source.not_null,
                });
                finalizers.push(OutputColumn {
                    name: item.output_name(),
                    expr: OutputExpr::Carry {
                        internal: name.clone(),
                    },
                });
            }
            SelectItem::Aggregate { func, arg, alias } => {
                let rewrite = rewrite_aggregate(position, *func, arg, alias.as_deref(), schema)?;
                map_parts.extend(rewrite.map_parts);
                reduce_parts.extend(rewrite.reduce_parts);
                partial_cols.extend(rewrite.partial_cols);
                finalizers.push(OutputColumn {
                    name: rewrite.output_col.name.clone(),
                    expr: rewrite.expr,
                });
                output_cols.push(rewrite.output_col);
            }
        }
    }

    let group_suffix = if select.group_by.is_empty() {
        String::new()
    } else {
        format!(" GROUP BY {}", select.group_by.join(", "))
    };
    let map_sql = format!(
        "SELECT {} FROM {}{}{}",
        map_parts.join(", "),
        select.table,
        where_clause(select),
        group_suffix
    );
    let reduce_sql = format!(
        "SELECT {} FROM {REDUCE_RELATION}{}",
        reduce_parts.join(", "),
        group_suffix
    );

    let mode = if select.group_by.is_empty() {
        AggregationMode::Scalar
    } else {
        AggregationMode::Grouped
    };
    Ok(PlannedQuery {
        map_sql,
        reduce_sql: Some(reduce_sql),
        mode,
        group_by: select.group_by.clone(),
        partial_schema: Schema::new(partial_cols)?,
        output_schema: Schema::new(output_cols)?,
        finalizers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use msf_sql::parse_statement;
    use msf_sql::ast::Statement;

    fn events_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::required("event_id", ColumnType::Integer),
            ColumnDef::nullable("user_id", ColumnType::Integer),
            ColumnDef::nullable("event_type", ColumnType::Varchar),
            ColumnDef::nullable("value", ColumnType::Double),
            ColumnDef::nullable("event_time", ColumnType::Timestamp),
        ])
        .unwrap()
    }

    fn plan(sql: &str) -> PlannedQuery {
        let Statement::Select(select) = parse_statement(sql).expect("parses") else {
            panic!("expected select");
        };
        plan_select(&select, &events_schema()).expect("plans")
    }

    #[test]
    fn pass_through_pushes_where_into_map() {
        let plan = plan("SELECT event_id, value FROM events WHERE event_type = 'click' AND value > 1.0");
        assert_eq!(
            plan.map_sql,
            "SELECT event_id, value FROM events WHERE event_type = 'click' AND value > 1.0"
        );
        assert_eq!(plan.reduce_sql, None);
        assert_eq!(plan.mode, AggregationMode::PassThrough);
        assert!(plan.finalizers.is_empty());
        assert_eq!(plan.output_schema.names(), vec!["event_id", "value"]);
    }

    #[test]
    fn select_star_keeps_table_schema() {
        let plan = plan("SELECT * FROM events");
        assert_eq!(plan.map_sql, "SELECT * FROM events");
        assert_eq!(plan.partial_schema, events_schema());
    }

    #[test]
    fn scalar_aggregates_rewrite_by_position() {
        let plan = plan("SELECT COUNT(*) AS n, SUM(value) AS total_value FROM events");
        assert_eq!(
            plan.map_sql,
            "SELECT COUNT(*) AS _c0, SUM(value) AS _s1 FROM events"
        );
        assert_eq!(
            plan.reduce_sql.as_deref(),
            Some("SELECT SUM(_c0) AS _c0, SUM(_s1) AS _s1 FROM partials")
        );
        assert_eq!(plan.mode, AggregationMode::Scalar);
        assert_eq!(plan.partial_schema.names(), vec!["_c0", "_s1"]);
        assert_eq!(plan.output_schema.names(), vec!["n", "total_value"]);
        assert_eq!(
            plan.output_schema.columns[0].ty,
            ColumnType::BigInt
        );
        assert_eq!(plan.output_schema.columns[1].ty, ColumnType::Double);
    }

    #[test]
    fn avg_decomposes_into_sum_and_count() {
        let plan = plan(
            "SELECT event_type, COUNT(*) AS n, SUM(value) AS total, AVG(value) AS avg \
             FROM events WHERE user_id IS NOT NULL GROUP BY event_type",
        );
        assert_eq!(
            plan.map_sql,
            "SELECT event_type, COUNT(*) AS _c1, SUM(value) AS _s2, SUM(value) AS _sum3, \
             COUNT(value) AS _cnt3 FROM events WHERE user_id IS NOT NULL GROUP BY event_type"
        );
        assert_eq!(
            plan.reduce_sql.as_deref(),
            Some(
                "SELECT event_type, SUM(_c1) AS _c1, SUM(_s2) AS _s2, SUM(_sum3) AS _sum3, \
                 SUM(_cnt3) AS _cnt3 FROM partials GROUP BY event_type"
            )
        );
        assert_eq!(plan.mode, AggregationMode::Grouped);
        assert_eq!(plan.group_by, vec!["event_type"]);
        assert_eq!(
            plan.finalizers[3].expr,
            OutputExpr::AvgRatio {
                sum: "_sum3".to_string(),
                cnt: "_cnt3".to_string(),
            }
        );
        assert_eq!(plan.output_schema.names(), vec!["event_type", "n", "total", "avg"]);
    }

    #[test]
    fn grouped_without_aggregates_is_distinct_projection() {
        let plan = plan("SELECT event_type FROM events GROUP BY event_type");
        assert_eq!(
            plan.map_sql,
            "SELECT event_type FROM events GROUP BY event_type"
        );
        assert_eq!(
            plan.reduce_sql.as_deref(),
            Some("SELECT event_type FROM partials GROUP BY event_type")
        );
        assert_eq!(plan.mode, AggregationMode::Grouped);
    }

    #[test]
    fn sum_over_integers_widens_to_bigint() {
        let plan = plan("SELECT SUM(user_id) AS s FROM events");
        assert_eq!(plan.output_schema.columns[0].ty, ColumnType::BigInt);
    }

    #[test]
    fn unknown_column_is_not_found() {
        let Statement::Select(select) =
            parse_statement("SELECT missing FROM events").expect("parses")
        else {
            panic!("expected select");
        };
        let err = plan_select(&select, &events_schema()).unwrap_err();
        assert!(matches!(err, MsfError::NotFound(_)));
    }

    #[test]
    fn sum_of_varchar_is_rejected() {
        let Statement::Select(select) =
            parse_statement("SELECT SUM(event_type) AS s FROM events").expect("parses")
        else {
            panic!("expected select");
        };
        let err = plan_select(&select, &events_schema()).unwrap_err();
        assert!(matches!(err, MsfError::Parse(_)));
    }
}
