use sks_common::{Result, SksError};
use sqlparser::ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::bool_term::{BoolTerm, CompareOp};
use crate::expr::{ArithOp, FactorOp, FuncExpr, ValueExpr, ValueFactor};
use crate::stmt::{JoinRef, JoinSpec, JoinType, OrderByTerm, SelectStmt, TableRef};

// Aggregates recognized by the split into parallel/merge statements.
const AGGREGATE_FUNCS: [&str; 5] = ["AVG", "COUNT", "MAX", "MIN", "SUM"];

/// Parse one SELECT statement into a [`SelectStmt`].
///
/// Contract:
/// - exactly one statement must be present;
/// - only plain SELECT is supported (no set operations, CTEs, subqueries,
///   window functions, or DML);
/// - the parser's own error text (token + position) is preserved in
///   [`SksError::Parse`].
pub fn parse_select(sql: &str) -> Result<SelectStmt> {
    let dialect = GenericDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SksError::Parse(e.to_string()))?;
    if stmts.len() != 1 {
        return Err(SksError::Unsupported(
            "only single-statement SQL is supported".to_string(),
        ));
    }
    match &stmts[0] {
        ast::Statement::Query(q) => query_to_stmt(q),
        other => Err(SksError::Unsupported(format!(
            "only SELECT statements are supported, got: {other}"
        ))),
    }
}

fn query_to_stmt(q: &ast::Query) -> Result<SelectStmt> {
    if q.with.is_some() {
        return Err(SksError::Unsupported("WITH/CTEs are not supported".into()));
    }
    if q.offset.is_some() || q.fetch.is_some() || !q.limit_by.is_empty() || !q.locks.is_empty() {
        return Err(SksError::Unsupported(
            "OFFSET/FETCH/LIMIT BY/locking clauses are not supported".into(),
        ));
    }
    let select = match &*q.body {
        ast::SetExpr::Select(s) => s.as_ref(),
        _ => {
            return Err(SksError::Unsupported(
                "only simple SELECT is supported (no UNION/EXCEPT/INTERSECT)".into(),
            ));
        }
    };
    if select.top.is_some()
        || select.into.is_some()
        || select.prewhere.is_some()
        || select.qualify.is_some()
        || !select.lateral_views.is_empty()
        || !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
        || !select.named_window.is_empty()
    {
        return Err(SksError::Unsupported(
            "SELECT uses clauses outside the supported subset".into(),
        ));
    }
    let distinct = match &select.distinct {
        None => false,
        Some(ast::Distinct::Distinct) => true,
        Some(ast::Distinct::On(_)) => {
            return Err(SksError::Unsupported("DISTINCT ON is not supported".into()));
        }
    };

    let mut select_list = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        select_list.push(select_item_to_value(item)?);
    }

    let mut from = Vec::with_capacity(select.from.len());
    for twj in &select.from {
        from.push(table_with_joins_to_ref(twj)?);
    }

    let where_clause = select
        .selection
        .as_ref()
        .map(expr_to_bool)
        .transpose()?;

    let group_by = match &select.group_by {
        ast::GroupByExpr::Expressions(es, mods) if mods.is_empty() => {
            es.iter().map(expr_to_value).collect::<Result<Vec<_>>>()?
        }
        ast::GroupByExpr::Expressions(..) => {
            return Err(SksError::Unsupported(
                "GROUP BY modifiers are not supported".into(),
            ));
        }
        ast::GroupByExpr::All(_) => {
            return Err(SksError::Unsupported("GROUP BY ALL is not supported".into()));
        }
    };

    let having = select.having.as_ref().map(expr_to_bool).transpose()?;

    let mut order_by = Vec::new();
    if let Some(ob) = &q.order_by {
        if ob.interpolate.is_some() {
            return Err(SksError::Unsupported(
                "ORDER BY INTERPOLATE is not supported".into(),
            ));
        }
        for item in &ob.exprs {
            if item.nulls_first.is_some() || item.with_fill.is_some() {
                return Err(SksError::Unsupported(
                    "NULLS FIRST/LAST and WITH FILL are not supported".into(),
                ));
            }
            order_by.push(OrderByTerm {
                expr: expr_to_value(&item.expr)?,
                desc: item.asc.map(|asc| !asc),
            });
        }
    }

    let limit = match &q.limit {
        None => None,
        Some(ast::Expr::Value(ast::Value::Number(n, _))) => Some(n.parse::<u64>().map_err(
            |e| SksError::Analysis(format!("bad LIMIT literal '{n}': {e}")),
        )?),
        Some(other) => {
            return Err(SksError::Analysis(format!(
                "LIMIT must be an integer literal, got: {other}"
            )));
        }
    };

    Ok(SelectStmt {
        distinct,
        select_list,
        from,
        where_clause,
        group_by,
        having,
        order_by,
        limit,
    })
}

fn select_item_to_value(item: &ast::SelectItem) -> Result<ValueExpr> {
    match item {
        ast::SelectItem::UnnamedExpr(e) => expr_to_value(e),
        ast::SelectItem::ExprWithAlias { expr, alias } => {
            let mut v = expr_to_value(expr)?;
            v.alias = Some(alias.value.clone());
            Ok(v)
        }
        ast::SelectItem::Wildcard(_) => Ok(ValueExpr::from_factor(ValueFactor::Star(None))),
        ast::SelectItem::QualifiedWildcard(name, _) => Ok(ValueExpr::from_factor(
            ValueFactor::Star(Some(object_name_string(name))),
        )),
    }
}

fn table_with_joins_to_ref(twj: &ast::TableWithJoins) -> Result<TableRef> {
    let mut t = table_factor_to_ref(&twj.relation)?;
    for join in &twj.joins {
        let right = table_factor_to_ref(&join.relation)?;
        let (join_type, constraint) = match &join.join_operator {
            ast::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
            ast::JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
            ast::JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
            ast::JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
            ast::JoinOperator::CrossJoin => (JoinType::Cross, None),
            other => {
                return Err(SksError::Unsupported(format!(
                    "join operator not supported: {other:?}"
                )));
            }
        };
        let spec = match constraint {
            None | Some(ast::JoinConstraint::None) => None,
            Some(ast::JoinConstraint::On(e)) => Some(JoinSpec::On(expr_to_bool(e)?)),
            Some(ast::JoinConstraint::Using(cols)) => Some(JoinSpec::Using(
                cols.iter().map(|c| c.value.clone()).collect(),
            )),
            Some(ast::JoinConstraint::Natural) => {
                return Err(SksError::Unsupported("NATURAL JOIN is not supported".into()));
            }
        };
        t.joins.push(JoinRef {
            join_type,
            right,
            spec,
        });
    }
    Ok(t)
}

fn table_factor_to_ref(factor: &ast::TableFactor) -> Result<TableRef> {
    match factor {
        ast::TableFactor::Table { name, alias, .. } => {
            let parts: Vec<&str> = name.0.iter().map(|id| id.value.as_str()).collect();
            let (db, table) = match parts.as_slice() {
                [table] => (String::new(), (*table).to_string()),
                [db, table] => ((*db).to_string(), (*table).to_string()),
                _ => {
                    return Err(SksError::Unsupported(format!(
                        "table name has too many qualifiers: {name}"
                    )));
                }
            };
            let alias = match alias {
                None => String::new(),
                Some(a) if a.columns.is_empty() => a.name.value.clone(),
                Some(_) => {
                    return Err(SksError::Unsupported(
                        "table alias column lists are not supported".into(),
                    ));
                }
            };
            Ok(TableRef::new(db, table, alias))
        }
        other => Err(SksError::Unsupported(format!(
            "FROM item not supported: {other}"
        ))),
    }
}

fn expr_to_value(e: &ast::Expr) -> Result<ValueExpr> {
    if let ast::Expr::BinaryOp { left, op, right } = e {
        if let Some(arith) = arith_op(op) {
            let mut v = expr_to_value(left)?;
            v.ops.push(FactorOp {
                op: arith,
                factor: expr_to_factor(right)?,
            });
            return Ok(v);
        }
        return Err(SksError::Unsupported(format!(
            "operator in value position not supported: {op}"
        )));
    }
    Ok(ValueExpr::from_factor(expr_to_factor(e)?))
}

fn expr_to_factor(e: &ast::Expr) -> Result<ValueFactor> {
    match e {
        ast::Expr::Identifier(id) => Ok(ValueFactor::column("", "", &id.value)),
        ast::Expr::CompoundIdentifier(ids) => {
            let parts: Vec<&str> = ids.iter().map(|id| id.value.as_str()).collect();
            match parts.as_slice() {
                [table, column] => Ok(ValueFactor::column("", table, column)),
                [db, table, column] => Ok(ValueFactor::column(db, table, column)),
                _ => Err(SksError::Unsupported(format!(
                    "column reference has too many qualifiers: {e}"
                ))),
            }
        }
        ast::Expr::Function(f) => function_to_factor(f),
        ast::Expr::Value(v) => Ok(ValueFactor::Const(value_literal(v)?)),
        ast::Expr::Nested(inner) => Ok(ValueFactor::Expr(Box::new(expr_to_value(inner)?))),
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            ast::Expr::Value(ast::Value::Number(n, _)) => Ok(ValueFactor::Const(format!("-{n}"))),
            _ => Err(SksError::Unsupported(
                "unary minus is only supported on numeric literals".into(),
            )),
        },
        ast::Expr::BinaryOp { .. } => Ok(ValueFactor::Expr(Box::new(expr_to_value(e)?))),
        other => Err(SksError::Unsupported(format!(
            "expression not supported: {other}"
        ))),
    }
}

fn function_to_factor(f: &ast::Function) -> Result<ValueFactor> {
    if f.over.is_some() {
        return Err(SksError::Unsupported(
            "window functions are not supported".into(),
        ));
    }
    let name = object_name_string(&f.name);
    let args = match &f.args {
        ast::FunctionArguments::None => Vec::new(),
        ast::FunctionArguments::Subquery(_) => {
            return Err(SksError::Unsupported(
                "subquery function arguments are not supported".into(),
            ));
        }
        ast::FunctionArguments::List(list) => {
            if list.duplicate_treatment == Some(ast::DuplicateTreatment::Distinct) {
                return Err(SksError::Unsupported(
                    "DISTINCT aggregate arguments are not supported".into(),
                ));
            }
            let mut args = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                        args.push(expr_to_value(e)?);
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {
                        args.push(ValueExpr::from_factor(ValueFactor::Star(None)));
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::QualifiedWildcard(name)) => {
                        args.push(ValueExpr::from_factor(ValueFactor::Star(Some(
                            object_name_string(name),
                        ))));
                    }
                    ast::FunctionArg::Named { .. } => {
                        return Err(SksError::Unsupported(
                            "named function arguments are not supported".into(),
                        ));
                    }
                }
            }
            args
        }
    };
    let func = FuncExpr::new(name.clone(), args);
    if AGGREGATE_FUNCS.contains(&name.to_ascii_uppercase().as_str()) {
        Ok(ValueFactor::AggFunc(func))
    } else {
        Ok(ValueFactor::Func(func))
    }
}

fn expr_to_bool(e: &ast::Expr) -> Result<BoolTerm> {
    match e {
        ast::Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                let mut terms = expr_to_bool(left)?.into_conjuncts();
                terms.extend(expr_to_bool(right)?.into_conjuncts());
                Ok(BoolTerm::And(terms))
            }
            ast::BinaryOperator::Or => {
                let mut terms = match expr_to_bool(left)? {
                    BoolTerm::Or(ts) => ts,
                    t => vec![t],
                };
                match expr_to_bool(right)? {
                    BoolTerm::Or(ts) => terms.extend(ts),
                    t => terms.push(t),
                }
                Ok(BoolTerm::Or(terms))
            }
            _ => {
                if let Some(cmp) = compare_op(op) {
                    Ok(BoolTerm::Compare {
                        left: expr_to_value(left)?,
                        op: cmp,
                        right: expr_to_value(right)?,
                    })
                } else {
                    Err(SksError::Unsupported(format!(
                        "operator in boolean position not supported: {op}"
                    )))
                }
            }
        },
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Not,
            expr,
        } => Ok(BoolTerm::Not(Box::new(expr_to_bool(expr)?))),
        ast::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(BoolTerm::Between {
            expr: expr_to_value(expr)?,
            negated: *negated,
            low: expr_to_value(low)?,
            high: expr_to_value(high)?,
        }),
        ast::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(BoolTerm::InList {
            expr: expr_to_value(expr)?,
            negated: *negated,
            list: list.iter().map(expr_to_value).collect::<Result<Vec<_>>>()?,
        }),
        ast::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(BoolTerm::Like {
            expr: expr_to_value(expr)?,
            negated: *negated,
            pattern: expr_to_value(pattern)?,
        }),
        ast::Expr::IsNull(inner) => Ok(BoolTerm::IsNull {
            expr: expr_to_value(inner)?,
            negated: false,
        }),
        ast::Expr::IsNotNull(inner) => Ok(BoolTerm::IsNull {
            expr: expr_to_value(inner)?,
            negated: true,
        }),
        ast::Expr::Function(f) => match function_to_factor(f)? {
            ValueFactor::Func(fe) => Ok(BoolTerm::Func(fe)),
            _ => Err(SksError::Unsupported(
                "aggregate call in boolean position is not supported".into(),
            )),
        },
        ast::Expr::Nested(inner) => expr_to_bool(inner),
        other => Err(SksError::Unsupported(format!(
            "search condition not supported: {other}"
        ))),
    }
}

fn arith_op(op: &ast::BinaryOperator) -> Option<ArithOp> {
    match op {
        ast::BinaryOperator::Plus => Some(ArithOp::Plus),
        ast::BinaryOperator::Minus => Some(ArithOp::Minus),
        ast::BinaryOperator::Multiply => Some(ArithOp::Multiply),
        ast::BinaryOperator::Divide => Some(ArithOp::Divide),
        ast::BinaryOperator::Modulo => Some(ArithOp::Modulo),
        _ => None,
    }
}

fn compare_op(op: &ast::BinaryOperator) -> Option<CompareOp> {
    match op {
        ast::BinaryOperator::Eq => Some(CompareOp::Eq),
        ast::BinaryOperator::NotEq => Some(CompareOp::NotEq),
        ast::BinaryOperator::Lt => Some(CompareOp::Lt),
        ast::BinaryOperator::LtEq => Some(CompareOp::LtEq),
        ast::BinaryOperator::Gt => Some(CompareOp::Gt),
        ast::BinaryOperator::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

fn value_literal(v: &ast::Value) -> Result<String> {
    match v {
        ast::Value::Number(n, _) => Ok(n.clone()),
        ast::Value::SingleQuotedString(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        ast::Value::DoubleQuotedString(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        ast::Value::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        ast::Value::Null => Ok("NULL".to_string()),
        other => Err(SksError::Unsupported(format!(
            "literal not supported: {other}"
        ))),
    }
}

fn object_name_string(name: &ast::ObjectName) -> String {
    name.0
        .iter()
        .map(|id| id.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_round_trips_modulo_whitespace() {
        let cases = [
            "SELECT ra, decl FROM Object",
            "SELECT o.ra FROM LSST.Object AS o WHERE o.flux > 5",
            "SELECT COUNT(*) FROM Object GROUP BY chunkId",
            "SELECT a, b FROM T ORDER BY a DESC LIMIT 10",
            "SELECT * FROM Object INNER JOIN Source AS s ON Object.objectId = s.objectId",
        ];
        for sql in cases {
            let stmt = parse_select(sql).unwrap();
            assert_eq!(stmt.sql(), sql, "round trip for {sql}");
        }
    }

    #[test]
    fn restrictor_function_lands_in_where() {
        let stmt =
            parse_select("SELECT ra FROM Object WHERE qserv_areaspec_box(0, 0, 1, 1)").unwrap();
        match stmt.where_clause {
            Some(BoolTerm::Func(ref f)) => {
                assert_eq!(f.name, "qserv_areaspec_box");
                assert_eq!(f.args.len(), 4);
            }
            ref other => panic!("expected restrictor func, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_tagged_as_aggfunc() {
        let stmt = parse_select("SELECT AVG(flux) FROM Object").unwrap();
        assert!(stmt.has_aggregate());
        let stmt = parse_select("SELECT scisql_angSep(a, b, c, d) FROM Object").unwrap();
        assert!(!stmt.has_aggregate());
    }

    #[test]
    fn rejects_out_of_subset_sql() {
        assert!(matches!(
            parse_select("SELECT a FROM t UNION SELECT b FROM u"),
            Err(SksError::Unsupported(_))
        ));
        assert!(matches!(
            parse_select("INSERT INTO t VALUES (1)"),
            Err(SksError::Unsupported(_))
        ));
        assert!(matches!(parse_select("SELECT FROM WHERE"), Err(SksError::Parse(_))));
    }

    #[test]
    fn parse_error_preserves_parser_diagnostics() {
        let err = parse_select("SELECT a FROM").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("parse error:"), "got: {msg}");
        assert!(msg.contains("Expected") || msg.contains("expected"), "got: {msg}");
    }

    #[test]
    fn comma_separated_from_keeps_entries_apart() {
        let stmt = parse_select("SELECT o1.id, o2.id FROM Object o1, Object o2").unwrap();
        assert_eq!(stmt.from.len(), 2);
        assert_eq!(stmt.from[0].alias, "o1");
        assert_eq!(stmt.from[1].alias, "o2");
    }
}
