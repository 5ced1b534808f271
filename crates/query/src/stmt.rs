use std::fmt;

use crate::bool_term::BoolTerm;
use crate::expr::{ValueExpr, ValueFactor};
use crate::template::{QueryTemplate, SqlWriter};

/// Join syntax kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT OUTER JOIN",
            JoinType::Right => "RIGHT OUTER JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        };
        write!(f, "{s}")
    }
}

/// Join condition: `ON <search condition>` or `USING (col, …)`.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinSpec {
    On(BoolTerm),
    Using(Vec<String>),
}

/// One explicit join hanging off a table reference.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRef {
    pub join_type: JoinType,
    pub right: TableRef,
    pub spec: Option<JoinSpec>,
}

/// One FROM-list entry: a (possibly aliased) table and its explicit joins.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Database qualifier; empty until the rewrite pipeline fills in the
    /// session default.
    pub db: String,
    /// Table name.
    pub table: String,
    /// Alias; empty until the rewrite pipeline installs one.
    pub alias: String,
    /// Explicit joins whose left side is this reference.
    pub joins: Vec<JoinRef>,
}

impl TableRef {
    /// Build a plain reference with no joins.
    pub fn new(db: impl Into<String>, table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            alias: alias.into(),
            joins: Vec::new(),
        }
    }
}

/// One ORDER BY element.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByTerm {
    pub expr: ValueExpr,
    /// `Some(false)` renders `ASC`, `Some(true)` renders `DESC`, `None`
    /// renders nothing.
    pub desc: Option<bool>,
}

/// Writes the table-name portion of one FROM reference. The default writer
/// emits `db.table`/`table`; chunk rewriting substitutes template holes.
pub type TableNameWriter<'a> = dyn Fn(&TableRef, &mut SqlWriter) + 'a;

/// An owned SELECT statement tree.
///
/// Mutation is reserved to the rewrite pipeline; everything else treats a
/// statement as a value with deep [`Clone`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStmt {
    pub distinct: bool,
    pub select_list: Vec<ValueExpr>,
    pub from: Vec<TableRef>,
    pub where_clause: Option<BoolTerm>,
    pub group_by: Vec<ValueExpr>,
    pub having: Option<BoolTerm>,
    pub order_by: Vec<OrderByTerm>,
    pub limit: Option<u64>,
}

impl SelectStmt {
    /// Copy the projection and post-aggregation modifiers, discarding
    /// FROM and WHERE. This is the seed of the merge statement: it runs on
    /// the master against the merge table holding all worker rows.
    pub fn copy_merge(&self) -> SelectStmt {
        SelectStmt {
            distinct: self.distinct,
            select_list: self.select_list.clone(),
            from: Vec::new(),
            where_clause: None,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        }
    }

    /// Returns whether the select list carries any aggregate call.
    pub fn has_aggregate(&self) -> bool {
        self.select_list.iter().any(|e| e.has_aggregate())
    }

    /// Iterate all table references in FROM, including join right sides,
    /// in syntax order.
    pub fn all_table_refs(&self) -> Vec<&TableRef> {
        fn walk<'a>(t: &'a TableRef, out: &mut Vec<&'a TableRef>) {
            out.push(t);
            for j in &t.joins {
                walk(&j.right, out);
            }
        }
        let mut out = Vec::new();
        for t in &self.from {
            walk(t, &mut out);
        }
        out
    }

    /// Apply `f` to every table reference in FROM, including join right
    /// sides, in syntax order.
    pub fn for_each_table_ref_mut(&mut self, f: &mut dyn FnMut(&mut TableRef)) {
        fn walk(t: &mut TableRef, f: &mut dyn FnMut(&mut TableRef)) {
            f(t);
            for j in &mut t.joins {
                walk(&mut j.right, f);
            }
        }
        for t in &mut self.from {
            walk(t, f);
        }
    }

    /// Apply `f` to every value expression the alias rewrite may touch:
    /// the select list, WHERE, GROUP BY, HAVING, ORDER BY, and the ON
    /// clause of every join. USING clauses hold unqualified column names
    /// and are never visited.
    pub fn for_each_value_expr_mut(&mut self, f: &mut dyn FnMut(&mut ValueExpr)) {
        for e in &mut self.select_list {
            f(e);
        }
        if let Some(w) = &mut self.where_clause {
            w.for_each_value_expr_mut(f);
        }
        for e in &mut self.group_by {
            f(e);
        }
        if let Some(h) = &mut self.having {
            h.for_each_value_expr_mut(f);
        }
        for o in &mut self.order_by {
            f(&mut o.expr);
        }
        fn visit_joins(t: &mut TableRef, f: &mut dyn FnMut(&mut ValueExpr)) {
            for j in &mut t.joins {
                if let Some(JoinSpec::On(term)) = &mut j.spec {
                    term.for_each_value_expr_mut(f);
                }
                visit_joins(&mut j.right, f);
            }
        }
        for t in &mut self.from {
            visit_joins(t, f);
        }
    }

    /// Render to a template, delegating FROM table names to `table_name`.
    pub fn template_with(&self, table_name: &TableNameWriter<'_>) -> QueryTemplate {
        let mut w = SqlWriter::new();
        self.write(&mut w, table_name);
        w.finish()
    }

    /// Render to a template with plain `db.table` names.
    pub fn template(&self) -> QueryTemplate {
        self.template_with(&default_table_name)
    }

    /// Render to plain SQL text with `db.table` names.
    pub fn sql(&self) -> String {
        self.template().to_string()
    }

    fn write(&self, w: &mut SqlWriter, table_name: &TableNameWriter<'_>) {
        w.push_str("SELECT ");
        if self.distinct {
            w.push_str("DISTINCT ");
        }
        for (i, e) in self.select_list.iter().enumerate() {
            if i > 0 {
                w.push_str(", ");
            }
            w.push_str(&render_select_item(e));
        }
        if !self.from.is_empty() {
            w.push_str(" FROM ");
            for (i, t) in self.from.iter().enumerate() {
                if i > 0 {
                    w.push_str(", ");
                }
                write_table_ref(t, w, table_name);
            }
        }
        if let Some(term) = &self.where_clause {
            w.push_str(" WHERE ");
            w.push_str(&render_bool_term(term));
        }
        if !self.group_by.is_empty() {
            w.push_str(" GROUP BY ");
            for (i, e) in self.group_by.iter().enumerate() {
                if i > 0 {
                    w.push_str(", ");
                }
                w.push_str(&render_value_expr(e));
            }
        }
        if let Some(term) = &self.having {
            w.push_str(" HAVING ");
            w.push_str(&render_bool_term(term));
        }
        if !self.order_by.is_empty() {
            w.push_str(" ORDER BY ");
            for (i, o) in self.order_by.iter().enumerate() {
                if i > 0 {
                    w.push_str(", ");
                }
                w.push_str(&render_value_expr(&o.expr));
                match o.desc {
                    Some(true) => w.push_str(" DESC"),
                    Some(false) => w.push_str(" ASC"),
                    None => {}
                }
            }
        }
        if let Some(n) = self.limit {
            w.push_str(&format!(" LIMIT {n}"));
        }
    }
}

/// Default FROM-name writer: `db.table` (or bare `table`).
pub fn default_table_name(t: &TableRef, w: &mut SqlWriter) {
    if !t.db.is_empty() {
        w.push_str(&t.db);
        w.push_str(".");
    }
    w.push_str(&t.table);
}

fn write_table_ref(t: &TableRef, w: &mut SqlWriter, table_name: &TableNameWriter<'_>) {
    table_name(t, w);
    if !t.alias.is_empty() {
        w.push_str(" AS ");
        w.push_str(&t.alias);
    }
    for j in &t.joins {
        w.push_str(&format!(" {} ", j.join_type));
        write_table_ref(&j.right, w, table_name);
        match &j.spec {
            Some(JoinSpec::On(term)) => {
                w.push_str(" ON ");
                w.push_str(&render_bool_term(term));
            }
            Some(JoinSpec::Using(cols)) => {
                w.push_str(" USING (");
                w.push_str(&cols.join(", "));
                w.push_str(")");
            }
            None => {}
        }
    }
}

fn render_select_item(e: &ValueExpr) -> String {
    let mut s = render_value_expr(e);
    if let Some(alias) = &e.alias {
        s.push_str(" AS ");
        s.push_str(alias);
    }
    s
}

fn render_value_expr(e: &ValueExpr) -> String {
    let mut s = render_factor(&e.factor);
    for fo in &e.ops {
        s.push_str(&format!(" {} {}", fo.op, render_factor(&fo.factor)));
    }
    s
}

fn render_factor(f: &ValueFactor) -> String {
    match f {
        ValueFactor::ColumnRef(c) => c.to_string(),
        ValueFactor::Star(None) => "*".to_string(),
        ValueFactor::Star(Some(q)) => format!("{q}.*"),
        ValueFactor::Func(fe) | ValueFactor::AggFunc(fe) => {
            let args = fe
                .args
                .iter()
                .map(render_value_expr)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({})", fe.name, args)
        }
        ValueFactor::Const(c) => c.clone(),
        ValueFactor::Expr(inner) => format!("({})", render_value_expr(inner)),
    }
}

fn render_bool_term(t: &BoolTerm) -> String {
    match t {
        BoolTerm::And(terms) => terms
            .iter()
            .map(|t| maybe_paren(t, render_bool_term(t)))
            .collect::<Vec<_>>()
            .join(" AND "),
        BoolTerm::Or(terms) => terms
            .iter()
            .map(|t| maybe_paren(t, render_bool_term(t)))
            .collect::<Vec<_>>()
            .join(" OR "),
        BoolTerm::Not(inner) => format!("NOT ({})", render_bool_term(inner)),
        BoolTerm::Compare { left, op, right } => {
            format!("{} {} {}", render_value_expr(left), op, render_value_expr(right))
        }
        BoolTerm::Between {
            expr,
            negated,
            low,
            high,
        } => format!(
            "{}{} BETWEEN {} AND {}",
            render_value_expr(expr),
            if *negated { " NOT" } else { "" },
            render_value_expr(low),
            render_value_expr(high)
        ),
        BoolTerm::InList {
            expr,
            negated,
            list,
        } => format!(
            "{}{} IN ({})",
            render_value_expr(expr),
            if *negated { " NOT" } else { "" },
            list.iter()
                .map(render_value_expr)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        BoolTerm::Like {
            expr,
            negated,
            pattern,
        } => format!(
            "{}{} LIKE {}",
            render_value_expr(expr),
            if *negated { " NOT" } else { "" },
            render_value_expr(pattern)
        ),
        BoolTerm::IsNull { expr, negated } => format!(
            "{} IS{} NULL",
            render_value_expr(expr),
            if *negated { " NOT" } else { "" }
        ),
        BoolTerm::Func(fe) => {
            let args = fe
                .args
                .iter()
                .map(render_value_expr)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({})", fe.name, args)
        }
    }
}

// OR under AND (and vice versa) needs parentheses to preserve precedence.
fn maybe_paren(t: &BoolTerm, s: String) -> String {
    match t {
        BoolTerm::And(_) | BoolTerm::Or(_) => format!("({s})"),
        _ => s,
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_value_expr(self))
    }
}

impl fmt::Display for ValueFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_factor(self))
    }
}

impl fmt::Display for BoolTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render_bool_term(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{FuncExpr, ValueFactor};
    use crate::template::TemplateEntry;

    fn col(table: &str, name: &str) -> ValueExpr {
        ValueExpr::from_factor(ValueFactor::column("", table, name))
    }

    fn object_query() -> SelectStmt {
        SelectStmt {
            select_list: vec![col("", "ra"), col("", "decl")],
            from: vec![TableRef::new("", "Object", "")],
            ..Default::default()
        }
    }

    #[test]
    fn renders_plain_select() {
        assert_eq!(object_query().sql(), "SELECT ra, decl FROM Object");
    }

    #[test]
    fn renders_join_with_on() {
        let mut stmt = object_query();
        stmt.from[0].joins.push(JoinRef {
            join_type: JoinType::Inner,
            right: TableRef::new("", "Source", "s"),
            spec: Some(JoinSpec::On(BoolTerm::Compare {
                left: col("Object", "objectId"),
                op: crate::bool_term::CompareOp::Eq,
                right: col("s", "objectId"),
            })),
        });
        assert_eq!(
            stmt.sql(),
            "SELECT ra, decl FROM Object INNER JOIN Source AS s \
             ON Object.objectId = s.objectId"
        );
    }

    #[test]
    fn copy_merge_keeps_projection_and_modifiers() {
        let mut stmt = object_query();
        stmt.group_by = vec![col("", "ra")];
        stmt.limit = Some(5);
        let merge = stmt.copy_merge();
        assert!(merge.from.is_empty());
        assert!(merge.where_clause.is_none());
        assert_eq!(merge.group_by.len(), 1);
        assert_eq!(merge.limit, Some(5));
        assert_eq!(merge.sql(), "SELECT ra, decl GROUP BY ra LIMIT 5");
    }

    #[test]
    fn template_substitutes_table_names() {
        let stmt = object_query();
        let t = stmt.template_with(&|tref, w| {
            w.push_str(&tref.table);
            w.push_str("_");
            w.push_entry(TemplateEntry::Chunk);
        });
        assert_eq!(t.to_string(), "SELECT ra, decl FROM Object_%CC%");
        assert_eq!(
            t.render("LSST", 1234, None).unwrap(),
            "SELECT ra, decl FROM Object_1234"
        );
    }

    #[test]
    fn aggregate_select_renders_expressions() {
        let stmt = SelectStmt {
            select_list: vec![ValueExpr::aliased(
                ValueFactor::AggFunc(FuncExpr::new("AVG", vec![col("", "flux")])),
                "_avg",
            )],
            from: vec![TableRef::new("", "Object", "")],
            ..Default::default()
        };
        assert_eq!(stmt.sql(), "SELECT AVG(flux) AS _avg FROM Object");
    }
}
