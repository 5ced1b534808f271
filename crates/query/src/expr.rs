use std::fmt;

use crate::column_ref::ColumnRef;

/// Arithmetic operator joining factors inside one [`ValueExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
            ArithOp::Modulo => "%",
        };
        write!(f, "{s}")
    }
}

/// A function call; aggregate-ness is tracked by the enclosing
/// [`ValueFactor`] variant.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncExpr {
    /// Function name as written (case preserved).
    pub name: String,
    /// Argument expressions, in order.
    pub args: Vec<ValueExpr>,
}

impl FuncExpr {
    pub fn new(name: impl Into<String>, args: Vec<ValueExpr>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// One multiplicative/additive factor of a [`ValueExpr`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueFactor {
    /// A (possibly qualified) column reference.
    ColumnRef(ColumnRef),
    /// `*`, optionally qualified (`t.*`, or `db.t.*` which is passed through
    /// unrewritten).
    Star(Option<String>),
    /// Scalar function call.
    Func(FuncExpr),
    /// Aggregate function call (`AVG`, `COUNT`, `MAX`, `MIN`, `SUM`).
    AggFunc(FuncExpr),
    /// Literal constant, rendered verbatim.
    Const(String),
    /// Parenthesized subexpression.
    Expr(Box<ValueExpr>),
}

impl ValueFactor {
    /// Shorthand for a bare column factor.
    pub fn column(db: &str, table: &str, column: &str) -> Self {
        ValueFactor::ColumnRef(ColumnRef::new(db, table, column))
    }
}

/// A trailing `<op> <factor>` pair of a [`ValueExpr`].
#[derive(Debug, Clone, PartialEq)]
pub struct FactorOp {
    pub op: ArithOp,
    pub factor: ValueFactor,
}

/// One value expression: a head factor, optional trailing operator/factor
/// pairs, and an optional output alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueExpr {
    pub factor: ValueFactor,
    pub ops: Vec<FactorOp>,
    /// `AS <alias>` on select-list items.
    pub alias: Option<String>,
}

impl ValueExpr {
    /// Wrap a single factor with no alias.
    pub fn from_factor(factor: ValueFactor) -> Self {
        Self {
            factor,
            ops: Vec::new(),
            alias: None,
        }
    }

    /// Wrap a single factor with an alias.
    pub fn aliased(factor: ValueFactor, alias: impl Into<String>) -> Self {
        Self {
            factor,
            ops: Vec::new(),
            alias: Some(alias.into()),
        }
    }

    /// Iterate every factor of this expression, including the heads of
    /// trailing operator pairs (not recursing into functions).
    pub fn factors(&self) -> impl Iterator<Item = &ValueFactor> {
        std::iter::once(&self.factor).chain(self.ops.iter().map(|fo| &fo.factor))
    }

    fn factors_mut(&mut self) -> impl Iterator<Item = &mut ValueFactor> {
        std::iter::once(&mut self.factor).chain(self.ops.iter_mut().map(|fo| &mut fo.factor))
    }

    /// Apply `f` to every factor in this expression, recursing into function
    /// arguments and parenthesized subexpressions.
    pub fn for_each_factor_mut(&mut self, f: &mut dyn FnMut(&mut ValueFactor)) {
        for factor in self.factors_mut() {
            f(factor);
            match factor {
                ValueFactor::Func(fe) | ValueFactor::AggFunc(fe) => {
                    for arg in &mut fe.args {
                        arg.for_each_factor_mut(f);
                    }
                }
                ValueFactor::Expr(inner) => inner.for_each_factor_mut(f),
                _ => {}
            }
        }
    }

    /// Returns whether any factor (at any depth) is an aggregate call.
    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        // for_each_factor_mut needs &mut; use a clone-free recursive scan.
        fn scan(e: &ValueExpr, found: &mut bool) {
            for factor in e.factors() {
                match factor {
                    ValueFactor::AggFunc(_) => *found = true,
                    ValueFactor::Func(fe) => {
                        for arg in &fe.args {
                            scan(arg, found);
                        }
                    }
                    ValueFactor::Expr(inner) => scan(inner, found),
                    _ => {}
                }
            }
        }
        scan(self, &mut found);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_detection_recurses() {
        let avg = ValueExpr::from_factor(ValueFactor::AggFunc(FuncExpr::new(
            "AVG",
            vec![ValueExpr::from_factor(ValueFactor::column("", "", "flux"))],
        )));
        assert!(avg.has_aggregate());

        let nested = ValueExpr::from_factor(ValueFactor::Func(FuncExpr::new("ABS", vec![avg])));
        assert!(nested.has_aggregate());

        let plain = ValueExpr::from_factor(ValueFactor::column("", "", "ra"));
        assert!(!plain.has_aggregate());
    }

    #[test]
    fn factor_visitor_reaches_function_args() {
        let mut e = ValueExpr::from_factor(ValueFactor::Func(FuncExpr::new(
            "scisql_angSep",
            vec![
                ValueExpr::from_factor(ValueFactor::column("", "o1", "ra")),
                ValueExpr::from_factor(ValueFactor::column("", "o2", "ra")),
            ],
        )));
        let mut seen = 0;
        e.for_each_factor_mut(&mut |f| {
            if matches!(f, ValueFactor::ColumnRef(_)) {
                seen += 1;
            }
        });
        assert_eq!(seen, 2);
    }
}
