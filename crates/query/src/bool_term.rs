use std::fmt;

use crate::expr::{FuncExpr, ValueExpr};

/// Comparison operator in a boolean factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{s}")
    }
}

/// Boolean search-condition tree for WHERE/HAVING/ON clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolTerm {
    /// Conjunction of at least one term.
    And(Vec<BoolTerm>),
    /// Disjunction of at least one term.
    Or(Vec<BoolTerm>),
    /// Negated term.
    Not(Box<BoolTerm>),
    /// Binary comparison.
    Compare {
        left: ValueExpr,
        op: CompareOp,
        right: ValueExpr,
    },
    /// `expr [NOT] BETWEEN low AND high`.
    Between {
        expr: ValueExpr,
        negated: bool,
        low: ValueExpr,
        high: ValueExpr,
    },
    /// `expr [NOT] IN (list…)`.
    InList {
        expr: ValueExpr,
        negated: bool,
        list: Vec<ValueExpr>,
    },
    /// `expr [NOT] LIKE pattern`.
    Like {
        expr: ValueExpr,
        negated: bool,
        pattern: ValueExpr,
    },
    /// `expr IS [NOT] NULL`.
    IsNull { expr: ValueExpr, negated: bool },
    /// Boolean-valued function call. Spatial restrictor functions land here
    /// before the rewrite pipeline lifts them out.
    Func(FuncExpr),
}

impl BoolTerm {
    /// Apply `f` to every value expression in this term, in syntax order.
    pub fn for_each_value_expr_mut(&mut self, f: &mut dyn FnMut(&mut ValueExpr)) {
        match self {
            BoolTerm::And(terms) | BoolTerm::Or(terms) => {
                for t in terms {
                    t.for_each_value_expr_mut(f);
                }
            }
            BoolTerm::Not(t) => t.for_each_value_expr_mut(f),
            BoolTerm::Compare { left, right, .. } => {
                f(left);
                f(right);
            }
            BoolTerm::Between {
                expr, low, high, ..
            } => {
                f(expr);
                f(low);
                f(high);
            }
            BoolTerm::InList { expr, list, .. } => {
                f(expr);
                for e in list {
                    f(e);
                }
            }
            BoolTerm::Like { expr, pattern, .. } => {
                f(expr);
                f(pattern);
            }
            BoolTerm::IsNull { expr, .. } => f(expr),
            BoolTerm::Func(fe) => {
                for arg in &mut fe.args {
                    f(arg);
                }
            }
        }
    }

    /// Flatten this term into its top-level conjunction list. A non-AND term
    /// yields itself as the single conjunct.
    pub fn into_conjuncts(self) -> Vec<BoolTerm> {
        match self {
            BoolTerm::And(terms) => terms,
            other => vec![other],
        }
    }

    /// Rebuild a term from conjuncts; `None` when the list is empty.
    pub fn from_conjuncts(mut conjuncts: Vec<BoolTerm>) -> Option<BoolTerm> {
        match conjuncts.len() {
            0 => None,
            1 => Some(conjuncts.remove(0)),
            _ => Some(BoolTerm::And(conjuncts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ValueFactor;

    fn col(name: &str) -> ValueExpr {
        ValueExpr::from_factor(ValueFactor::column("", "", name))
    }

    #[test]
    fn conjunct_round_trip() {
        let t = BoolTerm::And(vec![
            BoolTerm::Compare {
                left: col("a"),
                op: CompareOp::Eq,
                right: col("b"),
            },
            BoolTerm::IsNull {
                expr: col("c"),
                negated: false,
            },
        ]);
        let parts = t.clone().into_conjuncts();
        assert_eq!(parts.len(), 2);
        assert_eq!(BoolTerm::from_conjuncts(parts), Some(t));
        assert_eq!(BoolTerm::from_conjuncts(Vec::new()), None);
    }
}
