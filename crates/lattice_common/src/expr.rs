//! Filter expressions evaluated over in-scope row columns.
//!
//! This is the predicate surface of lookup filters and update conditions;
//! there is no parser here, expressions arrive pre-built in requests.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operator between a column and a literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A filter expression tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Always-true leaf, the empty filter.
    True,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

/// Column resolution scope for evaluation.
pub trait ExprContext {
    fn column(&self, name: &str) -> Option<Value>;
}

impl ExprContext for Vec<(String, Value)> {
    fn column(&self, name: &str) -> Option<Value> {
        self.iter()
            .find(|(col, _)| col == name)
            .map(|(_, v)| v.clone())
    }
}

impl Expr {
    /// Evaluate against a context. Missing columns and cross-type
    /// comparisons evaluate to false, never to an error.
    pub fn matches(&self, ctx: &dyn ExprContext) -> bool {
        match self {
            Expr::True => true,
            Expr::Compare { column, op, value } => {
                let Some(actual) = ctx.column(column) else {
                    return false;
                };
                match *op {
                    CompareOp::Eq => actual == *value,
                    CompareOp::Ne => !actual.is_null() && !value.is_null() && actual != *value,
                    CompareOp::Lt => cmp_is(&actual, value, Ordering::is_lt),
                    CompareOp::Le => cmp_is(&actual, value, Ordering::is_le),
                    CompareOp::Gt => cmp_is(&actual, value, Ordering::is_gt),
                    CompareOp::Ge => cmp_is(&actual, value, Ordering::is_ge),
                }
            }
            Expr::In { column, values } => ctx
                .column(column)
                .map(|actual| values.iter().any(|v| *v == actual))
                .unwrap_or(false),
            Expr::And(children) => children.iter().all(|e| e.matches(ctx)),
            Expr::Or(children) => children.iter().any(|e| e.matches(ctx)),
            Expr::Not(child) => !child.matches(ctx),
        }
    }

    /// Column names referenced anywhere in the tree.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out.dedup();
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::True => {}
            Expr::Compare { column, .. } | Expr::In { column, .. } => {
                if !out.contains(column) {
                    out.push(column.clone());
                }
            }
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Expr::Not(child) => child.collect_columns(out),
        }
    }

    /// Convenience constructor for a column/literal comparison.
    pub fn cmp(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Expr::Compare {
            column: column.into(),
            op,
            value,
        }
    }
}

fn cmp_is(a: &Value, b: &Value, pred: fn(Ordering) -> bool) -> bool {
    a.partial_cmp_same_kind(b).map(pred).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Vec<(String, Value)> {
        vec![
            ("c1".to_string(), Value::Int(5)),
            ("name".to_string(), Value::Str("ada".into())),
        ]
    }

    #[test]
    fn compare_and_logic() {
        let e = Expr::And(vec![
            Expr::cmp("c1", CompareOp::Gt, Value::Int(1)),
            Expr::cmp("name", CompareOp::Eq, Value::Str("ada".into())),
        ]);
        assert!(e.matches(&ctx()));

        let e = Expr::Or(vec![
            Expr::cmp("c1", CompareOp::Lt, Value::Int(1)),
            Expr::Not(Box::new(Expr::True)),
        ]);
        assert!(!e.matches(&ctx()));
    }

    #[test]
    fn missing_columns_and_type_mismatch_are_false() {
        assert!(!Expr::cmp("absent", CompareOp::Eq, Value::Int(1)).matches(&ctx()));
        assert!(!Expr::cmp("c1", CompareOp::Gt, Value::Str("5".into())).matches(&ctx()));
    }

    #[test]
    fn referenced_columns_dedup() {
        let e = Expr::And(vec![
            Expr::cmp("c1", CompareOp::Gt, Value::Int(1)),
            Expr::cmp("c1", CompareOp::Lt, Value::Int(9)),
            Expr::In {
                column: "c2".into(),
                values: vec![Value::Int(1)],
            },
        ]);
        assert_eq!(e.referenced_columns(), vec!["c1".to_string(), "c2".to_string()]);
    }
}
