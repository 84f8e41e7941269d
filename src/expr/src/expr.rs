// Copyright 2026 EmberDB Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use emberdb_common::row::Row;
use emberdb_common::types::{
    cast_datum, checked_add, checked_div, checked_mul, checked_sub, ops, DataType, Datum,
    ScalarImpl,
};
use emberdb_common::{EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::predicate::HashRangeExpression;

/// Which side of an (outer, inner) row pair a column reference reads.
/// Single-table expressions always read the outer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TupleSide {
    Outer,
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// NULL-safe equality: `a IS NOT DISTINCT FROM b`.
    NotDistinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConjunctionOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArithmeticOp {
    Plus,
    Minus,
    Multiply,
    Divide,
}

/// A compiled scalar expression over an (outer, inner) row pair. The tree is
/// plain data driven by one interpreter, so the same expression can serve
/// scan predicates, join predicates, group-by keys and stream predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "TYPE", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Expression {
    ValueConstant {
        value: Datum,
    },
    /// A placeholder resolved from the fragment parameter array by
    /// [`Expression::bind_params`] before execution.
    ValueParameter {
        index: usize,
    },
    ColumnRef {
        side: TupleSide,
        column: usize,
    },
    Comparison {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conjunction {
        op: ConjunctionOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        child: Box<Expression>,
    },
    IsNull {
        child: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Cast {
        target: DataType,
        child: Box<Expression>,
    },
    /// Partition-hash eligibility over half-open hash ranges; the predicate
    /// form used by elastic index builds.
    HashRange(HashRangeExpression),
}

/// True iff the datum is boolean true. NULL and false both fail predicates.
pub fn datum_is_true(datum: &Datum) -> bool {
    matches!(datum, Some(ScalarImpl::Bool(true)))
}

impl Expression {
    pub fn constant(value: Datum) -> Self {
        Expression::ValueConstant { value }
    }

    pub fn column(column: usize) -> Self {
        Expression::ColumnRef {
            side: TupleSide::Outer,
            column,
        }
    }

    pub fn inner_column(column: usize) -> Self {
        Expression::ColumnRef {
            side: TupleSide::Inner,
            column,
        }
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::Conjunction {
            op: ConjunctionOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Replace every parameter placeholder with its value. Done once per
    /// fragment execution so the hot eval loop never sees the param array.
    pub fn bind_params(&self, params: &[Datum]) -> Result<Expression> {
        Ok(match self {
            Expression::ValueParameter { index } => {
                let value = params.get(*index).cloned().ok_or_else(|| {
                    EngineError::plan_invalid(format!("parameter index {index} out of range"))
                })?;
                Expression::ValueConstant { value }
            }
            Expression::Comparison { op, left, right } => Expression::Comparison {
                op: *op,
                left: Box::new(left.bind_params(params)?),
                right: Box::new(right.bind_params(params)?),
            },
            Expression::Conjunction { op, left, right } => Expression::Conjunction {
                op: *op,
                left: Box::new(left.bind_params(params)?),
                right: Box::new(right.bind_params(params)?),
            },
            Expression::Not { child } => Expression::Not {
                child: Box::new(child.bind_params(params)?),
            },
            Expression::IsNull { child } => Expression::IsNull {
                child: Box::new(child.bind_params(params)?),
            },
            Expression::Arithmetic { op, left, right } => Expression::Arithmetic {
                op: *op,
                left: Box::new(left.bind_params(params)?),
                right: Box::new(right.bind_params(params)?),
            },
            Expression::Cast { target, child } => Expression::Cast {
                target: *target,
                child: Box::new(child.bind_params(params)?),
            },
            other => other.clone(),
        })
    }

    /// Evaluate over a single row.
    pub fn eval_row(&self, row: &dyn Row) -> Result<Datum> {
        self.eval(row, &emberdb_common::row::EMPTY_ROW)
    }

    /// Evaluate over an (outer, inner) row pair.
    pub fn eval(&self, outer: &dyn Row, inner: &dyn Row) -> Result<Datum> {
        match self {
            Expression::ValueConstant { value } => Ok(value.clone()),
            Expression::ValueParameter { index } => Err(EngineError::plan_invalid(format!(
                "unbound parameter {index} at evaluation time"
            ))),
            Expression::ColumnRef { side, column } => Ok(match side {
                TupleSide::Outer => outer.datum_at(*column),
                TupleSide::Inner => inner.datum_at(*column),
            }),
            Expression::Comparison { op, left, right } => {
                let l = left.eval(outer, inner)?;
                let r = right.eval(outer, inner)?;
                eval_comparison(*op, &l, &r)
            }
            Expression::Conjunction { op, left, right } => {
                let l = left.eval(outer, inner)?;
                let r = right.eval(outer, inner)?;
                Ok(eval_conjunction(*op, &l, &r))
            }
            Expression::Not { child } => {
                let v = child.eval(outer, inner)?;
                Ok(match v {
                    Some(ScalarImpl::Bool(b)) => Some(ScalarImpl::Bool(!b)),
                    _ => None,
                })
            }
            Expression::IsNull { child } => {
                let v = child.eval(outer, inner)?;
                Ok(Some(ScalarImpl::Bool(v.is_none())))
            }
            Expression::Arithmetic { op, left, right } => {
                let l = left.eval(outer, inner)?;
                let r = right.eval(outer, inner)?;
                let (l, r) = match (l, r) {
                    (Some(l), Some(r)) => (l, r),
                    _ => return Ok(None),
                };
                Ok(Some(match op {
                    ArithmeticOp::Plus => checked_add(&l, &r)?,
                    ArithmeticOp::Minus => checked_sub(&l, &r)?,
                    ArithmeticOp::Multiply => checked_mul(&l, &r)?,
                    ArithmeticOp::Divide => checked_div(&l, &r)?,
                }))
            }
            Expression::Cast { target, child } => {
                let v = child.eval(outer, inner)?;
                cast_datum(&v, *target)
            }
            Expression::HashRange(range) => {
                Ok(Some(ScalarImpl::Bool(range.accepts_row(outer))))
            }
        }
    }
}

fn eval_comparison(op: CompareOp, l: &Datum, r: &Datum) -> Result<Datum> {
    use std::cmp::Ordering::*;
    if op == CompareOp::NotDistinct {
        let equal = match (l, r) {
            (None, None) => true,
            (Some(_), None) | (None, Some(_)) => false,
            _ => ops::compare_datums(l, r)? == Some(Equal),
        };
        return Ok(Some(ScalarImpl::Bool(equal)));
    }
    let ordering = match ops::compare_datums(l, r)? {
        Some(ord) => ord,
        // Comparing a NULL yields NULL.
        None => return Ok(None),
    };
    let result = match op {
        CompareOp::Equal => ordering == Equal,
        CompareOp::NotEqual => ordering != Equal,
        CompareOp::LessThan => ordering == Less,
        CompareOp::LessThanOrEqual => ordering != Greater,
        CompareOp::GreaterThan => ordering == Greater,
        CompareOp::GreaterThanOrEqual => ordering != Less,
        CompareOp::NotDistinct => unreachable!(),
    };
    Ok(Some(ScalarImpl::Bool(result)))
}

fn eval_conjunction(op: ConjunctionOp, l: &Datum, r: &Datum) -> Datum {
    let (l, r) = (
        l.as_ref().and_then(|v| v.as_bool().copied()),
        r.as_ref().and_then(|v| v.as_bool().copied()),
    );
    let out = match op {
        ConjunctionOp::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        ConjunctionOp::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    out.map(ScalarImpl::Bool)
}

#[cfg(test)]
mod tests {
    use emberdb_common::row::OwnedRow;

    use super::*;

    fn row(values: Vec<i32>) -> OwnedRow {
        OwnedRow::new(values.into_iter().map(|v| Some(ScalarImpl::Int32(v))).collect())
    }

    #[test]
    fn comparison_propagates_null() {
        let expr = Expression::compare(
            CompareOp::Equal,
            Expression::column(0),
            Expression::constant(None),
        );
        let out = expr.eval_row(&row(vec![1])).unwrap();
        assert_eq!(out, None);
        assert!(!datum_is_true(&out));
    }

    #[test]
    fn not_distinct_matches_nulls() {
        let expr = Expression::compare(
            CompareOp::NotDistinct,
            Expression::constant(None),
            Expression::constant(None),
        );
        assert_eq!(
            expr.eval_row(&row(vec![])).unwrap(),
            Some(ScalarImpl::Bool(true))
        );
    }

    #[test]
    fn three_valued_and() {
        let null = Expression::constant(None);
        let f = Expression::constant(Some(ScalarImpl::Bool(false)));
        let expr = Expression::and(null, f);
        assert_eq!(
            expr.eval_row(&row(vec![])).unwrap(),
            Some(ScalarImpl::Bool(false))
        );
    }

    #[test]
    fn params_bind_to_constants() {
        let expr = Expression::compare(
            CompareOp::GreaterThan,
            Expression::column(0),
            Expression::ValueParameter { index: 0 },
        );
        let bound = expr.bind_params(&[Some(ScalarImpl::Int32(5))]).unwrap();
        assert!(datum_is_true(&bound.eval_row(&row(vec![9])).unwrap()));
        assert!(!datum_is_true(&bound.eval_row(&row(vec![3])).unwrap()));
    }

    #[test]
    fn join_sides_are_independent() {
        let expr = Expression::compare(
            CompareOp::Equal,
            Expression::column(0),
            Expression::inner_column(0),
        );
        let outer = row(vec![3]);
        assert!(datum_is_true(&expr.eval(&outer, &row(vec![3])).unwrap()));
        assert!(!datum_is_true(&expr.eval(&outer, &row(vec![4])).unwrap()));
    }
}
