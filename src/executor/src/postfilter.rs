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
use emberdb_common::Result;
use emberdb_expr::{datum_is_true, Expression};

/// The counting post-filter: an optional predicate plus LIMIT/OFFSET
/// bookkeeping. Scan loops run while [`CountingPostfilter::is_under_limit`]
/// holds and gate each candidate row through [`CountingPostfilter::eval`].
pub struct CountingPostfilter {
    predicate: Option<Expression>,
    limit: i64,
    offset: i64,
    tuples_skipped: i64,
    tuples_returned: i64,
    above_limit: bool,
}

pub const NO_LIMIT: i64 = -1;
pub const NO_OFFSET: i64 = 0;

impl CountingPostfilter {
    pub fn new(predicate: Option<Expression>, limit: i64, offset: i64) -> Self {
        Self {
            predicate,
            limit,
            offset,
            tuples_skipped: 0,
            tuples_returned: 0,
            above_limit: false,
        }
    }

    pub fn pass_through() -> Self {
        Self::new(None, NO_LIMIT, NO_OFFSET)
    }

    pub fn is_under_limit(&self) -> bool {
        !self.above_limit
    }

    /// Force the filter above its limit. An inline child that reached its
    /// own limit uses this to stop the parent scan.
    pub fn set_above_limit(&mut self) {
        self.above_limit = true;
    }

    /// Evaluate a candidate row pair. Returns whether the row is part of
    /// the output; as a side effect the offset is consumed and reaching
    /// the limit flips [`Self::is_under_limit`].
    pub fn eval(&mut self, outer: &dyn Row, inner: &dyn Row) -> Result<bool> {
        if let Some(predicate) = &self.predicate {
            if !datum_is_true(&predicate.eval(outer, inner)?) {
                return Ok(false);
            }
        }
        if self.tuples_skipped < self.offset {
            self.tuples_skipped += 1;
            return Ok(false);
        }
        self.tuples_returned += 1;
        if self.limit >= 0 && self.tuples_returned >= self.limit {
            self.above_limit = true;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::row::OwnedRow;
    use emberdb_common::types::ScalarImpl;
    use emberdb_expr::{CompareOp, Expression};

    use super::*;

    fn row(v: i32) -> OwnedRow {
        OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
    }

    #[test]
    fn offset_then_limit() {
        let mut filter = CountingPostfilter::new(None, 2, 3);
        let mut accepted = Vec::new();
        for v in 0..10 {
            if !filter.is_under_limit() {
                break;
            }
            if filter.eval(&row(v), &emberdb_common::row::EMPTY_ROW).unwrap() {
                accepted.push(v);
            }
        }
        assert_eq!(accepted, vec![3, 4]);
    }

    #[test]
    fn predicate_failures_do_not_consume_offset() {
        let odd = Expression::compare(
            CompareOp::Equal,
            Expression::ValueConstant {
                value: Some(ScalarImpl::Int32(1)),
            },
            Expression::Arithmetic {
                op: emberdb_expr::ArithmeticOp::Minus,
                left: Box::new(Expression::column(0)),
                right: Box::new(Expression::Arithmetic {
                    op: emberdb_expr::ArithmeticOp::Multiply,
                    left: Box::new(Expression::ValueConstant {
                        value: Some(ScalarImpl::Int32(2)),
                    }),
                    right: Box::new(Expression::Arithmetic {
                        op: emberdb_expr::ArithmeticOp::Divide,
                        left: Box::new(Expression::column(0)),
                        right: Box::new(Expression::ValueConstant {
                            value: Some(ScalarImpl::Int32(2)),
                        }),
                    }),
                }),
            },
        );
        let mut filter = CountingPostfilter::new(Some(odd), NO_LIMIT, 1);
        let mut accepted = Vec::new();
        for v in 0..6 {
            if filter.eval(&row(v), &emberdb_common::row::EMPTY_ROW).unwrap() {
                accepted.push(v);
            }
        }
        // Odd values pass the predicate; the first passing one feeds the
        // offset.
        assert_eq!(accepted, vec![3, 5]);
    }
}
