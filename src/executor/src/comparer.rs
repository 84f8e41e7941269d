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

use std::cmp::Ordering;

use emberdb_common::row::Row;
use emberdb_common::types::ops;
use emberdb_expr::Expression;

use crate::plan::SortDirection;

/// Compares rows on `(sort expression, direction)` pairs. NULLs sort first
/// under ASC, matching index order.
#[derive(Clone)]
pub struct TupleComparer {
    keys: Vec<(Expression, SortDirection)>,
}

impl TupleComparer {
    pub fn new(expressions: &[Expression], directions: &[SortDirection]) -> Self {
        debug_assert_eq!(expressions.len(), directions.len());
        Self {
            keys: expressions
                .iter()
                .cloned()
                .zip(directions.iter().copied())
                .collect(),
        }
    }

    pub fn compare(&self, a: &dyn Row, b: &dyn Row) -> Ordering {
        for (expression, direction) in &self.keys {
            let left = expression
                .eval_row(a)
                .expect("sort expressions are side-effect free");
            let right = expression
                .eval_row(b)
                .expect("sort expressions are side-effect free");
            let ordering = ops::index_order(&left, &right);
            let ordering = match direction {
                SortDirection::Desc => ordering.reverse(),
                _ => ordering,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::row::OwnedRow;
    use emberdb_common::types::ScalarImpl;

    use super::*;

    fn row(a: i32, b: i32) -> OwnedRow {
        OwnedRow::new(vec![
            Some(ScalarImpl::Int32(a)),
            Some(ScalarImpl::Int32(b)),
        ])
    }

    #[test]
    fn mixed_directions() {
        let comparer = TupleComparer::new(
            &[Expression::column(0), Expression::column(1)],
            &[SortDirection::Asc, SortDirection::Desc],
        );
        let mut rows = vec![row(1, 1), row(0, 5), row(1, 9), row(0, 2)];
        rows.sort_by(|a, b| comparer.compare(a, b));
        assert_eq!(rows, vec![row(0, 5), row(0, 2), row(1, 9), row(1, 1)]);
    }
}
