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

//! Stream predicates: per-output-stream row filters carried by the table
//! streaming contexts, with an optional delete-when-accepted flag and the
//! hash-range form used for elastic rebalancing.

use emberdb_common::row::Row;
use emberdb_common::types::partition_hash;
use emberdb_common::{EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::expr::{datum_is_true, Expression};

/// A half-open partition-hash range `[start, end)`. No wrap-around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRange {
    #[serde(rename = "RANGE_START")]
    pub start: i32,
    #[serde(rename = "RANGE_END")]
    pub end: i32,
}

impl HashRange {
    pub fn contains(&self, hash: i32) -> bool {
        self.start <= hash && hash < self.end
    }

    /// True when `other` lies entirely inside this range.
    fn covers(&self, other: &HashRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Evaluates whether a row's partition-column hash falls into any of a set
/// of hash ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRangeExpression {
    #[serde(rename = "HASH_COLUMN")]
    pub column: usize,
    #[serde(rename = "RANGES")]
    pub ranges: Vec<HashRange>,
}

impl HashRangeExpression {
    pub fn new(column: usize, ranges: Vec<HashRange>) -> Self {
        Self { column, ranges }
    }

    pub fn accepts_hash(&self, hash: i32) -> bool {
        self.ranges.iter().any(|r| r.contains(hash))
    }

    pub fn accepts_row(&self, row: &dyn Row) -> bool {
        self.accepts_hash(partition_hash(&row.datum_at(self.column)))
    }

    /// True when every range of `other` is fully covered by this
    /// expression's ranges. Elastic index re-activation requires the new
    /// request to be a subset of what the index already tracks.
    pub fn covers(&self, other: &HashRangeExpression) -> bool {
        other
            .ranges
            .iter()
            .all(|needed| self.ranges.iter().any(|have| have.covers(needed)))
    }
}

/// One compiled stream predicate: a boolean expression over a tuple plus a
/// flag requesting deletion of accepted rows (used when streaming rows off
/// a partition during rebalancing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPredicate {
    #[serde(rename = "predicateExpression")]
    pub expression: Expression,
    #[serde(rename = "deleteForPredicate", default)]
    pub delete_if_true: bool,
}

impl StreamPredicate {
    pub fn accept_all() -> Self {
        Self {
            expression: Expression::constant(Some(
                emberdb_common::types::ScalarImpl::Bool(true),
            )),
            delete_if_true: false,
        }
    }

    pub fn accepts(&self, row: &dyn Row) -> Result<bool> {
        Ok(datum_is_true(&self.expression.eval_row(row)?))
    }
}

/// The predicates of one streaming context, one per output stream.
#[derive(Debug, Clone, Default)]
pub struct StreamPredicateList {
    predicates: Vec<StreamPredicate>,
}

impl StreamPredicateList {
    pub fn new(predicates: Vec<StreamPredicate>) -> Self {
        Self { predicates }
    }

    /// Parse the activation blobs: each blob is a JSON document of one
    /// predicate. An empty slice yields an empty list (no filtering).
    pub fn parse(blobs: &[String]) -> Result<Self> {
        let predicates = blobs
            .iter()
            .map(|blob| {
                serde_json::from_str::<StreamPredicate>(blob).map_err(|e| {
                    EngineError::serialization(format!("malformed stream predicate: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { predicates })
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamPredicate> {
        self.predicates.iter()
    }

    pub fn get(&self, index: usize) -> Option<&StreamPredicate> {
        self.predicates.get(index)
    }

    pub fn delete_flags(&self) -> Vec<bool> {
        self.predicates.iter().map(|p| p.delete_if_true).collect()
    }

    /// The hash-range expression of the first predicate, when it has one.
    /// Elastic contexts carry exactly one predicate of this form.
    pub fn first_hash_range(&self) -> Option<&HashRangeExpression> {
        match self.predicates.first().map(|p| &p.expression) {
            Some(Expression::HashRange(range)) => Some(range),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::row::OwnedRow;
    use emberdb_common::types::{partition_hash, ScalarImpl};

    use super::*;

    #[test]
    fn hash_range_is_half_open() {
        let range = HashRange { start: 10, end: 20 };
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(!range.contains(9));
    }

    #[test]
    fn range_cover_requires_full_containment() {
        let have = HashRangeExpression::new(
            0,
            vec![HashRange { start: 0, end: 100 }, HashRange { start: 200, end: 300 }],
        );
        let inside = HashRangeExpression::new(0, vec![HashRange { start: 10, end: 90 }]);
        let straddling = HashRangeExpression::new(0, vec![HashRange { start: 90, end: 210 }]);
        assert!(have.covers(&inside));
        assert!(!have.covers(&straddling));
    }

    #[test]
    fn hash_range_expression_follows_partition_hash() {
        let value = Some(ScalarImpl::Int64(42));
        let hash = partition_hash(&value);
        let row = OwnedRow::new(vec![value]);
        let hit = HashRangeExpression::new(
            0,
            vec![HashRange { start: hash, end: hash.saturating_add(1) }],
        );
        assert!(hit.accepts_row(&row));
        let miss = HashRangeExpression::new(
            0,
            vec![HashRange { start: hash.saturating_add(1), end: i32::MAX }],
        );
        assert!(!miss.accepts_row(&row));
    }

    #[test]
    fn predicate_blobs_round_trip() {
        let predicate = StreamPredicate {
            expression: Expression::HashRange(HashRangeExpression::new(
                1,
                vec![HashRange { start: -5, end: 5 }],
            )),
            delete_if_true: true,
        };
        let blob = serde_json::to_string(&predicate).unwrap();
        let list = StreamPredicateList::parse(&[blob]).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.delete_flags()[0]);
        assert!(list.first_hash_range().is_some());
    }
}
