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

//! The elastic index: a set of `(partition hash, tuple address)` keys built
//! online so rows can be shipped off a partition by hash range during
//! rebalancing.

use std::collections::BTreeSet;

use emberdb_expr::{HashRange, HashRangeExpression};

use crate::block::TupleAddress;

/// One elastic index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ElasticIndexKey {
    pub hash: i32,
    pub address: TupleAddress,
}

/// Hash-ordered set of `(hash, address)` keys with half-open range queries.
#[derive(Debug, Default)]
pub struct ElasticIndex {
    keys: BTreeSet<ElasticIndexKey>,
}

impl ElasticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn add(&mut self, hash: i32, address: TupleAddress) -> bool {
        self.keys.insert(ElasticIndexKey { hash, address })
    }

    pub fn remove(&mut self, hash: i32, address: TupleAddress) -> bool {
        self.keys.remove(&ElasticIndexKey { hash, address })
    }

    pub fn has(&self, hash: i32, address: TupleAddress) -> bool {
        self.keys.contains(&ElasticIndexKey { hash, address })
    }

    /// Iterate keys whose hash lies in `[range.start, range.end)`. No
    /// wrap-around.
    pub fn range(&self, range: HashRange) -> impl Iterator<Item = ElasticIndexKey> + '_ {
        let low = ElasticIndexKey {
            hash: range.start,
            address: TupleAddress::new(crate::block::BlockId(0), 0),
        };
        self.keys
            .range(low..)
            .take_while(move |key| key.hash < range.end)
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = ElasticIndexKey> + '_ {
        self.keys.iter().copied()
    }
}

/// The elastic index and its build progress, owned by the table core so
/// both the build context and mutation notifications can reach it.
#[derive(Debug, Default)]
pub struct ElasticIndexState {
    pub index: ElasticIndex,
    pub complete: bool,
    /// The predicate the index was built under; re-activations must request
    /// a subset of its ranges.
    pub predicate: Option<HashRangeExpression>,
}

#[cfg(test)]
mod tests {
    use emberdb_expr::HashRange;

    use super::*;
    use crate::block::BlockId;

    fn addr(n: u32) -> TupleAddress {
        TupleAddress::new(BlockId(0), n)
    }

    #[test]
    fn range_queries_are_half_open() {
        let mut index = ElasticIndex::new();
        for (hash, slot) in [(-10, 1), (0, 2), (5, 3), (10, 4)] {
            index.add(hash, addr(slot));
        }
        let hits: Vec<i32> = index
            .range(HashRange { start: 0, end: 10 })
            .map(|key| key.hash)
            .collect();
        assert_eq!(hits, vec![0, 5]);
    }

    #[test]
    fn duplicate_keys_collapse() {
        let mut index = ElasticIndex::new();
        assert!(index.add(7, addr(1)));
        assert!(!index.add(7, addr(1)));
        assert_eq!(index.len(), 1);
        assert!(index.remove(7, addr(1)));
        assert!(index.is_empty());
    }
}
