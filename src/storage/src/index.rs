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

//! The index capability consumed by the executors and by table mutation.
//! Indexes map key rows to tuple addresses; the concrete structure behind
//! the trait is replaceable, and the engine ships an ordered in-memory
//! implementation.

use std::collections::BTreeMap;
use std::ops::Bound;

use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::ColumnSpec;
use emberdb_common::{EngineError, Result};
use smallvec::SmallVec;

use crate::block::TupleAddress;

/// Addresses stored under one key. Unique indexes hold exactly one.
type AddressList = SmallVec<[TupleAddress; 1]>;

/// A positioned scan over an index. Yields tuple addresses.
pub struct IndexCursor<'a> {
    iter: Box<dyn Iterator<Item = TupleAddress> + 'a>,
}

impl<'a> IndexCursor<'a> {
    fn new(iter: impl Iterator<Item = TupleAddress> + 'a) -> Self {
        Self {
            iter: Box::new(iter),
        }
    }

    pub fn empty() -> Self {
        Self {
            iter: Box::new(std::iter::empty()),
        }
    }
}

impl Iterator for IndexCursor<'_> {
    type Item = TupleAddress;

    fn next(&mut self) -> Option<TupleAddress> {
        self.iter.next()
    }
}

/// The abstract index capability. All values are tuple addresses; key rows
/// carry the index key columns in declaration order.
pub trait Index: Send {
    fn name(&self) -> &str;

    /// Table columns the key is drawn from, in key order.
    fn key_columns(&self) -> &[usize];

    /// Declared shape of each key column, used to coerce search keys.
    fn key_spec(&self) -> &[ColumnSpec];

    fn is_unique(&self) -> bool;

    fn size(&self) -> usize;

    fn insert(&mut self, key: OwnedRow, address: TupleAddress) -> Result<()>;

    /// Remove one `(key, address)` entry. Returns whether it was present.
    fn remove(&mut self, key: &OwnedRow, address: TupleAddress) -> bool;

    /// Rewrite the address stored under a key when compaction moves the
    /// tuple's storage.
    fn replace_address(&mut self, key: &OwnedRow, old: TupleAddress, new: TupleAddress);

    fn move_to_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a>;
    fn move_to_key_or_greater<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a>;
    fn move_to_greater_than_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a>;
    fn move_to_key_or_less<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a>;
    fn move_to_less_than_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a>;
    fn move_to_end(&self, forward: bool) -> IndexCursor<'_>;

    /// Position at the 1-based `rank`-th entry from the chosen end. Ranks
    /// beyond the index size yield an empty cursor.
    fn move_to_rank_tuple(&self, rank: usize, forward: bool) -> IndexCursor<'_>;

    /// Geo containment lookups need a covering-cell index; the default
    /// ordered index cannot answer them.
    fn move_to_covering_cell<'a>(&'a self, _key: &OwnedRow) -> Result<IndexCursor<'a>> {
        Err(EngineError::plan_invalid(format!(
            "index {} does not support covering-cell lookups",
            self.name()
        )))
    }

    /// Extract this index's key from a full table row.
    fn key_of(&self, row: &dyn Row) -> OwnedRow {
        self.key_columns()
            .iter()
            .map(|&column| row.datum_at(column))
            .collect()
    }
}

pub type BoxedIndex = Box<dyn Index>;

/// The in-memory ordered index: a btree of key rows to address lists, with
/// null-first key ordering.
pub struct BtreeIndex {
    name: String,
    key_columns: Vec<usize>,
    key_spec: Vec<ColumnSpec>,
    unique: bool,
    map: BTreeMap<OwnedRow, AddressList>,
    size: usize,
}

impl BtreeIndex {
    pub fn new(
        name: impl Into<String>,
        key_columns: Vec<usize>,
        key_spec: Vec<ColumnSpec>,
        unique: bool,
    ) -> Self {
        assert_eq!(key_columns.len(), key_spec.len());
        Self {
            name: name.into(),
            key_columns,
            key_spec,
            unique,
            map: BTreeMap::new(),
            size: 0,
        }
    }

    fn forward<'a>(
        range: impl Iterator<Item = (&'a OwnedRow, &'a AddressList)> + 'a,
    ) -> impl Iterator<Item = TupleAddress> + 'a {
        range.flat_map(|(_, addresses)| addresses.iter().copied())
    }
}

impl Index for BtreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_columns(&self) -> &[usize] {
        &self.key_columns
    }

    fn key_spec(&self) -> &[ColumnSpec] {
        &self.key_spec
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn size(&self) -> usize {
        self.size
    }

    fn insert(&mut self, key: OwnedRow, address: TupleAddress) -> Result<()> {
        let entry = self.map.entry(key).or_default();
        if self.unique && !entry.is_empty() {
            return Err(EngineError::constraint_violation(format!(
                "duplicate key in unique index {}",
                self.name
            )));
        }
        entry.push(address);
        self.size += 1;
        Ok(())
    }

    fn remove(&mut self, key: &OwnedRow, address: TupleAddress) -> bool {
        let Some(entry) = self.map.get_mut(key) else {
            return false;
        };
        let Some(position) = entry.iter().position(|&a| a == address) else {
            return false;
        };
        entry.remove(position);
        if entry.is_empty() {
            self.map.remove(key);
        }
        self.size -= 1;
        true
    }

    fn replace_address(&mut self, key: &OwnedRow, old: TupleAddress, new: TupleAddress) {
        if let Some(entry) = self.map.get_mut(key) {
            for address in entry.iter_mut() {
                if *address == old {
                    *address = new;
                    return;
                }
            }
        }
    }

    fn move_to_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a> {
        match self.map.get(key) {
            Some(entry) => IndexCursor::new(entry.iter().copied().collect::<Vec<_>>().into_iter()),
            None => IndexCursor::empty(),
        }
    }

    fn move_to_key_or_greater<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a> {
        IndexCursor::new(Self::forward(self.map.range(key.clone()..)))
    }

    fn move_to_greater_than_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a> {
        IndexCursor::new(Self::forward(
            self.map
                .range((Bound::Excluded(key.clone()), Bound::Unbounded)),
        ))
    }

    fn move_to_key_or_less<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a> {
        IndexCursor::new(
            self.map
                .range(..=key.clone())
                .rev()
                .flat_map(|(_, addresses)| addresses.iter().rev().copied()),
        )
    }

    fn move_to_less_than_key<'a>(&'a self, key: &OwnedRow) -> IndexCursor<'a> {
        IndexCursor::new(
            self.map
                .range(..key.clone())
                .rev()
                .flat_map(|(_, addresses)| addresses.iter().rev().copied()),
        )
    }

    fn move_to_end(&self, forward: bool) -> IndexCursor<'_> {
        if forward {
            IndexCursor::new(Self::forward(self.map.iter()))
        } else {
            IndexCursor::new(
                self.map
                    .iter()
                    .rev()
                    .flat_map(|(_, addresses)| addresses.iter().rev().copied()),
            )
        }
    }

    fn move_to_rank_tuple(&self, rank: usize, forward: bool) -> IndexCursor<'_> {
        if rank == 0 {
            return IndexCursor::empty();
        }
        let mut cursor = self.move_to_end(forward);
        for _ in 0..rank - 1 {
            if cursor.next().is_none() {
                return IndexCursor::empty();
            }
        }
        cursor
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::types::{DataType, ScalarImpl};

    use super::*;
    use crate::block::BlockId;

    fn key(v: i32) -> OwnedRow {
        OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
    }

    fn addr(n: u32) -> TupleAddress {
        TupleAddress::new(BlockId(0), n)
    }

    fn int_index(unique: bool) -> BtreeIndex {
        BtreeIndex::new(
            "idx_a",
            vec![0],
            vec![ColumnSpec::new(DataType::Integer)],
            unique,
        )
    }

    #[test]
    fn ordered_scans() {
        let mut index = int_index(false);
        for v in [5, 1, 3, 3, 9] {
            index.insert(key(v), addr(v as u32)).unwrap();
        }
        let forward: Vec<u32> = index.move_to_end(true).map(|a| a.slot()).collect();
        assert_eq!(forward, vec![1, 3, 3, 5, 9]);

        let from_three: Vec<u32> = index.move_to_key_or_greater(&key(3)).map(|a| a.slot()).collect();
        assert_eq!(from_three, vec![3, 3, 5, 9]);

        let below_three: Vec<u32> =
            index.move_to_less_than_key(&key(3)).map(|a| a.slot()).collect();
        assert_eq!(below_three, vec![1]);

        let exact: Vec<u32> = index.move_to_key(&key(3)).map(|a| a.slot()).collect();
        assert_eq!(exact, vec![3, 3]);
    }

    #[test]
    fn unique_violations_are_reported() {
        let mut index = int_index(true);
        index.insert(key(1), addr(0)).unwrap();
        assert!(matches!(
            index.insert(key(1), addr(1)),
            Err(EngineError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn rank_positioning() {
        let mut index = int_index(true);
        for v in 1..=10 {
            index.insert(key(v), addr(v as u32)).unwrap();
        }
        // Rank 10 forward is the largest value; rank 1 reverse is also the
        // largest value.
        assert_eq!(index.move_to_rank_tuple(10, true).next(), Some(addr(10)));
        assert_eq!(index.move_to_rank_tuple(1, false).next(), Some(addr(10)));
        assert!(index.move_to_rank_tuple(11, true).next().is_none());
    }

    #[test]
    fn null_keys_sort_first() {
        let mut index = int_index(false);
        index.insert(key(1), addr(1)).unwrap();
        index
            .insert(OwnedRow::new(vec![None]), addr(0))
            .unwrap();
        let all: Vec<u32> = index.move_to_end(true).map(|a| a.slot()).collect();
        assert_eq!(all, vec![0, 1]);
    }
}
