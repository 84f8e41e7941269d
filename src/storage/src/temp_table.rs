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

//! Fragment-scoped tables: append-only, block-backed, no indexes and no
//! streamer. Produced and consumed inside a single plan fragment.

use std::sync::Arc;

use emberdb_common::tuple::{TableTuple, TupleFlags, TupleSchema};
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::Result;

use crate::block::{BlockId, TupleBlock};

/// An append-only temp table.
pub struct TempTable {
    name: String,
    schema: Arc<TupleSchema>,
    tuples_per_block: usize,
    blocks: Vec<TupleBlock>,
    tuple_count: u64,
}

impl TempTable {
    pub fn new(name: impl Into<String>, schema: Arc<TupleSchema>, tuples_per_block: usize) -> Self {
        Self {
            name: name.into(),
            schema,
            tuples_per_block,
            blocks: Vec::new(),
            tuple_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<TupleSchema> {
        &self.schema
    }

    pub fn active_tuple_count(&self) -> u64 {
        self.tuple_count
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_count == 0
    }

    pub fn insert_row(&mut self, row: &impl Row) -> Result<()> {
        let tuple_length = self.schema.tuple_length();
        let needs_block = match self.blocks.last() {
            Some(block) => !block.has_free_tuples(),
            None => true,
        };
        if needs_block {
            let id = BlockId(self.blocks.len() as u32);
            self.blocks
                .push(TupleBlock::new(id, tuple_length, self.tuples_per_block));
        }
        let block = self.blocks.last_mut().unwrap();
        let (slot, _) = block.next_free_tuple().expect("fresh temp block is full");
        let schema = self.schema.clone();
        let storage = block.slot_mut(slot);
        storage.fill(0);
        schema.write_row(storage, row)?;
        schema.set_flag(storage, TupleFlags::ACTIVE, true);
        self.tuple_count += 1;
        Ok(())
    }

    /// Copy a tuple view in. The schemas must be layout compatible.
    pub fn insert_tuple(&mut self, tuple: &TableTuple<'_>) -> Result<()> {
        self.insert_row(&tuple.to_owned_row())
    }

    pub fn iter(&self) -> impl Iterator<Item = TableTuple<'_>> {
        self.blocks.iter().flat_map(move |block| {
            (0..block.unused_tuple_boundary())
                .map(move |slot| TableTuple::new(&self.schema, block.slot(slot)))
                .filter(|tuple| tuple.is_active())
        })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = OwnedRow> + '_ {
        self.iter().map(|tuple| tuple.to_owned_row())
    }

    pub fn delete_all_tuples(&mut self) {
        self.blocks.clear();
        self.tuple_count = 0;
    }

    /// Exchange contents with another temp table of a compatible schema.
    /// The recursive CTE loop rotates its working tables this way.
    pub fn swap_contents(&mut self, other: &mut TempTable) {
        debug_assert!(self.schema.is_layout_compatible(&other.schema));
        std::mem::swap(&mut self.blocks, &mut other.blocks);
        std::mem::swap(&mut self.tuple_count, &mut other.tuple_count);
    }
}

/// A temp table for queries whose intermediate results outgrow the normal
/// budget. Rows are collected the same way; sorting happens wholesale over
/// the materialized row set.
pub struct LargeTempTable {
    inner: TempTable,
}

impl LargeTempTable {
    pub fn new(name: impl Into<String>, schema: Arc<TupleSchema>, tuples_per_block: usize) -> Self {
        Self {
            inner: TempTable::new(name, schema, tuples_per_block),
        }
    }

    pub fn table(&self) -> &TempTable {
        &self.inner
    }

    pub fn table_mut(&mut self) -> &mut TempTable {
        &mut self.inner
    }

    pub fn insert_row(&mut self, row: &impl Row) -> Result<()> {
        self.inner.insert_row(row)
    }

    /// Sort the whole table by the given comparator, rewriting contents in
    /// sorted order.
    pub fn sort(
        &mut self,
        mut compare: impl FnMut(&OwnedRow, &OwnedRow) -> std::cmp::Ordering,
    ) -> Result<()> {
        let mut rows: Vec<OwnedRow> = self.inner.iter_rows().collect();
        rows.sort_by(&mut compare);
        self.inner.delete_all_tuples();
        for row in &rows {
            self.inner.insert_row(row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::tuple::ColumnSpec;
    use emberdb_common::types::{DataType, ScalarImpl};

    use super::*;

    fn int_schema() -> Arc<TupleSchema> {
        Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
    }

    fn int_row(v: i32) -> OwnedRow {
        OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
    }

    #[test]
    fn append_and_iterate_across_blocks() {
        let mut table = TempTable::new("t", int_schema(), 4);
        for v in 0..10 {
            table.insert_row(&int_row(v)).unwrap();
        }
        assert_eq!(table.active_tuple_count(), 10);
        let values: Vec<OwnedRow> = table.iter_rows().collect();
        assert_eq!(values.len(), 10);
        assert_eq!(values[7], int_row(7));
    }

    #[test]
    fn swap_contents_moves_rows() {
        let mut a = TempTable::new("a", int_schema(), 4);
        let mut b = TempTable::new("b", int_schema(), 4);
        a.insert_row(&int_row(1)).unwrap();
        a.swap_contents(&mut b);
        assert!(a.is_empty());
        assert_eq!(b.active_tuple_count(), 1);
    }

    #[test]
    fn large_table_sorts_in_place() {
        let mut table = LargeTempTable::new("big", int_schema(), 4);
        for v in [5, 1, 9, 3] {
            table.insert_row(&int_row(v)).unwrap();
        }
        table.sort(|a, b| a.cmp(b)).unwrap();
        let sorted: Vec<OwnedRow> = table.table().iter_rows().collect();
        assert_eq!(sorted, vec![int_row(1), int_row(3), int_row(5), int_row(9)]);
    }
}
