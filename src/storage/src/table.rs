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

//! The persistent table: block-allocated row storage with bucketed
//! compaction, index maintenance, undo-quantum deletes and live streaming
//! notifications.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use emberdb_common::config::EngineConfig;
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::{TableTuple, TupleFlags, TupleSchema};
use emberdb_common::{EngineError, Result};
use tracing::debug;

use crate::block::{
    BlockId, BucketChange, TableBlockMap, TupleAddress, TupleBlock, TUPLE_BLOCK_NUM_BUCKETS,
};
use crate::elastic_index::ElasticIndexState;
use crate::index::BoxedIndex;
use crate::streamer::TableStreamer;

/// Everything the table owns except its streamer. Streaming contexts reach
/// this through [`PersistentTableSurgeon`], the only path to the private
/// internals.
pub struct TableData {
    schema: Arc<TupleSchema>,
    tuples_per_block: usize,
    blocks: TableBlockMap,
    /// Compaction buckets for blocks in the not-pending-snapshot set.
    buckets: Vec<BTreeSet<BlockId>>,
    /// Compaction buckets for blocks still awaiting the snapshot scan.
    /// Pairing never crosses the two sets, so unscanned rows cannot move
    /// into blocks the scan has already passed; the block under the cursor
    /// is pinned out of both.
    pending_buckets: Vec<BTreeSet<BlockId>>,
    blocks_with_space: BTreeSet<BlockId>,
    next_block_id: u32,
    visible_tuple_count: u64,
    pending_snapshot_block_count: usize,
    indexes: Vec<BoxedIndex>,
    primary_index: Option<usize>,
    elastic: Option<ElasticIndexState>,
    /// Tuples deleted inside the open undo quantum, in deletion order.
    undo_actions: Vec<TupleAddress>,
    undo_open: bool,
}

impl TableData {
    fn new(schema: Arc<TupleSchema>, tuples_per_block: usize) -> Self {
        Self {
            schema,
            tuples_per_block,
            blocks: TableBlockMap::new(),
            buckets: vec![BTreeSet::new(); TUPLE_BLOCK_NUM_BUCKETS],
            pending_buckets: vec![BTreeSet::new(); TUPLE_BLOCK_NUM_BUCKETS],
            blocks_with_space: BTreeSet::new(),
            next_block_id: 0,
            visible_tuple_count: 0,
            pending_snapshot_block_count: 0,
            indexes: Vec::new(),
            primary_index: None,
            elastic: None,
            undo_actions: Vec::new(),
            undo_open: false,
        }
    }

    pub fn schema(&self) -> &Arc<TupleSchema> {
        &self.schema
    }

    pub fn tuples_per_block(&self) -> usize {
        self.tuples_per_block
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn allocated_tuple_count(&self) -> u64 {
        (self.blocks.len() * self.tuples_per_block) as u64
    }

    pub fn visible_tuple_count(&self) -> u64 {
        self.visible_tuple_count
    }

    pub fn pending_snapshot_block_count(&self) -> usize {
        self.pending_snapshot_block_count
    }

    pub fn block(&self, id: BlockId) -> Option<&TupleBlock> {
        self.blocks.get(&id)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    /// The first block strictly after `id` in address order.
    pub fn next_block_after(&self, id: BlockId) -> Option<BlockId> {
        self.blocks
            .range((Bound::Excluded(id), Bound::Unbounded))
            .next()
            .map(|(&id, _)| id)
    }

    pub fn first_block(&self) -> Option<BlockId> {
        self.blocks.keys().next().copied()
    }

    /// A raw view of a slot, regardless of its flags.
    pub fn tuple_at(&self, address: TupleAddress) -> Option<TableTuple<'_>> {
        let block = self.blocks.get(&address.block())?;
        if address.slot() >= block.unused_tuple_boundary() {
            return None;
        }
        Some(TableTuple::new(&self.schema, block.slot(address.slot())))
    }

    pub fn row_at(&self, address: TupleAddress) -> Option<OwnedRow> {
        self.tuple_at(address).map(|tuple| tuple.to_owned_row())
    }

    pub fn flags_at(&self, address: TupleAddress) -> TupleFlags {
        self.tuple_at(address)
            .map(|tuple| tuple.flags())
            .unwrap_or(TupleFlags::empty())
    }

    pub fn set_flag(&mut self, address: TupleAddress, flag: TupleFlags, on: bool) {
        let schema = self.schema.clone();
        if let Some(block) = self.blocks.get_mut(&address.block()) {
            schema.set_flag(block.slot_mut(address.slot()), flag, on);
        }
    }

    /// Iterate visible tuples: active and not pending any delete.
    pub fn iter_visible(&self) -> impl Iterator<Item = (TupleAddress, TableTuple<'_>)> {
        self.blocks.iter().flat_map(move |(&id, block)| {
            (0..block.unused_tuple_boundary()).filter_map(move |slot| {
                let tuple = TableTuple::new(&self.schema, block.slot(slot));
                let flags = tuple.flags();
                if flags.contains(TupleFlags::ACTIVE)
                    && !flags.contains(TupleFlags::PENDING_DELETE)
                    && !flags.contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE)
                {
                    Some((TupleAddress::new(id, slot), tuple))
                } else {
                    None
                }
            })
        })
    }

    fn unlink_from_buckets(&mut self, id: BlockId) {
        for bucket in &mut self.buckets {
            bucket.remove(&id);
        }
        for bucket in &mut self.pending_buckets {
            bucket.remove(&id);
        }
    }

    /// Re-home a block after its fullness changed. The bucket family is
    /// chosen by the block's pendingness; a scan-pinned block belongs to no
    /// bucket at all.
    fn apply_bucket_change(&mut self, id: BlockId, change: BucketChange) {
        let (pinned, pending) = match self.blocks.get(&id) {
            Some(block) => (block.is_scan_pinned(), block.is_pending_snapshot()),
            None => return,
        };
        if pinned {
            self.unlink_from_buckets(id);
            return;
        }
        match change {
            BucketChange::Unchanged => {}
            BucketChange::MoveTo(bucket) => {
                self.unlink_from_buckets(id);
                if pending {
                    self.pending_buckets[bucket].insert(id);
                } else {
                    self.buckets[bucket].insert(id);
                }
            }
            BucketChange::Unlink => self.unlink_from_buckets(id),
        }
    }

    fn refresh_space_tracking(&mut self, id: BlockId) {
        let has_space = self
            .blocks
            .get(&id)
            .map(|b| b.has_free_tuples())
            .unwrap_or(false);
        if has_space {
            self.blocks_with_space.insert(id);
        } else {
            self.blocks_with_space.remove(&id);
        }
    }

    /// Allocate a slot, creating a block lazily when none has space.
    fn allocate_tuple(&mut self) -> TupleAddress {
        let id = match self.blocks_with_space.iter().next().copied() {
            Some(id) => id,
            None => {
                let id = BlockId(self.next_block_id);
                self.next_block_id += 1;
                self.blocks.insert(
                    id,
                    TupleBlock::new(id, self.schema.tuple_length(), self.tuples_per_block),
                );
                self.blocks_with_space.insert(id);
                id
            }
        };
        let block = self.blocks.get_mut(&id).expect("allocation block exists");
        let (slot, change) = block
            .next_free_tuple()
            .expect("block in the space set is full");
        self.apply_bucket_change(id, change);
        self.refresh_space_tracking(id);
        TupleAddress::new(id, slot)
    }

    fn write_row_at(&mut self, address: TupleAddress, row: &impl Row) -> Result<()> {
        let schema = self.schema.clone();
        let block = self
            .blocks
            .get_mut(&address.block())
            .expect("write to a missing block");
        let storage = block.slot_mut(address.slot());
        schema.write_row(storage, row)
    }

    /// Release one slot's storage. Destroys the block when it goes empty
    /// and is not pinned by a pending snapshot.
    pub(crate) fn free_tuple_storage(&mut self, address: TupleAddress) {
        let id = address.block();
        let schema = self.schema.clone();
        let Some(block) = self.blocks.get_mut(&id) else {
            return;
        };
        let storage = block.slot_mut(address.slot());
        let had_undo_flag = schema
            .flags(storage)
            .contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE);
        storage[0] = 0;
        if had_undo_flag {
            block.adjust_pending_undo_release(-1);
        }
        let change = block.free_tuple(address.slot());
        let release = block.is_empty() && !block.is_pending_snapshot();
        if release {
            self.destroy_block(id);
        } else {
            self.apply_bucket_change(id, change);
            self.refresh_space_tracking(id);
        }
    }

    fn destroy_block(&mut self, id: BlockId) {
        if let Some(block) = self.blocks.remove(&id) {
            // A pending block can be compacted away before the snapshot
            // scan reaches it; keep the residual accounting straight.
            if block.is_pending_snapshot() {
                self.pending_snapshot_block_count -= 1;
            }
        }
        self.unlink_from_buckets(id);
        self.blocks_with_space.remove(&id);
    }

    pub fn indexes(&self) -> &[BoxedIndex] {
        &self.indexes
    }

    pub fn index_by_name(&self, name: &str) -> Option<&BoxedIndex> {
        self.indexes.iter().find(|index| index.name() == name)
    }

    pub fn primary_index(&self) -> Option<&BoxedIndex> {
        self.primary_index.map(|i| &self.indexes[i])
    }

    fn insert_into_indexes(&mut self, row: &OwnedRow, address: TupleAddress) -> Result<()> {
        for position in 0..self.indexes.len() {
            let key = self.indexes[position].key_of(row);
            if let Err(error) = self.indexes[position].insert(key, address) {
                // Roll the earlier indexes back before surfacing.
                for earlier in 0..position {
                    let key = self.indexes[earlier].key_of(row);
                    self.indexes[earlier].remove(&key, address);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, row: &OwnedRow, address: TupleAddress) {
        for index in &mut self.indexes {
            let key = index.key_of(row);
            index.remove(&key, address);
        }
    }

    fn reindex_moved_tuple(&mut self, row: &OwnedRow, old: TupleAddress, new: TupleAddress) {
        for index in &mut self.indexes {
            let key = index.key_of(row);
            index.replace_address(&key, old, new);
        }
    }

    pub fn elastic(&self) -> Option<&ElasticIndexState> {
        self.elastic.as_ref()
    }

    pub fn elastic_mut(&mut self) -> Option<&mut ElasticIndexState> {
        self.elastic.as_mut()
    }

    fn rewrite_undo_address(&mut self, old: TupleAddress, new: TupleAddress) {
        for address in &mut self.undo_actions {
            if *address == old {
                *address = new;
            }
        }
    }
}

/// The capability token granting streaming contexts access to table
/// internals. Constructed only by the table itself.
pub struct PersistentTableSurgeon<'a> {
    data: &'a mut TableData,
}

impl<'a> PersistentTableSurgeon<'a> {
    pub fn data(&self) -> &TableData {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut TableData {
        self.data
    }

    pub fn schema(&self) -> Arc<TupleSchema> {
        self.data.schema.clone()
    }

    /// Move every existing block into the pending-snapshot set. The blocks
    /// keep their bucket membership, but in the pending bucket family, so
    /// compaction can still pair them among themselves.
    pub fn activate_snapshot(&mut self) {
        let ids: Vec<BlockId> = self.data.block_ids().collect();
        for bucket in &mut self.data.buckets {
            bucket.clear();
        }
        for bucket in &mut self.data.pending_buckets {
            bucket.clear();
        }
        for id in &ids {
            let block = self.data.blocks.get_mut(id).unwrap();
            block.set_pending_snapshot(true);
            if let Some(bucket) = block.calculate_bucket_index() {
                self.data.pending_buckets[bucket].insert(*id);
            }
        }
        self.data.pending_snapshot_block_count = ids.len();
    }

    /// The copy-on-write iterator entered a block: pin it so compaction
    /// cannot move tuples underneath the cursor.
    pub fn snapshot_started_scanning_block(&mut self, id: BlockId) {
        let Some(block) = self.data.blocks.get_mut(&id) else {
            return;
        };
        if !block.is_pending_snapshot() {
            return;
        }
        block.set_scan_pinned(true);
        self.data.unlink_from_buckets(id);
    }

    /// The copy-on-write iterator is done with a block: return it to the
    /// not-pending set, re-bucket it, or destroy it if nothing is left.
    pub fn snapshot_finished_scanning_block(&mut self, id: BlockId) {
        let Some(block) = self.data.blocks.get_mut(&id) else {
            return;
        };
        if !block.is_pending_snapshot() {
            return;
        }
        block.set_pending_snapshot(false);
        block.set_scan_pinned(false);
        self.data.pending_snapshot_block_count -= 1;
        if block.is_empty() {
            self.data.destroy_block(id);
        } else {
            let change = match block.calculate_bucket_index() {
                Some(bucket) => BucketChange::MoveTo(bucket),
                None => BucketChange::Unlink,
            };
            self.data.apply_bucket_change(id, change);
            self.data.refresh_space_tracking(id);
        }
    }

    /// Return every block to the not-pending set. The failure path of a
    /// snapshot that ended with unscanned blocks.
    pub fn release_all_pending_blocks(&mut self) {
        let ids: Vec<BlockId> = self.data.block_ids().collect();
        for id in ids {
            self.snapshot_finished_scanning_block(id);
        }
    }

    pub fn set_tuple_dirty(&mut self, address: TupleAddress, dirty: bool) {
        self.data.set_flag(address, TupleFlags::DIRTY, dirty);
    }

    /// Free the storage of a tuple whose delete was deferred for a
    /// snapshot. Index entries were removed when the delete happened.
    pub fn delete_tuple_storage(&mut self, address: TupleAddress) {
        self.data.free_tuple_storage(address);
    }

    // Elastic index plumbing.

    pub fn has_index(&self) -> bool {
        self.data.elastic.is_some()
    }

    pub fn create_index(&mut self) {
        debug_assert!(self.data.elastic.is_none());
        self.data.elastic = Some(ElasticIndexState::default());
    }

    pub fn drop_index(&mut self) {
        self.data.elastic = None;
    }

    pub fn is_index_empty(&self) -> bool {
        self.data
            .elastic
            .as_ref()
            .map(|e| e.index.is_empty())
            .unwrap_or(true)
    }

    pub fn index_size(&self) -> usize {
        self.data
            .elastic
            .as_ref()
            .map(|e| e.index.len())
            .unwrap_or(0)
    }

    pub fn is_indexing_complete(&self) -> bool {
        self.data
            .elastic
            .as_ref()
            .map(|e| e.complete)
            .unwrap_or(false)
    }

    pub fn set_indexing_complete(&mut self) {
        if let Some(elastic) = self.data.elastic.as_mut() {
            elastic.complete = true;
        }
    }

    pub fn index_add(&mut self, hash: i32, address: TupleAddress) {
        if let Some(elastic) = self.data.elastic.as_mut() {
            elastic.index.add(hash, address);
        }
    }

    pub fn index_remove(&mut self, hash: i32, address: TupleAddress) {
        if let Some(elastic) = self.data.elastic.as_mut() {
            elastic.index.remove(hash, address);
        }
    }

    pub fn index_has(&self, hash: i32, address: TupleAddress) -> bool {
        self.data
            .elastic
            .as_ref()
            .map(|e| e.index.has(hash, address))
            .unwrap_or(false)
    }
}

/// An in-memory, block-allocated, row-oriented table with indexes and an
/// optional live streamer.
pub struct PersistentTable {
    name: String,
    table_id: i32,
    partition_id: i32,
    partition_column: Option<usize>,
    is_replicated: bool,
    config: Arc<EngineConfig>,
    data: TableData,
    streamer: Option<TableStreamer>,
}

impl PersistentTable {
    pub fn new(
        name: impl Into<String>,
        table_id: i32,
        partition_id: i32,
        schema: Arc<TupleSchema>,
        partition_column: Option<usize>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let tuples_per_block = config.tuples_per_block;
        Self {
            name: name.into(),
            table_id,
            partition_id,
            partition_column,
            is_replicated: partition_column.is_none(),
            config,
            data: TableData::new(schema, tuples_per_block),
            streamer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> i32 {
        self.table_id
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn partition_column(&self) -> Option<usize> {
        self.partition_column
    }

    pub fn is_replicated(&self) -> bool {
        self.is_replicated
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn schema(&self) -> &Arc<TupleSchema> {
        self.data.schema()
    }

    pub fn data(&self) -> &TableData {
        &self.data
    }

    pub fn visible_tuple_count(&self) -> u64 {
        self.data.visible_tuple_count
    }

    pub fn allocated_tuple_count(&self) -> u64 {
        self.data.allocated_tuple_count()
    }

    pub fn iter_visible(&self) -> impl Iterator<Item = (TupleAddress, TableTuple<'_>)> {
        self.data.iter_visible()
    }

    pub(crate) fn surgeon(&mut self) -> PersistentTableSurgeon<'_> {
        PersistentTableSurgeon {
            data: &mut self.data,
        }
    }

    pub fn streamer(&self) -> Option<&TableStreamer> {
        self.streamer.as_ref()
    }

    pub(crate) fn streamer_mut(&mut self) -> &mut Option<TableStreamer> {
        &mut self.streamer
    }

    pub fn add_index(&mut self, mut index: BoxedIndex, primary: bool) -> Result<()> {
        for (address, tuple) in self.data.iter_visible() {
            let key = index.key_of(&tuple);
            index.insert(key, address)?;
        }
        self.data.indexes.push(index);
        if primary {
            self.data.primary_index = Some(self.data.indexes.len() - 1);
        }
        Ok(())
    }

    pub fn index_by_name(&self, name: &str) -> Option<&BoxedIndex> {
        self.data.index_by_name(name)
    }

    /// Insert a row. Returns the new tuple's address.
    pub fn insert_row(&mut self, row: &OwnedRow) -> Result<TupleAddress> {
        let address = self.data.allocate_tuple();
        if let Err(error) = self.data.write_row_at(address, row) {
            self.data.free_tuple_storage(address);
            return Err(error);
        }
        self.data.set_flag(address, TupleFlags::ACTIVE, true);
        // Stored values may have been coerced; index the stored image.
        let stored = self.data.row_at(address).expect("stored row readable");
        if let Err(error) = self.data.insert_into_indexes(&stored, address) {
            self.data.set_flag(address, TupleFlags::ACTIVE, false);
            self.data.free_tuple_storage(address);
            return Err(error);
        }
        self.data.visible_tuple_count += 1;
        self.with_streamer(|table, streamer| {
            streamer.notify_tuple_insert(table, address);
        });
        Ok(address)
    }

    /// Update a tuple in place. The pre-image is offered to streaming
    /// contexts before the slot is overwritten.
    pub fn update_tuple(&mut self, address: TupleAddress, new_row: &OwnedRow) -> Result<()> {
        let old_row = self
            .data
            .row_at(address)
            .ok_or_else(|| EngineError::plan_invalid(format!("update of missing tuple {address}")))?;
        self.with_streamer(|table, streamer| {
            streamer.notify_tuple_update(table, address);
        });
        self.data.write_row_at(address, new_row)?;
        let stored = self.data.row_at(address).expect("stored row readable");
        for position in 0..self.data.indexes.len() {
            let old_key = self.data.indexes[position].key_of(&old_row);
            let new_key = self.data.indexes[position].key_of(&stored);
            if old_key != new_key {
                self.data.indexes[position].remove(&old_key, address);
                if let Err(error) = self.data.indexes[position].insert(new_key, address) {
                    // Restore the old image and the index entries changed
                    // so far, then surface the violation.
                    self.data.write_row_at(address, &old_row)?;
                    for earlier in 0..=position {
                        let stored_key = self.data.indexes[earlier].key_of(&stored);
                        let restore_key = self.data.indexes[earlier].key_of(&old_row);
                        if stored_key != restore_key {
                            self.data.indexes[earlier].remove(&stored_key, address);
                            let _ = self.data.indexes[earlier].insert(restore_key, address);
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Delete a tuple. Storage is freed immediately unless a streaming
    /// context claims the pre-image, in which case the slot is marked
    /// pending-delete and reaped by the snapshot scan.
    pub fn delete_tuple(&mut self, address: TupleAddress) -> Result<()> {
        let row = self
            .data
            .row_at(address)
            .ok_or_else(|| EngineError::plan_invalid(format!("delete of missing tuple {address}")))?;
        let can_free = self.with_streamer(|table, streamer| {
            streamer.notify_tuple_delete(table, address)
        });
        self.data.remove_from_indexes(&row, address);
        self.data.visible_tuple_count -= 1;
        if can_free {
            self.data.free_tuple_storage(address);
        } else {
            self.data.set_flag(address, TupleFlags::PENDING_DELETE, true);
        }
        Ok(())
    }

    /// Delete under the open undo quantum: the tuple disappears from view
    /// and its indexes now, but holds storage until release.
    pub fn delete_tuple_for_undo(&mut self, address: TupleAddress) -> Result<()> {
        debug_assert!(self.data.undo_open, "undo delete outside a quantum");
        let flags = self.data.flags_at(address);
        if flags.contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE) {
            return Ok(());
        }
        let row = self
            .data
            .row_at(address)
            .ok_or_else(|| EngineError::plan_invalid(format!("undo delete of missing tuple {address}")))?;
        self.data.remove_from_indexes(&row, address);
        self.data.visible_tuple_count -= 1;
        self.data
            .set_flag(address, TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE, true);
        if let Some(block) = self.data.blocks.get_mut(&address.block()) {
            block.adjust_pending_undo_release(1);
        }
        self.data.undo_actions.push(address);
        Ok(())
    }

    pub fn begin_undo_quantum(&mut self) {
        debug_assert!(!self.data.undo_open, "nested undo quantum");
        self.data.undo_open = true;
        self.data.undo_actions.clear();
    }

    /// Commit the quantum: deferred deletes become real. Streaming contexts
    /// are notified so live elastic indexes drop the freed addresses.
    pub fn release_undo_quantum(&mut self) {
        let actions = std::mem::take(&mut self.data.undo_actions);
        self.data.undo_open = false;
        for address in actions {
            let flags = self.data.flags_at(address);
            if !flags.contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE) {
                continue;
            }
            let can_free = self.with_streamer(|table, streamer| {
                streamer.notify_tuple_delete(table, address)
            });
            if let Some(block) = self.data.blocks.get_mut(&address.block()) {
                block.adjust_pending_undo_release(-1);
            }
            self.data
                .set_flag(address, TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE, false);
            if can_free {
                self.data.free_tuple_storage(address);
            } else {
                self.data.set_flag(address, TupleFlags::PENDING_DELETE, true);
            }
        }
    }

    /// Roll the quantum back: deferred deletes reappear, indexes restored.
    pub fn undo_undo_quantum(&mut self) {
        let actions = std::mem::take(&mut self.data.undo_actions);
        self.data.undo_open = false;
        for address in actions.into_iter().rev() {
            let flags = self.data.flags_at(address);
            if !flags.contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE) {
                continue;
            }
            self.data
                .set_flag(address, TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE, false);
            if let Some(block) = self.data.blocks.get_mut(&address.block()) {
                block.adjust_pending_undo_release(-1);
            }
            let row = self.data.row_at(address).expect("undone row readable");
            self.data
                .insert_into_indexes(&row, address)
                .expect("reinserting an undone tuple cannot collide");
            self.data.visible_tuple_count += 1;
        }
    }

    /// Run compaction passes until no productive pairing remains.
    pub fn force_compaction(&mut self) {
        while self.compaction_pass() {}
    }

    /// At most one compaction pairing, for idle housekeeping.
    pub fn idle_compaction(&mut self) {
        self.compaction_pass();
    }

    /// Pick a pairing from either bucket family. Pending and not-pending
    /// blocks each compact among themselves, so a live snapshot keeps its
    /// unscanned rows inside the unscanned block set.
    fn pick_compaction_pair(&self) -> Option<(BlockId, BlockId)> {
        self.pick_pair_in_subset(&self.data.buckets)
            .or_else(|| self.pick_pair_in_subset(&self.data.pending_buckets))
    }

    fn pick_pair_in_subset(&self, buckets: &[BTreeSet<BlockId>]) -> Option<(BlockId, BlockId)> {
        let source = buckets.iter().flat_map(|bucket| bucket.iter()).next().copied()?;
        // Fullest block that still has free slots, scanning buckets from
        // the top; never the source itself.
        let target = buckets
            .iter()
            .rev()
            .flat_map(|bucket| bucket.iter())
            .copied()
            .find(|&id| {
                id != source
                    && self
                        .data
                        .block(id)
                        .map(|b| b.has_free_tuples())
                        .unwrap_or(false)
            })?;
        Some((source, target))
    }

    /// Move tuples from the emptiest block into the fullest until one of
    /// them is exhausted. Returns whether the pass made progress, either by
    /// moving tuples or by reaping an emptied block.
    fn compaction_pass(&mut self) -> bool {
        let Some((source_id, target_id)) = self.pick_compaction_pair() else {
            return false;
        };
        let mut moved_any = false;
        let boundary = match self.data.block(source_id) {
            Some(block) => block.unused_tuple_boundary(),
            None => return false,
        };
        for slot in 0..boundary {
            let source_address = TupleAddress::new(source_id, slot);
            let flags = self.data.flags_at(source_address);
            if !flags.contains(TupleFlags::ACTIVE) {
                continue;
            }
            let target_has_space = self
                .data
                .block(target_id)
                .map(|b| b.has_free_tuples())
                .unwrap_or(false);
            if !target_has_space {
                break;
            }
            let destination = {
                let block = self.data.blocks.get_mut(&target_id).unwrap();
                let (dst_slot, change) = block.next_free_tuple().expect("target has space");
                self.data.apply_bucket_change(target_id, change);
                self.data.refresh_space_tracking(target_id);
                TupleAddress::new(target_id, dst_slot)
            };
            // Copy the whole slot image, flags included.
            {
                let source_image = self
                    .data
                    .blocks
                    .get(&source_id)
                    .unwrap()
                    .slot(slot)
                    .to_vec();
                let block = self.data.blocks.get_mut(&target_id).unwrap();
                block.slot_mut(destination.slot()).copy_from_slice(&source_image);
                if flags.contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE) {
                    block.adjust_pending_undo_release(1);
                    self.data
                        .blocks
                        .get_mut(&source_id)
                        .unwrap()
                        .adjust_pending_undo_release(-1);
                }
            }
            let row = self.data.row_at(destination).expect("moved row readable");
            self.data
                .reindex_moved_tuple(&row, source_address, destination);
            self.data.rewrite_undo_address(source_address, destination);
            {
                // Drop the source slot without the destroy-block logic;
                // the block is reaped below once the loop is done.
                let block = self.data.blocks.get_mut(&source_id).unwrap();
                block.slot_mut(slot)[0] = 0;
                let change = block.free_tuple(slot);
                self.data.apply_bucket_change(source_id, change);
                self.data.refresh_space_tracking(source_id);
            }
            self.with_streamer(|table, streamer| {
                streamer.notify_tuple_movement(table, source_address, destination);
            });
            moved_any = true;
        }
        let source_empty = self
            .data
            .block(source_id)
            .map(|b| b.is_empty())
            .unwrap_or(false);
        if source_empty {
            debug!(
                table = %self.name,
                block = source_id.0,
                "block compacted away"
            );
            if let Some(streamer) = &mut self.streamer {
                streamer.notify_block_compacted_away(source_id);
            }
            self.data.destroy_block(source_id);
        }
        moved_any || source_empty
    }

    /// Remove all rows, preserving schema and indexes definitions, and give
    /// the streamer a chance to survive into the truncated table.
    pub fn truncate(&mut self) {
        self.data.blocks.clear();
        self.data.blocks_with_space.clear();
        for bucket in &mut self.data.buckets {
            bucket.clear();
        }
        for bucket in &mut self.data.pending_buckets {
            bucket.clear();
        }
        self.data.visible_tuple_count = 0;
        self.data.pending_snapshot_block_count = 0;
        self.data.undo_actions.clear();
        let names: Vec<(String, Vec<usize>, Vec<emberdb_common::tuple::ColumnSpec>, bool)> = self
            .data
            .indexes
            .iter()
            .map(|index| {
                (
                    index.name().to_owned(),
                    index.key_columns().to_vec(),
                    index.key_spec().to_vec(),
                    index.is_unique(),
                )
            })
            .collect();
        self.data.indexes = names
            .into_iter()
            .map(|(name, columns, spec, unique)| {
                Box::new(crate::index::BtreeIndex::new(name, columns, spec, unique)) as BoxedIndex
            })
            .collect();
        self.data.elastic = None;
        if let Some(streamer) = self.streamer.take() {
            self.streamer = streamer.clone_for_truncated_table(self);
        }
    }

    /// Run `f` with the streamer detached from the table, so notification
    /// handlers can reach back into the table without aliasing it.
    pub(crate) fn with_streamer<R: StreamerCallbackResult>(
        &mut self,
        f: impl FnOnce(&mut PersistentTable, &mut TableStreamer) -> R,
    ) -> R {
        match self.streamer.take() {
            Some(mut streamer) => {
                let result = f(self, &mut streamer);
                self.streamer = Some(streamer);
                result
            }
            None => R::default_result(),
        }
    }
}

/// Default results for notification fan-out when no streamer is attached.
pub trait StreamerCallbackResult {
    fn default_result() -> Self;
}

impl StreamerCallbackResult for () {
    fn default_result() -> Self {}
}

impl StreamerCallbackResult for bool {
    fn default_result() -> Self {
        true
    }
}
