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

//! The copy-on-write snapshot context: a bit-consistent scan of the table
//! as of activation time, concurrent with mutation and compaction. Rows the
//! scan has not reached are preserved on mutation, either in place (dirty
//! marking, deferred deletes) or by deep copy into a backup temp table.

use std::collections::BTreeSet;
use std::ops::Bound;

use emberdb_common::tuple::TupleFlags;
use emberdb_expr::StreamPredicateList;
use tracing::{error, warn};

use crate::block::{BlockId, TupleAddress};
use crate::output_stream::{HiddenColumnFilter, TupleOutputStreamProcessor, TupleSerializer};
use crate::replicated_resource_guard;
use crate::table::PersistentTable;
use crate::temp_table::TempTable;
use crate::streamer::{
    ActivationCode, TableStreamType, TableStreamerContext, STREAM_SERIALIZATION_ERROR,
};

/// The snapshot scan cursor: visits every pending block in address order,
/// slot indices `0..unused_tuple_boundary`, re-resolving through the block
/// map on every step so compaction notifications stay cheap.
pub struct CopyOnWriteIterator {
    /// Pending blocks this scan still owes, in address order.
    view: BTreeSet<BlockId>,
    current_block: Option<BlockId>,
    /// Next slot ordinal to visit in the current block.
    block_offset: u32,
    pub skipped_dirty_rows: u64,
    pub skipped_inactive_rows: u64,
}

impl CopyOnWriteIterator {
    pub(crate) fn new(table: &mut PersistentTable) -> Self {
        let view: BTreeSet<BlockId> = table.data().block_ids().collect();
        let current_block = view.iter().next().copied();
        if let Some(current) = current_block {
            table.surgeon().snapshot_started_scanning_block(current);
        }
        Self {
            view,
            current_block,
            block_offset: 0,
            skipped_dirty_rows: 0,
            skipped_inactive_rows: 0,
        }
    }

    /// Whether a mutation at `address` touches a row this scan has not yet
    /// passed, meaning the pre-image must be preserved.
    pub fn need_to_dirty_tuple(&self, address: TupleAddress) -> bool {
        let Some(current) = self.current_block else {
            return false;
        };
        if !self.view.contains(&address.block()) {
            // A post-activation block, or one the scan already finished.
            return false;
        }
        if address.block() > current {
            return true;
        }
        address.block() == current && address.slot() >= self.block_offset
    }

    /// Advance to the next active, clean tuple. Dirty tuples are skipped
    /// and washed clean so the next snapshot can pick them up; finished
    /// blocks are handed back to the table through the surgeon.
    pub(crate) fn next(&mut self, table: &mut PersistentTable) -> Option<TupleAddress> {
        loop {
            let current = self.current_block?;
            let boundary = match table.data().block(current) {
                Some(block) => block.unused_tuple_boundary(),
                None => 0,
            };
            if self.block_offset >= boundary {
                self.view.remove(&current);
                table.surgeon().snapshot_finished_scanning_block(current);
                self.current_block = self
                    .view
                    .range((Bound::Excluded(current), Bound::Unbounded))
                    .next()
                    .copied();
                self.block_offset = 0;
                if let Some(next) = self.current_block {
                    table.surgeon().snapshot_started_scanning_block(next);
                }
                continue;
            }
            let address = TupleAddress::new(current, self.block_offset);
            self.block_offset += 1;
            let flags = table.data().flags_at(address);
            let active = flags.contains(TupleFlags::ACTIVE);
            let dirty = flags.contains(TupleFlags::DIRTY);
            if dirty {
                self.skipped_dirty_rows += 1;
                table.surgeon().set_tuple_dirty(address, false);
            }
            if !active {
                self.skipped_inactive_rows += 1;
            }
            if active && !dirty {
                return Some(address);
            }
        }
    }

    /// Drop a block from the remaining view after it was compacted away.
    /// The current block is pinned out of the buckets, so the first branch
    /// is defensive only.
    pub(crate) fn notify_block_compacted_away(&mut self, block: BlockId) {
        if Some(block) == self.current_block {
            self.current_block = self
                .view
                .range((Bound::Excluded(block), Bound::Unbounded))
                .next()
                .copied();
            self.block_offset = 0;
        }
        self.view.remove(&block);
    }

    /// Count the tuples the table-scan phase still owes. Diagnostic only.
    pub(crate) fn count_remaining(&self, table: &PersistentTable) -> i64 {
        let mut count = 0i64;
        let mut offset = self.block_offset;
        let mut block = self.current_block;
        while let Some(current) = block {
            if let Some(b) = table.data().block(current) {
                for slot in offset..b.unused_tuple_boundary() {
                    let flags = table.data().flags_at(TupleAddress::new(current, slot));
                    if flags.contains(TupleFlags::ACTIVE) && !flags.contains(TupleFlags::DIRTY) {
                        count += 1;
                    }
                }
            }
            block = self
                .view
                .range((Bound::Excluded(current), Bound::Unbounded))
                .next()
                .copied();
            offset = 0;
        }
        count
    }
}

/// The snapshot streaming context.
pub struct CopyOnWriteContext {
    partition_id: i32,
    predicates: StreamPredicateList,
    iterator: Option<CopyOnWriteIterator>,
    /// Pre-images preserved for rows mutated before the scan reached them.
    backed_up_tuples: TempTable,
    /// Rows of the backup table already streamed in earlier batches.
    backup_position: usize,
    finished_table_scan: bool,
    total_tuples: i64,
    tuples_remaining: i64,
    serialization_batches: u64,
    blocks_compacted: u64,
    inserts: u64,
    updates: u64,
    deletes: u64,
    skipped_dirty_rows: u64,
    skipped_inactive_rows: u64,
    replicated: bool,
}

impl CopyOnWriteContext {
    pub(crate) fn new(
        table: &PersistentTable,
        partition_id: i32,
        predicate_blobs: &[String],
    ) -> emberdb_common::Result<Self> {
        let predicates = StreamPredicateList::parse(predicate_blobs)?;
        let replicated = table.is_replicated();
        let backed_up_tuples = {
            let _guard = replicated.then(replicated_resource_guard);
            TempTable::new(
                format!("COW of {}", table.name()),
                table.schema().clone(),
                table.data().tuples_per_block(),
            )
        };
        Ok(Self {
            partition_id,
            predicates,
            iterator: None,
            backed_up_tuples,
            backup_position: 0,
            finished_table_scan: false,
            total_tuples: 0,
            tuples_remaining: 0,
            serialization_batches: 0,
            blocks_compacted: 0,
            inserts: 0,
            updates: 0,
            deletes: 0,
            skipped_dirty_rows: 0,
            skipped_inactive_rows: 0,
            replicated,
        })
    }

    /// Test hook: stop counting down and report `i64::MAX` while tuples
    /// remain, as the sentinel-disabled mode does.
    pub fn disable_tuple_counting(&mut self) {
        self.total_tuples = -1;
        self.tuples_remaining = -1;
    }

    fn mark_tuple_dirty(&mut self, table: &mut PersistentTable, address: TupleAddress, new: bool) {
        if self.iterator.is_none() {
            return;
        }
        if !new && table.data().flags_at(address).contains(TupleFlags::DIRTY) {
            // Already dirty, already preserved.
            return;
        }
        if self.finished_table_scan {
            table.surgeon().set_tuple_dirty(address, false);
            return;
        }
        let needs_dirty = self
            .iterator
            .as_ref()
            .map(|iter| iter.need_to_dirty_tuple(address))
            .unwrap_or(false);
        if !needs_dirty {
            table.surgeon().set_tuple_dirty(address, false);
            return;
        }
        table.surgeon().set_tuple_dirty(address, true);
        if new {
            // A newly introduced tuple has no pre-image to preserve.
            self.inserts += 1;
        } else {
            self.updates += 1;
            self.back_up_tuple(table, address);
        }
    }

    fn back_up_tuple(&mut self, table: &PersistentTable, address: TupleAddress) {
        if let Some(row) = table.data().row_at(address) {
            let _guard = self.replicated.then(replicated_resource_guard);
            self.backed_up_tuples
                .insert_row(&row)
                .expect("backup of a stored row cannot fail");
        }
    }

    fn log_residual_and_fail(&mut self, table: &mut PersistentTable) -> i64 {
        let pending = table.data().pending_snapshot_block_count();
        error!(
            table = %table.name(),
            total_tuples = self.total_tuples,
            active_tuples = table.visible_tuple_count(),
            remaining = self.tuples_remaining,
            pending_blocks = pending,
            compacted_blocks = self.blocks_compacted,
            dirty_inserts = self.inserts,
            dirty_deletes = self.deletes,
            dirty_updates = self.updates,
            skipped_dirty = self.skipped_dirty_rows,
            skipped_inactive = self.skipped_inactive_rows,
            "tuple count > 0 after streaming; returning blocks to the not-pending set"
        );
        // Make the block sets pristine for the next snapshot attempt.
        table.surgeon().release_all_pending_blocks();
        self.tuples_remaining = 0;
        STREAM_SERIALIZATION_ERROR
    }
}

impl TableStreamerContext for CopyOnWriteContext {
    fn handle_activation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        if stream_type != TableStreamType::Snapshot {
            return ActivationCode::Unsupported;
        }
        {
            let surgeon = table.surgeon();
            if surgeon.has_index() && !surgeon.is_indexing_complete() {
                warn!(
                    table = %table.name(),
                    "snapshot activation is not allowed while elastic indexing is in progress"
                );
                return ActivationCode::Failed;
            }
        }
        self.total_tuples = table.visible_tuple_count() as i64;
        self.tuples_remaining = self.total_tuples;
        table.surgeon().activate_snapshot();
        self.iterator = Some(CopyOnWriteIterator::new(table));
        ActivationCode::Succeeded
    }

    fn handle_reactivation(
        &mut self,
        _table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        // A second concurrent snapshot is not supported.
        if stream_type == TableStreamType::Snapshot {
            ActivationCode::Failed
        } else {
            ActivationCode::Unsupported
        }
    }

    fn handle_deactivation(&mut self, _stream_type: TableStreamType) -> bool {
        // Fully drained snapshots have nothing left to maintain.
        false
    }

    fn handle_stream_more(
        &mut self,
        table: &mut PersistentTable,
        outputs: &mut TupleOutputStreamProcessor,
    ) -> i64 {
        if self.iterator.is_none() {
            error!(table = %table.name(), "snapshot streaming was invoked without activation");
            return STREAM_SERIALIZATION_ERROR;
        }
        if self.total_tuples != 0 && self.tuples_remaining == 0 {
            error!(
                table = %table.name(),
                "stream_more() called again after streaming completed"
            );
            return STREAM_SERIALIZATION_ERROR;
        }
        if outputs.is_empty() {
            error!(table = %table.name(), "stream_more() expects at least one output stream");
            return STREAM_SERIALIZATION_ERROR;
        }
        let schema = table.schema().clone();
        let max_tuple_length = TupleSerializer::max_serialized_size(&schema);
        if outputs
            .open(
                max_tuple_length,
                self.partition_id,
                self.predicates.clone(),
                self.predicates.delete_flags(),
                table.config().bytes_serialized_threshold,
            )
            .is_err()
        {
            return STREAM_SERIALIZATION_ERROR;
        }

        let filter = HiddenColumnFilter::none();
        let mut failed = false;
        let mut should_yield = false;
        {
            let _guard = self.replicated.then(replicated_resource_guard);
            while !should_yield && !failed {
                // Phase one scans the live table; phase two drains the
                // backed-up pre-images.
                let next = if self.finished_table_scan {
                    None
                } else {
                    self.iterator
                        .as_mut()
                        .expect("iterator present")
                        .next(table)
                };
                if let Some(address) = next {
                    if self.tuples_remaining > 0 {
                        self.tuples_remaining -= 1;
                    }
                    let row = match table.data().row_at(address) {
                        Some(row) => row,
                        None => {
                            failed = true;
                            continue;
                        }
                    };
                    let (stream_full, delete_tuple) =
                        match outputs.write_row(&schema, &row, &filter) {
                            Ok(result) => result,
                            Err(e) => {
                                error!(table = %table.name(), error = %e, "snapshot row serialization failed");
                                failed = true;
                                continue;
                            }
                        };
                    should_yield = stream_full;
                    let flags = table.data().flags_at(address);
                    if flags.contains(TupleFlags::PENDING_DELETE) {
                        // The scan owed this row its pre-image; now that it
                        // has been emitted, the deferred delete completes.
                        table.surgeon().delete_tuple_storage(address);
                    } else if delete_tuple {
                        let _ = table.delete_tuple_for_undo(address);
                    }
                } else if !self.finished_table_scan {
                    self.finished_table_scan = true;
                    let iterator = self.iterator.as_ref().expect("iterator present");
                    self.skipped_dirty_rows = iterator.skipped_dirty_rows;
                    self.skipped_inactive_rows = iterator.skipped_inactive_rows;
                } else {
                    // Drain the backup table from where the last batch
                    // stopped.
                    let row = self
                        .backed_up_tuples
                        .iter_rows()
                        .nth(self.backup_position);
                    match row {
                        Some(row) => {
                            self.backup_position += 1;
                            if self.tuples_remaining > 0 {
                                self.tuples_remaining -= 1;
                            }
                            match outputs.write_row(&schema, &row, &filter) {
                                Ok((stream_full, _)) => should_yield = stream_full,
                                Err(e) => {
                                    error!(table = %table.name(), error = %e, "snapshot row serialization failed");
                                    failed = true;
                                }
                            }
                        }
                        None => {
                            let pending = table.data().pending_snapshot_block_count();
                            if self.tuples_remaining > 0 || pending > 0 {
                                outputs.close();
                                return self.log_residual_and_fail(table);
                            }
                            if self.tuples_remaining < 0 {
                                // Counting was disabled; force completion.
                                self.tuples_remaining = 0;
                            }
                            should_yield = true;
                        }
                    }
                }
                if self.tuples_remaining == 0 {
                    should_yield = true;
                }
            }
        }

        outputs.close();
        self.serialization_batches += 1;
        if failed {
            return STREAM_SERIALIZATION_ERROR;
        }
        if self.tuples_remaining < 0 {
            i64::MAX
        } else {
            self.tuples_remaining
        }
    }

    fn update_predicates(
        &mut self,
        _table: &PersistentTable,
        predicate_blobs: &[String],
    ) -> emberdb_common::Result<()> {
        self.predicates = StreamPredicateList::parse(predicate_blobs)?;
        Ok(())
    }

    fn notify_tuple_insert(&mut self, table: &mut PersistentTable, address: TupleAddress) -> bool {
        self.mark_tuple_dirty(table, address, true);
        true
    }

    fn notify_tuple_update(&mut self, table: &mut PersistentTable, address: TupleAddress) -> bool {
        self.mark_tuple_dirty(table, address, false);
        true
    }

    fn notify_tuple_delete(&mut self, table: &mut PersistentTable, address: TupleAddress) -> bool {
        let Some(iterator) = self.iterator.as_ref() else {
            return true;
        };
        if table.data().flags_at(address).contains(TupleFlags::DIRTY) || self.finished_table_scan {
            // Already preserved, or past the scan; free away.
            return true;
        }
        self.deletes += 1;
        if !iterator.need_to_dirty_tuple(address) {
            return true;
        }
        if self.replicated {
            // Replicated tables preserve the pre-image eagerly and let the
            // free proceed.
            self.back_up_tuple(table, address);
            true
        } else {
            false
        }
    }

    fn notify_block_compacted_away(&mut self, block: BlockId) {
        if self.finished_table_scan {
            // Compaction during the backup-table phase concerns live table
            // blocks only; nothing to adjust.
            return;
        }
        self.blocks_compacted += 1;
        if let Some(iterator) = self.iterator.as_mut() {
            iterator.notify_block_compacted_away(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_remaining_matches_activation_total() {
        let mut table = crate::test_support::int_table("cow_count", 8);
        for v in 0..20 {
            table
                .insert_row(&crate::test_support::int_row(v))
                .unwrap();
        }
        table.surgeon().activate_snapshot();
        let iterator = CopyOnWriteIterator::new(&mut table);
        assert_eq!(iterator.count_remaining(&table), 20);
        table.surgeon().release_all_pending_blocks();
    }
}
