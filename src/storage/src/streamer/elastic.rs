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

//! The elastic index build context. Populates a `(hash, address)` index
//! over rows matching a hash-range predicate while the table keeps moving;
//! once built, the index is maintained incrementally through mutation
//! notifications until it is consumed and cleared.

use std::collections::BTreeSet;

use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::TupleFlags;
use emberdb_common::types::partition_hash;
use emberdb_common::{EngineError, Result};
use emberdb_expr::StreamPredicateList;
use tracing::{error, info, warn};

use crate::block::{BlockId, TupleAddress};
use crate::output_stream::TupleOutputStreamProcessor;
use crate::table::PersistentTable;
use crate::streamer::{
    ActivationCode, TableStreamType, TableStreamerContext, STREAM_SERIALIZATION_ERROR,
};

/// A table scan without copy-on-write bookkeeping: it walks the live block
/// map in address order, remembers which blocks it has seen, and finishes
/// when no unseen block remains. Compaction is absorbed by re-resolving
/// through the block map on every step.
pub struct ElasticScanner {
    scanned_blocks: BTreeSet<BlockId>,
    current_block: Option<BlockId>,
    tuple_index: u32,
    scan_complete: bool,
}

impl ElasticScanner {
    pub(crate) fn new() -> Self {
        Self {
            scanned_blocks: BTreeSet::new(),
            current_block: None,
            tuple_index: 0,
            scan_complete: false,
        }
    }

    pub fn is_scan_complete(&self) -> bool {
        self.scan_complete
    }

    pub(crate) fn next(&mut self, table: &PersistentTable) -> Option<TupleAddress> {
        loop {
            if self.scan_complete {
                return None;
            }
            let boundary = self
                .current_block
                .and_then(|id| table.data().block(id))
                .map(|block| block.unused_tuple_boundary())
                .unwrap_or(0);
            if self.current_block.is_none() || self.tuple_index >= boundary {
                // Shift to the first block this scan has not yet visited.
                let next = table
                    .data()
                    .block_ids()
                    .find(|id| !self.scanned_blocks.contains(id));
                match next {
                    Some(id) => {
                        self.scanned_blocks.insert(id);
                        self.current_block = Some(id);
                        self.tuple_index = 0;
                        continue;
                    }
                    None => {
                        self.scan_complete = true;
                        return None;
                    }
                }
            }
            let address = TupleAddress::new(self.current_block.unwrap(), self.tuple_index);
            self.tuple_index += 1;
            let flags = table.data().flags_at(address);
            if flags.contains(TupleFlags::ACTIVE) && !flags.contains(TupleFlags::DIRTY) {
                return Some(address);
            }
        }
    }
}

/// The elastic index build context.
pub struct ElasticContext {
    partition_id: i32,
    predicates: StreamPredicateList,
    /// Retained so the context can rebuild itself after TRUNCATE TABLE.
    predicate_blobs: Vec<String>,
    tuples_per_call: usize,
    scanner: Option<ElasticScanner>,
    index_active: bool,
}

impl ElasticContext {
    pub(crate) fn new(
        table: &PersistentTable,
        partition_id: i32,
        predicate_blobs: &[String],
    ) -> Result<Self> {
        if predicate_blobs.len() != 1 {
            return Err(EngineError::activation_failed(
                "elastic index build expects a single predicate",
            ));
        }
        let predicates = StreamPredicateList::parse(predicate_blobs)?;
        Ok(Self {
            partition_id,
            predicates,
            predicate_blobs: predicate_blobs.to_vec(),
            tuples_per_call: table.config().elastic_tuples_per_call,
            scanner: None,
            index_active: false,
        })
    }

    fn row_hash(&self, table: &PersistentTable, row: &OwnedRow) -> i32 {
        let column = table
            .partition_column()
            .or_else(|| self.predicates.first_hash_range().map(|r| r.column))
            .unwrap_or(0);
        partition_hash(&row.datum_at(column))
    }

    fn accepts(&self, row: &OwnedRow) -> bool {
        match self.predicates.get(0) {
            Some(predicate) => predicate.accepts(row).unwrap_or(false),
            None => false,
        }
    }
}

impl TableStreamerContext for ElasticContext {
    fn handle_activation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        active_types: &[TableStreamType],
    ) -> ActivationCode {
        match stream_type {
            TableStreamType::ElasticIndex => {
                // Indexing cannot begin while a snapshot scan is relying on
                // block pendingness.
                if active_types.contains(&TableStreamType::Snapshot) {
                    warn!(
                        table = %table.name(),
                        "elastic index activation is not allowed while a snapshot is in progress"
                    );
                    return ActivationCode::Failed;
                }
                if table.surgeon().has_index() {
                    info!(
                        table = %table.name(),
                        "activating elastic index build for an index that already exists"
                    );
                    return ActivationCode::Succeeded;
                }
                table.surgeon().create_index();
                if let Some(elastic) = table.surgeon().data_mut().elastic_mut() {
                    elastic.predicate = self.predicates.first_hash_range().cloned();
                }
                self.scanner = Some(ElasticScanner::new());
                self.index_active = true;
                ActivationCode::Succeeded
            }
            TableStreamType::ElasticIndexClear => {
                if table.surgeon().has_index() {
                    if !table.surgeon().is_index_empty() {
                        let table_name = table.name().to_string();
                        error!(
                            table = %table_name,
                            remaining = table.surgeon().index_size(),
                            "elastic index clear refused while the index still has keys"
                        );
                        return ActivationCode::Failed;
                    }
                    self.predicates = StreamPredicateList::default();
                    self.predicate_blobs.clear();
                    table.surgeon().drop_index();
                    self.scanner = None;
                    self.index_active = false;
                }
                ActivationCode::Succeeded
            }
            _ => ActivationCode::Unsupported,
        }
    }

    fn handle_reactivation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        active_types: &[TableStreamType],
    ) -> ActivationCode {
        self.handle_activation(table, stream_type, active_types)
    }

    fn handle_deactivation(&mut self, _stream_type: TableStreamType) -> bool {
        // Stay resident to maintain the index.
        true
    }

    fn handle_stream_more(
        &mut self,
        table: &mut PersistentTable,
        _outputs: &mut TupleOutputStreamProcessor,
    ) -> i64 {
        if !table.surgeon().has_index() {
            error!(
                table = %table.name(),
                "elastic streaming was invoked without proper activation"
            );
            return STREAM_SERIALIZATION_ERROR;
        }
        if table.surgeon().is_indexing_complete() {
            info!(table = %table.name(), "indexing was already complete");
            return 0;
        }
        let Some(mut scanner) = self.scanner.take() else {
            error!(table = %table.name(), "elastic scanner missing during index build");
            return STREAM_SERIALIZATION_ERROR;
        };
        // Table changes during and after this batch arrive as
        // notifications; the scan only has to cover what it can see.
        for _ in 0..self.tuples_per_call {
            let Some(address) = scanner.next(table) else {
                break;
            };
            let Some(row) = table.data().row_at(address) else {
                continue;
            };
            if self.accepts(&row) {
                let hash = self.row_hash(table, &row);
                table.surgeon().index_add(hash, address);
            }
        }
        let complete = scanner.is_scan_complete();
        self.scanner = Some(scanner);
        if complete {
            table.surgeon().set_indexing_complete();
            0
        } else {
            1
        }
    }

    fn update_predicates(
        &mut self,
        table: &PersistentTable,
        predicate_blobs: &[String],
    ) -> Result<()> {
        let new = StreamPredicateList::parse(predicate_blobs)?;
        if let (Some(existing), Some(requested)) =
            (self.predicates.first_hash_range(), new.first_hash_range())
        {
            // The index answers reads for the ranges it was built under;
            // a wider request would silently miss rows.
            if !existing.covers(requested) {
                return Err(EngineError::activation_failed(format!(
                    "elastic index on {} already exists with conflicting ranges",
                    table.name()
                )));
            }
        }
        self.predicate_blobs = predicate_blobs.to_vec();
        self.predicates = new;
        Ok(())
    }

    fn notify_tuple_insert(&mut self, table: &mut PersistentTable, address: TupleAddress) -> bool {
        if self.index_active {
            if let Some(row) = table.data().row_at(address) {
                if self.accepts(&row) {
                    let hash = self.row_hash(table, &row);
                    table.surgeon().index_add(hash, address);
                }
            }
        }
        true
    }

    fn notify_tuple_update(&mut self, _table: &mut PersistentTable, _address: TupleAddress) -> bool {
        // The address is unchanged and the hash cannot move a row.
        true
    }

    fn notify_tuple_delete(&mut self, table: &mut PersistentTable, address: TupleAddress) -> bool {
        if self.index_active {
            if let Some(row) = table.data().row_at(address) {
                let hash = self.row_hash(table, &row);
                if table.surgeon().index_has(hash, address) {
                    table.surgeon().index_remove(hash, address);
                }
            }
        }
        true
    }

    fn notify_tuple_movement(
        &mut self,
        table: &mut PersistentTable,
        source: TupleAddress,
        destination: TupleAddress,
    ) {
        if !self.index_active {
            return;
        }
        let Some(row) = table.data().row_at(destination) else {
            return;
        };
        let hash = self.row_hash(table, &row);
        if table.surgeon().index_has(hash, source) {
            table.surgeon().index_remove(hash, source);
        }
        // A tuple held only for a snapshot scan was already deleted and
        // unindexed; its move must not resurrect it.
        let flags = table.data().flags_at(destination);
        if flags.contains(TupleFlags::PENDING_DELETE) {
            return;
        }
        if self.accepts(&row) {
            table.surgeon().index_add(hash, destination);
        }
    }

    fn clone_for_truncated_table(
        &self,
        table: &mut PersistentTable,
    ) -> Option<Box<dyn TableStreamerContext>> {
        if !self.index_active {
            return None;
        }
        let mut cloned = match ElasticContext::new(table, self.partition_id, &self.predicate_blobs)
        {
            Ok(context) => context,
            Err(e) => {
                error!(table = %table.name(), error = %e, "elastic context clone failed");
                return None;
            }
        };
        let active_types: Vec<TableStreamType> = Vec::new();
        if cloned.handle_activation(table, TableStreamType::ElasticIndex, &active_types)
            != ActivationCode::Succeeded
        {
            return None;
        }
        // Rebuild over the (now empty) truncated table so the index comes
        // back complete and maintained.
        let mut dummy = TupleOutputStreamProcessor::new(Vec::new());
        loop {
            match cloned.handle_stream_more(table, &mut dummy) {
                0 => break,
                1 => continue,
                other => {
                    error!(
                        table = %table.name(),
                        code = other,
                        "unexpected return while rebuilding elastic index"
                    );
                    break;
                }
            }
        }
        Some(Box::new(cloned))
    }
}
