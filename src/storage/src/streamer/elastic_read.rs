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

//! The elastic index read context: streams every tuple whose partition
//! hash falls into one `"LO:HI"` range out of a completed elastic index,
//! then deletes the streamed tuples from the table.

use emberdb_common::tuple::TupleFlags;
use emberdb_expr::HashRange;
use tracing::{error, info};

use crate::block::TupleAddress;
use crate::output_stream::{HiddenColumnFilter, TupleOutputStreamProcessor, TupleSerializer};
use crate::table::PersistentTable;
use crate::streamer::{
    ActivationCode, TableStreamType, TableStreamerContext, STREAM_SERIALIZATION_ERROR,
};

pub struct ElasticIndexReadContext {
    partition_id: i32,
    predicate_blobs: Vec<String>,
    range: Option<HashRange>,
    /// Index keys of the range, captured at activation.
    addresses: Vec<TupleAddress>,
    cursor: usize,
    materialized: bool,
}

impl ElasticIndexReadContext {
    pub(crate) fn new(partition_id: i32, predicate_blobs: &[String]) -> Self {
        Self {
            partition_id,
            predicate_blobs: predicate_blobs.to_vec(),
            range: None,
            addresses: Vec::new(),
            cursor: 0,
            materialized: false,
        }
    }

    /// Parse the `"LO:HI"` activation blob: two ASCII signed decimal
    /// 32-bit integers, `LO <= HI`, no wrap-around.
    fn parse_hash_range(predicate_blobs: &[String]) -> Option<HashRange> {
        if predicate_blobs.len() != 1 {
            error!(
                count = predicate_blobs.len(),
                "elastic index read expects exactly one range predicate"
            );
            return None;
        }
        let blob = predicate_blobs[0].trim();
        let (low, high) = blob.split_once(':')?;
        let start: i32 = low.trim().parse().ok()?;
        let end: i32 = high.trim().parse().ok()?;
        if start > end {
            error!(start, end, "elastic index read range is inverted");
            return None;
        }
        Some(HashRange { start, end })
    }

    fn scan_underway(&self) -> bool {
        self.cursor > 0 && !self.materialized
    }

    /// After the stream is fully drained, remove the shipped tuples from
    /// the table. Undo-quantum release frees them through index
    /// notifications, which keeps the live elastic index in step.
    fn delete_streamed_tuples(&mut self, table: &mut PersistentTable) {
        for &address in &self.addresses {
            let flags = table.data().flags_at(address);
            if flags.contains(TupleFlags::ACTIVE) && !flags.contains(TupleFlags::PENDING_DELETE) {
                if let Err(e) = table.delete_tuple(address) {
                    error!(table = %table.name(), error = %e, "failed to delete streamed tuple");
                }
            }
        }
    }
}

impl TableStreamerContext for ElasticIndexReadContext {
    fn handle_activation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        if stream_type != TableStreamType::ElasticIndexRead {
            return ActivationCode::Unsupported;
        }
        if !table.surgeon().has_index() {
            info!(
                table = %table.name(),
                "elastic index read activation refused: no index exists yet"
            );
            return ActivationCode::Failed;
        }
        if !table.surgeon().is_indexing_complete() {
            error!(
                table = %table.name(),
                "elastic index read activation refused: index generation is not complete"
            );
            return ActivationCode::Failed;
        }
        let Some(range) = Self::parse_hash_range(&self.predicate_blobs) else {
            return ActivationCode::Failed;
        };
        self.addresses = table
            .data()
            .elastic()
            .expect("index presence just checked")
            .index
            .range(range)
            .map(|key| key.address)
            .collect();
        self.range = Some(range);
        self.cursor = 0;
        self.materialized = false;
        ActivationCode::Succeeded
    }

    fn handle_reactivation(
        &mut self,
        _table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        if stream_type == TableStreamType::ElasticIndexRead {
            // A scan is underway; the repeated request is absorbed with no
            // side effects.
            ActivationCode::Succeeded
        } else {
            ActivationCode::Unsupported
        }
    }

    fn handle_deactivation(&mut self, stream_type: TableStreamType) -> bool {
        // Once drained, this context is no longer needed.
        stream_type != TableStreamType::ElasticIndexRead
    }

    fn handle_stream_more(
        &mut self,
        table: &mut PersistentTable,
        outputs: &mut TupleOutputStreamProcessor,
    ) -> i64 {
        if self.range.is_none() {
            error!(
                table = %table.name(),
                "attempted to begin serialization without activating the context"
            );
            return STREAM_SERIALIZATION_ERROR;
        }
        if outputs.len() != 1 {
            error!(
                table = %table.name(),
                "elastic index read expects exactly one output stream"
            );
            return STREAM_SERIALIZATION_ERROR;
        }

        let schema = table.schema().clone();
        let mut remaining = 1i64;
        if self.cursor >= self.addresses.len() {
            remaining = 0;
        } else {
            let max_tuple_length = TupleSerializer::max_serialized_size(&schema);
            if outputs
                .open(
                    max_tuple_length,
                    self.partition_id,
                    Default::default(),
                    Vec::new(),
                    table.config().bytes_serialized_threshold,
                )
                .is_err()
            {
                return STREAM_SERIALIZATION_ERROR;
            }
            let filter = HiddenColumnFilter::none();
            let mut should_yield = false;
            while !should_yield {
                let address = self.addresses[self.cursor];
                let flags = table.data().flags_at(address);
                if flags.contains(TupleFlags::PENDING_DELETE) {
                    error!(
                        table = %table.name(),
                        "materializing a deleted tuple from the elastic index"
                    );
                    outputs.close();
                    return STREAM_SERIALIZATION_ERROR;
                }
                let Some(row) = table.data().row_at(address) else {
                    error!(table = %table.name(), %address, "indexed tuple storage is gone");
                    outputs.close();
                    return STREAM_SERIALIZATION_ERROR;
                };
                match outputs.write_row(&schema, &row, &filter) {
                    Ok((stream_full, _)) => should_yield = stream_full,
                    Err(e) => {
                        error!(table = %table.name(), error = %e, "elastic read serialization failed");
                        outputs.close();
                        return STREAM_SERIALIZATION_ERROR;
                    }
                }
                self.cursor += 1;
                if self.cursor >= self.addresses.len() {
                    should_yield = true;
                    remaining = 0;
                }
            }
            outputs.close();
        }

        if remaining <= 0 {
            self.materialized = true;
            self.delete_streamed_tuples(table);
        }
        remaining
    }

    fn update_predicates(
        &mut self,
        _table: &PersistentTable,
        predicate_blobs: &[String],
    ) -> emberdb_common::Result<()> {
        if self.scan_underway() {
            // Repeated activation mid-scan changes nothing.
            return Ok(());
        }
        self.predicate_blobs = predicate_blobs.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_blob_parsing() {
        assert_eq!(
            ElasticIndexReadContext::parse_hash_range(&["-100:200".to_owned()]),
            Some(HashRange {
                start: -100,
                end: 200
            })
        );
        assert_eq!(
            ElasticIndexReadContext::parse_hash_range(&["200:-100".to_owned()]),
            None,
            "inverted ranges are refused"
        );
        assert_eq!(
            ElasticIndexReadContext::parse_hash_range(&["nonsense".to_owned()]),
            None
        );
        assert_eq!(
            ElasticIndexReadContext::parse_hash_range(&[
                "0:1".to_owned(),
                "2:3".to_owned()
            ]),
            None,
            "exactly one range predicate"
        );
    }
}
