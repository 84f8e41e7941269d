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

//! The recovery context ships every tuple of a table once, framed as
//! `{1-byte type, 4-byte tableId, 4-byte allocatedTupleCount, payload}`
//! messages, and terminates with a `Complete` message. The host guarantees
//! the table is not mutated while recovery runs.

use byteorder::{BigEndian, WriteBytesExt};
use tracing::error;

use crate::block::TupleAddress;
use crate::output_stream::{HiddenColumnFilter, TupleOutputStreamProcessor, TupleSerializer};
use crate::table::PersistentTable;
use crate::streamer::{
    ActivationCode, TableStreamType, TableStreamerContext, STREAM_SERIALIZATION_ERROR,
};

/// Recovery wire message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecoveryMessageType {
    ScanTuples = 0,
    Complete = 1,
}

pub struct RecoveryContext {
    table_id: i32,
    _partition_id: i32,
    /// Captured on the first `stream_more` and assumed stable: the host
    /// blocks schema and table mutations for the duration of recovery.
    addresses: Option<Vec<TupleAddress>>,
    cursor: usize,
    complete_sent: bool,
}

impl RecoveryContext {
    pub(crate) fn new(table_id: i32, partition_id: i32) -> Self {
        Self {
            table_id,
            _partition_id: partition_id,
            addresses: None,
            cursor: 0,
            complete_sent: false,
        }
    }

    fn write_header(
        &self,
        out: &mut Vec<u8>,
        message_type: RecoveryMessageType,
        allocated_tuple_count: u32,
    ) {
        out.push(message_type as u8);
        out.write_i32::<BigEndian>(self.table_id).unwrap();
        if message_type == RecoveryMessageType::ScanTuples {
            out.write_u32::<BigEndian>(allocated_tuple_count).unwrap();
        }
    }
}

impl TableStreamerContext for RecoveryContext {
    fn handle_activation(
        &mut self,
        _table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        if stream_type == TableStreamType::Recovery {
            ActivationCode::Succeeded
        } else {
            ActivationCode::Unsupported
        }
    }

    fn handle_reactivation(
        &mut self,
        _table: &mut PersistentTable,
        stream_type: TableStreamType,
        _active_types: &[TableStreamType],
    ) -> ActivationCode {
        // One recovery pass at a time.
        if stream_type == TableStreamType::Recovery {
            ActivationCode::Failed
        } else {
            ActivationCode::Unsupported
        }
    }

    fn handle_deactivation(&mut self, _stream_type: TableStreamType) -> bool {
        !self.complete_sent
    }

    fn handle_stream_more(
        &mut self,
        table: &mut PersistentTable,
        outputs: &mut TupleOutputStreamProcessor,
    ) -> i64 {
        if outputs.len() != 1 {
            error!(
                table = %table.name(),
                streams = outputs.len(),
                "recovery expects exactly one output stream"
            );
            return STREAM_SERIALIZATION_ERROR;
        }
        if self.complete_sent {
            return 0;
        }
        if self.addresses.is_none() {
            self.addresses = Some(
                table
                    .iter_visible()
                    .map(|(address, _)| address)
                    .collect(),
            );
        }
        let addresses = self.addresses.as_ref().expect("capture above");
        let schema = table.schema().clone();
        let allocated = table.allocated_tuple_count() as u32;
        let max_tuple_length = TupleSerializer::max_serialized_size(&schema);
        let filter = HiddenColumnFilter::none();

        if self.cursor >= addresses.len() {
            let stream = outputs.stream_mut(0);
            self.write_header(stream.buffer_mut(), RecoveryMessageType::Complete, 0);
            self.complete_sent = true;
            return 0;
        }

        {
            let stream = outputs.stream_mut(0);
            self.write_header(stream.buffer_mut(), RecoveryMessageType::ScanTuples, allocated);
        }
        while self.cursor < addresses.len() {
            if !outputs.stream_mut(0).can_fit(max_tuple_length) {
                break;
            }
            let address = addresses[self.cursor];
            let Some(row) = table.data().row_at(address) else {
                error!(table = %table.name(), %address, "recovery tuple storage is gone");
                return STREAM_SERIALIZATION_ERROR;
            };
            let stream = outputs.stream_mut(0);
            if TupleSerializer::serialize_row(&schema, &row, &filter, stream.buffer_mut()).is_err()
            {
                return STREAM_SERIALIZATION_ERROR;
            }
            self.cursor += 1;
        }
        1
    }

    fn update_predicates(
        &mut self,
        _table: &PersistentTable,
        _predicate_blobs: &[String],
    ) -> emberdb_common::Result<()> {
        Ok(())
    }
}
