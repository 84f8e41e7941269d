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

//! The table streaming framework. A [`TableStreamer`] owns the live
//! streaming contexts of one table, fans mutation notifications out to all
//! of them, and routes `stream_more` calls to the context of the requested
//! stream type.

use tracing::{error, warn};

use crate::block::{BlockId, TupleAddress};
use crate::output_stream::TupleOutputStreamProcessor;
use crate::table::PersistentTable;

mod cow;
mod elastic;
mod elastic_read;
mod recovery;

pub use cow::{CopyOnWriteContext, CopyOnWriteIterator};
pub use elastic::{ElasticContext, ElasticScanner};
pub use elastic_read::ElasticIndexReadContext;
pub use recovery::{RecoveryContext, RecoveryMessageType};

/// `stream_more` return value flagging a serialization failure.
pub const STREAM_SERIALIZATION_ERROR: i64 = -1;

/// The kinds of table streams a host can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStreamType {
    Snapshot,
    ElasticIndex,
    ElasticIndexRead,
    ElasticIndexClear,
    Recovery,
}

/// Outcome of offering an activation to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationCode {
    Succeeded,
    Failed,
    Unsupported,
}

/// One live streaming context. Contexts receive the table with the streamer
/// detached, so they may freely mutate it; privileged internals go through
/// the table's surgeon.
pub trait TableStreamerContext: Send {
    /// Offered when a fresh context of this type is being activated.
    fn handle_activation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        active_types: &[TableStreamType],
    ) -> ActivationCode;

    /// Offered to every existing context before a fresh one is built.
    fn handle_reactivation(
        &mut self,
        table: &mut PersistentTable,
        stream_type: TableStreamType,
        active_types: &[TableStreamType],
    ) -> ActivationCode;

    /// After a drained `stream_more`, decide whether the context stays.
    fn handle_deactivation(&mut self, _stream_type: TableStreamType) -> bool {
        true
    }

    fn handle_stream_more(
        &mut self,
        table: &mut PersistentTable,
        outputs: &mut TupleOutputStreamProcessor,
    ) -> i64;

    /// Merge new predicates into a context that accepted a re-activation.
    fn update_predicates(
        &mut self,
        table: &PersistentTable,
        predicate_blobs: &[String],
    ) -> emberdb_common::Result<()>;

    /// Returns whether the context considers the insert handled.
    fn notify_tuple_insert(&mut self, _table: &mut PersistentTable, _address: TupleAddress) -> bool {
        true
    }

    fn notify_tuple_update(&mut self, _table: &mut PersistentTable, _address: TupleAddress) -> bool {
        true
    }

    /// Returns whether the tuple's storage may be freed now. A context that
    /// still needs the pre-image answers `false`.
    fn notify_tuple_delete(&mut self, _table: &mut PersistentTable, _address: TupleAddress) -> bool {
        true
    }

    fn notify_block_compacted_away(&mut self, _block: BlockId) {}

    fn notify_tuple_movement(
        &mut self,
        _table: &mut PersistentTable,
        _source: TupleAddress,
        _destination: TupleAddress,
    ) {
    }

    /// Clone this context onto a just-truncated table, or `None` to drop it.
    fn clone_for_truncated_table(
        &self,
        _table: &mut PersistentTable,
    ) -> Option<Box<dyn TableStreamerContext>> {
        None
    }
}

struct Stream {
    stream_type: TableStreamType,
    context: Box<dyn TableStreamerContext>,
}

/// Owns the `(stream type, context)` pairs of one table.
pub struct TableStreamer {
    partition_id: i32,
    table_id: i32,
    streams: Vec<Stream>,
}

impl TableStreamer {
    pub fn new(partition_id: i32, table_id: i32) -> Self {
        Self {
            partition_id,
            table_id,
            streams: Vec::new(),
        }
    }

    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    pub fn table_id(&self) -> i32 {
        self.table_id
    }

    pub fn active_types(&self) -> Vec<TableStreamType> {
        self.streams.iter().map(|s| s.stream_type).collect()
    }

    pub fn has_stream_type(&self, stream_type: TableStreamType) -> bool {
        self.streams.iter().any(|s| s.stream_type == stream_type)
    }

    fn take_stream(&mut self, stream_type: TableStreamType) -> Option<Stream> {
        let position = self
            .streams
            .iter()
            .position(|s| s.stream_type == stream_type)?;
        Some(self.streams.remove(position))
    }

    pub(crate) fn notify_tuple_insert(
        &mut self,
        table: &mut PersistentTable,
        address: TupleAddress,
    ) {
        for stream in &mut self.streams {
            stream.context.notify_tuple_insert(table, address);
        }
    }

    pub(crate) fn notify_tuple_update(
        &mut self,
        table: &mut PersistentTable,
        address: TupleAddress,
    ) {
        for stream in &mut self.streams {
            stream.context.notify_tuple_update(table, address);
        }
    }

    /// A delete may free storage only when every context permits it.
    pub(crate) fn notify_tuple_delete(
        &mut self,
        table: &mut PersistentTable,
        address: TupleAddress,
    ) -> bool {
        let mut can_free = true;
        for stream in &mut self.streams {
            can_free &= stream.context.notify_tuple_delete(table, address);
        }
        can_free
    }

    pub(crate) fn notify_block_compacted_away(&mut self, block: BlockId) {
        for stream in &mut self.streams {
            stream.context.notify_block_compacted_away(block);
        }
    }

    pub(crate) fn notify_tuple_movement(
        &mut self,
        table: &mut PersistentTable,
        source: TupleAddress,
        destination: TupleAddress,
    ) {
        for stream in &mut self.streams {
            stream.context.notify_tuple_movement(table, source, destination);
        }
    }

    /// Rebuild this streamer for a truncated table, keeping only the
    /// contexts that survive truncation.
    pub(crate) fn clone_for_truncated_table(
        mut self,
        table: &mut PersistentTable,
    ) -> Option<TableStreamer> {
        let mut clone = TableStreamer::new(self.partition_id, self.table_id);
        for stream in self.streams.drain(..) {
            if let Some(context) = stream.context.clone_for_truncated_table(table) {
                clone.streams.push(Stream {
                    stream_type: stream.stream_type,
                    context,
                });
            }
        }
        if clone.streams.is_empty() {
            None
        } else {
            Some(clone)
        }
    }
}

impl PersistentTable {
    /// Activate a stream of the given type. Existing contexts are offered
    /// the re-activation first; only when all report unsupported is a fresh
    /// context built. Returns whether activation succeeded.
    pub fn activate_stream(
        &mut self,
        stream_type: TableStreamType,
        predicate_blobs: &[String],
    ) -> bool {
        if self.streamer().is_none() {
            *self.streamer_mut() = Some(TableStreamer::new(self.partition_id(), self.table_id()));
        }
        let mut streamer = self.streamer_mut().take().expect("streamer just ensured");
        let active_types = streamer.active_types();

        let mut failed = false;
        let mut found = false;
        for stream in &mut streamer.streams {
            match stream
                .context
                .handle_reactivation(self, stream_type, &active_types)
            {
                ActivationCode::Succeeded => {
                    if let Err(e) = stream.context.update_predicates(self, predicate_blobs) {
                        warn!(table = %self.name(), error = %e, "predicate update failed on re-activation");
                        failed = true;
                    } else {
                        found = true;
                    }
                }
                ActivationCode::Failed => failed = true,
                ActivationCode::Unsupported => {}
            }
        }

        if !found && !failed {
            let context: Option<Box<dyn TableStreamerContext>> = match stream_type {
                TableStreamType::Snapshot => {
                    match CopyOnWriteContext::new(self, streamer.partition_id, predicate_blobs) {
                        Ok(context) => Some(Box::new(context)),
                        Err(e) => {
                            warn!(table = %self.name(), error = %e, "snapshot context construction failed");
                            None
                        }
                    }
                }
                TableStreamType::ElasticIndex => {
                    match ElasticContext::new(self, streamer.partition_id, predicate_blobs) {
                        Ok(context) => Some(Box::new(context)),
                        Err(e) => {
                            warn!(table = %self.name(), error = %e, "elastic context construction failed");
                            None
                        }
                    }
                }
                TableStreamType::ElasticIndexRead => Some(Box::new(ElasticIndexReadContext::new(
                    streamer.partition_id,
                    predicate_blobs,
                ))),
                TableStreamType::ElasticIndexClear => {
                    // No elastic context exists, so there is nothing to
                    // clear; not an error.
                    None
                }
                TableStreamType::Recovery => Some(Box::new(RecoveryContext::new(
                    streamer.table_id,
                    streamer.partition_id,
                ))),
            };
            match context {
                Some(mut context) => {
                    match context.handle_activation(self, stream_type, &active_types) {
                        ActivationCode::Succeeded => streamer.streams.push(Stream {
                            stream_type,
                            context,
                        }),
                        ActivationCode::Failed => failed = true,
                        ActivationCode::Unsupported => {
                            error!(
                                table = %self.name(),
                                ?stream_type,
                                "fresh context reported unsupported activation"
                            );
                            failed = true;
                        }
                    }
                }
                None if stream_type == TableStreamType::ElasticIndexClear => {}
                None => failed = true,
            }
        }

        *self.streamer_mut() = Some(streamer);
        !failed
    }

    /// Drive the context of `stream_type` for one serialization batch.
    /// Returns the remaining-tuple hint, `0` when drained, or
    /// [`STREAM_SERIALIZATION_ERROR`].
    pub fn stream_more(
        &mut self,
        stream_type: TableStreamType,
        outputs: &mut TupleOutputStreamProcessor,
    ) -> i64 {
        let Some(streamer) = self.streamer_mut().as_mut() else {
            error!(table = %self.name(), "no streamer to serialize more from");
            return STREAM_SERIALIZATION_ERROR;
        };
        let Some(mut stream) = streamer.take_stream(stream_type) else {
            error!(
                table = %self.name(),
                ?stream_type,
                "table streamer has no stream of the requested type"
            );
            return STREAM_SERIALIZATION_ERROR;
        };
        let remaining = stream.context.handle_stream_more(self, outputs);
        let keep = remaining > 0 || stream.context.handle_deactivation(stream_type);
        if keep {
            if let Some(streamer) = self.streamer_mut().as_mut() {
                streamer.streams.push(stream);
            }
        }
        remaining
    }

    /// Look up the live context of a stream type, for host inspection.
    pub fn has_stream_context(&self, stream_type: TableStreamType) -> bool {
        self.streamer()
            .map(|s| s.has_stream_type(stream_type))
            .unwrap_or(false)
    }
}
