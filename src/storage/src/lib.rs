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

//! The EmberDB table store: block-allocated row storage with bucketed
//! compaction, ordered indexes, elastic indexes, fragment temp tables, and
//! the live table-streaming engine (snapshot, elastic build/read/clear,
//! recovery).

use parking_lot::{Mutex, MutexGuard};

pub mod block;
pub mod elastic_index;
pub mod index;
pub mod output_stream;
pub mod streamer;
pub mod table;
pub mod temp_table;

pub use block::{BlockId, TupleAddress};
pub use index::{BoxedIndex, BtreeIndex, Index, IndexCursor};
pub use output_stream::{
    HiddenColumnFilter, TupleOutputStream, TupleOutputStreamProcessor, TupleSerializer,
};
pub use streamer::{ActivationCode, TableStreamType, TableStreamer, TableStreamerContext};
pub use table::{PersistentTable, PersistentTableSurgeon};
pub use temp_table::{LargeTempTable, TempTable};

/// The process-wide lock serializing allocations done on behalf of
/// replicated tables, which are shared across partition threads.
static REPLICATED_RESOURCE_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn replicated_resource_guard() -> MutexGuard<'static, ()> {
    REPLICATED_RESOURCE_LOCK.lock()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use emberdb_common::config::EngineConfig;
    use emberdb_common::row::OwnedRow;
    use emberdb_common::tuple::{ColumnSpec, TupleSchema};
    use emberdb_common::types::{DataType, ScalarImpl};

    use crate::table::PersistentTable;

    pub fn int_schema() -> Arc<TupleSchema> {
        Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
    }

    pub fn int_row(v: i32) -> OwnedRow {
        OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
    }

    /// A single-column partitioned table with small blocks, so tests cross
    /// block boundaries quickly.
    pub fn int_table(name: &str, tuples_per_block: usize) -> PersistentTable {
        let config = Arc::new(EngineConfig {
            tuples_per_block,
            ..EngineConfig::default()
        });
        PersistentTable::new(name, 1, 0, int_schema(), Some(0), config)
    }
}
