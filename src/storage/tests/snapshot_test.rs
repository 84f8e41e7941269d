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

//! Copy-on-write snapshot behavior: activation-time consistency under
//! concurrent mutation and compaction.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use emberdb_common::config::EngineConfig;
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::{ColumnSpec, TupleSchema};
use emberdb_common::types::{DataType, ScalarImpl};
use emberdb_storage::{
    PersistentTable, TableStreamType, TupleAddress, TupleOutputStreamProcessor,
};

fn int_schema() -> Arc<TupleSchema> {
    Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
}

fn int_row(v: i32) -> OwnedRow {
    OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
}

fn table_with_blocks(name: &str, tuples_per_block: usize) -> PersistentTable {
    let config = Arc::new(EngineConfig {
        tuples_per_block,
        ..EngineConfig::default()
    });
    PersistentTable::new(name, 7, 0, int_schema(), Some(0), config)
}

/// Decode every int32 row in a serialized tuple block.
fn decode_int_rows(data: &[u8]) -> Vec<i32> {
    let row_count = BigEndian::read_u32(&data[4..8]) as usize;
    let mut rows = Vec::with_capacity(row_count);
    let mut offset = 8;
    for _ in 0..row_count {
        let row_length = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4;
        let null = data[offset];
        assert_eq!(null, 0, "test rows are never null");
        rows.push(BigEndian::read_i32(&data[offset + 1..offset + 5]));
        assert_eq!(row_length, 5);
        offset += row_length;
    }
    assert_eq!(offset, data.len(), "no trailing bytes");
    rows
}

/// Drive one `stream_more` batch and decode its rows.
fn stream_batch(table: &mut PersistentTable) -> (i64, Vec<i32>) {
    let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
    let remaining = table.stream_more(TableStreamType::Snapshot, &mut outputs);
    assert!(remaining >= 0, "stream_more failed: {remaining}");
    let rows = decode_int_rows(outputs.streams()[0].data());
    (remaining, rows)
}

fn drain_snapshot(table: &mut PersistentTable) -> Vec<i32> {
    let mut all = Vec::new();
    loop {
        let (remaining, rows) = stream_batch(table);
        all.extend(rows);
        if remaining == 0 {
            break;
        }
    }
    all.sort_unstable();
    all
}

#[test]
fn empty_table_snapshot() {
    let mut table = table_with_blocks("snap_empty", 16);
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    let blocks_before = table.data().block_count();
    let (remaining, rows) = stream_batch(&mut table);
    assert_eq!(remaining, 0);
    assert!(rows.is_empty());
    assert_eq!(table.data().block_count(), blocks_before, "block set unchanged");
}

#[test]
fn snapshot_sees_activation_time_contents() {
    let mut table = table_with_blocks("snap_consistent", 16);
    let mut addresses = Vec::new();
    for v in 0..100 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));

    // Concurrent mutations after activation: updates, deletes, inserts.
    for v in 0..10 {
        table.update_tuple(addresses[v], &int_row(1000 + v as i32)).unwrap();
    }
    for address in addresses.iter().skip(10).take(10) {
        table.delete_tuple(*address).unwrap();
    }
    for v in 2000..2050 {
        table.insert_row(&int_row(v)).unwrap();
    }

    let streamed = drain_snapshot(&mut table);
    let expected: Vec<i32> = (0..100).collect();
    assert_eq!(streamed, expected, "snapshot equals activation-time contents");

    // The live table reflects the mutations instead.
    let mut live: Vec<i32> = table
        .iter_visible()
        .map(|(_, t)| match t.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    live.sort_unstable();
    assert_eq!(live.len(), 100 - 10 + 50);
    assert!(live.contains(&1000));
    assert!(!live.contains(&5), "updated value is gone from the live table");
    assert!(!live.contains(&10), "deleted value is gone from the live table");
}

#[test]
fn snapshot_survives_intervening_compaction() {
    let mut table = table_with_blocks("snap_compact", 16);
    let mut addresses: Vec<(i32, TupleAddress)> = Vec::new();
    for v in 0..1000 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));

    // Delete every even-numbered tuple mid-snapshot, then compact hard.
    // The deletes are deferred for the scan, so their slots stay occupied
    // and this exercises the refusal path; live tuple movement under a
    // snapshot is covered separately below.
    for (v, address) in &addresses {
        if v % 2 == 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    table.force_compaction();

    let streamed = drain_snapshot(&mut table);
    assert_eq!(streamed, (0..1000).collect::<Vec<i32>>());

    let mut live: Vec<i32> = table
        .iter_visible()
        .map(|(_, t)| match t.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    live.sort_unstable();
    assert_eq!(live, (0..1000).filter(|v| v % 2 == 1).collect::<Vec<i32>>());
    assert_eq!(table.data().pending_snapshot_block_count(), 0);
}

#[test]
fn live_compaction_moves_tuples_under_the_snapshot() {
    let mut table = table_with_blocks("snap_live_compact", 16);
    let mut addresses: Vec<(i32, TupleAddress)> = Vec::new();
    for v in 0..256 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    // Punch holes first, so free slots exist before the stream starts.
    for (v, address) in &addresses {
        if v % 4 != 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    let expected: Vec<i32> = (0..256).filter(|v| v % 4 == 0).collect();

    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    let blocks_before = table.data().block_count();
    table.force_compaction();
    assert!(
        table.data().block_count() < blocks_before,
        "compaction must keep pairing pending blocks under a live snapshot ({} -> {})",
        blocks_before,
        table.data().block_count()
    );

    // The scan still emits exactly the activation-time contents, now read
    // from the blocks the tuples were moved into.
    let streamed = drain_snapshot(&mut table);
    assert_eq!(streamed, expected);
    assert_eq!(table.data().pending_snapshot_block_count(), 0);

    let mut live: Vec<i32> = table
        .iter_visible()
        .map(|(_, t)| match t.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    live.sort_unstable();
    assert_eq!(live, expected);
}

#[test]
fn second_snapshot_activation_is_refused_while_active() {
    let mut table = table_with_blocks("snap_twice", 16);
    for v in 0..10 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    assert!(
        !table.activate_stream(TableStreamType::Snapshot, &[]),
        "a second concurrent snapshot must be refused"
    );
    drain_snapshot(&mut table);
}

#[test]
fn reactivated_snapshot_streams_same_set_when_unmutated() {
    let mut table = table_with_blocks("snap_idempotent", 16);
    for v in 0..50 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    let first = drain_snapshot(&mut table);
    // The drained context deactivates itself, so a fresh activation works.
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    let second = drain_snapshot(&mut table);
    assert_eq!(first, second);
}

#[test]
fn snapshot_yields_on_byte_threshold() {
    let config = Arc::new(EngineConfig {
        tuples_per_block: 16,
        bytes_serialized_threshold: 64,
        ..EngineConfig::default()
    });
    let mut table = PersistentTable::new("snap_yield", 7, 0, int_schema(), Some(0), config);
    for v in 0..100 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    let (remaining, rows) = stream_batch(&mut table);
    assert!(remaining > 0, "tiny byte budget forces an early yield");
    assert!(rows.len() < 100);
    let rest = drain_snapshot(&mut table);
    assert_eq!(rows.len() + rest.len(), 100);
}
