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

//! Elastic index build, incremental maintenance, range read with deletion,
//! clear rules and stream coexistence.

use std::collections::BTreeSet;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use emberdb_common::config::EngineConfig;
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::{ColumnSpec, TupleSchema};
use emberdb_common::types::{partition_hash, DataType, ScalarImpl};
use emberdb_expr::{Expression, HashRange, HashRangeExpression, StreamPredicate};
use emberdb_storage::{PersistentTable, TableStreamType, TupleOutputStreamProcessor};

fn int_schema() -> Arc<TupleSchema> {
    Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
}

fn int_row(v: i32) -> OwnedRow {
    OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
}

fn hash_of(v: i32) -> i32 {
    partition_hash(&Some(ScalarImpl::Int32(v)))
}

fn new_table(name: &str) -> PersistentTable {
    let config = Arc::new(EngineConfig {
        tuples_per_block: 16,
        elastic_tuples_per_call: 64,
        ..EngineConfig::default()
    });
    PersistentTable::new(name, 3, 0, int_schema(), Some(0), config)
}

fn range_blob(ranges: Vec<HashRange>) -> String {
    let predicate = StreamPredicate {
        expression: Expression::HashRange(HashRangeExpression::new(0, ranges)),
        delete_if_true: false,
    };
    serde_json::to_string(&predicate).unwrap()
}

fn full_range_blob() -> String {
    range_blob(vec![HashRange {
        start: i32::MIN,
        end: i32::MAX,
    }])
}

fn build_index_to_completion(table: &mut PersistentTable) {
    let mut outputs = TupleOutputStreamProcessor::new(Vec::new());
    loop {
        match table.stream_more(TableStreamType::ElasticIndex, &mut outputs) {
            0 => break,
            1 => continue,
            other => panic!("unexpected elastic build return {other}"),
        }
    }
}

fn indexed_addresses(table: &PersistentTable) -> BTreeSet<(i32, u64)> {
    table
        .data()
        .elastic()
        .expect("elastic index exists")
        .index
        .iter()
        .map(|key| {
            let packed = ((key.address.block().0 as u64) << 32) | key.address.slot() as u64;
            (key.hash, packed)
        })
        .collect()
}

#[test]
fn build_covers_exactly_the_active_matching_rows() {
    let mut table = new_table("elastic_build");
    let mut addresses = Vec::new();
    for v in 0..200 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);

    let elastic = table.data().elastic().unwrap();
    assert!(elastic.complete);
    assert_eq!(elastic.index.len(), 200);

    // Incremental maintenance: the invariant keeps holding under mutation.
    let new_address = table.insert_row(&int_row(777)).unwrap();
    assert_eq!(table.data().elastic().unwrap().index.len(), 201);
    assert!(table
        .data()
        .elastic()
        .unwrap()
        .index
        .has(hash_of(777), new_address));

    table.delete_tuple(addresses[0]).unwrap();
    assert_eq!(table.data().elastic().unwrap().index.len(), 200);
    assert!(!table.data().elastic().unwrap().index.has(hash_of(0), addresses[0]));
}

#[test]
fn index_follows_compaction_moves() {
    let mut table = new_table("elastic_compact");
    let mut addresses = Vec::new();
    for v in 0..200 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);

    for (v, address) in &addresses {
        if v % 4 != 3 {
            table.delete_tuple(*address).unwrap();
        }
    }
    table.force_compaction();

    let survivors: Vec<i32> = (0..200).filter(|v| v % 4 == 3).collect();
    let elastic = table.data().elastic().unwrap();
    assert_eq!(elastic.index.len(), survivors.len());
    // Every indexed address must resolve to a live row whose hash matches
    // the indexed hash.
    for key in elastic.index.iter() {
        let row = table.data().row_at(key.address).expect("indexed storage is live");
        let v = match &row[0] {
            Some(ScalarImpl::Int32(v)) => *v,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(hash_of(v), key.hash);
        assert!(survivors.contains(&v));
    }
}

#[test]
fn mid_build_compaction_keeps_scanner_and_index_consistent() {
    let mut table = new_table("elastic_mid_build");
    let mut addresses = Vec::new();
    for v in 0..300 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    // Punch holes before the stream starts, so compaction has work to do.
    for (v, address) in &addresses {
        if v % 4 != 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));

    // Index the first slice only, leaving the scanner mid-table, then
    // compact while the build stream is live.
    let mut outputs = TupleOutputStreamProcessor::new(Vec::new());
    assert_eq!(
        table.stream_more(TableStreamType::ElasticIndex, &mut outputs),
        1,
        "first batch must leave tuples unscanned"
    );
    let blocks_before = table.data().block_count();
    table.force_compaction();
    assert!(
        table.data().block_count() < blocks_before,
        "compaction must move tuples while the scanner is live ({} -> {})",
        blocks_before,
        table.data().block_count()
    );
    build_index_to_completion(&mut table);

    // The movement notifications and the re-resolving scanner must land on
    // exactly the live matching rows, at their moved addresses.
    let survivors: Vec<i32> = (0..300).filter(|v| v % 4 == 0).collect();
    let elastic = table.data().elastic().unwrap();
    assert!(elastic.complete);
    assert_eq!(elastic.index.len(), survivors.len());
    for key in elastic.index.iter() {
        let row = table.data().row_at(key.address).expect("indexed storage is live");
        let v = match &row[0] {
            Some(ScalarImpl::Int32(v)) => *v,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(hash_of(v), key.hash);
        assert!(survivors.contains(&v));
    }
}

#[test]
fn read_drains_range_and_deletes_streamed_tuples() {
    let mut table = new_table("elastic_read");
    for v in 0..100 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);

    // Split the hash space at the median so the read ships half the rows.
    let mut hashes: Vec<i32> = (0..100).map(hash_of).collect();
    hashes.sort_unstable();
    let split = hashes[50];
    let expected_shipped: BTreeSet<i32> =
        (0..100).filter(|v| hash_of(*v) < split).collect();

    assert!(table.activate_stream(
        TableStreamType::ElasticIndexRead,
        &[format!("{}:{}", i32::MIN, split)],
    ));

    let mut shipped = BTreeSet::new();
    loop {
        let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
        let remaining = table.stream_more(TableStreamType::ElasticIndexRead, &mut outputs);
        assert!(remaining >= 0);
        let data = outputs.streams()[0].data();
        if data.len() >= 8 {
            let row_count = BigEndian::read_u32(&data[4..8]) as usize;
            let mut offset = 8;
            for _ in 0..row_count {
                let row_length = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
                offset += 4;
                shipped.insert(BigEndian::read_i32(&data[offset + 1..offset + 5]));
                offset += row_length;
            }
        }
        if remaining == 0 {
            break;
        }
    }
    assert_eq!(shipped, expected_shipped);

    // The shipped tuples are gone from the table and from the index.
    let live: BTreeSet<i32> = table
        .iter_visible()
        .map(|(_, t)| match t.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert!(live.is_disjoint(&shipped));
    assert_eq!(live.len() + shipped.len(), 100);
    assert_eq!(
        table.data().elastic().unwrap().index.len(),
        live.len(),
        "deletions propagated into the elastic index"
    );
}

#[test]
fn clear_refused_until_index_is_empty() {
    let mut table = new_table("elastic_clear");
    for v in 0..10 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);

    assert!(
        !table.activate_stream(TableStreamType::ElasticIndexClear, &[]),
        "clear must be refused while keys remain"
    );

    // Drain everything, then clear.
    assert!(table.activate_stream(
        TableStreamType::ElasticIndexRead,
        &[format!("{}:{}", i32::MIN, i32::MAX)],
    ));
    loop {
        let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
        if table.stream_more(TableStreamType::ElasticIndexRead, &mut outputs) == 0 {
            break;
        }
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndexClear, &[]));
    assert!(table.data().elastic().is_none(), "index dropped after clear");
}

#[test]
fn rebuild_with_subset_ranges_is_idempotent() {
    let mut table = new_table("elastic_idempotent");
    for v in 0..50 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);
    let before = indexed_addresses(&table);

    // Same predicate again: accepted, nothing changes.
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);
    assert_eq!(indexed_addresses(&table), before);

    // A subset range is accepted too.
    assert!(table.activate_stream(
        TableStreamType::ElasticIndex,
        &[range_blob(vec![HashRange { start: 0, end: 1000 }])],
    ));
}

#[test]
fn truncate_carries_the_elastic_context_over() {
    let mut table = new_table("elastic_truncate");
    for v in 0..40 {
        table.insert_row(&int_row(v)).unwrap();
    }
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    build_index_to_completion(&mut table);
    assert_eq!(table.data().elastic().unwrap().index.len(), 40);

    table.truncate();
    assert_eq!(table.visible_tuple_count(), 0);
    let elastic = table.data().elastic().expect("index survives truncation");
    assert!(elastic.complete);
    assert!(elastic.index.is_empty());

    // The cloned context keeps maintaining the fresh index.
    let address = table.insert_row(&int_row(7)).unwrap();
    assert!(table.data().elastic().unwrap().index.has(hash_of(7), address));
}

#[test]
fn coexistence_rules() {
    let mut table = new_table("elastic_coexist");
    for v in 0..100 {
        table.insert_row(&int_row(v)).unwrap();
    }

    // Elastic build refused while a snapshot runs.
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    assert!(!table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    loop {
        let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
        if table.stream_more(TableStreamType::Snapshot, &mut outputs) == 0 {
            break;
        }
    }

    // Snapshot refused while elastic indexing is incomplete, allowed after.
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[full_range_blob()]));
    assert!(
        !table.activate_stream(TableStreamType::Snapshot, &[]),
        "snapshot must wait for elastic indexing to finish"
    );
    build_index_to_completion(&mut table);
    assert!(table.activate_stream(TableStreamType::Snapshot, &[]));
    loop {
        let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
        if table.stream_more(TableStreamType::Snapshot, &mut outputs) == 0 {
            break;
        }
    }

    // Recovery may coexist with a completed elastic index.
    assert!(table.activate_stream(TableStreamType::Recovery, &[]));
    let mut outputs = TupleOutputStreamProcessor::single(1 << 20);
    let remaining = table.stream_more(TableStreamType::Recovery, &mut outputs);
    assert!(remaining >= 0);
}
