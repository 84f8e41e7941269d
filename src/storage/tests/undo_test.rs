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

//! Undo-quantum delete semantics: deferred frees, rollback, and the
//! release-time fan-out into live elastic indexes.

use std::sync::Arc;

use emberdb_common::config::EngineConfig;
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::{ColumnSpec, TupleSchema};
use emberdb_common::types::{partition_hash, DataType, ScalarImpl};
use emberdb_expr::{Expression, HashRange, HashRangeExpression, StreamPredicate};
use emberdb_storage::{BtreeIndex, PersistentTable, TableStreamType, TupleOutputStreamProcessor};

fn int_schema() -> Arc<TupleSchema> {
    Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
}

fn int_row(v: i32) -> OwnedRow {
    OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
}

fn new_table(name: &str) -> PersistentTable {
    let config = Arc::new(EngineConfig {
        tuples_per_block: 8,
        ..EngineConfig::default()
    });
    let mut table = PersistentTable::new(name, 9, 0, int_schema(), Some(0), config);
    table
        .add_index(
            Box::new(BtreeIndex::new(
                "idx_a",
                vec![0],
                vec![ColumnSpec::new(DataType::Integer)],
                true,
            )),
            true,
        )
        .unwrap();
    table
}

fn visible(table: &PersistentTable) -> Vec<i32> {
    let mut values: Vec<i32> = table
        .iter_visible()
        .map(|(_, t)| match t.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    values.sort_unstable();
    values
}

#[test]
fn undo_restores_deleted_tuples() {
    let mut table = new_table("undo_revert");
    let mut addresses = Vec::new();
    for v in 0..10 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    table.begin_undo_quantum();
    for address in addresses.iter().take(5) {
        table.delete_tuple_for_undo(*address).unwrap();
    }
    assert_eq!(visible(&table), (5..10).collect::<Vec<i32>>());
    assert!(
        table
            .index_by_name("idx_a")
            .unwrap()
            .move_to_key(&int_row(2))
            .next()
            .is_none(),
        "deleted-for-undo rows leave the indexes immediately"
    );

    table.undo_undo_quantum();
    assert_eq!(visible(&table), (0..10).collect::<Vec<i32>>());
    assert!(
        table
            .index_by_name("idx_a")
            .unwrap()
            .move_to_key(&int_row(2))
            .next()
            .is_some(),
        "rollback restores index entries"
    );
}

#[test]
fn release_frees_storage() {
    let mut table = new_table("undo_release");
    let mut addresses = Vec::new();
    for v in 0..16 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    let blocks_before = table.data().block_count();
    table.begin_undo_quantum();
    for address in addresses.iter().take(8) {
        table.delete_tuple_for_undo(*address).unwrap();
    }
    // Storage is retained until release.
    assert_eq!(table.data().block_count(), blocks_before);
    table.release_undo_quantum();
    assert_eq!(visible(&table), (8..16).collect::<Vec<i32>>());
    assert!(
        table.data().block_count() < blocks_before,
        "releasing the quantum frees the emptied block"
    );
}

#[test]
fn release_notifies_live_elastic_index() {
    let mut table = new_table("undo_elastic");
    let mut addresses = Vec::new();
    for v in 0..20 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    let predicate = StreamPredicate {
        expression: Expression::HashRange(HashRangeExpression::new(
            0,
            vec![HashRange {
                start: i32::MIN,
                end: i32::MAX,
            }],
        )),
        delete_if_true: false,
    };
    let blob = serde_json::to_string(&predicate).unwrap();
    assert!(table.activate_stream(TableStreamType::ElasticIndex, &[blob]));
    let mut outputs = TupleOutputStreamProcessor::new(Vec::new());
    while table.stream_more(TableStreamType::ElasticIndex, &mut outputs) != 0 {}
    assert_eq!(table.data().elastic().unwrap().index.len(), 20);

    table.begin_undo_quantum();
    for address in addresses.iter().take(5) {
        table.delete_tuple_for_undo(*address).unwrap();
    }
    // Not freed yet: the index still holds the keys.
    assert_eq!(table.data().elastic().unwrap().index.len(), 20);
    table.release_undo_quantum();
    assert_eq!(
        table.data().elastic().unwrap().index.len(),
        15,
        "release propagates into the live elastic index"
    );
    let hash = partition_hash(&Some(ScalarImpl::Int32(0)));
    assert!(!table.data().elastic().unwrap().index.has(hash, addresses[0]));
}
