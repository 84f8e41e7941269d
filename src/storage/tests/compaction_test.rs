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

//! Compaction behavior: content preservation, index consistency and block
//! reclamation under churn.

use std::collections::BTreeSet;
use std::sync::Arc;

use emberdb_common::config::EngineConfig;
use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::{ColumnSpec, TupleSchema};
use emberdb_common::types::{DataType, ScalarImpl};
use emberdb_storage::{BtreeIndex, PersistentTable, TupleAddress};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn int_schema() -> Arc<TupleSchema> {
    Arc::new(TupleSchema::new(vec![ColumnSpec::new(DataType::Integer)]))
}

fn int_row(v: i32) -> OwnedRow {
    OwnedRow::new(vec![Some(ScalarImpl::Int32(v))])
}

fn int_key(v: i32) -> OwnedRow {
    int_row(v)
}

fn small_block_table(name: &str) -> PersistentTable {
    let config = Arc::new(EngineConfig {
        tuples_per_block: 16,
        ..EngineConfig::default()
    });
    let mut table = PersistentTable::new(name, 1, 0, int_schema(), Some(0), config);
    table
        .add_index(
            Box::new(BtreeIndex::new(
                "idx_a",
                vec![0],
                vec![ColumnSpec::new(DataType::Integer)],
                false,
            )),
            false,
        )
        .unwrap();
    table
}

fn visible_values(table: &PersistentTable) -> Vec<i32> {
    let mut values: Vec<i32> = table
        .iter_visible()
        .map(|(_, tuple)| match tuple.datum_at(0) {
            Some(ScalarImpl::Int32(v)) => v,
            other => panic!("unexpected datum {other:?}"),
        })
        .collect();
    values.sort_unstable();
    values
}

#[test]
fn forced_compaction_preserves_visible_set() {
    let mut table = small_block_table("compact_preserve");
    let mut addresses = Vec::new();
    for v in 0..256 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    // Punch holes: delete three of every four tuples.
    for (v, address) in &addresses {
        if v % 4 != 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    let before = visible_values(&table);
    let blocks_before = table.data().block_count();

    table.force_compaction();

    assert_eq!(visible_values(&table), before);
    assert!(
        table.data().block_count() < blocks_before,
        "compaction should reclaim mostly-empty blocks ({} -> {})",
        blocks_before,
        table.data().block_count()
    );
}

#[test]
fn indexes_follow_moved_tuples() {
    let mut table = small_block_table("compact_index");
    let mut addresses = Vec::new();
    for v in 0..128 {
        addresses.push((v, table.insert_row(&int_row(v)).unwrap()));
    }
    for (v, address) in &addresses {
        if v % 2 == 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    table.force_compaction();

    let index = table.index_by_name("idx_a").unwrap();
    for v in 0..128 {
        let found: Vec<TupleAddress> = index.move_to_key(&int_key(v)).collect();
        if v % 2 == 0 {
            assert!(found.is_empty(), "deleted value {v} still indexed");
        } else {
            assert_eq!(found.len(), 1, "value {v} should be indexed exactly once");
            let row = table.data().row_at(found[0]).expect("index points at storage");
            assert_eq!(row, int_row(v), "index for {v} points at the right content");
        }
    }
}

#[test]
fn idle_compaction_does_at_most_one_pairing() {
    let mut table = small_block_table("compact_idle");
    let mut addresses = Vec::new();
    for v in 0..256 {
        addresses.push(table.insert_row(&int_row(v)).unwrap());
    }
    for (i, address) in addresses.iter().enumerate() {
        if i % 4 != 0 {
            table.delete_tuple(*address).unwrap();
        }
    }
    let before = table.data().block_count();
    table.idle_compaction();
    let after = table.data().block_count();
    assert!(before - after <= 1, "idle pass reclaims at most one block");
}

#[test]
fn randomized_churn_matches_reference_model() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut table = small_block_table("compact_churn");
    let mut live: Vec<(i32, TupleAddress)> = Vec::new();
    let mut model: BTreeSet<i32> = BTreeSet::new();
    let mut next_value = 0;

    for step in 0..2_000 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let v = next_value;
            next_value += 1;
            let address = table.insert_row(&int_row(v)).unwrap();
            live.push((v, address));
            model.insert(v);
        } else {
            let slot = rng.gen_range(0..live.len());
            let (v, address) = live.swap_remove(slot);
            table.delete_tuple(address).unwrap();
            model.remove(&v);
        }
        if step % 257 == 0 {
            table.force_compaction();
            // Compaction moved storage around; refresh the address book
            // through the index.
            let index = table.index_by_name("idx_a").unwrap();
            live = live
                .iter()
                .map(|(v, _)| {
                    let address = index
                        .move_to_key(&int_key(*v))
                        .next()
                        .expect("live value indexed");
                    (*v, address)
                })
                .collect();
        }
    }
    table.force_compaction();
    let expected: Vec<i32> = model.into_iter().collect();
    assert_eq!(visible_values(&table), expected);
    assert_eq!(table.visible_tuple_count() as usize, expected.len());
}
