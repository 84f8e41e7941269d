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

//! Merge-receive: `K` already-sorted partition streams are collected into
//! one scratch table with per-partition counts, then merged through a
//! min-heap of run cursors keyed by their front tuples.

use std::cmp::Ordering;

use emberdb_common::row::OwnedRow;
use emberdb_common::{EngineError, Result};
use emberdb_storage::TempTable;

use crate::aggregate::AggregateExec;
use crate::comparer::TupleComparer;
use crate::context::{ExecutorContext, NodeOutput};
use crate::plan::{MergeReceivePlanNode, PlanNode, PlanNodeType};
use crate::postfilter::{CountingPostfilter, NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;

/// One sorted run mid-merge.
struct Run {
    rows: std::vec::IntoIter<OwnedRow>,
    front: OwnedRow,
}

/// A binary min-heap of runs ordered by their front tuples. `BinaryHeap`
/// cannot carry a runtime comparator, so the sifting is spelled out.
struct RunHeap<'a> {
    runs: Vec<Run>,
    comparer: &'a TupleComparer,
}

impl<'a> RunHeap<'a> {
    fn new(comparer: &'a TupleComparer) -> Self {
        Self {
            runs: Vec::new(),
            comparer,
        }
    }

    fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn less(&self, a: usize, b: usize) -> bool {
        self.comparer.compare(&self.runs[a].front, &self.runs[b].front) == Ordering::Less
    }

    fn push(&mut self, run: Run) {
        self.runs.push(run);
        let mut child = self.runs.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if self.less(child, parent) {
                self.runs.swap(child, parent);
                child = parent;
            } else {
                break;
            }
        }
    }

    /// Remove the smallest front tuple, advancing and re-sifting its run.
    fn pop_front(&mut self) -> OwnedRow {
        let next = self.runs[0].rows.next();
        let front = match next {
            Some(next) => std::mem::replace(&mut self.runs[0].front, next),
            None => {
                let run = self.runs.swap_remove(0);
                if !self.runs.is_empty() {
                    self.sift_down(0);
                }
                return run.front;
            }
        };
        self.sift_down(0);
        front
    }

    fn sift_down(&mut self, mut parent: usize) {
        loop {
            let left = 2 * parent + 1;
            let right = left + 1;
            let mut smallest = parent;
            if left < self.runs.len() && self.less(left, smallest) {
                smallest = left;
            }
            if right < self.runs.len() && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == parent {
                return;
            }
            self.runs.swap(parent, smallest);
            parent = smallest;
        }
    }
}

pub fn execute_merge_receive(
    node: &MergeReceivePlanNode,
    plan_node: &PlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    // The inline order-by describes the ordering the partitions agreed on.
    let orderby_node = match plan_node.find_inline(PlanNodeType::OrderBy) {
        Some(PlanNode::OrderBy(n)) => n,
        _ => {
            return Err(EngineError::plan_invalid(
                "merge-receive requires an inline order-by node",
            ))
        }
    };
    let sort_expressions = orderby_node
        .sort_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;
    let comparer = TupleComparer::new(&sort_expressions, &orderby_node.sort_directions);

    let (limit, offset) = match plan_node.find_inline_limit() {
        Some(limit_node) => limit_node.limit_and_offset(&ctx.params)?,
        None => (NO_LIMIT, NO_OFFSET),
    };
    let mut postfilter = CountingPostfilter::new(None, limit, offset);
    let mut aggregate = AggregateExec::from_inline(plan_node, &ctx.params)?;
    let mut out = ctx.new_output_table("merge receive output", &node.output_schema);

    // Collect the partition streams into the scratch table, recording the
    // per-partition counts as they load.
    let dependencies: Vec<TempTable> = std::mem::take(&mut ctx.dependency_tables);
    let mut scratch: Vec<OwnedRow> = Vec::new();
    let mut partition_counts: Vec<usize> = Vec::new();
    for dependency in &dependencies {
        let before = scratch.len();
        scratch.extend(dependency.iter_rows());
        let loaded = scratch.len() - before;
        if loaded > 0 {
            partition_counts.push(loaded);
        }
    }

    let mut heap = RunHeap::new(&comparer);
    let mut remaining = scratch;
    for count in partition_counts {
        let rest = remaining.split_off(count);
        let mut rows = remaining.into_iter();
        remaining = rest;
        if let Some(front) = rows.next() {
            heap.push(Run { rows, front });
        }
    }

    while postfilter.is_under_limit() && !heap.is_empty() {
        if let Some(aggregate) = &aggregate {
            if !aggregate.is_under_limit() {
                break;
            }
        }
        let row = heap.pop_front();
        if postfilter.eval(&row, &emberdb_common::row::EMPTY_ROW)? {
            if let Some(aggregate) = &mut aggregate {
                aggregate.execute_tuple(&row, ctx.host, &mut out)?;
            } else {
                out.insert_row(&row)?;
            }
            pmp.countdown_progress();
        }
    }

    if let Some(mut aggregate) = aggregate.take() {
        aggregate.finish(ctx.host, &mut out)?;
    }
    Ok(NodeOutput::Temp(out))
}
