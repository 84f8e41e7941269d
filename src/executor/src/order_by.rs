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

//! Order-by: eager materialization, then a full sort or a partial sort to
//! `offset + limit` when both bounds are known. Oversized queries route
//! through the large temp table.

use emberdb_common::row::OwnedRow;
use emberdb_common::Result;
use emberdb_storage::LargeTempTable;

use crate::comparer::TupleComparer;
use crate::context::{ExecutorContext, NodeOutput};
use crate::plan::{OrderByPlanNode, PlanNode};
use crate::postfilter::{NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;

pub fn execute_order_by(
    node: &OrderByPlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let sort_expressions = node
        .sort_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;
    let comparer = TupleComparer::new(&sort_expressions, &node.sort_directions);

    let (limit, offset) = match node
        .inline_nodes
        .iter()
        .find_map(|n| match n {
            PlanNode::Limit(limit) => Some(limit),
            _ => None,
        }) {
        Some(limit_node) => limit_node.limit_and_offset(&ctx.params)?,
        None => (NO_LIMIT, NO_OFFSET),
    };

    let child = node.children.first().copied().ok_or_else(|| {
        emberdb_common::EngineError::plan_invalid("order-by node requires an input child")
    })?;

    if node.is_large_query {
        // Spill through the large temp table and use its wholesale sort.
        let mut large = LargeTempTable::new(
            "order by spill",
            std::sync::Arc::new(emberdb_common::tuple::TupleSchema::new(
                node.output_schema.clone(),
            )),
            ctx.config.tuples_per_block,
        );
        for row in ctx.child_rows(child)? {
            pmp.countdown_progress();
            large.insert_row(&row)?;
        }
        large.sort(|a, b| comparer.compare(a, b))?;
        let mut out = ctx.new_output_table("order by output", &node.output_schema);
        for row in apply_bounds(large.table().iter_rows().collect(), limit, offset) {
            out.insert_row(&row)?;
        }
        return Ok(NodeOutput::Temp(out));
    }

    let mut rows = ctx.child_rows(child)?;
    for _ in &rows {
        pmp.countdown_progress();
    }
    if limit >= 0 && offset >= 0 {
        // Only the first offset+limit rows matter; partition them to the
        // front, then order just that prefix.
        let bound = ((limit + offset) as usize).min(rows.len());
        if bound > 0 && bound < rows.len() {
            rows.select_nth_unstable_by(bound - 1, |a, b| comparer.compare(a, b));
            rows.truncate(bound);
        }
        rows.sort_unstable_by(|a, b| comparer.compare(a, b));
    } else {
        rows.sort_unstable_by(|a, b| comparer.compare(a, b));
    }

    let mut out = ctx.new_output_table("order by output", &node.output_schema);
    for row in apply_bounds(rows, limit, offset) {
        out.insert_row(&row)?;
    }
    Ok(NodeOutput::Temp(out))
}

fn apply_bounds(rows: Vec<OwnedRow>, limit: i64, offset: i64) -> Vec<OwnedRow> {
    let skip = offset.max(0) as usize;
    let take = if limit < 0 { usize::MAX } else { limit as usize };
    rows.into_iter().skip(skip).take(take).collect()
}
