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

//! Nested-loop index join: the outer child is scanned, and for each outer
//! tuple the inner table's index is probed with keys synthesized from it.
//! FULL joins track matched inner tuples and emit the unmatched remainder
//! padded with NULL outer columns in a second pass.

use std::collections::HashMap;

use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::tuple::TupleFlags;
use emberdb_common::{EngineError, Result};
use emberdb_expr::{datum_is_true, Expression};
use emberdb_storage::{PersistentTable, TupleAddress};
use fixedbitset::FixedBitSet;

use crate::aggregate::AggregateExec;
use crate::context::{ExecutorContext, NodeOutput};
use crate::index_scan::{build_search_key, position_cursor};
use crate::plan::{
    IndexScanPlanNode, JoinType, NestLoopIndexPlanNode, PlanNode, PlanNodeType,
};
use crate::postfilter::{CountingPostfilter, NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;

/// Tracks which inner tuples matched some outer tuple, for the FULL-join
/// second pass. Inner tuples are addressed densely by ordinal.
struct TableTupleFilter {
    ordinals: HashMap<TupleAddress, usize>,
    addresses: Vec<TupleAddress>,
    matched: FixedBitSet,
}

impl TableTupleFilter {
    fn new(inner: &PersistentTable) -> Self {
        let addresses: Vec<TupleAddress> =
            inner.iter_visible().map(|(address, _)| address).collect();
        let ordinals = addresses
            .iter()
            .enumerate()
            .map(|(ordinal, &address)| (address, ordinal))
            .collect();
        let matched = FixedBitSet::with_capacity(addresses.len());
        Self {
            ordinals,
            addresses,
            matched,
        }
    }

    fn mark_matched(&mut self, address: TupleAddress) {
        if let Some(&ordinal) = self.ordinals.get(&address) {
            self.matched.insert(ordinal);
        }
    }

    fn unmatched(&self) -> impl Iterator<Item = TupleAddress> + '_ {
        self.addresses
            .iter()
            .enumerate()
            .filter(|(ordinal, _)| !self.matched.contains(*ordinal))
            .map(|(_, &address)| address)
    }
}

pub fn execute_nestloop_index(
    node: &NestLoopIndexPlanNode,
    plan_node: &PlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let inner_node: &IndexScanPlanNode = match plan_node.find_inline(PlanNodeType::IndexScan) {
        Some(PlanNode::IndexScan(inner)) => inner,
        _ => {
            return Err(EngineError::plan_invalid(
                "nested-loop index join requires an inline index scan",
            ))
        }
    };

    let outer_rows = ctx.input_rows(plan_node)?;
    let inner_table = ctx.catalog.table(&inner_node.target_table_name)?;
    let index = inner_table
        .index_by_name(&inner_node.target_index_name)
        .ok_or_else(|| {
            EngineError::plan_invalid(format!(
                "index {} missing on inner table {}",
                inner_node.target_index_name, inner_node.target_table_name
            ))
        })?;

    let search_key_expressions = inner_node
        .search_key_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;
    let end_expression = bind_optional(&inner_node.end_expression, ctx)?;
    let post_expression = bind_optional(&inner_node.post_expression, ctx)?;
    let initial_expression = bind_optional(&inner_node.initial_expression, ctx)?;
    let skip_null_expression = bind_optional(&inner_node.skip_null_predicate, ctx)?;
    let prejoin_expression = bind_optional(&node.prejoin_expression, ctx)?;
    let where_expression = bind_optional(&node.where_expression, ctx)?;
    let output_expressions = node
        .output_column_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;

    let (limit, offset) = match plan_node.find_inline_limit() {
        Some(limit_node) => limit_node.limit_and_offset(&ctx.params)?,
        None => (NO_LIMIT, NO_OFFSET),
    };
    let mut postfilter = CountingPostfilter::new(where_expression, limit, offset);
    let mut aggregate = AggregateExec::from_inline(plan_node, &ctx.params)?;
    let mut out = ctx.new_output_table("join output", &node.output_schema);

    let inner_width = inner_table.schema().column_count();
    let null_inner = OwnedRow::new(vec![None; inner_width]);
    let mut inner_filter = (node.join_type == JoinType::Full)
        .then(|| TableTupleFilter::new(&inner_table));

    let emit = |joined: OwnedRow,
                    aggregate: &mut Option<AggregateExec>,
                    out: &mut emberdb_storage::TempTable|
     -> Result<()> {
        if let Some(aggregate) = aggregate {
            aggregate.execute_tuple(&joined, ctx.host, out)
        } else {
            out.insert_row(&joined)
        }
    };

    for outer in &outer_rows {
        if !postfilter.is_under_limit() {
            break;
        }
        if let Some(aggregate) = &aggregate {
            if !aggregate.is_under_limit() {
                break;
            }
        }
        pmp.countdown_progress();
        let mut outer_match = false;

        // An outer tuple failing the outer-only prejoin predicate cannot
        // match any inner tuple, but LEFT and FULL still owe a padded row.
        let prejoin_passes = match &prejoin_expression {
            Some(expression) => datum_is_true(&expression.eval_row(outer)?),
            None => true,
        };
        if prejoin_passes {
            let key_plan = build_search_key(
                index.as_ref(),
                &search_key_expressions,
                &inner_node.compare_not_distinct,
                inner_node.lookup_type,
                inner_node.sort_direction,
                outer,
            )?;
            if !key_plan.early_return {
                let mut cursor = position_cursor(index.as_ref(), &key_plan, None)?;
                let mut skip_null = skip_null_expression.clone();
                let mut initial = initial_expression.clone();
                while postfilter.is_under_limit() {
                    if let Some(aggregate) = &aggregate {
                        if !aggregate.is_under_limit() {
                            break;
                        }
                    }
                    let Some(address) = cursor.next() else {
                        break;
                    };
                    let flags = inner_table.data().flags_at(address);
                    if flags.contains(TupleFlags::PENDING_DELETE) {
                        continue;
                    }
                    let Some(inner) = inner_table.data().row_at(address) else {
                        continue;
                    };
                    if let Some(expression) = &initial {
                        let keep = match expression.eval(outer, &inner) {
                            Ok(value) => datum_is_true(&value),
                            Err(_) => false,
                        };
                        if !keep {
                            continue;
                        }
                        initial = None;
                    }
                    pmp.countdown_progress();
                    if let Some(expression) = &skip_null {
                        if datum_is_true(&expression.eval(outer, &inner)?) {
                            continue;
                        }
                        skip_null = None;
                    }
                    if let Some(expression) = &end_expression {
                        if !datum_is_true(&expression.eval(outer, &inner)?) {
                            break;
                        }
                    }
                    let post_passes = match &post_expression {
                        Some(expression) => datum_is_true(&expression.eval(outer, &inner)?),
                        None => true,
                    };
                    if !post_passes {
                        continue;
                    }
                    outer_match = true;
                    if let Some(filter) = &mut inner_filter {
                        filter.mark_matched(address);
                    }
                    if postfilter.eval(outer, &inner)? {
                        let joined = eval_output_row(&output_expressions, outer, &inner)?;
                        emit(joined, &mut aggregate, &mut out)?;
                    }
                }
            }
            // A key that could not be built matches nothing; LEFT and FULL
            // joins still emit the padded row below.
        }

        if node.join_type != JoinType::Inner && !outer_match && postfilter.is_under_limit() {
            if postfilter.eval(outer, &null_inner)? {
                let joined = eval_output_row(&output_expressions, outer, &null_inner)?;
                emit(joined, &mut aggregate, &mut out)?;
            }
        }
    }

    // FULL join: second pass over the inner tuples nothing matched.
    if let Some(filter) = &inner_filter {
        if postfilter.is_under_limit() {
            let null_outer = OwnedRow::new(vec![None; node.num_outer_columns]);
            for address in filter.unmatched() {
                if !postfilter.is_under_limit() {
                    break;
                }
                let Some(inner) = inner_table.data().row_at(address) else {
                    continue;
                };
                if postfilter.eval(&null_outer, &inner)? {
                    let joined = eval_output_row(&output_expressions, &null_outer, &inner)?;
                    emit(joined, &mut aggregate, &mut out)?;
                }
            }
        }
    }

    if let Some(mut aggregate) = aggregate.take() {
        aggregate.finish(ctx.host, &mut out)?;
    }
    Ok(NodeOutput::Temp(out))
}

fn bind_optional(
    expression: &Option<Expression>,
    ctx: &ExecutorContext<'_>,
) -> Result<Option<Expression>> {
    expression
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()
}

fn eval_output_row(
    expressions: &[Expression],
    outer: &dyn Row,
    inner: &dyn Row,
) -> Result<OwnedRow> {
    expressions.iter().map(|e| e.eval(outer, inner)).collect()
}
