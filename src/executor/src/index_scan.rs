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

//! Index scan. Search-key construction catches range and length failures
//! and translates them into lookup-type downgrades or an early empty scan;
//! the iteration then layers the initial, skip-null, end and post
//! expressions the way the planner laid them out.

use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::types::Datum;
use emberdb_common::{EngineError, Result};
use emberdb_expr::{datum_is_true, Expression};
use emberdb_storage::{Index, IndexCursor};

use crate::aggregate::AggregateExec;
use crate::context::{ExecutorContext, NodeOutput};
use crate::insert::{dml_count_schema, InsertExec};
use crate::plan::{IndexScanPlanNode, LookupType, PlanNode, SortDirection};
use crate::postfilter::{CountingPostfilter, NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;
use crate::scan::InlineProjection;

/// The outcome of constructing a search key: either an empty scan, or a
/// (possibly downgraded) lookup over a prefix of the key columns.
pub(crate) struct SearchKeyPlan {
    pub early_return: bool,
    pub active_keys: usize,
    pub lookup: LookupType,
    pub sort_direction: SortDirection,
    /// Full index-key width; columns past the active prefix stay NULL,
    /// which sorts first and therefore bounds the prefix correctly.
    pub key: OwnedRow,
}

impl SearchKeyPlan {
    fn empty(lookup: LookupType, sort_direction: SortDirection) -> Self {
        Self {
            early_return: true,
            active_keys: 0,
            lookup,
            sort_direction,
            key: OwnedRow::empty(),
        }
    }
}

/// Build the search key for an index lookup, handling NULL keys and the
/// overflow/underflow/length downgrade ladder. `outer` supplies column
/// values when the key expressions come from a join's outer tuple.
pub(crate) fn build_search_key(
    index: &dyn Index,
    search_key_expressions: &[Expression],
    compare_not_distinct: &[bool],
    lookup: LookupType,
    sort_direction: SortDirection,
    outer: &dyn Row,
) -> Result<SearchKeyPlan> {
    let key_spec = index.key_spec();
    let mut key: Vec<Datum> = vec![None; key_spec.len()];
    let mut active_keys = search_key_expressions.len();
    let mut lookup = lookup;
    let mut sort_direction = sort_direction;

    for (position, expression) in search_key_expressions.iter().enumerate() {
        let candidate = expression.eval(outer, &emberdb_common::row::EMPTY_ROW)?;
        // A NULL key compares false against everything, unless the plan
        // marked this column IS NOT DISTINCT FROM.
        if candidate.is_none() && !compare_not_distinct.get(position).copied().unwrap_or(false) {
            return Ok(SearchKeyPlan::empty(lookup, sort_direction));
        }
        match key_spec[position].coerce(&candidate) {
            Ok(value) => key[position] = value,
            Err(error) => {
                if !error.is_key_construction_recoverable() {
                    return Err(error);
                }
                // Only the last column of a comparison lookup can absorb a
                // range failure; everything else yields nothing.
                if lookup == LookupType::Equal || position != active_keys - 1 {
                    return Ok(SearchKeyPlan::empty(lookup, sort_direction));
                }
                use emberdb_common::error::ArithmeticError;
                let range_failure = match error {
                    EngineError::Arithmetic(kind) => Some(kind),
                    _ => None, // length mismatch, the only other recoverable
                };
                match range_failure {
                    Some(ArithmeticError::Overflow) => {
                        match lookup {
                            LookupType::Greater | LookupType::GreaterEqual => {
                                return Ok(SearchKeyPlan::empty(lookup, sort_direction));
                            }
                            _ => {
                                // A reverse scan whose key overflows starts
                                // from the end of the prefix, which is what
                                // LessEqual does.
                                lookup = LookupType::LessEqual;
                            }
                        }
                        active_keys -= 1;
                    }
                    Some(ArithmeticError::Underflow) => {
                        match lookup {
                            LookupType::Less | LookupType::LessEqual => {
                                return Ok(SearchKeyPlan::empty(lookup, sort_direction));
                            }
                            _ => {
                                // Never GreaterEqual: that would pick up
                                // NULL rows sorted below the range.
                                lookup = LookupType::Greater;
                            }
                        }
                        active_keys -= 1;
                    }
                    Some(ArithmeticError::DivideByZero) => unreachable!("not a key range failure"),
                    None => {
                        // Truncate to the column width and keep the column
                        // in the active prefix; the inclusive lookup on the
                        // right side covers the lost suffix.
                        let value = candidate.expect("length failure implies a value");
                        key[position] = Some(key_spec[position].shrink(&value));
                        lookup = match lookup {
                            LookupType::Less | LookupType::LessEqual => LookupType::LessEqual,
                            LookupType::Greater | LookupType::GreaterEqual => LookupType::Greater,
                            _ => {
                                return Err(EngineError::plan_invalid(
                                    "length downgrade under an equality lookup",
                                ))
                            }
                        };
                    }
                }
                if sort_direction == SortDirection::Invalid {
                    sort_direction = SortDirection::Asc;
                }
                break;
            }
        }
    }

    Ok(SearchKeyPlan {
        early_return: false,
        active_keys,
        lookup,
        sort_direction,
        key: OwnedRow::new(key),
    })
}

/// Position a cursor according to the search-key plan.
pub(crate) fn position_cursor<'a>(
    index: &'a dyn Index,
    plan: &SearchKeyPlan,
    rank_offset: Option<i64>,
) -> Result<IndexCursor<'a>> {
    if plan.early_return {
        return Ok(IndexCursor::empty());
    }
    if plan.active_keys > 0 {
        return Ok(match plan.lookup {
            LookupType::Equal => index.move_to_key(&plan.key),
            LookupType::Greater => index.move_to_greater_than_key(&plan.key),
            LookupType::GreaterEqual => index.move_to_key_or_greater(&plan.key),
            LookupType::Less => index.move_to_less_than_key(&plan.key),
            LookupType::LessEqual => index.move_to_key_or_less(&plan.key),
            LookupType::GeoContains => index.move_to_covering_cell(&plan.key)?,
        });
    }
    let forward = plan.sort_direction != SortDirection::Desc;
    match rank_offset {
        Some(offset) => {
            let rank = if forward {
                offset + 1
            } else {
                index.size() as i64 - offset
            };
            if rank <= 0 {
                // No tuple can satisfy the offset.
                Ok(IndexCursor::empty())
            } else {
                Ok(index.move_to_rank_tuple(rank as usize, forward))
            }
        }
        None => Ok(index.move_to_end(forward)),
    }
}

pub fn execute_index_scan(
    node: &IndexScanPlanNode,
    plan_node: &PlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let table = ctx.catalog.table(&node.target_table_name)?;
    let index = table.index_by_name(&node.target_index_name).ok_or_else(|| {
        EngineError::plan_invalid(format!(
            "index {} missing on table {}",
            node.target_index_name, node.target_table_name
        ))
    })?;

    let search_key_expressions = node
        .search_key_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;
    let (limit, offset) = match plan_node.find_inline_limit() {
        Some(limit_node) => limit_node.limit_and_offset(&ctx.params)?,
        None => (NO_LIMIT, NO_OFFSET),
    };
    // The rank optimization consumes the offset by cursor positioning.
    let postfilter_offset = if node.has_offset_rank_optimization {
        NO_OFFSET
    } else {
        offset
    };
    let post_expression = node
        .post_expression
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()?;
    let mut postfilter = CountingPostfilter::new(post_expression, limit, postfilter_offset);
    let end_expression = node
        .end_expression
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()?;
    let mut initial_expression = node
        .initial_expression
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()?;
    let mut skip_null_predicate = node
        .skip_null_predicate
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()?;

    let projection = InlineProjection::from_inline(plan_node, &ctx.params)?;
    let mut aggregate = AggregateExec::from_inline(plan_node, &ctx.params)?;
    let mut insert = InsertExec::from_inline(plan_node);
    if aggregate.is_some() && insert.is_some() {
        return Err(EngineError::plan_invalid(
            "an index scan cannot carry both an inline aggregate and an inline insert",
        ));
    }
    let mut out = if insert.is_some() {
        ctx.new_output_table("index scan dml count", &dml_count_schema())
    } else {
        ctx.new_output_table("index scan output", &node.output_schema)
    };

    let key_plan = build_search_key(
        index.as_ref(),
        &search_key_expressions,
        &node.compare_not_distinct,
        node.lookup_type,
        node.sort_direction,
        &emberdb_common::row::EMPTY_ROW,
    )?;
    let rank_offset = node.has_offset_rank_optimization.then_some(offset);
    let mut cursor = position_cursor(index.as_ref(), &key_plan, rank_offset)?;

    'scan: while postfilter.is_under_limit() {
        if let Some(aggregate) = &aggregate {
            if !aggregate.is_under_limit() {
                break;
            }
        }
        let Some(address) = cursor.next() else {
            break;
        };
        let flags = table.data().flags_at(address);
        if flags.contains(emberdb_common::tuple::TupleFlags::PENDING_DELETE) {
            continue;
        }
        let Some(row) = table.data().row_at(address) else {
            continue;
        };
        // Jump rows until the initial expression first holds, then drop it.
        // An evaluation error on a row only skips that row.
        if let Some(expression) = &initial_expression {
            let keep = match expression.eval_row(&row) {
                Ok(value) => datum_is_true(&value),
                Err(_) => false,
            };
            if !keep {
                continue 'scan;
            }
            initial_expression = None;
        }
        pmp.countdown_progress();
        // Skip the NULL rows at the underflow or reverse-scan edge until
        // the first clean row.
        if let Some(expression) = &skip_null_predicate {
            if datum_is_true(&expression.eval_row(&row)?) {
                continue;
            }
            skip_null_predicate = None;
        }
        if let Some(expression) = &end_expression {
            if !datum_is_true(&expression.eval_row(&row)?) {
                break;
            }
        }
        if postfilter.eval(&row, &emberdb_common::row::EMPTY_ROW)? {
            let projected = match &projection {
                Some(projection) => projection.project(&row)?,
                None => row,
            };
            if let Some(aggregate) = &mut aggregate {
                aggregate.execute_tuple(&projected, ctx.host, &mut out)?;
            } else if let Some(insert) = &mut insert {
                insert.execute_tuple(ctx, &projected)?;
            } else {
                out.insert_row(&projected)?;
            }
            pmp.countdown_progress();
        }
    }

    if let Some(mut aggregate) = aggregate.take() {
        aggregate.finish(ctx.host, &mut out)?;
    } else if let Some(insert) = insert.take() {
        insert.finish(&mut out)?;
    }
    Ok(NodeOutput::Temp(out))
}
