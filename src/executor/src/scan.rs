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

//! Sequential scan, with the inline project → aggregate/insert tuple route
//! and the no-copy alias for bare scans.

use emberdb_common::row::{OwnedRow, Row};
use emberdb_common::{EngineError, Result};
use emberdb_expr::Expression;

use crate::aggregate::AggregateExec;
use crate::context::{ExecutorContext, NodeOutput};
use crate::insert::{dml_count_schema, InsertExec};
use crate::plan::{PlanNode, PlanNodeType, ProjectionPlanNode, SeqScanPlanNode};
use crate::postfilter::{CountingPostfilter, NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;

pub(crate) struct InlineProjection {
    expressions: Vec<Expression>,
}

impl InlineProjection {
    pub(crate) fn from_inline(
        parent: &PlanNode,
        params: &[emberdb_common::types::Datum],
    ) -> Result<Option<Self>> {
        match parent.find_inline(PlanNodeType::Projection) {
            Some(PlanNode::Projection(node)) => Ok(Some(Self {
                expressions: node
                    .output_column_expressions
                    .iter()
                    .map(|e| e.bind_params(params))
                    .collect::<Result<Vec<_>>>()?,
            })),
            _ => Ok(None),
        }
    }

    pub(crate) fn project(&self, row: &dyn Row) -> Result<OwnedRow> {
        self.expressions.iter().map(|e| e.eval_row(row)).collect()
    }
}

pub fn execute_seq_scan(
    node: &SeqScanPlanNode,
    plan_node: &PlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let bare_scan =
        node.predicate.is_none() && node.inline_nodes.is_empty() && !node.is_cte_scan;
    if bare_scan {
        // Nothing filters or rewrites the rows: alias the output to the
        // input instead of copying every tuple.
        if let Some(name) = &node.target_table_name {
            if node.children.is_empty() {
                return Ok(NodeOutput::TableRef(name.clone()));
            }
        }
    }

    let input: Vec<OwnedRow> = if node.is_cte_scan {
        let name = node.target_table_name.as_deref().ok_or_else(|| {
            EngineError::plan_invalid("common-table scan without a table name")
        })?;
        ctx.common_table(name)?.iter_rows().collect()
    } else if let Some(child) = node.children.first() {
        ctx.child_rows(*child)?
    } else {
        let name = node.target_table_name.as_deref().ok_or_else(|| {
            EngineError::plan_invalid("sequential scan without a target table")
        })?;
        let table = ctx.catalog.table(name)?;
        table
            .iter_visible()
            .map(|(_, tuple)| tuple.to_owned_row())
            .collect()
    };

    let predicate = node
        .predicate
        .as_ref()
        .map(|e| e.bind_params(&ctx.params))
        .transpose()?;
    let (limit, offset) = match plan_node.find_inline_limit() {
        Some(limit_node) => limit_node.limit_and_offset(&ctx.params)?,
        None => (NO_LIMIT, NO_OFFSET),
    };
    let mut postfilter = CountingPostfilter::new(predicate, limit, offset);
    let projection = InlineProjection::from_inline(plan_node, &ctx.params)?;
    let mut aggregate = AggregateExec::from_inline(plan_node, &ctx.params)?;
    let mut insert = InsertExec::from_inline(plan_node);
    if aggregate.is_some() && insert.is_some() {
        return Err(EngineError::plan_invalid(
            "a scan cannot carry both an inline aggregate and an inline insert",
        ));
    }

    let mut out = if insert.is_some() {
        ctx.new_output_table("scan dml count", &dml_count_schema())
    } else {
        ctx.new_output_table("scan output", &node.output_schema)
    };

    for row in &input {
        if !postfilter.is_under_limit() {
            break;
        }
        if let Some(aggregate) = &aggregate {
            if !aggregate.is_under_limit() {
                break;
            }
        }
        pmp.countdown_progress();
        if !postfilter.eval(row, &emberdb_common::row::EMPTY_ROW)? {
            continue;
        }
        let projected = match &projection {
            Some(projection) => projection.project(row)?,
            None => row.clone(),
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

    if let Some(mut aggregate) = aggregate.take() {
        aggregate.finish(ctx.host, &mut out)?;
    } else if let Some(insert) = insert.take() {
        insert.finish(&mut out)?;
    }
    Ok(NodeOutput::Temp(out))
}

/// A projection that was not inlined into a scan.
pub fn execute_standalone_projection(
    node: &ProjectionPlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let child = node.children.first().copied().ok_or_else(|| {
        EngineError::plan_invalid("projection node requires an input child")
    })?;
    let input = ctx.child_rows(child)?;
    let expressions = node
        .output_column_expressions
        .iter()
        .map(|e| e.bind_params(&ctx.params))
        .collect::<Result<Vec<_>>>()?;
    let mut out = ctx.new_output_table("projection output", &node.output_schema);
    for row in &input {
        pmp.countdown_progress();
        let projected: OwnedRow = expressions
            .iter()
            .map(|e| e.eval_row(row))
            .collect::<Result<OwnedRow>>()?;
        out.insert_row(&projected)?;
    }
    Ok(NodeOutput::Temp(out))
}
