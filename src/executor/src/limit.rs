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

//! The standalone LIMIT executor: skip `offset` input rows, copy up to
//! `limit`. Most limits never get here; they ride inline on scans,
//! aggregates and sorts.

use emberdb_common::{EngineError, Result};

use crate::context::{ExecutorContext, NodeOutput};
use crate::plan::LimitPlanNode;
use crate::progress::ProgressMonitor;

pub fn execute_limit(
    node: &LimitPlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let (limit, offset) = node.limit_and_offset(&ctx.params)?;
    let child = node
        .children
        .first()
        .copied()
        .ok_or_else(|| EngineError::plan_invalid("limit node requires an input child"))?;
    let input = ctx.child_rows(child)?;
    let mut out = ctx.new_output_table("limit output", &node.output_schema);
    let skip = offset.max(0) as usize;
    let take = if limit < 0 { usize::MAX } else { limit as usize };
    for row in input.into_iter().skip(skip).take(take) {
        pmp.countdown_progress();
        out.insert_row(&row)?;
    }
    Ok(NodeOutput::Temp(out))
}
