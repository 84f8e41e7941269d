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

//! INSERT execution. As an inline node the insert is fed directly from its
//! parent's scan loop; standalone it drains its child. Either way the
//! output is the single-row DML count.

use emberdb_common::row::OwnedRow;
use emberdb_common::tuple::ColumnSpec;
use emberdb_common::types::{DataType, ScalarImpl};
use emberdb_common::Result;
use emberdb_storage::TempTable;

use crate::context::{ExecutorContext, NodeOutput};
use crate::plan::{InsertPlanNode, PlanNode};
use crate::progress::ProgressMonitor;

/// Schema of the DML count row every insert produces.
pub fn dml_count_schema() -> Vec<ColumnSpec> {
    vec![ColumnSpec::new(DataType::BigInt)]
}

pub struct InsertExec {
    target_table_name: String,
    rows_inserted: i64,
}

impl InsertExec {
    pub fn new(node: &InsertPlanNode) -> Self {
        Self {
            target_table_name: node.target_table_name.clone(),
            rows_inserted: 0,
        }
    }

    /// The inline insert of a parent scan, if one is attached.
    pub fn from_inline(parent: &PlanNode) -> Option<Self> {
        parent.inline_nodes().iter().find_map(|node| match node {
            PlanNode::Insert(n) => Some(Self::new(n)),
            _ => None,
        })
    }

    pub fn execute_tuple(&mut self, ctx: &ExecutorContext<'_>, row: &OwnedRow) -> Result<()> {
        ctx.catalog
            .table_mut(&self.target_table_name)?
            .insert_row(row)?;
        self.rows_inserted += 1;
        Ok(())
    }

    pub fn finish(self, out: &mut TempTable) -> Result<()> {
        out.insert_row(&OwnedRow::new(vec![Some(ScalarImpl::Int64(
            self.rows_inserted,
        ))]))
    }
}

/// INSERT ... SELECT where the select was not inlined into a scan.
pub fn execute_standalone_insert(
    node: &InsertPlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let input = {
        let child = node.children.first().copied();
        match child {
            Some(id) => ctx.child_rows(id)?,
            None => Vec::new(),
        }
    };
    let mut exec = InsertExec::new(node);
    for row in &input {
        pmp.countdown_progress();
        exec.execute_tuple(ctx, row)?;
    }
    let mut out = ctx.new_output_table("insert count", &dml_count_schema());
    exec.finish(&mut out)?;
    Ok(NodeOutput::Temp(out))
}
