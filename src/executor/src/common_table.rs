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

//! Common-table (CTE) execution. The base query's output seeds the final
//! result; a recursive leg, when present, re-executes against the current
//! binding until it produces no new rows.

use std::sync::Arc;

use emberdb_common::tuple::TupleSchema;
use emberdb_common::{EngineError, Result};
use emberdb_storage::TempTable;

use crate::context::{ExecutorContext, NodeOutput};
use crate::plan::CommonTablePlanNode;

pub fn execute_common_table(
    node: &CommonTablePlanNode,
    ctx: &mut ExecutorContext<'_>,
) -> Result<NodeOutput> {
    let base_rows = {
        let child = node.children.first().copied().ok_or_else(|| {
            EngineError::plan_invalid("common-table node requires a base-query child")
        })?;
        ctx.child_rows(child)?
    };

    let schema = Arc::new(TupleSchema::new(node.output_schema.clone()));
    let mut final_output = ctx.new_output_table("common table output", &node.output_schema);
    for row in &base_rows {
        final_output.insert_row(row)?;
    }

    let Some(recursive_fragment) = &node.recursive_fragment else {
        // Non-recursive: the base query is the whole answer.
        return Ok(NodeOutput::Temp(final_output));
    };

    // Seed the binding the recursive leg scans through.
    let mut working = TempTable::new(
        format!("{} working", node.common_table_name),
        schema.clone(),
        ctx.config.tuples_per_block,
    );
    for row in &base_rows {
        working.insert_row(row)?;
    }

    while !working.is_empty() {
        ctx.set_common_table(node.common_table_name.clone(), working);

        let recursive_rows = ctx.execute_fragment(recursive_fragment)?;

        // The recursive output must lay out like the base output, or the
        // appended rows would be garbage.
        let recursive_schema = TupleSchema::new(
            recursive_fragment.root()?.output_schema().to_vec(),
        );
        if !recursive_schema.is_layout_compatible(&schema) {
            return Err(EngineError::plan_invalid(format!(
                "recursive output of {} is not layout-compatible with its base query",
                node.common_table_name
            )));
        }

        for row in &recursive_rows {
            final_output.insert_row(row)?;
        }

        // Rotate: the just-produced rows become the next iteration's
        // binding.
        let mut binding = ctx
            .take_common_table(&node.common_table_name)
            .expect("binding set above");
        binding.delete_all_tuples();
        working = TempTable::new(
            format!("{} working", node.common_table_name),
            schema.clone(),
            ctx.config.tuples_per_block,
        );
        for row in &recursive_rows {
            working.insert_row(row)?;
        }
        drop(binding);
    }

    // Later scans of the CTE name read the completed result.
    let mut published = TempTable::new(
        node.common_table_name.clone(),
        schema,
        ctx.config.tuples_per_block,
    );
    for row in final_output.iter_rows() {
        published.insert_row(&row)?;
    }
    ctx.set_common_table(node.common_table_name.clone(), published);

    Ok(NodeOutput::Temp(final_output))
}
