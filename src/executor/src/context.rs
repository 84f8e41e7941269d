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

//! Per-fragment execution state: the catalog handle, parameters, host
//! callbacks, per-node output tables, common-table bindings, and the
//! driver that runs a plan fragment's executors in topological order.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::sync::Arc;

use emberdb_common::config::EngineConfig;
use emberdb_common::row::OwnedRow;
use emberdb_common::tuple::{ColumnSpec, TupleSchema};
use emberdb_common::types::Datum;
use emberdb_common::{EngineError, Result};
use emberdb_storage::{PersistentTable, TempTable};
use tracing::debug;

use crate::plan::{PlanFragment, PlanNode};
use crate::progress::ProgressMonitor;

/// The channel back into the host runtime: progress publication and
/// user-defined aggregate dispatch.
pub trait HostCallbacks {
    fn report_progress(&self, tuples_processed: u64);

    fn udaf_start(&self, function_id: i32) -> Result<()>;

    fn udaf_assemble(&self, function_id: i32, args: &[Datum], udaf_index: usize) -> Result<()>;

    fn udaf_combine(&self, function_id: i32, serialized: &[u8], udaf_index: usize) -> Result<()>;

    fn udaf_worker_end(&self, function_id: i32, udaf_index: usize) -> Result<Datum>;

    fn udaf_coordinator_end(&self, function_id: i32, udaf_index: usize) -> Result<Datum>;
}

/// A host that ignores progress and has no aggregate functions installed.
pub struct NoopHostCallbacks;

impl HostCallbacks for NoopHostCallbacks {
    fn report_progress(&self, _tuples_processed: u64) {}

    fn udaf_start(&self, function_id: i32) -> Result<()> {
        Err(no_udaf(function_id))
    }

    fn udaf_assemble(&self, function_id: i32, _args: &[Datum], _udaf_index: usize) -> Result<()> {
        Err(no_udaf(function_id))
    }

    fn udaf_combine(&self, function_id: i32, _serialized: &[u8], _udaf_index: usize) -> Result<()> {
        Err(no_udaf(function_id))
    }

    fn udaf_worker_end(&self, function_id: i32, _udaf_index: usize) -> Result<Datum> {
        Err(no_udaf(function_id))
    }

    fn udaf_coordinator_end(&self, function_id: i32, _udaf_index: usize) -> Result<Datum> {
        Err(no_udaf(function_id))
    }
}

fn no_udaf(function_id: i32) -> EngineError {
    EngineError::UnknownAggregateType(
        format!("no host channel for user-defined aggregate {function_id}").into(),
    )
}

/// Tables reachable by name. Interior mutability lets a fragment scan one
/// table while a DML executor writes another; a fragment never scans and
/// mutates the same table.
#[derive(Default)]
pub struct Catalog {
    tables: HashMap<String, RefCell<PersistentTable>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: PersistentTable) {
        self.tables
            .insert(table.name().to_owned(), RefCell::new(table));
    }

    pub fn remove_table(&mut self, name: &str) -> Option<PersistentTable> {
        self.tables.remove(name).map(|cell| cell.into_inner())
    }

    pub fn table(&self, name: &str) -> Result<Ref<'_, PersistentTable>> {
        self.tables
            .get(name)
            .map(|cell| cell.borrow())
            .ok_or_else(|| EngineError::plan_invalid(format!("unknown table {name}")))
    }

    pub fn table_mut(&self, name: &str) -> Result<RefMut<'_, PersistentTable>> {
        self.tables
            .get(name)
            .map(|cell| cell.borrow_mut())
            .ok_or_else(|| EngineError::plan_invalid(format!("unknown table {name}")))
    }
}

/// What a plan node produced: a materialized temp table, or an alias of a
/// stored table when a bare scan could skip materialization entirely.
pub enum NodeOutput {
    Temp(TempTable),
    TableRef(String),
}

impl NodeOutput {
    pub fn row_count(&self, catalog: &Catalog) -> Result<u64> {
        Ok(match self {
            NodeOutput::Temp(table) => table.active_tuple_count(),
            NodeOutput::TableRef(name) => catalog.table(name)?.visible_tuple_count(),
        })
    }
}

/// Per-fragment execution context.
pub struct ExecutorContext<'a> {
    pub catalog: &'a Catalog,
    pub config: Arc<EngineConfig>,
    pub params: Vec<Datum>,
    pub host: &'a dyn HostCallbacks,
    /// Pre-sorted partition streams for a merge-receive node, loaded by the
    /// host before the fragment runs.
    pub dependency_tables: Vec<TempTable>,
    node_outputs: HashMap<i32, NodeOutput>,
    common_tables: HashMap<String, TempTable>,
}

impl<'a> ExecutorContext<'a> {
    pub fn new(
        catalog: &'a Catalog,
        config: Arc<EngineConfig>,
        params: Vec<Datum>,
        host: &'a dyn HostCallbacks,
    ) -> Self {
        Self {
            catalog,
            config,
            params,
            host,
            dependency_tables: Vec::new(),
            node_outputs: HashMap::new(),
            common_tables: HashMap::new(),
        }
    }

    /// Run a fragment's executors leaves-first and return the root node's
    /// rows. Failed fragments surface their error; partial outputs are
    /// discarded with the context.
    pub fn execute_fragment(&mut self, fragment: &PlanFragment) -> Result<Vec<OwnedRow>> {
        let order = fragment.execution_order()?;
        let mut pmp = ProgressMonitor::new(self.host, self.config.progress_report_interval);
        for id in &order {
            let node = fragment
                .node(*id)
                .ok_or_else(|| EngineError::plan_invalid(format!("missing plan node {id}")))?;
            debug!(node = *id, node_type = ?node.node_type(), "executing plan node");
            let output = self.execute_node(node, &mut pmp)?;
            self.node_outputs.insert(*id, output);
        }
        let root = fragment.root()?.id();
        let output = self
            .node_outputs
            .get(&root)
            .ok_or_else(|| EngineError::plan_invalid("root node produced no output"))?;
        self.output_rows(output)
    }

    fn execute_node(
        &mut self,
        node: &PlanNode,
        pmp: &mut ProgressMonitor<'_>,
    ) -> Result<NodeOutput> {
        match node {
            PlanNode::SeqScan(n) => crate::scan::execute_seq_scan(n, node, self, pmp),
            PlanNode::IndexScan(n) => crate::index_scan::execute_index_scan(n, node, self, pmp),
            PlanNode::NestLoopIndex(n) => crate::join::execute_nestloop_index(n, node, self, pmp),
            PlanNode::Aggregate(n) | PlanNode::HashAggregate(n) | PlanNode::PartialAggregate(n) => {
                crate::aggregate::execute_standalone_aggregate(
                    n,
                    node.node_type(),
                    node,
                    self,
                    pmp,
                )
            }
            PlanNode::OrderBy(n) => crate::order_by::execute_order_by(n, self, pmp),
            PlanNode::Limit(n) => crate::limit::execute_limit(n, self, pmp),
            PlanNode::MergeReceive(n) => crate::merge_receive::execute_merge_receive(n, node, self, pmp),
            PlanNode::CommonTable(n) => crate::common_table::execute_common_table(n, self),
            PlanNode::Projection(n) => crate::scan::execute_standalone_projection(n, self, pmp),
            PlanNode::Insert(n) => crate::insert::execute_standalone_insert(n, self, pmp),
        }
    }

    /// Materialize the rows of a node output.
    pub fn output_rows(&self, output: &NodeOutput) -> Result<Vec<OwnedRow>> {
        Ok(match output {
            NodeOutput::Temp(table) => table.iter_rows().collect(),
            NodeOutput::TableRef(name) => self
                .catalog
                .table(name)?
                .iter_visible()
                .map(|(_, tuple)| {
                    use emberdb_common::row::Row;
                    tuple.to_owned_row()
                })
                .collect(),
        })
    }

    /// Rows produced by a child node.
    pub(crate) fn child_rows(&self, child_id: i32) -> Result<Vec<OwnedRow>> {
        let output = self.node_outputs.get(&child_id).ok_or_else(|| {
            EngineError::plan_invalid(format!("child node {child_id} has not produced output"))
        })?;
        self.output_rows(output)
    }

    /// Rows of the first child of `node`.
    pub(crate) fn input_rows(&self, node: &PlanNode) -> Result<Vec<OwnedRow>> {
        let child = node.children().first().copied().ok_or_else(|| {
            EngineError::plan_invalid(format!("plan node {} has no input child", node.id()))
        })?;
        self.child_rows(child)
    }

    pub(crate) fn new_output_table(&self, name: &str, columns: &[ColumnSpec]) -> TempTable {
        TempTable::new(
            name,
            Arc::new(TupleSchema::new(columns.to_vec())),
            self.config.tuples_per_block,
        )
    }

    // Common-table bindings for CTE execution.

    pub fn set_common_table(&mut self, name: impl Into<String>, table: TempTable) {
        self.common_tables.insert(name.into(), table);
    }

    pub fn take_common_table(&mut self, name: &str) -> Option<TempTable> {
        self.common_tables.remove(name)
    }

    pub fn common_table(&self, name: &str) -> Result<&TempTable> {
        self.common_tables.get(name).ok_or_else(|| {
            EngineError::plan_invalid(format!("no common table bound under {name}"))
        })
    }
}
