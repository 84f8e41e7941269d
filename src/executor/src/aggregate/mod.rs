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

//! Grouped aggregation in three styles over one shared machine: serial
//! (input sorted on the group-by prefix), hash (unsorted input), and
//! partial (serial prefix, hashed suffix). The machine doubles as the
//! inline aggregate driven directly by scan and join loops.

use std::collections::{HashMap, HashSet};

use emberdb_common::row::{OwnedRow, Row, EMPTY_ROW};
use emberdb_common::types::{Datum, ScalarImpl};
use emberdb_common::{EngineError, Result};
use emberdb_expr::{datum_is_true, Expression};
use emberdb_storage::TempTable;

use crate::context::{ExecutorContext, HostCallbacks, NodeOutput};
use crate::plan::{
    AggregateColumn, AggregatePlanNode, AggregateStyle, PlanNode, PlanNodeType,
};
use crate::postfilter::{CountingPostfilter, NO_LIMIT, NO_OFFSET};
use crate::progress::ProgressMonitor;

mod functions;
pub mod hyperloglog;

pub use functions::AggregatorImpl;

/// The aggregates in progress for one group: the aggregator vector, the
/// per-aggregate distinct sets, and the group's pass-through tuple.
struct AggregateRow {
    aggregators: Vec<AggregatorImpl>,
    distinct_sets: Vec<Option<HashSet<ScalarImpl>>>,
    pass_through: OwnedRow,
}

/// The shared aggregation machine.
pub struct AggregateExec {
    style: AggregateStyle,
    columns: Vec<AggregateColumn>,
    input_expressions: Vec<Option<Expression>>,
    group_by_expressions: Vec<Expression>,
    /// Group-by positions the input arrives ordered on (partial style).
    partial_serial_columns: Vec<usize>,
    /// The remaining group-by positions, hashed within a serial run.
    partial_hash_columns: Vec<usize>,
    pre_predicate: Option<Expression>,
    output_column_expressions: Vec<Expression>,
    output_types: Vec<emberdb_common::types::DataType>,
    pass_through_columns: Vec<usize>,
    postfilter: CountingPostfilter,

    // Serial state.
    serial_row: Option<AggregateRow>,
    in_progress_group_key: Option<OwnedRow>,
    no_input_rows: bool,
    failed_pre_predicate_on_first_row: bool,

    // Hash state; partial aggregation uses it per serial run, keyed on the
    // suffix columns.
    hash: HashMap<OwnedRow, AggregateRow>,
    at_the_first_row: bool,
}

impl AggregateExec {
    pub fn new(
        node: &AggregatePlanNode,
        style: AggregateStyle,
        params: &[Datum],
    ) -> Result<Self> {
        let input_expressions = node
            .aggregate_columns
            .iter()
            .map(|column| {
                column
                    .expression
                    .as_ref()
                    .map(|e| e.bind_params(params))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;
        let group_by_expressions = node
            .group_by_expressions
            .iter()
            .map(|e| e.bind_params(params))
            .collect::<Result<Vec<_>>>()?;
        let output_column_expressions = node
            .output_column_expressions
            .iter()
            .map(|e| e.bind_params(params))
            .collect::<Result<Vec<_>>>()?;
        if output_column_expressions.len() != node.output_schema.len() {
            return Err(EngineError::plan_invalid(
                "aggregate output schema and column expressions disagree",
            ));
        }

        // Output columns not produced by an aggregate pass values through
        // from the group's representative input row.
        let mut is_aggregate_output = vec![false; node.output_schema.len()];
        for column in &node.aggregate_columns {
            if column.output_column >= is_aggregate_output.len() {
                return Err(EngineError::plan_invalid(format!(
                    "aggregate output column {} out of range",
                    column.output_column
                )));
            }
            is_aggregate_output[column.output_column] = true;
        }
        let pass_through_columns = (0..node.output_schema.len())
            .filter(|&i| !is_aggregate_output[i])
            .collect();

        let (limit, offset) = match node.inline_limit() {
            Some(limit_node) => limit_node.limit_and_offset(params)?,
            None => (NO_LIMIT, NO_OFFSET),
        };
        let post_predicate = node
            .post_predicate
            .as_ref()
            .map(|e| e.bind_params(params))
            .transpose()?;
        let pre_predicate = node
            .pre_predicate
            .as_ref()
            .map(|e| e.bind_params(params))
            .transpose()?;

        let partial_serial_columns = node.partial_group_by_columns.clone();
        let partial_hash_columns = (0..node.group_by_expressions.len())
            .filter(|i| !partial_serial_columns.contains(i))
            .collect();

        Ok(Self {
            style,
            columns: node.aggregate_columns.clone(),
            input_expressions,
            group_by_expressions,
            partial_serial_columns,
            partial_hash_columns,
            pre_predicate,
            output_column_expressions,
            output_types: node
                .output_schema
                .iter()
                .map(|spec| spec.data_type)
                .collect(),
            pass_through_columns,
            postfilter: CountingPostfilter::new(post_predicate, limit, offset),
            serial_row: None,
            in_progress_group_key: None,
            no_input_rows: true,
            failed_pre_predicate_on_first_row: false,
            hash: HashMap::new(),
            at_the_first_row: true,
        })
    }

    /// Build the inline aggregate of a parent node, if one is attached.
    pub fn from_inline(parent: &PlanNode, params: &[Datum]) -> Result<Option<Self>> {
        match parent.find_inline_aggregate() {
            Some((node, style)) => Ok(Some(Self::new(node, style, params)?)),
            None => Ok(None),
        }
    }

    /// Signals the driving loop to stop once a nested LIMIT is satisfied.
    pub fn is_under_limit(&self) -> bool {
        self.postfilter.is_under_limit()
    }

    fn new_aggregate_row(&self, pass_through: OwnedRow, host: &dyn HostCallbacks) -> Result<AggregateRow> {
        let mut aggregators = Vec::with_capacity(self.columns.len());
        let mut udaf_indexes: HashMap<i32, usize> = HashMap::new();
        for column in &self.columns {
            let udaf_index = match column.user_aggregate_id {
                Some(id) => {
                    let slot = udaf_indexes.entry(id).or_insert(0);
                    let current = *slot;
                    *slot += 1;
                    current
                }
                None => 0,
            };
            aggregators.push(AggregatorImpl::new(
                column.kind,
                column.user_aggregate_id,
                column.is_worker,
                column.is_partition,
                udaf_index,
                host,
            )?);
        }
        let distinct_sets = self
            .columns
            .iter()
            .map(|column| column.distinct.then(HashSet::new))
            .collect();
        Ok(AggregateRow {
            aggregators,
            distinct_sets,
            pass_through,
        })
    }

    fn group_key(&self, row: &dyn Row) -> Result<OwnedRow> {
        self.group_by_expressions
            .iter()
            .map(|e| e.eval_row(row))
            .collect()
    }

    fn partial_hash_key(&self, full_key: &OwnedRow) -> OwnedRow {
        self.partial_hash_columns
            .iter()
            .map(|&i| full_key[i].clone())
            .collect()
    }

    fn advance_aggregates(
        &mut self,
        group: &mut AggregateRow,
        row: &dyn Row,
        host: &dyn HostCallbacks,
    ) -> Result<()> {
        for (position, aggregator) in group.aggregators.iter_mut().enumerate() {
            // COUNT(*) has no input expression and accepts a dummy.
            let value = match &self.input_expressions[position] {
                Some(expression) => expression.eval_row(row)?,
                None => None,
            };
            if let Some(seen) = &mut group.distinct_sets[position] {
                if let Some(value) = &value {
                    if !seen.insert(value.clone()) {
                        continue;
                    }
                }
            }
            aggregator.advance(&value, host)?;
        }
        Ok(())
    }

    /// Finalize one group into the output table, through the post filter.
    fn insert_output_tuple(
        &mut self,
        group: &mut AggregateRow,
        host: &dyn HostCallbacks,
        out: &mut TempTable,
    ) -> Result<bool> {
        if !self.postfilter.is_under_limit() {
            return Ok(false);
        }
        let mut output: Vec<Datum> = vec![None; self.output_types.len()];
        for (position, column) in self.columns.iter().enumerate() {
            output[column.output_column] = group.aggregators[position]
                .finalize(self.output_types[column.output_column], host)?;
        }
        for &column in &self.pass_through_columns {
            output[column] =
                self.output_column_expressions[column].eval_row(&group.pass_through)?;
        }
        let output = OwnedRow::new(output);
        let accepted = self.postfilter.eval(&output, &EMPTY_ROW)?;
        if accepted {
            out.insert_row(&output)?;
        }
        Ok(accepted)
    }

    fn reset_aggregates(&self, group: &mut AggregateRow, host: &dyn HostCallbacks) -> Result<()> {
        for aggregator in &mut group.aggregators {
            aggregator.reset(host)?;
        }
        for set in &mut group.distinct_sets {
            if let Some(set) = set {
                set.clear();
            }
        }
        Ok(())
    }

    /// Feed one input row through the aggregation. The caller checks
    /// [`Self::is_under_limit`] between rows.
    pub fn execute_tuple(
        &mut self,
        row: &OwnedRow,
        host: &dyn HostCallbacks,
        out: &mut TempTable,
    ) -> Result<()> {
        match self.style {
            AggregateStyle::Serial => self.execute_tuple_serial(row, host, out),
            AggregateStyle::Hash => self.execute_tuple_hash(row, host, out),
            AggregateStyle::Partial => self.execute_tuple_partial(row, host, out),
        }
    }

    fn execute_tuple_serial(
        &mut self,
        row: &OwnedRow,
        host: &dyn HostCallbacks,
        out: &mut TempTable,
    ) -> Result<()> {
        if self.no_input_rows {
            self.no_input_rows = false;
            // The pre-predicate guards the single-row case produced by a
            // MAX-on-index rewrite; it only ever sees the first row.
            let passes = match &self.pre_predicate {
                Some(predicate) => datum_is_true(&predicate.eval_row(row)?),
                None => true,
            };
            if passes {
                self.in_progress_group_key = Some(self.group_key(row)?);
                let mut group = self.new_aggregate_row(row.clone(), host)?;
                self.advance_aggregates(&mut group, row, host)?;
                self.serial_row = Some(group);
            } else {
                self.failed_pre_predicate_on_first_row = true;
            }
            return Ok(());
        }
        if self.failed_pre_predicate_on_first_row {
            return Ok(());
        }

        let next_key = self.group_key(row)?;
        let current_key = self
            .in_progress_group_key
            .as_ref()
            .expect("in-progress key set with the first row");
        // Compare group-by columns starting from the least significant;
        // groups arrive in order, so any difference ends the current one.
        let boundary = next_key
            .values()
            .iter()
            .zip(current_key.values())
            .rev()
            .any(|(a, b)| a != b);
        if boundary {
            let mut group = self.serial_row.take().expect("group in progress");
            self.insert_output_tuple(&mut group, host, out)?;
            self.reset_aggregates(&mut group, host)?;
            group.pass_through = row.clone();
            self.serial_row = Some(group);
            self.in_progress_group_key = Some(next_key);
        }
        let mut group = self.serial_row.take().expect("group in progress");
        self.advance_aggregates(&mut group, row, host)?;
        self.serial_row = Some(group);
        Ok(())
    }

    fn execute_tuple_hash(
        &mut self,
        row: &OwnedRow,
        host: &dyn HostCallbacks,
        out: &mut TempTable,
    ) -> Result<()> {
        let key = self.group_key(row)?;
        if !self.hash.contains_key(&key) {
            let group = self.new_aggregate_row(row.clone(), host)?;
            self.hash.insert(key.clone(), group);
            if self.columns.is_empty() {
                // Pure distinct projection: rows are emitted as groups
                // appear.
                let mut group = self.hash.remove(&key).expect("just inserted");
                self.insert_output_tuple(&mut group, host, out)?;
                self.hash.insert(key, group);
                return Ok(());
            }
        }
        let mut group = self.hash.remove(&key).expect("present");
        self.advance_aggregates(&mut group, row, host)?;
        self.hash.insert(key, group);
        Ok(())
    }

    fn execute_tuple_partial(
        &mut self,
        row: &OwnedRow,
        host: &dyn HostCallbacks,
        out: &mut TempTable,
    ) -> Result<()> {
        let full_key = self.group_key(row)?;
        let serial_boundary = if self.at_the_first_row {
            self.at_the_first_row = false;
            true
        } else {
            let current = self
                .in_progress_group_key
                .as_ref()
                .expect("serial key tracked after the first row");
            self.partial_serial_columns
                .iter()
                .any(|&i| full_key[i] != current[i])
        };
        if serial_boundary {
            // A new serial run: flush and drop every sub-group of the old
            // one.
            self.flush_hash_groups(host, out)?;
        }
        self.in_progress_group_key = Some(full_key.clone());

        let suffix_key = self.partial_hash_key(&full_key);
        if !self.hash.contains_key(&suffix_key) {
            let group = self.new_aggregate_row(row.clone(), host)?;
            self.hash.insert(suffix_key.clone(), group);
        }
        let mut group = self.hash.remove(&suffix_key).expect("present");
        self.advance_aggregates(&mut group, row, host)?;
        self.hash.insert(suffix_key, group);
        Ok(())
    }

    fn flush_hash_groups(&mut self, host: &dyn HostCallbacks, out: &mut TempTable) -> Result<()> {
        let groups: Vec<AggregateRow> = {
            let mut drained: Vec<(OwnedRow, AggregateRow)> = self.hash.drain().collect();
            // Deterministic flush order for stable output.
            drained.sort_by(|(a, _), (b, _)| a.cmp(b));
            drained.into_iter().map(|(_, group)| group).collect()
        };
        for mut group in groups {
            self.insert_output_tuple(&mut group, host, out)?;
        }
        Ok(())
    }

    /// Flush whatever is still accumulated. Serial aggregation with no
    /// input and no group-by columns emits its single synthetic row here.
    pub fn finish(&mut self, host: &dyn HostCallbacks, out: &mut TempTable) -> Result<()> {
        match self.style {
            AggregateStyle::Serial => {
                if !self.postfilter.is_under_limit() {
                    self.serial_row = None;
                    return Ok(());
                }
                if self.no_input_rows || self.failed_pre_predicate_on_first_row {
                    // SELECT SUM(A) FROM T on empty T yields one row;
                    // adding GROUP BY C yields none.
                    if self.group_by_expressions.is_empty() {
                        let mut group = self.new_aggregate_row(OwnedRow::empty(), host)?;
                        self.insert_output_tuple(&mut group, host, out)?;
                    }
                } else if let Some(mut group) = self.serial_row.take() {
                    self.insert_output_tuple(&mut group, host, out)?;
                }
                Ok(())
            }
            AggregateStyle::Hash => {
                if !self.columns.is_empty() {
                    self.flush_hash_groups(host, out)?;
                }
                self.hash.clear();
                Ok(())
            }
            AggregateStyle::Partial => {
                self.flush_hash_groups(host, out)?;
                Ok(())
            }
        }
    }
}

impl AggregatePlanNode {
    /// A LIMIT nested directly inside the aggregate node.
    fn inline_limit(&self) -> Option<&crate::plan::LimitPlanNode> {
        self.inline_nodes.iter().find_map(|node| match node {
            PlanNode::Limit(limit) => Some(limit),
            _ => None,
        })
    }
}

/// The standalone (non-inline) aggregate executor.
pub fn execute_standalone_aggregate(
    node: &AggregatePlanNode,
    node_type: PlanNodeType,
    plan_node: &PlanNode,
    ctx: &mut ExecutorContext<'_>,
    pmp: &mut ProgressMonitor<'_>,
) -> Result<NodeOutput> {
    let style = match node_type {
        PlanNodeType::Aggregate => AggregateStyle::Serial,
        PlanNodeType::HashAggregate => AggregateStyle::Hash,
        PlanNodeType::PartialAggregate => AggregateStyle::Partial,
        other => {
            return Err(EngineError::plan_invalid(format!(
                "{other:?} is not an aggregate node"
            )))
        }
    };
    let input = ctx.input_rows(plan_node)?;
    let mut out = ctx.new_output_table("aggregate output", &node.output_schema);
    let mut exec = AggregateExec::new(node, style, &ctx.params)?;
    for row in &input {
        if !exec.is_under_limit() {
            break;
        }
        pmp.countdown_progress();
        exec.execute_tuple(row, ctx.host, &mut out)?;
    }
    exec.finish(ctx.host, &mut out)?;
    Ok(NodeOutput::Temp(out))
}
