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

//! Physical plan nodes. A plan is a DAG of nodes; each node owns one
//! executor. The host compiles SQL elsewhere and ships plans as documents
//! with the field names below; inside the engine they are plain data.

use emberdb_common::tuple::ColumnSpec;
use emberdb_common::types::Datum;
use emberdb_expr::Expression;
use serde::{Deserialize, Serialize};

use emberdb_common::{EngineError, Result};

/// The kinds of plan nodes the engine executes. Used for inline-node
/// lookup by parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanNodeType {
    SeqScan,
    IndexScan,
    NestLoopIndex,
    Aggregate,
    HashAggregate,
    PartialAggregate,
    OrderBy,
    Limit,
    MergeReceive,
    CommonTable,
    Projection,
    Insert,
}

/// How an aggregate executor groups its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStyle {
    /// Input sorted on the full group-by prefix; constant space.
    Serial,
    /// Unsorted input; one hash entry per group.
    Hash,
    /// A serial-ordered prefix with a hashed suffix.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinType {
    Inner,
    Left,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    Desc,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LookupType {
    Equal,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    GeoContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateKind {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    ApproxCountDistinct,
    ValsToHyperloglog,
    HyperloglogsToCard,
    UserDefined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateColumn {
    #[serde(rename = "AGGREGATE_TYPE")]
    pub kind: AggregateKind,
    #[serde(rename = "AGGREGATE_DISTINCT", default)]
    pub distinct: bool,
    #[serde(rename = "AGGREGATE_OUTPUT_COLUMN")]
    pub output_column: usize,
    #[serde(rename = "AGGREGATE_EXPRESSION", default)]
    pub expression: Option<Expression>,
    #[serde(rename = "USER_AGGREGATE_ID", default)]
    pub user_aggregate_id: Option<i32>,
    #[serde(rename = "IS_WORKER", default)]
    pub is_worker: bool,
    #[serde(rename = "IS_PARTITION", default)]
    pub is_partition: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqScanPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "TARGET_TABLE_NAME", default)]
    pub target_table_name: Option<String>,
    /// Scan of a common-table binding instead of a stored table.
    #[serde(rename = "IS_CTE_SCAN", default)]
    pub is_cte_scan: bool,
    #[serde(rename = "PREDICATE", default)]
    pub predicate: Option<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexScanPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "TARGET_TABLE_NAME")]
    pub target_table_name: String,
    #[serde(rename = "TARGET_INDEX_NAME")]
    pub target_index_name: String,
    #[serde(rename = "LOOKUP_TYPE")]
    pub lookup_type: LookupType,
    #[serde(rename = "SORT_DIRECTION", default = "default_sort_direction")]
    pub sort_direction: SortDirection,
    #[serde(rename = "SEARCH_KEY_EXPRESSIONS", default)]
    pub search_key_expressions: Vec<Expression>,
    #[serde(rename = "COMPARE_NOT_DISTINCT_FLAGS", default)]
    pub compare_not_distinct: Vec<bool>,
    #[serde(rename = "END_EXPRESSION", default)]
    pub end_expression: Option<Expression>,
    #[serde(rename = "INITIAL_EXPRESSION", default)]
    pub initial_expression: Option<Expression>,
    #[serde(rename = "SKIP_NULL_PREDICATE", default)]
    pub skip_null_predicate: Option<Expression>,
    #[serde(rename = "PREDICATE", default)]
    pub post_expression: Option<Expression>,
    #[serde(rename = "HAS_OFFSET_RANK_OPTIMIZATION", default)]
    pub has_offset_rank_optimization: bool,
}

fn default_sort_direction() -> SortDirection {
    SortDirection::Invalid
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestLoopIndexPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    /// Expressions producing the joined row, evaluated over the
    /// (outer, inner) pair. The leading expressions mirror the outer
    /// columns.
    #[serde(rename = "OUTPUT_COLUMN_EXPRESSIONS")]
    pub output_column_expressions: Vec<Expression>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "JOIN_TYPE")]
    pub join_type: JoinType,
    #[serde(rename = "PRE_JOIN_PREDICATE", default)]
    pub prejoin_expression: Option<Expression>,
    #[serde(rename = "JOIN_PREDICATE", default)]
    pub post_expression: Option<Expression>,
    #[serde(rename = "WHERE_PREDICATE", default)]
    pub where_expression: Option<Expression>,
    /// Number of columns the outer tuple contributes to the joined row.
    #[serde(rename = "NUM_OF_OUTER_COLS")]
    pub num_outer_columns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatePlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "AGGREGATE_COLUMNS", default)]
    pub aggregate_columns: Vec<AggregateColumn>,
    #[serde(rename = "GROUPBY_EXPRESSIONS", default)]
    pub group_by_expressions: Vec<Expression>,
    /// Indices of the group-by expressions the input is already ordered
    /// on. Only partial aggregation uses this.
    #[serde(rename = "PARTIAL_GROUPBY_COLUMNS", default)]
    pub partial_group_by_columns: Vec<usize>,
    #[serde(rename = "PRE_PREDICATE", default)]
    pub pre_predicate: Option<Expression>,
    #[serde(rename = "POST_PREDICATE", default)]
    pub post_predicate: Option<Expression>,
    /// One expression per output column; pass-through columns evaluate
    /// these over the group's pass-through tuple.
    #[serde(rename = "OUTPUT_COLUMN_EXPRESSIONS")]
    pub output_column_expressions: Vec<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "SORT_EXPRESSIONS")]
    pub sort_expressions: Vec<Expression>,
    #[serde(rename = "SORT_DIRECTIONS")]
    pub sort_directions: Vec<SortDirection>,
    /// Route through the large temp table when the planner flags the query
    /// as oversized.
    #[serde(rename = "IS_LARGE_QUERY", default)]
    pub is_large_query: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA", default)]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "LIMIT", default = "minus_one")]
    pub limit: i64,
    #[serde(rename = "OFFSET", default)]
    pub offset: i64,
    #[serde(rename = "LIMIT_PARAM_IDX", default = "minus_one")]
    pub limit_param_idx: i64,
    #[serde(rename = "OFFSET_PARAM_IDX", default = "minus_one")]
    pub offset_param_idx: i64,
    #[serde(rename = "LIMIT_EXPRESSION", default)]
    pub limit_expression: Option<Expression>,
}

fn minus_one() -> i64 {
    -1
}

impl LimitPlanNode {
    /// Resolve the effective limit and offset from the literal fields, the
    /// parameter slots, or the limit expression, in that order.
    pub fn limit_and_offset(&self, params: &[Datum]) -> Result<(i64, i64)> {
        let mut limit = self.limit;
        let mut offset = self.offset;
        if self.limit_param_idx >= 0 {
            limit = param_as_i64(params, self.limit_param_idx as usize)?;
        }
        if self.offset_param_idx >= 0 {
            offset = param_as_i64(params, self.offset_param_idx as usize)?;
        }
        if let Some(expression) = &self.limit_expression {
            let bound = expression.bind_params(params)?;
            let value = bound.eval_row(&emberdb_common::row::EMPTY_ROW)?;
            limit = value
                .as_ref()
                .map(|v| v.to_i64())
                .transpose()?
                .ok_or_else(|| EngineError::plan_invalid("limit expression yielded NULL"))?;
        }
        Ok((limit, offset))
    }
}

fn param_as_i64(params: &[Datum], index: usize) -> Result<i64> {
    params
        .get(index)
        .and_then(|datum| datum.as_ref())
        .map(|value| value.to_i64())
        .transpose()?
        .ok_or_else(|| EngineError::plan_invalid(format!("parameter {index} is NULL or missing")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReceivePlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonTablePlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "COMMON_TABLE_NAME")]
    pub common_table_name: String,
    /// The plan of the recursive leg, executed to fixpoint. Absent for a
    /// plain (non-recursive) common table.
    #[serde(rename = "RECURSIVE_FRAGMENT", default)]
    pub recursive_fragment: Option<Box<PlanFragment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA")]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "OUTPUT_COLUMN_EXPRESSIONS")]
    pub output_column_expressions: Vec<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertPlanNode {
    #[serde(rename = "PLAN_NODE_ID")]
    pub id: i32,
    #[serde(rename = "CHILDREN_IDS", default)]
    pub children: Vec<i32>,
    #[serde(rename = "OUTPUT_SCHEMA", default)]
    pub output_schema: Vec<ColumnSpec>,
    #[serde(rename = "INLINE_NODES", default)]
    pub inline_nodes: Vec<PlanNode>,
    #[serde(rename = "TARGET_TABLE_NAME")]
    pub target_table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "PLAN_NODE_TYPE")]
pub enum PlanNode {
    #[serde(rename = "SEQSCAN")]
    SeqScan(SeqScanPlanNode),
    #[serde(rename = "INDEXSCAN")]
    IndexScan(IndexScanPlanNode),
    #[serde(rename = "NESTLOOPINDEX")]
    NestLoopIndex(NestLoopIndexPlanNode),
    #[serde(rename = "AGGREGATE")]
    Aggregate(AggregatePlanNode),
    #[serde(rename = "HASHAGGREGATE")]
    HashAggregate(AggregatePlanNode),
    #[serde(rename = "PARTIALAGGREGATE")]
    PartialAggregate(AggregatePlanNode),
    #[serde(rename = "ORDERBY")]
    OrderBy(OrderByPlanNode),
    #[serde(rename = "LIMIT")]
    Limit(LimitPlanNode),
    #[serde(rename = "MERGERECEIVE")]
    MergeReceive(MergeReceivePlanNode),
    #[serde(rename = "COMMONTABLE")]
    CommonTable(CommonTablePlanNode),
    #[serde(rename = "PROJECTION")]
    Projection(ProjectionPlanNode),
    #[serde(rename = "INSERT")]
    Insert(InsertPlanNode),
}

impl PlanNode {
    pub fn node_type(&self) -> PlanNodeType {
        match self {
            PlanNode::SeqScan(_) => PlanNodeType::SeqScan,
            PlanNode::IndexScan(_) => PlanNodeType::IndexScan,
            PlanNode::NestLoopIndex(_) => PlanNodeType::NestLoopIndex,
            PlanNode::Aggregate(_) => PlanNodeType::Aggregate,
            PlanNode::HashAggregate(_) => PlanNodeType::HashAggregate,
            PlanNode::PartialAggregate(_) => PlanNodeType::PartialAggregate,
            PlanNode::OrderBy(_) => PlanNodeType::OrderBy,
            PlanNode::Limit(_) => PlanNodeType::Limit,
            PlanNode::MergeReceive(_) => PlanNodeType::MergeReceive,
            PlanNode::CommonTable(_) => PlanNodeType::CommonTable,
            PlanNode::Projection(_) => PlanNodeType::Projection,
            PlanNode::Insert(_) => PlanNodeType::Insert,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            PlanNode::SeqScan(n) => n.id,
            PlanNode::IndexScan(n) => n.id,
            PlanNode::NestLoopIndex(n) => n.id,
            PlanNode::Aggregate(n) | PlanNode::HashAggregate(n) | PlanNode::PartialAggregate(n) => {
                n.id
            }
            PlanNode::OrderBy(n) => n.id,
            PlanNode::Limit(n) => n.id,
            PlanNode::MergeReceive(n) => n.id,
            PlanNode::CommonTable(n) => n.id,
            PlanNode::Projection(n) => n.id,
            PlanNode::Insert(n) => n.id,
        }
    }

    pub fn children(&self) -> &[i32] {
        match self {
            PlanNode::SeqScan(n) => &n.children,
            PlanNode::IndexScan(n) => &n.children,
            PlanNode::NestLoopIndex(n) => &n.children,
            PlanNode::Aggregate(n) | PlanNode::HashAggregate(n) | PlanNode::PartialAggregate(n) => {
                &n.children
            }
            PlanNode::OrderBy(n) => &n.children,
            PlanNode::Limit(n) => &n.children,
            PlanNode::MergeReceive(n) => &n.children,
            PlanNode::CommonTable(n) => &n.children,
            PlanNode::Projection(n) => &n.children,
            PlanNode::Insert(n) => &n.children,
        }
    }

    pub fn output_schema(&self) -> &[ColumnSpec] {
        match self {
            PlanNode::SeqScan(n) => &n.output_schema,
            PlanNode::IndexScan(n) => &n.output_schema,
            PlanNode::NestLoopIndex(n) => &n.output_schema,
            PlanNode::Aggregate(n) | PlanNode::HashAggregate(n) | PlanNode::PartialAggregate(n) => {
                &n.output_schema
            }
            PlanNode::OrderBy(n) => &n.output_schema,
            PlanNode::Limit(n) => &n.output_schema,
            PlanNode::MergeReceive(n) => &n.output_schema,
            PlanNode::CommonTable(n) => &n.output_schema,
            PlanNode::Projection(n) => &n.output_schema,
            PlanNode::Insert(n) => &n.output_schema,
        }
    }

    pub fn inline_nodes(&self) -> &[PlanNode] {
        match self {
            PlanNode::SeqScan(n) => &n.inline_nodes,
            PlanNode::IndexScan(n) => &n.inline_nodes,
            PlanNode::NestLoopIndex(n) => &n.inline_nodes,
            PlanNode::Aggregate(n) | PlanNode::HashAggregate(n) | PlanNode::PartialAggregate(n) => {
                &n.inline_nodes
            }
            PlanNode::OrderBy(n) => &n.inline_nodes,
            PlanNode::Limit(n) => &n.inline_nodes,
            PlanNode::MergeReceive(n) => &n.inline_nodes,
            PlanNode::CommonTable(n) => &n.inline_nodes,
            PlanNode::Projection(n) => &n.inline_nodes,
            PlanNode::Insert(n) => &n.inline_nodes,
        }
    }

    pub fn find_inline(&self, node_type: PlanNodeType) -> Option<&PlanNode> {
        self.inline_nodes()
            .iter()
            .find(|n| n.node_type() == node_type)
    }

    /// The inline aggregate of a parent node, whichever grouping style it
    /// uses.
    pub fn find_inline_aggregate(&self) -> Option<(&AggregatePlanNode, AggregateStyle)> {
        for node in self.inline_nodes() {
            match node {
                PlanNode::PartialAggregate(n) => return Some((n, AggregateStyle::Partial)),
                PlanNode::Aggregate(n) => return Some((n, AggregateStyle::Serial)),
                PlanNode::HashAggregate(n) => return Some((n, AggregateStyle::Hash)),
                _ => {}
            }
        }
        None
    }

    pub fn find_inline_limit(&self) -> Option<&LimitPlanNode> {
        match self.find_inline(PlanNodeType::Limit) {
            Some(PlanNode::Limit(n)) => Some(n),
            _ => None,
        }
    }
}

/// An executable plan: a list of nodes forming a DAG through
/// `CHILDREN_IDS`, executed leaves first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFragment {
    #[serde(rename = "PLAN_NODES")]
    pub nodes: Vec<PlanNode>,
}

impl PlanFragment {
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: i32) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// The root: the only node no other node lists as a child.
    pub fn root(&self) -> Result<&PlanNode> {
        let mut referenced = std::collections::HashSet::new();
        for node in &self.nodes {
            referenced.extend(node.children().iter().copied());
        }
        self.nodes
            .iter()
            .find(|n| !referenced.contains(&n.id()))
            .ok_or_else(|| EngineError::plan_invalid("plan fragment has no root node"))
    }

    /// Children-before-parents execution order.
    pub fn execution_order(&self) -> Result<Vec<i32>> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = std::collections::HashSet::new();
        let root = self.root()?.id();
        self.visit(root, &mut visited, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        id: i32,
        visited: &mut std::collections::HashSet<i32>,
        order: &mut Vec<i32>,
    ) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let node = self
            .node(id)
            .ok_or_else(|| EngineError::plan_invalid(format!("missing plan node {id}")))?;
        for &child in node.children() {
            self.visit(child, visited, order)?;
        }
        order.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_order_is_children_first() {
        let fragment = PlanFragment::new(vec![
            PlanNode::Limit(LimitPlanNode {
                id: 3,
                children: vec![2],
                output_schema: vec![],
                inline_nodes: vec![],
                limit: 1,
                offset: 0,
                limit_param_idx: -1,
                offset_param_idx: -1,
                limit_expression: None,
            }),
            PlanNode::SeqScan(SeqScanPlanNode {
                id: 2,
                children: vec![],
                output_schema: vec![],
                inline_nodes: vec![],
                target_table_name: Some("t".into()),
                is_cte_scan: false,
                predicate: None,
            }),
        ]);
        assert_eq!(fragment.root().unwrap().id(), 3);
        assert_eq!(fragment.execution_order().unwrap(), vec![2, 3]);
    }

    #[test]
    fn plan_nodes_decode_from_documents() {
        let document = r#"{
            "PLAN_NODE_TYPE": "INDEXSCAN",
            "PLAN_NODE_ID": 4,
            "OUTPUT_SCHEMA": [
                {"data_type": "Integer", "size": 0, "nullable": true, "in_bytes": true}
            ],
            "TARGET_TABLE_NAME": "t",
            "TARGET_INDEX_NAME": "idx_a",
            "LOOKUP_TYPE": "GREATER_EQUAL",
            "SORT_DIRECTION": "ASC",
            "HAS_OFFSET_RANK_OPTIMIZATION": true
        }"#;
        let node: PlanNode = serde_json::from_str(document).unwrap();
        let PlanNode::IndexScan(scan) = &node else {
            panic!("decoded the wrong node kind");
        };
        assert_eq!(scan.id, 4);
        assert_eq!(scan.lookup_type, LookupType::GreaterEqual);
        assert!(scan.has_offset_rank_optimization);
        assert!(scan.search_key_expressions.is_empty());
    }

    #[test]
    fn limit_resolution_order() {
        let node = LimitPlanNode {
            id: 1,
            children: vec![],
            output_schema: vec![],
            inline_nodes: vec![],
            limit: 10,
            offset: 0,
            limit_param_idx: 0,
            offset_param_idx: -1,
            limit_expression: None,
        };
        let params = vec![Some(emberdb_common::types::ScalarImpl::Int64(3))];
        assert_eq!(node.limit_and_offset(&params).unwrap(), (3, 0));
    }
}
