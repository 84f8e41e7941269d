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

//! Plan-node executors for the EmberDB engine: pull-style operators over
//! the table store, with inlineable child operators that short-circuit
//! intermediate materialization.

pub mod aggregate;
pub mod common_table;
pub mod comparer;
pub mod context;
pub mod index_scan;
pub mod insert;
pub mod join;
pub mod limit;
pub mod merge_receive;
pub mod order_by;
pub mod plan;
pub mod postfilter;
pub mod progress;
pub mod scan;

pub use comparer::TupleComparer;
pub use context::{Catalog, ExecutorContext, HostCallbacks, NodeOutput, NoopHostCallbacks};
pub use plan::{PlanFragment, PlanNode, PlanNodeType};
pub use postfilter::CountingPostfilter;
pub use progress::ProgressMonitor;
