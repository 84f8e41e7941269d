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

//! The expression interpreter shared by the plan-node executors and the
//! table streaming engine, plus the stream predicate machinery.

mod expr;
mod predicate;

pub use expr::{
    datum_is_true, ArithmeticOp, CompareOp, ConjunctionOp, Expression, TupleSide,
};
pub use predicate::{HashRange, HashRangeExpression, StreamPredicate, StreamPredicateList};
