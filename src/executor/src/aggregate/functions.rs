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

//! The per-group aggregate state machines. One enum variant per aggregate
//! kind, dispatched directly in the hot loop.

use emberdb_common::types::{
    cast_datum, checked_add, checked_div, op_max, op_min, DataType, Datum, ScalarImpl,
};
use emberdb_common::{EngineError, Result};

use super::hyperloglog::HyperLogLog;
use crate::context::HostCallbacks;
use crate::plan::AggregateKind;

/// Width of the register index of the distinct-count sketches. The
/// serialized sketch is `2^16 + 1` bytes.
const REGISTER_BIT_WIDTH: u8 = 16;

/// Rows buffered per host `assemble` call for user-defined aggregates.
const ROWS_PER_BATCH: usize = 32;

pub enum AggregatorImpl {
    CountStar {
        count: i64,
    },
    Count {
        count: i64,
    },
    Sum {
        value: Datum,
    },
    Avg {
        value: Datum,
        count: i64,
    },
    Min {
        value: Datum,
    },
    Max {
        value: Datum,
    },
    ApproxCountDistinct {
        hll: HyperLogLog,
    },
    /// The worker half of a split APPROX_COUNT_DISTINCT: same advance,
    /// finalizes into a serialized sketch.
    ValsToHyperloglog {
        hll: HyperLogLog,
    },
    /// The coordinator half: merges serialized sketches, finalizes into the
    /// cardinality estimate.
    HyperloglogsToCard {
        hll: HyperLogLog,
    },
    UserDefined {
        function_id: i32,
        udaf_index: usize,
        is_worker: bool,
        is_partition: bool,
        batch: Vec<Datum>,
    },
}

impl AggregatorImpl {
    pub fn new(
        kind: AggregateKind,
        user_aggregate_id: Option<i32>,
        is_worker: bool,
        is_partition: bool,
        udaf_index: usize,
        host: &dyn HostCallbacks,
    ) -> Result<Self> {
        Ok(match kind {
            AggregateKind::CountStar => Self::CountStar { count: 0 },
            AggregateKind::Count => Self::Count { count: 0 },
            AggregateKind::Sum => Self::Sum { value: None },
            AggregateKind::Avg => Self::Avg {
                value: None,
                count: 0,
            },
            AggregateKind::Min => Self::Min { value: None },
            AggregateKind::Max => Self::Max { value: None },
            AggregateKind::ApproxCountDistinct => Self::ApproxCountDistinct {
                hll: HyperLogLog::new(REGISTER_BIT_WIDTH),
            },
            AggregateKind::ValsToHyperloglog => Self::ValsToHyperloglog {
                hll: HyperLogLog::new(REGISTER_BIT_WIDTH),
            },
            AggregateKind::HyperloglogsToCard => Self::HyperloglogsToCard {
                hll: HyperLogLog::new(REGISTER_BIT_WIDTH),
            },
            AggregateKind::UserDefined => {
                let function_id = user_aggregate_id.ok_or_else(|| {
                    EngineError::UnknownAggregateType(
                        "user-defined aggregate without a function id".into(),
                    )
                })?;
                host.udaf_start(function_id)?;
                Self::UserDefined {
                    function_id,
                    udaf_index,
                    is_worker,
                    is_partition,
                    batch: Vec::with_capacity(ROWS_PER_BATCH),
                }
            }
        })
    }

    /// Fold one input value in. NULLs are ignored by every kind except
    /// `COUNT(*)`, which counts the dummy datum its missing input
    /// expression produces.
    pub fn advance(&mut self, input: &Datum, host: &dyn HostCallbacks) -> Result<()> {
        match self {
            Self::CountStar { count } => {
                *count += 1;
                Ok(())
            }
            Self::Count { count } => {
                if input.is_some() {
                    *count += 1;
                }
                Ok(())
            }
            Self::Sum { value } => {
                let Some(input) = input else { return Ok(()) };
                *value = Some(match value.take() {
                    None => input.clone(),
                    Some(current) => checked_add(&current, input)?,
                });
                Ok(())
            }
            Self::Avg { value, count } => {
                let Some(input) = input else { return Ok(()) };
                *value = Some(match value.take() {
                    None => input.clone(),
                    Some(current) => checked_add(&current, input)?,
                });
                *count += 1;
                Ok(())
            }
            Self::Min { value } => {
                let Some(input) = input else { return Ok(()) };
                *value = Some(match value.take() {
                    None => input.clone(),
                    Some(current) => op_min(&current, input)?,
                });
                Ok(())
            }
            Self::Max { value } => {
                let Some(input) = input else { return Ok(()) };
                *value = Some(match value.take() {
                    None => input.clone(),
                    Some(current) => op_max(&current, input)?,
                });
                Ok(())
            }
            Self::ApproxCountDistinct { hll } | Self::ValsToHyperloglog { hll } => {
                let Some(input) = input else { return Ok(()) };
                // Variable-length values aren't supported, and doubles are
                // excluded because equal values can carry different bit
                // patterns.
                let data_type = input.data_type();
                if data_type.is_variable_length()
                    || data_type == DataType::Point
                    || data_type == DataType::Double
                {
                    return Err(EngineError::TypeMismatch {
                        expected: DataType::BigInt,
                        actual: data_type,
                    });
                }
                hll.add(&input.hash_bytes());
                Ok(())
            }
            Self::HyperloglogsToCard { hll } => {
                let Some(input) = input else { return Ok(()) };
                let bytes = input.as_bytea().ok_or_else(|| EngineError::TypeMismatch {
                    expected: DataType::Varbinary,
                    actual: input.data_type(),
                })?;
                let incoming = HyperLogLog::restore(bytes)?;
                hll.merge(&incoming)
            }
            Self::UserDefined {
                function_id,
                udaf_index,
                is_worker,
                batch,
                ..
            } => {
                if *is_worker {
                    batch.push(input.clone());
                    if batch.len() == ROWS_PER_BATCH {
                        host.udaf_assemble(*function_id, batch, *udaf_index)?;
                        batch.clear();
                    }
                    Ok(())
                } else {
                    let Some(input) = input else { return Ok(()) };
                    let bytes = input.as_bytea().ok_or_else(|| EngineError::TypeMismatch {
                        expected: DataType::Varbinary,
                        actual: input.data_type(),
                    })?;
                    host.udaf_combine(*function_id, bytes, *udaf_index)
                }
            }
        }
    }

    pub fn finalize(&mut self, target: DataType, host: &dyn HostCallbacks) -> Result<Datum> {
        match self {
            Self::CountStar { count } | Self::Count { count } => {
                cast_datum(&Some(ScalarImpl::Int64(*count)), target)
            }
            Self::Sum { value } => cast_datum(value, target),
            Self::Avg { value, count } => {
                if *count == 0 {
                    return Ok(None);
                }
                let sum = value.as_ref().expect("nonzero count implies a sum");
                let quotient = checked_div(sum, &ScalarImpl::Int64(*count))?;
                cast_datum(&Some(quotient), target)
            }
            Self::Min { value } | Self::Max { value } => cast_datum(value, target),
            Self::ApproxCountDistinct { hll } | Self::HyperloglogsToCard { hll } => {
                let estimate = hll.estimate().round() as i64;
                cast_datum(&Some(ScalarImpl::Int64(estimate)), target)
            }
            Self::ValsToHyperloglog { hll } => {
                Ok(Some(ScalarImpl::Bytea(hll.serialize().into())))
            }
            Self::UserDefined {
                function_id,
                udaf_index,
                is_worker,
                is_partition,
                batch,
            } => {
                if !batch.is_empty() {
                    host.udaf_assemble(*function_id, batch, *udaf_index)?;
                    batch.clear();
                }
                if *is_partition && *is_worker {
                    host.udaf_worker_end(*function_id, *udaf_index)
                } else {
                    host.udaf_coordinator_end(*function_id, *udaf_index)
                }
            }
        }
    }

    pub fn reset(&mut self, host: &dyn HostCallbacks) -> Result<()> {
        match self {
            Self::CountStar { count } | Self::Count { count } => *count = 0,
            Self::Sum { value } | Self::Min { value } | Self::Max { value } => *value = None,
            Self::Avg { value, count } => {
                *value = None;
                *count = 0;
            }
            Self::ApproxCountDistinct { hll }
            | Self::ValsToHyperloglog { hll }
            | Self::HyperloglogsToCard { hll } => hll.clear(),
            Self::UserDefined {
                function_id, batch, ..
            } => {
                batch.clear();
                host.udaf_start(*function_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::context::NoopHostCallbacks;

    fn int(v: i64) -> Datum {
        Some(ScalarImpl::Int64(v))
    }

    #[test]
    fn sum_and_avg_contracts() {
        let host = NoopHostCallbacks;
        let mut sum = AggregatorImpl::Sum { value: None };
        let mut avg = AggregatorImpl::Avg {
            value: None,
            count: 0,
        };
        for v in [int(1), None, int(4), int(7)] {
            sum.advance(&v, &host).unwrap();
            avg.advance(&v, &host).unwrap();
        }
        assert_eq!(sum.finalize(DataType::BigInt, &host).unwrap(), int(12));
        assert_eq!(avg.finalize(DataType::BigInt, &host).unwrap(), int(4));
    }

    #[test]
    fn avg_of_empty_group_is_null() {
        let host = NoopHostCallbacks;
        let mut avg = AggregatorImpl::Avg {
            value: None,
            count: 0,
        };
        avg.advance(&None, &host).unwrap();
        assert_eq!(avg.finalize(DataType::BigInt, &host).unwrap(), None);
    }

    #[test]
    fn count_star_counts_dummies() {
        let host = NoopHostCallbacks;
        let mut count_star = AggregatorImpl::CountStar { count: 0 };
        let mut count = AggregatorImpl::Count { count: 0 };
        for v in [None, int(1), None] {
            count_star.advance(&v, &host).unwrap();
            count.advance(&v, &host).unwrap();
        }
        assert_eq!(count_star.finalize(DataType::BigInt, &host).unwrap(), int(3));
        assert_eq!(count.finalize(DataType::BigInt, &host).unwrap(), int(1));
    }

    #[test]
    fn approx_count_distinct_rejects_doubles() {
        let host = NoopHostCallbacks;
        let mut acd = AggregatorImpl::ApproxCountDistinct {
            hll: HyperLogLog::new(16),
        };
        assert_matches!(
            acd.advance(&Some(ScalarImpl::Float64(1.5.into())), &host),
            Err(EngineError::TypeMismatch { .. })
        );
    }

    #[test]
    fn worker_to_coordinator_hll_round_trip() {
        let host = NoopHostCallbacks;
        let mut worker_a = AggregatorImpl::ValsToHyperloglog {
            hll: HyperLogLog::new(16),
        };
        let mut worker_b = AggregatorImpl::ValsToHyperloglog {
            hll: HyperLogLog::new(16),
        };
        for v in 0..100 {
            worker_a.advance(&int(v), &host).unwrap();
        }
        for v in 50..150 {
            worker_b.advance(&int(v), &host).unwrap();
        }
        let partial_a = worker_a.finalize(DataType::Varbinary, &host).unwrap();
        let partial_b = worker_b.finalize(DataType::Varbinary, &host).unwrap();

        let mut coordinator = AggregatorImpl::HyperloglogsToCard {
            hll: HyperLogLog::new(16),
        };
        coordinator.advance(&partial_a, &host).unwrap();
        coordinator.advance(&partial_b, &host).unwrap();
        let estimate = coordinator
            .finalize(DataType::BigInt, &host)
            .unwrap()
            .unwrap();
        let estimate = match estimate {
            ScalarImpl::Int64(v) => v,
            other => panic!("unexpected {other:?}"),
        };
        assert!((140..=160).contains(&estimate), "estimate {estimate}");
    }
}
