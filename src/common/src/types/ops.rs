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

//! Checked scalar arithmetic used by the aggregators and the expression
//! interpreter. Mixed integral widths widen to `i64`; integral/decimal and
//! integral/double pairs promote to the inexact side.

use rust_decimal::prelude::*;

use super::{DataType, ScalarImpl, F64};
use crate::error::{EngineError, Result};

fn type_mismatch(lhs: &ScalarImpl, rhs: &ScalarImpl) -> EngineError {
    EngineError::TypeMismatch {
        expected: lhs.data_type(),
        actual: rhs.data_type(),
    }
}

fn range_error(negative: bool) -> EngineError {
    if negative {
        EngineError::underflow()
    } else {
        EngineError::overflow()
    }
}

/// `lhs + rhs` with overflow checking, as SUM/AVG accumulate.
pub fn checked_add(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    use ScalarImpl::*;
    match (lhs, rhs) {
        (l, r) if l.data_type().is_integral() && r.data_type().is_integral() => {
            let (a, b) = (l.to_i64()?, r.to_i64()?);
            a.checked_add(b)
                .map(Int64)
                .ok_or_else(|| range_error(a < 0 && b < 0))
        }
        (Float64(F64(a)), Float64(F64(b))) => Ok(Float64(F64(a + b))),
        (Float64(F64(a)), r) if r.data_type().is_integral() => {
            Ok(Float64(F64(a + r.to_i64()? as f64)))
        }
        (l, Float64(F64(b))) if l.data_type().is_integral() => {
            Ok(Float64(F64(l.to_i64()? as f64 + b)))
        }
        (Decimal(a), Decimal(b)) => a
            .checked_add(*b)
            .map(Decimal)
            .ok_or_else(|| range_error(a.is_sign_negative())),
        (Decimal(a), r) if r.data_type().is_integral() => a
            .checked_add(rust_decimal::Decimal::from(r.to_i64()?))
            .map(Decimal)
            .ok_or_else(|| range_error(a.is_sign_negative())),
        (l, Decimal(b)) if l.data_type().is_integral() => {
            rust_decimal::Decimal::from(l.to_i64()?)
                .checked_add(*b)
                .map(Decimal)
                .ok_or_else(|| range_error(b.is_sign_negative()))
        }
        (l, r) => Err(type_mismatch(l, r)),
    }
}

/// `lhs - rhs` with overflow checking.
pub fn checked_sub(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    use ScalarImpl::*;
    match (lhs, rhs) {
        (l, r) if l.data_type().is_integral() && r.data_type().is_integral() => {
            let (a, b) = (l.to_i64()?, r.to_i64()?);
            a.checked_sub(b).map(Int64).ok_or_else(|| range_error(a < 0))
        }
        (Float64(F64(a)), Float64(F64(b))) => Ok(Float64(F64(a - b))),
        (Float64(F64(a)), r) if r.data_type().is_integral() => {
            Ok(Float64(F64(a - r.to_i64()? as f64)))
        }
        (l, Float64(F64(b))) if l.data_type().is_integral() => {
            Ok(Float64(F64(l.to_i64()? as f64 - b)))
        }
        (Decimal(a), Decimal(b)) => a
            .checked_sub(*b)
            .map(Decimal)
            .ok_or_else(|| range_error(a.is_sign_negative())),
        (l, r) => Err(type_mismatch(l, r)),
    }
}

/// `lhs * rhs` with overflow checking.
pub fn checked_mul(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    use ScalarImpl::*;
    match (lhs, rhs) {
        (l, r) if l.data_type().is_integral() && r.data_type().is_integral() => {
            let (a, b) = (l.to_i64()?, r.to_i64()?);
            a.checked_mul(b)
                .map(Int64)
                .ok_or_else(|| range_error((a < 0) != (b < 0)))
        }
        (Float64(F64(a)), Float64(F64(b))) => Ok(Float64(F64(a * b))),
        (Float64(F64(a)), r) if r.data_type().is_integral() => {
            Ok(Float64(F64(a * r.to_i64()? as f64)))
        }
        (l, Float64(F64(b))) if l.data_type().is_integral() => {
            Ok(Float64(F64(l.to_i64()? as f64 * b)))
        }
        (Decimal(a), Decimal(b)) => a
            .checked_mul(*b)
            .map(Decimal)
            .ok_or_else(|| range_error(a.is_sign_negative() != b.is_sign_negative())),
        (l, r) => Err(type_mismatch(l, r)),
    }
}

/// `lhs / rhs`, as AVG finalization divides a sum by a count. Integral
/// division truncates; dividing by zero raises.
pub fn checked_div(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    use ScalarImpl::*;
    match (lhs, rhs) {
        (l, r) if l.data_type().is_integral() && r.data_type().is_integral() => {
            let (a, b) = (l.to_i64()?, r.to_i64()?);
            if b == 0 {
                return Err(EngineError::divide_by_zero());
            }
            a.checked_div(b).map(Int64).ok_or_else(EngineError::overflow)
        }
        (Float64(F64(a)), r) => {
            let b = match r {
                Float64(F64(b)) => *b,
                other if other.data_type().is_integral() => other.to_i64()? as f64,
                other => return Err(type_mismatch(lhs, other)),
            };
            if b == 0.0 {
                return Err(EngineError::divide_by_zero());
            }
            Ok(Float64(F64(a / b)))
        }
        (Decimal(a), r) => {
            let b = match r {
                Decimal(b) => *b,
                other if other.data_type().is_integral() => {
                    rust_decimal::Decimal::from(other.to_i64()?)
                }
                other => return Err(type_mismatch(lhs, other)),
            };
            if b.is_zero() {
                return Err(EngineError::divide_by_zero());
            }
            a.checked_div(b).map(Decimal).ok_or_else(EngineError::overflow)
        }
        (l, r) => Err(type_mismatch(l, r)),
    }
}

/// The smaller of two scalars of the same type.
pub fn op_min(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    compare_same_type(lhs, rhs)?;
    Ok(if rhs < lhs { rhs.clone() } else { lhs.clone() })
}

/// The larger of two scalars of the same type.
pub fn op_max(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<ScalarImpl> {
    compare_same_type(lhs, rhs)?;
    Ok(if rhs > lhs { rhs.clone() } else { lhs.clone() })
}

fn compare_same_type(lhs: &ScalarImpl, rhs: &ScalarImpl) -> Result<()> {
    // Integral widths are interchangeable; anything else must match exactly.
    let compatible = lhs.data_type() == rhs.data_type()
        || (lhs.data_type().is_integral() && rhs.data_type().is_integral());
    if compatible {
        Ok(())
    } else {
        Err(type_mismatch(lhs, rhs))
    }
}

/// Three-way comparison with SQL semantics: comparing a NULL yields `None`.
/// Integral widths compare by value; other cross-type pairs are an error.
pub fn compare_datums(
    lhs: &super::Datum,
    rhs: &super::Datum,
) -> Result<Option<std::cmp::Ordering>> {
    let (l, r) = match (lhs, rhs) {
        (Some(l), Some(r)) => (l, r),
        _ => return Ok(None),
    };
    if l.data_type().is_integral() && r.data_type().is_integral() {
        return Ok(Some(l.to_i64()?.cmp(&r.to_i64()?)));
    }
    compare_same_type(l, r)?;
    Ok(Some(l.cmp(r)))
}

/// Ordering for sort keys and index keys: NULL sorts first, then values.
pub fn index_order(lhs: &super::Datum, rhs: &super::Datum) -> std::cmp::Ordering {
    match (lhs, rhs) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(l), Some(r)) => {
            if l.data_type().is_integral() && r.data_type().is_integral() {
                // Widths never mix inside one column; be safe anyway.
                l.to_i64().unwrap_or(0).cmp(&r.to_i64().unwrap_or(0))
            } else {
                l.cmp(r)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::ArithmeticError;

    #[test]
    fn add_overflow_keeps_direction() {
        let max = ScalarImpl::Int64(i64::MAX);
        assert_matches!(
            checked_add(&max, &ScalarImpl::Int32(1)),
            Err(EngineError::Arithmetic(ArithmeticError::Overflow))
        );
        let min = ScalarImpl::Int64(i64::MIN);
        assert_matches!(
            checked_add(&min, &ScalarImpl::Int64(-1)),
            Err(EngineError::Arithmetic(ArithmeticError::Underflow))
        );
    }

    #[test]
    fn div_truncates_integrals() {
        let sum = ScalarImpl::Int64(7);
        let count = ScalarImpl::Int64(2);
        assert_eq!(checked_div(&sum, &count).unwrap(), ScalarImpl::Int64(3));
        assert_matches!(
            checked_div(&sum, &ScalarImpl::Int64(0)),
            Err(EngineError::Arithmetic(ArithmeticError::DivideByZero))
        );
    }

    #[test]
    fn nulls_sort_first() {
        let null: crate::types::Datum = None;
        let one = Some(ScalarImpl::Int32(1));
        assert_eq!(index_order(&null, &one), std::cmp::Ordering::Less);
        assert_eq!(index_order(&null, &null), std::cmp::Ordering::Equal);
    }
}
