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

//! The SQL value model: [`DataType`], [`ScalarImpl`] and [`Datum`], plus the
//! checked arithmetic and casts the aggregators and index-key construction
//! are built on.

use std::hash::{Hash, Hasher};

use enum_as_inner::EnumAsInner;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub mod ops;

pub use ops::{checked_add, checked_div, checked_mul, checked_sub, op_max, op_min};

/// The SQL type of a column or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Decimal,
    Timestamp,
    Varchar,
    Varbinary,
    Point,
    Geography,
}

impl DataType {
    /// Width in bytes of the fixed part of a storage cell of this type. For
    /// variable-length types this is the 4-byte length prefix; the declared
    /// column size is added by the schema.
    pub fn fixed_cell_width(self) -> usize {
        match self {
            DataType::Boolean | DataType::TinyInt => 1,
            DataType::SmallInt => 2,
            DataType::Integer => 4,
            DataType::BigInt | DataType::Double | DataType::Timestamp => 8,
            DataType::Decimal | DataType::Point => 16,
            DataType::Varchar | DataType::Varbinary | DataType::Geography => 4,
        }
    }

    pub fn is_variable_length(self) -> bool {
        matches!(
            self,
            DataType::Varchar | DataType::Varbinary | DataType::Geography
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || matches!(self, DataType::Double | DataType::Decimal)
    }
}

/// A totally ordered `f64` so rows and group keys can be hashed and sorted.
/// Ordering follows `f64::total_cmp`, which keeps NaNs comparable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct F64(pub f64);

impl PartialEq for F64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}
impl Eq for F64 {}

impl PartialOrd for F64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for F64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl Hash for F64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}
impl From<f64> for F64 {
    fn from(v: f64) -> Self {
        F64(v)
    }
}

/// A point with longitude and latitude components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointValue {
    pub lng: F64,
    pub lat: F64,
}

/// An owned SQL scalar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumAsInner, Serialize, Deserialize)]
pub enum ScalarImpl {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(F64),
    Decimal(Decimal),
    /// Microseconds since the epoch.
    Timestamp(i64),
    Utf8(Box<str>),
    Bytea(Box<[u8]>),
    Point(PointValue),
    Geography(Box<[u8]>),
}

/// A nullable scalar. `None` is SQL NULL.
pub type Datum = Option<ScalarImpl>;

/// A borrowed view of a [`Datum`].
pub type DatumRef<'a> = Option<&'a ScalarImpl>;

impl ScalarImpl {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarImpl::Bool(_) => DataType::Boolean,
            ScalarImpl::Int8(_) => DataType::TinyInt,
            ScalarImpl::Int16(_) => DataType::SmallInt,
            ScalarImpl::Int32(_) => DataType::Integer,
            ScalarImpl::Int64(_) => DataType::BigInt,
            ScalarImpl::Float64(_) => DataType::Double,
            ScalarImpl::Decimal(_) => DataType::Decimal,
            ScalarImpl::Timestamp(_) => DataType::Timestamp,
            ScalarImpl::Utf8(_) => DataType::Varchar,
            ScalarImpl::Bytea(_) => DataType::Varbinary,
            ScalarImpl::Point(_) => DataType::Point,
            ScalarImpl::Geography(_) => DataType::Geography,
        }
    }

    /// Widen any integral scalar to `i64`, or fail with a type mismatch.
    pub fn to_i64(&self) -> Result<i64> {
        match self {
            ScalarImpl::Int8(v) => Ok(*v as i64),
            ScalarImpl::Int16(v) => Ok(*v as i64),
            ScalarImpl::Int32(v) => Ok(*v as i64),
            ScalarImpl::Int64(v) => Ok(*v),
            other => Err(EngineError::TypeMismatch {
                expected: DataType::BigInt,
                actual: other.data_type(),
            }),
        }
    }

    /// Cast this scalar to the given type. Integral narrowing raises
    /// [`EngineError::Arithmetic`] overflow/underflow when the value does
    /// not fit; everything else that cannot be represented raises
    /// [`EngineError::TypeMismatch`]. Length limits of variable-length
    /// columns are checked by the tuple codec, not here.
    pub fn cast_to(&self, target: DataType) -> Result<ScalarImpl> {
        if self.data_type() == target {
            return Ok(self.clone());
        }
        let mismatch = || EngineError::TypeMismatch {
            expected: target,
            actual: self.data_type(),
        };
        let out = match (self, target) {
            (s, t) if s.data_type().is_integral() && t.is_integral() => {
                narrow_integral(s.to_i64().unwrap(), t)?
            }
            (s, DataType::Double) if s.data_type().is_integral() => {
                ScalarImpl::Float64(F64(s.to_i64().unwrap() as f64))
            }
            (s, DataType::Decimal) if s.data_type().is_integral() => {
                ScalarImpl::Decimal(Decimal::from(s.to_i64().unwrap()))
            }
            (ScalarImpl::Decimal(d), t) if t.is_integral() => {
                let v = d
                    .round()
                    .to_i64()
                    .ok_or_else(|| range_error_for_sign(d.is_sign_negative()))?;
                narrow_integral(v, t)?
            }
            (ScalarImpl::Decimal(d), DataType::Double) => {
                ScalarImpl::Float64(F64(d.to_f64().ok_or_else(mismatch)?))
            }
            (ScalarImpl::Float64(F64(f)), t) if t.is_integral() => {
                if f.is_nan() {
                    return Err(mismatch());
                }
                let rounded = f.round();
                if rounded > i64::MAX as f64 {
                    return Err(EngineError::overflow());
                } else if rounded < i64::MIN as f64 {
                    return Err(EngineError::underflow());
                }
                narrow_integral(rounded as i64, t)?
            }
            (ScalarImpl::Float64(F64(f)), DataType::Decimal) => {
                ScalarImpl::Decimal(Decimal::from_f64(*f).ok_or_else(mismatch)?)
            }
            _ => return Err(mismatch()),
        };
        Ok(out)
    }

    /// The canonical byte image of this scalar, fed to the partition hash.
    /// Integral types share the widened 8-byte little-endian image so that
    /// equal values hash equally across widths.
    pub fn hash_bytes(&self) -> Vec<u8> {
        match self {
            ScalarImpl::Bool(v) => vec![*v as u8],
            s @ (ScalarImpl::Int8(_)
            | ScalarImpl::Int16(_)
            | ScalarImpl::Int32(_)
            | ScalarImpl::Int64(_)) => s.to_i64().unwrap().to_le_bytes().to_vec(),
            ScalarImpl::Float64(F64(f)) => f.to_bits().to_le_bytes().to_vec(),
            ScalarImpl::Decimal(d) => d.serialize().to_vec(),
            ScalarImpl::Timestamp(v) => v.to_le_bytes().to_vec(),
            ScalarImpl::Utf8(s) => s.as_bytes().to_vec(),
            ScalarImpl::Bytea(b) | ScalarImpl::Geography(b) => b.to_vec(),
            ScalarImpl::Point(p) => {
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&p.lng.0.to_bits().to_le_bytes());
                out.extend_from_slice(&p.lat.0.to_bits().to_le_bytes());
                out
            }
        }
    }
}

fn range_error_for_sign(negative: bool) -> EngineError {
    if negative {
        EngineError::underflow()
    } else {
        EngineError::overflow()
    }
}

fn narrow_integral(v: i64, target: DataType) -> Result<ScalarImpl> {
    macro_rules! narrow {
        ($ty:ty, $variant:ident) => {{
            if v > <$ty>::MAX as i64 {
                return Err(EngineError::overflow());
            } else if v < <$ty>::MIN as i64 {
                return Err(EngineError::underflow());
            }
            ScalarImpl::$variant(v as $ty)
        }};
    }
    Ok(match target {
        DataType::TinyInt => narrow!(i8, Int8),
        DataType::SmallInt => narrow!(i16, Int16),
        DataType::Integer => narrow!(i32, Int32),
        DataType::BigInt => ScalarImpl::Int64(v),
        _ => unreachable!("narrow_integral on non-integral target"),
    })
}

/// Cast a datum to a type, passing NULL through.
pub fn cast_datum(datum: &Datum, target: DataType) -> Result<Datum> {
    match datum {
        None => Ok(None),
        Some(s) => Ok(Some(s.cast_to(target)?)),
    }
}

/// The partition-eligibility hash of a datum: crc32 of the canonical byte
/// image, folded to `i32`. NULL hashes to 0, which keeps NULL rows in the
/// first hash range. The same function feeds the hash-range predicate and
/// the elastic index, so the two always agree.
pub fn partition_hash(datum: &Datum) -> i32 {
    match datum {
        None => 0,
        Some(s) => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&s.hash_bytes());
            hasher.finalize() as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::ArithmeticError;

    #[test]
    fn narrowing_casts_report_direction() {
        let big = ScalarImpl::Int64(6_000_000_000);
        assert_matches!(
            big.cast_to(DataType::Integer),
            Err(EngineError::Arithmetic(ArithmeticError::Overflow))
        );
        let small = ScalarImpl::Int64(-6_000_000_000);
        assert_matches!(
            small.cast_to(DataType::Integer),
            Err(EngineError::Arithmetic(ArithmeticError::Underflow))
        );
        assert_eq!(
            ScalarImpl::Int64(42).cast_to(DataType::TinyInt).unwrap(),
            ScalarImpl::Int8(42)
        );
    }

    #[test]
    fn integral_widths_hash_alike() {
        let a = partition_hash(&Some(ScalarImpl::Int8(7)));
        let b = partition_hash(&Some(ScalarImpl::Int64(7)));
        assert_eq!(a, b);
        assert_eq!(partition_hash(&None), 0);
    }

    #[test]
    fn decimal_round_trips_through_integral() {
        let d = ScalarImpl::Decimal(Decimal::new(12345, 2)); // 123.45
        assert_eq!(d.cast_to(DataType::Integer).unwrap(), ScalarImpl::Int32(123));
    }
}
