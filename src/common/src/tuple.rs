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

//! Fixed-length tuple layout: a one-byte flag header followed by one cell
//! per column, each cell a null byte plus a fixed-width value image.
//! Variable-length values are stored inline behind a 4-byte length, inside
//! the column's declared capacity.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::row::{OwnedRow, Row};
use crate::types::{DataType, Datum, PointValue, ScalarImpl, F64};

/// Size of the per-tuple flag header.
pub const TUPLE_HEADER_SIZE: usize = 1;

bitflags! {
    /// Status flags stored in the first byte of every tuple slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TupleFlags: u8 {
        const ACTIVE = 0b0000_0001;
        const DIRTY = 0b0000_0010;
        const PENDING_DELETE = 0b0000_0100;
        const PENDING_DELETE_ON_UNDO_RELEASE = 0b0000_1000;
        const MIGRATING = 0b0001_0000;
    }
}

/// Declared shape of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub data_type: DataType,
    /// Declared size. Only meaningful for variable-length types: bytes when
    /// `in_bytes`, characters otherwise.
    pub size: u32,
    pub nullable: bool,
    pub in_bytes: bool,
}

impl ColumnSpec {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            size: 0,
            nullable: true,
            in_bytes: true,
        }
    }

    pub fn varchar(size: u32) -> Self {
        Self {
            data_type: DataType::Varchar,
            size,
            nullable: true,
            in_bytes: true,
        }
    }

    pub fn varbinary(size: u32) -> Self {
        Self {
            data_type: DataType::Varbinary,
            size,
            nullable: true,
            in_bytes: true,
        }
    }

    /// Bytes reserved for the value image of this column.
    fn capacity_bytes(&self) -> usize {
        if !self.data_type.is_variable_length() {
            return self.data_type.fixed_cell_width();
        }
        let declared = if self.data_type == DataType::Varchar && !self.in_bytes {
            // Worst-case UTF-8 expansion of a character-counted column.
            self.size as usize * 4
        } else {
            self.size as usize
        };
        self.data_type.fixed_cell_width() + declared
    }

    /// Width of the whole cell including the null byte.
    fn cell_width(&self) -> usize {
        1 + self.capacity_bytes()
    }

    /// Cast a datum to this column's type and enforce its length limit.
    /// Violating the limit raises [`EngineError::VarLengthMismatch`] with
    /// the column width, so callers can decide to truncate and retry.
    pub fn coerce(&self, datum: &Datum) -> Result<Datum> {
        let value = match datum {
            None => return Ok(None),
            Some(v) => v.cast_to(self.data_type)?,
        };
        match &value {
            ScalarImpl::Utf8(s) => {
                let len = if self.in_bytes {
                    s.len()
                } else {
                    s.chars().count()
                };
                if len > self.size as usize {
                    return Err(EngineError::VarLengthMismatch { width: self.size });
                }
            }
            ScalarImpl::Bytea(b) | ScalarImpl::Geography(b) => {
                if b.len() > self.size as usize {
                    return Err(EngineError::VarLengthMismatch { width: self.size });
                }
            }
            _ => {}
        }
        Ok(Some(value))
    }

    /// Truncate a variable-length value to this column's declared width.
    /// Used after a [`EngineError::VarLengthMismatch`] during index-key
    /// construction, where the lookup type absorbs the lost suffix.
    pub fn shrink(&self, value: &ScalarImpl) -> ScalarImpl {
        match value {
            ScalarImpl::Utf8(s) => {
                let truncated: String = if self.in_bytes {
                    let mut end = (self.size as usize).min(s.len());
                    while end > 0 && !s.is_char_boundary(end) {
                        end -= 1;
                    }
                    s[..end].to_owned()
                } else {
                    s.chars().take(self.size as usize).collect()
                };
                ScalarImpl::Utf8(truncated.into_boxed_str())
            }
            ScalarImpl::Bytea(b) => {
                ScalarImpl::Bytea(b[..(self.size as usize).min(b.len())].into())
            }
            ScalarImpl::Geography(b) => {
                ScalarImpl::Geography(b[..(self.size as usize).min(b.len())].into())
            }
            other => other.clone(),
        }
    }
}

/// An ordered list of column specs with a fixed tuple length. Schemas are
/// value-typed and compared structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleSchema {
    columns: Vec<ColumnSpec>,
    /// Byte offset of each column's cell, after the flag header.
    offsets: Vec<usize>,
    tuple_length: usize,
}

impl TupleSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut offset = TUPLE_HEADER_SIZE;
        for column in &columns {
            offsets.push(offset);
            offset += column.cell_width();
        }
        Self {
            columns,
            offsets,
            tuple_length: offset,
        }
    }

    /// Convenience constructor for fixed-width columns.
    pub fn of_types(types: &[DataType]) -> Self {
        Self::new(types.iter().map(|t| ColumnSpec::new(*t)).collect())
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &ColumnSpec {
        &self.columns[index]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn tuple_length(&self) -> usize {
        self.tuple_length
    }

    /// Two schemas are layout-compatible when a tuple encoded under one can
    /// be read under the other. Recursive CTE outputs are appended to their
    /// base table under this check.
    pub fn is_layout_compatible(&self, other: &TupleSchema) -> bool {
        self.tuple_length == other.tuple_length
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.data_type == b.data_type && a.capacity_bytes() == b.capacity_bytes())
    }

    pub fn flags(&self, storage: &[u8]) -> TupleFlags {
        TupleFlags::from_bits_truncate(storage[0])
    }

    pub fn set_flag(&self, storage: &mut [u8], flag: TupleFlags, on: bool) {
        let mut flags = TupleFlags::from_bits_truncate(storage[0]);
        flags.set(flag, on);
        storage[0] = flags.bits();
    }

    /// Decode one column of a tuple slot.
    pub fn datum_at(&self, storage: &[u8], index: usize) -> Datum {
        let spec = &self.columns[index];
        let cell = &storage[self.offsets[index]..];
        if cell[0] != 0 {
            return None;
        }
        let data = &cell[1..];
        let value = match spec.data_type {
            DataType::Boolean => ScalarImpl::Bool(data[0] != 0),
            DataType::TinyInt => ScalarImpl::Int8(data[0] as i8),
            DataType::SmallInt => ScalarImpl::Int16(LittleEndian::read_i16(data)),
            DataType::Integer => ScalarImpl::Int32(LittleEndian::read_i32(data)),
            DataType::BigInt => ScalarImpl::Int64(LittleEndian::read_i64(data)),
            DataType::Double => ScalarImpl::Float64(F64(LittleEndian::read_f64(data))),
            DataType::Timestamp => ScalarImpl::Timestamp(LittleEndian::read_i64(data)),
            DataType::Decimal => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&data[..16]);
                ScalarImpl::Decimal(Decimal::deserialize(raw))
            }
            DataType::Point => ScalarImpl::Point(PointValue {
                lng: F64(LittleEndian::read_f64(data)),
                lat: F64(LittleEndian::read_f64(&data[8..])),
            }),
            DataType::Varchar => {
                let len = LittleEndian::read_u32(data) as usize;
                let bytes = &data[4..4 + len];
                ScalarImpl::Utf8(String::from_utf8_lossy(bytes).into_owned().into_boxed_str())
            }
            DataType::Varbinary => {
                let len = LittleEndian::read_u32(data) as usize;
                ScalarImpl::Bytea(data[4..4 + len].into())
            }
            DataType::Geography => {
                let len = LittleEndian::read_u32(data) as usize;
                ScalarImpl::Geography(data[4..4 + len].into())
            }
        };
        Some(value)
    }

    /// Encode one column into a tuple slot. The datum is coerced to the
    /// column first, so range and length violations surface here.
    pub fn write_datum(&self, storage: &mut [u8], index: usize, datum: &Datum) -> Result<()> {
        let spec = &self.columns[index];
        let coerced = spec.coerce(datum)?;
        let cell = &mut storage[self.offsets[index]..self.offsets[index] + spec.cell_width()];
        let value = match coerced {
            None => {
                if !spec.nullable {
                    return Err(EngineError::constraint_violation(format!(
                        "NULL written to non-nullable column {index}"
                    )));
                }
                cell[0] = 1;
                return Ok(());
            }
            Some(v) => v,
        };
        cell[0] = 0;
        let data = &mut cell[1..];
        match value {
            ScalarImpl::Bool(v) => data[0] = v as u8,
            ScalarImpl::Int8(v) => data[0] = v as u8,
            ScalarImpl::Int16(v) => LittleEndian::write_i16(data, v),
            ScalarImpl::Int32(v) => LittleEndian::write_i32(data, v),
            ScalarImpl::Int64(v) => LittleEndian::write_i64(data, v),
            ScalarImpl::Float64(F64(v)) => LittleEndian::write_f64(data, v),
            ScalarImpl::Timestamp(v) => LittleEndian::write_i64(data, v),
            ScalarImpl::Decimal(v) => data[..16].copy_from_slice(&v.serialize()),
            ScalarImpl::Point(p) => {
                LittleEndian::write_f64(data, p.lng.0);
                LittleEndian::write_f64(&mut data[8..], p.lat.0);
            }
            ScalarImpl::Utf8(s) => {
                LittleEndian::write_u32(data, s.len() as u32);
                data[4..4 + s.len()].copy_from_slice(s.as_bytes());
            }
            ScalarImpl::Bytea(b) | ScalarImpl::Geography(b) => {
                LittleEndian::write_u32(data, b.len() as u32);
                data[4..4 + b.len()].copy_from_slice(&b);
            }
        }
        Ok(())
    }

    /// Encode a whole row into a slot, leaving the flag byte untouched.
    pub fn write_row(&self, storage: &mut [u8], row: &impl Row) -> Result<()> {
        debug_assert_eq!(row.len(), self.columns.len());
        for index in 0..self.columns.len() {
            self.write_datum(storage, index, &row.datum_at(index))?;
        }
        Ok(())
    }

    pub fn decode_row(&self, storage: &[u8]) -> OwnedRow {
        (0..self.columns.len())
            .map(|i| self.datum_at(storage, i))
            .collect()
    }
}

/// A read-only view of one tuple slot.
#[derive(Clone, Copy)]
pub struct TableTuple<'a> {
    schema: &'a TupleSchema,
    storage: &'a [u8],
}

impl<'a> TableTuple<'a> {
    pub fn new(schema: &'a TupleSchema, storage: &'a [u8]) -> Self {
        debug_assert!(storage.len() >= schema.tuple_length());
        Self { schema, storage }
    }

    pub fn schema(&self) -> &'a TupleSchema {
        self.schema
    }

    pub fn flags(&self) -> TupleFlags {
        self.schema.flags(self.storage)
    }

    pub fn is_active(&self) -> bool {
        self.flags().contains(TupleFlags::ACTIVE)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(TupleFlags::DIRTY)
    }

    pub fn is_pending_delete(&self) -> bool {
        self.flags().contains(TupleFlags::PENDING_DELETE)
    }

    pub fn is_pending_delete_on_undo_release(&self) -> bool {
        self.flags()
            .contains(TupleFlags::PENDING_DELETE_ON_UNDO_RELEASE)
    }
}

impl Row for TableTuple<'_> {
    fn datum_at(&self, index: usize) -> Datum {
        self.schema.datum_at(self.storage, index)
    }

    fn len(&self) -> usize {
        self.schema.column_count()
    }
}

impl std::fmt::Debug for TableTuple<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableTuple")
            .field("flags", &self.flags())
            .field("row", &self.to_owned_row())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample_schema() -> TupleSchema {
        TupleSchema::new(vec![
            ColumnSpec::new(DataType::Integer),
            ColumnSpec::varchar(8),
            ColumnSpec::new(DataType::Double),
        ])
    }

    #[test]
    fn row_round_trip() {
        let schema = sample_schema();
        let mut slot = vec![0u8; schema.tuple_length()];
        let row = OwnedRow::new(vec![
            Some(ScalarImpl::Int32(-7)),
            Some(ScalarImpl::Utf8("ember".into())),
            None,
        ]);
        schema.write_row(&mut slot, &row).unwrap();
        assert_eq!(schema.decode_row(&slot), row);
    }

    #[test]
    fn varchar_width_is_enforced() {
        let schema = sample_schema();
        let mut slot = vec![0u8; schema.tuple_length()];
        let long = Some(ScalarImpl::Utf8("way too long for col".into()));
        assert_matches!(
            schema.write_datum(&mut slot, 1, &long),
            Err(EngineError::VarLengthMismatch { width: 8 })
        );
        let shrunk = schema.column(1).shrink(long.as_ref().unwrap());
        assert_eq!(shrunk, ScalarImpl::Utf8("way too ".into()));
        schema.write_datum(&mut slot, 1, &Some(shrunk)).unwrap();
    }

    #[test]
    fn flags_do_not_disturb_data() {
        let schema = sample_schema();
        let mut slot = vec![0u8; schema.tuple_length()];
        let row = OwnedRow::new(vec![Some(ScalarImpl::Int32(1)), None, None]);
        schema.write_row(&mut slot, &row).unwrap();
        schema.set_flag(&mut slot, TupleFlags::ACTIVE, true);
        schema.set_flag(&mut slot, TupleFlags::DIRTY, true);
        schema.set_flag(&mut slot, TupleFlags::DIRTY, false);
        let tuple = TableTuple::new(&schema, &slot);
        assert!(tuple.is_active());
        assert!(!tuple.is_dirty());
        assert_eq!(tuple.to_owned_row(), row);
    }
}
