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

//! Output buffers the streaming contexts serialize tuples into, and the
//! processor that fans one row out to many streams with per-stream
//! predicates evaluated in lockstep.
//!
//! Serialized block format, per stream: a 4-byte partition id, a 4-byte row
//! count patched in at the end, then for each row a 4-byte row length
//! followed by the serialized fields. All integers big-endian.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use emberdb_common::row::Row;
use emberdb_common::tuple::TupleSchema;
use emberdb_common::types::{DataType, Datum, ScalarImpl};
use emberdb_common::{EngineError, Result};
use emberdb_expr::StreamPredicateList;

/// Optionally hides a suffix of trailing engine-internal columns from
/// serialized output.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenColumnFilter {
    visible_columns: Option<usize>,
}

impl HiddenColumnFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn hide_from(visible_columns: usize) -> Self {
        Self {
            visible_columns: Some(visible_columns),
        }
    }

    fn visible(&self, column_count: usize) -> usize {
        self.visible_columns.unwrap_or(column_count).min(column_count)
    }
}

/// Serializes rows of one schema into the wire format. Each field is a null
/// byte followed by the value image: integers and timestamps big-endian at
/// their declared width, doubles as big-endian IEEE bits, decimals as their
/// 16-byte representation, variable-length values as a 4-byte length plus
/// payload, points as two doubles.
#[derive(Debug, Clone, Copy, Default)]
pub struct TupleSerializer;

impl TupleSerializer {
    /// Upper bound on the serialized size of any row of `schema`, used for
    /// buffer headroom checks.
    pub fn max_serialized_size(schema: &TupleSchema) -> usize {
        // Row length prefix plus, per column, the null byte and the widest
        // possible image.
        4 + schema
            .columns()
            .iter()
            .map(|spec| {
                let payload = match spec.data_type {
                    DataType::Varchar => 4 + spec.size as usize * 4,
                    DataType::Varbinary | DataType::Geography => 4 + spec.size as usize,
                    other => other.fixed_cell_width(),
                };
                1 + payload
            })
            .sum::<usize>()
    }

    pub fn serialize_row(
        schema: &TupleSchema,
        row: &dyn Row,
        filter: &HiddenColumnFilter,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        let start = out.len();
        // Reserve the row length; patched below.
        out.write_u32::<BigEndian>(0).unwrap();
        let visible = filter.visible(schema.column_count());
        for column in 0..visible {
            Self::serialize_datum(&row.datum_at(column), out)?;
        }
        let row_length = out.len() - start - 4;
        BigEndian::write_u32(&mut out[start..start + 4], row_length as u32);
        Ok(out.len() - start)
    }

    fn serialize_datum(datum: &Datum, out: &mut Vec<u8>) -> Result<()> {
        let value = match datum {
            None => {
                out.push(1);
                return Ok(());
            }
            Some(v) => v,
        };
        out.push(0);
        match value {
            ScalarImpl::Bool(v) => out.push(*v as u8),
            ScalarImpl::Int8(v) => out.push(*v as u8),
            ScalarImpl::Int16(v) => out.write_i16::<BigEndian>(*v).unwrap(),
            ScalarImpl::Int32(v) => out.write_i32::<BigEndian>(*v).unwrap(),
            ScalarImpl::Int64(v) | ScalarImpl::Timestamp(v) => {
                out.write_i64::<BigEndian>(*v).unwrap()
            }
            ScalarImpl::Float64(f) => out.write_f64::<BigEndian>(f.0).unwrap(),
            ScalarImpl::Decimal(d) => out.extend_from_slice(&d.serialize()),
            ScalarImpl::Point(p) => {
                out.write_f64::<BigEndian>(p.lng.0).unwrap();
                out.write_f64::<BigEndian>(p.lat.0).unwrap();
            }
            ScalarImpl::Utf8(s) => {
                out.write_u32::<BigEndian>(s.len() as u32).unwrap();
                out.extend_from_slice(s.as_bytes());
            }
            ScalarImpl::Bytea(b) | ScalarImpl::Geography(b) => {
                out.write_u32::<BigEndian>(b.len() as u32).unwrap();
                out.extend_from_slice(b);
            }
        }
        Ok(())
    }
}

/// One fixed-capacity output buffer.
pub struct TupleOutputStream {
    buffer: Vec<u8>,
    capacity: usize,
    row_count: u32,
    row_count_position: usize,
    total_bytes_serialized: usize,
}

impl TupleOutputStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            row_count: 0,
            row_count_position: 0,
            total_bytes_serialized: 0,
        }
    }

    /// Begin a row block: write the partition id and reserve the row count.
    pub fn start_rows(&mut self, partition_id: i32) {
        self.buffer.write_i32::<BigEndian>(partition_id).unwrap();
        self.row_count = 0;
        self.row_count_position = self.buffer.len();
        self.buffer.write_u32::<BigEndian>(0).unwrap();
        self.total_bytes_serialized = 0;
    }

    pub fn write_row(
        &mut self,
        schema: &TupleSchema,
        row: &dyn Row,
        filter: &HiddenColumnFilter,
    ) -> Result<usize> {
        let written = TupleSerializer::serialize_row(schema, row, filter, &mut self.buffer)?;
        self.row_count += 1;
        self.total_bytes_serialized += written;
        Ok(written)
    }

    /// Whether `nbytes` more (plus a row length prefix) still fit.
    pub fn can_fit(&self, nbytes: usize) -> bool {
        self.capacity - self.buffer.len() >= nbytes + 4
    }

    /// Patch the reserved row count.
    pub fn end_rows(&mut self) {
        let position = self.row_count_position;
        BigEndian::write_u32(&mut self.buffer[position..position + 4], self.row_count);
    }

    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn total_bytes_serialized(&self) -> usize {
        self.total_bytes_serialized
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

/// A vector of output streams plus the predicates evaluated in lockstep
/// with them. `write_row` serializes into every accepting stream and asks
/// the caller to yield once any stream runs short on headroom or the byte
/// threshold is exceeded.
pub struct TupleOutputStreamProcessor {
    streams: Vec<TupleOutputStream>,
    predicates: StreamPredicateList,
    delete_flags: Vec<bool>,
    max_tuple_length: usize,
    bytes_serialized_threshold: usize,
    open: bool,
}

impl TupleOutputStreamProcessor {
    pub fn new(streams: Vec<TupleOutputStream>) -> Self {
        Self {
            streams,
            predicates: StreamPredicateList::default(),
            delete_flags: Vec::new(),
            max_tuple_length: 0,
            bytes_serialized_threshold: usize::MAX,
            open: false,
        }
    }

    /// A single stream with the given capacity; the common host setup.
    pub fn single(capacity: usize) -> Self {
        Self::new(vec![TupleOutputStream::new(capacity)])
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn streams(&self) -> &[TupleOutputStream] {
        &self.streams
    }

    pub fn stream_mut(&mut self, index: usize) -> &mut TupleOutputStream {
        &mut self.streams[index]
    }

    pub fn positions(&self) -> Vec<usize> {
        self.streams.iter().map(|s| s.position()).collect()
    }

    /// Start serializing. Either no predicates or exactly one per stream.
    pub fn open(
        &mut self,
        max_tuple_length: usize,
        partition_id: i32,
        predicates: StreamPredicateList,
        delete_flags: Vec<bool>,
        bytes_serialized_threshold: usize,
    ) -> Result<()> {
        if !predicates.is_empty() && predicates.len() != self.streams.len() {
            return Err(EngineError::serialization(
                "expected either no predicates or one per output stream",
            ));
        }
        self.max_tuple_length = max_tuple_length;
        self.predicates = predicates;
        self.delete_flags = delete_flags;
        self.bytes_serialized_threshold = bytes_serialized_threshold;
        self.open = true;
        for stream in &mut self.streams {
            stream.start_rows(partition_id);
        }
        Ok(())
    }

    /// Stop serializing and patch all row counts.
    pub fn close(&mut self) {
        for stream in &mut self.streams {
            stream.end_rows();
        }
        self.open = false;
    }

    /// Write a row to every accepting stream. Returns `(yield, delete)`:
    /// `yield` asks the caller to suspend after this row, `delete` is the
    /// OR of the delete flags of accepting predicates.
    pub fn write_row(
        &mut self,
        schema: &TupleSchema,
        row: &dyn Row,
        filter: &HiddenColumnFilter,
    ) -> Result<(bool, bool)> {
        assert!(self.open, "write_row() before open()");
        let mut should_yield = false;
        let mut delete_row = false;
        for (index, stream) in self.streams.iter_mut().enumerate() {
            let accepted = match self.predicates.get(index) {
                Some(predicate) => predicate.accepts(row)?,
                None => true,
            };
            if !accepted {
                continue;
            }
            if let Some(&delete) = self.delete_flags.get(index) {
                delete_row = delete_row || delete;
            }
            if !stream.can_fit(self.max_tuple_length) {
                return Err(EngineError::serialization(
                    "output stream has no space for another tuple",
                ));
            }
            stream.write_row(schema, row, filter)?;
            if !should_yield {
                should_yield = !stream.can_fit(self.max_tuple_length)
                    || stream.total_bytes_serialized() > self.bytes_serialized_threshold;
            }
        }
        Ok((should_yield, delete_row))
    }
}

#[cfg(test)]
mod tests {
    use emberdb_common::row::OwnedRow;
    use emberdb_common::tuple::ColumnSpec;

    use super::*;

    fn schema() -> TupleSchema {
        TupleSchema::new(vec![
            ColumnSpec::new(DataType::Integer),
            ColumnSpec::varchar(8),
        ])
    }

    fn row(v: i32, s: &str) -> OwnedRow {
        OwnedRow::new(vec![
            Some(ScalarImpl::Int32(v)),
            Some(ScalarImpl::Utf8(s.into())),
        ])
    }

    #[test]
    fn block_format_round_trip() {
        let schema = schema();
        let mut stream = TupleOutputStream::new(1 << 16);
        stream.start_rows(3);
        stream
            .write_row(&schema, &row(7, "ab"), &HiddenColumnFilter::none())
            .unwrap();
        stream
            .write_row(&schema, &row(-1, ""), &HiddenColumnFilter::none())
            .unwrap();
        stream.end_rows();

        let data = stream.data();
        assert_eq!(BigEndian::read_i32(&data[0..4]), 3, "partition id");
        assert_eq!(BigEndian::read_u32(&data[4..8]), 2, "patched row count");
        let first_row_length = BigEndian::read_u32(&data[8..12]) as usize;
        // null byte + 4-byte int, null byte + 4-byte length + 2 bytes.
        assert_eq!(first_row_length, 5 + 11);
        assert_eq!(BigEndian::read_i32(&data[13..17]), 7);
    }

    #[test]
    fn yield_on_headroom_exhaustion() {
        let schema = schema();
        let max = TupleSerializer::max_serialized_size(&schema);
        // Room for the header, one actual row, and one max-sized row of
        // headroom; a second actual row eats into that headroom.
        let mut processor = TupleOutputStreamProcessor::single(max + 34);
        processor
            .open(max, 0, StreamPredicateList::default(), vec![], usize::MAX)
            .unwrap();
        let (yield1, _) = processor
            .write_row(&schema, &row(1, "x"), &HiddenColumnFilter::none())
            .unwrap();
        assert!(!yield1);
        let (yield2, _) = processor
            .write_row(&schema, &row(2, "y"), &HiddenColumnFilter::none())
            .unwrap();
        assert!(yield2, "second row leaves no headroom for a third");
        processor.close();
    }

    #[test]
    fn hidden_columns_are_dropped() {
        let schema = schema();
        let mut out = Vec::new();
        TupleSerializer::serialize_row(
            &schema,
            &row(1, "abc"),
            &HiddenColumnFilter::hide_from(1),
            &mut out,
        )
        .unwrap();
        // length prefix + (null byte + int32) only.
        assert_eq!(out.len(), 4 + 5);
    }
}
