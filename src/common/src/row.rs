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

use std::cmp::Ordering;

use crate::types::{ops, Datum};

/// Read access to an ordered list of datums. Implemented by owned rows and
/// by tuple views over block storage; expressions evaluate against `dyn Row`
/// so a join can feed an (outer, inner) pair of either kind.
pub trait Row {
    fn datum_at(&self, index: usize) -> Datum;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_owned_row(&self) -> OwnedRow {
        OwnedRow::new((0..self.len()).map(|i| self.datum_at(i)).collect())
    }
}

/// An owned row of datums. Used for group-by keys, index keys and sort keys;
/// equality and hashing are structural and ordering is null-first per
/// column, matching the index comparators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OwnedRow(Box<[Datum]>);

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values.into_boxed_slice())
    }

    pub fn empty() -> Self {
        Self(Box::new([]))
    }

    pub fn values(&self) -> &[Datum] {
        &self.0
    }

    pub fn into_inner(self) -> Box<[Datum]> {
        self.0
    }
}

impl Row for OwnedRow {
    fn datum_at(&self, index: usize) -> Datum {
        self.0[index].clone()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn to_owned_row(&self) -> OwnedRow {
        self.clone()
    }
}

impl PartialOrd for OwnedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OwnedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.0.len(), other.0.len());
        for (l, r) in self.0.iter().zip(other.0.iter()) {
            match ops::index_order(l, r) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl FromIterator<Datum> for OwnedRow {
    fn from_iter<T: IntoIterator<Item = Datum>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::ops::Index<usize> for OwnedRow {
    type Output = Datum;

    fn index(&self, index: usize) -> &Datum {
        &self.0[index]
    }
}

/// The zero-column row, handed to expressions when one side of an
/// (outer, inner) pair is absent.
pub const EMPTY_ROW: EmptyRow = EmptyRow;

#[derive(Debug, Clone, Copy)]
pub struct EmptyRow;

impl Row for EmptyRow {
    fn datum_at(&self, index: usize) -> Datum {
        panic!("column {index} referenced on the empty row");
    }

    fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarImpl;

    #[test]
    fn null_first_row_order() {
        let a = OwnedRow::new(vec![None, Some(ScalarImpl::Int32(5))]);
        let b = OwnedRow::new(vec![Some(ScalarImpl::Int32(0)), None]);
        assert!(a < b);

        let c = OwnedRow::new(vec![Some(ScalarImpl::Int32(0)), Some(ScalarImpl::Int32(1))]);
        assert!(b < c);
        assert_eq!(c.cmp(&c.clone()), Ordering::Equal);
    }
}
