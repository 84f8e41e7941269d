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

//! A HyperLogLog sketch for APPROX_COUNT_DISTINCT. Values are hashed with
//! a fixed FNV-1a so worker and coordinator sketches agree across
//! processes. The serialized form is `b` in the first byte followed by the
//! `2^b` one-byte registers, `2^b + 1` bytes total.

use emberdb_common::{EngineError, Result};

/// Register-count exponent bounds: `2^4` to `2^16` registers.
pub const MIN_REGISTER_BIT_WIDTH: u8 = 4;
pub const MAX_REGISTER_BIT_WIDTH: u8 = 16;

#[derive(Debug, Clone)]
pub struct HyperLogLog {
    b: u8,
    registers: Vec<u8>,
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x1000_0000_01b3);
    }
    hash
}

impl HyperLogLog {
    pub fn new(b: u8) -> Self {
        assert!(
            (MIN_REGISTER_BIT_WIDTH..=MAX_REGISTER_BIT_WIDTH).contains(&b),
            "register bit width {b} out of range"
        );
        Self {
            b,
            registers: vec![0; 1 << b],
        }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        let hash = fnv1a_64(bytes);
        let index = (hash >> (64 - self.b)) as usize;
        let rest = hash << self.b;
        // Rank of the first set bit in the remaining stream, 1-based; an
        // all-zero remainder saturates.
        let rank = (rest.leading_zeros() as u8 + 1).min(64 - self.b + 1);
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let raw = alpha * m * m / sum;
        if raw <= 2.5 * m {
            // Small-range correction: linear counting over empty registers.
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros != 0 {
                return m * (m / zeros as f64).ln();
            }
        }
        raw
    }

    pub fn merge(&mut self, other: &HyperLogLog) -> Result<()> {
        if self.b != other.b {
            return Err(EngineError::serialization(format!(
                "cannot merge sketches of widths {} and {}",
                self.b, other.b
            )));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.registers.fill(0);
    }

    /// `[b][registers…]`, length `2^b + 1`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.registers.len());
        out.push(self.b);
        out.extend_from_slice(&self.registers);
        out
    }

    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let (&b, registers) = bytes
            .split_first()
            .ok_or_else(|| EngineError::serialization("empty hyperloglog image"))?;
        if !(MIN_REGISTER_BIT_WIDTH..=MAX_REGISTER_BIT_WIDTH).contains(&b)
            || registers.len() != 1usize << b
        {
            return Err(EngineError::serialization(format!(
                "malformed hyperloglog image: b={b}, {} register bytes",
                registers.len()
            )));
        }
        Ok(Self {
            b,
            registers: registers.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_close_for_distinct_ints() {
        let mut hll = HyperLogLog::new(16);
        for v in 0..10_000i64 {
            hll.add(&v.to_le_bytes());
        }
        let estimate = hll.estimate();
        let error = (estimate - 10_000.0).abs() / 10_000.0;
        assert!(error < 0.05, "estimate {estimate} off by {error}");
    }

    #[test]
    fn duplicates_do_not_inflate() {
        let mut hll = HyperLogLog::new(16);
        for _ in 0..1000 {
            for v in 0..3i64 {
                hll.add(&v.to_le_bytes());
            }
        }
        let estimate = hll.estimate().round() as i64;
        assert_eq!(estimate, 3);
    }

    #[test]
    fn serialized_length_and_merge_round_trip() {
        let mut a = HyperLogLog::new(16);
        let mut b = HyperLogLog::new(16);
        for v in 0..500i64 {
            a.add(&v.to_le_bytes());
        }
        for v in 400..900i64 {
            b.add(&v.to_le_bytes());
        }
        let image = a.serialize();
        assert_eq!(image.len(), (1 << 16) + 1);
        assert_eq!(image[0], 16);

        let mut restored = HyperLogLog::restore(&image).unwrap();
        restored.merge(&b).unwrap();
        let estimate = restored.estimate();
        let error = (estimate - 900.0).abs() / 900.0;
        assert!(error < 0.1, "merged estimate {estimate} off by {error}");
    }
}
