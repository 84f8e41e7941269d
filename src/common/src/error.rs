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

use thiserror::Error;

use crate::types::DataType;

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Sub-kind for arithmetic failures. Range failures are distinguished from
/// each other because index-key construction downgrades lookups differently
/// for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    Overflow,
    Underflow,
    DivideByZero,
}

impl std::fmt::Display for ArithmeticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow => write!(f, "numeric value out of range: overflow"),
            Self::Underflow => write!(f, "numeric value out of range: underflow"),
            Self::DivideByZero => write!(f, "division by zero"),
        }
    }
}

/// The error type shared by the storage and executor layers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Arithmetic error: {0}")]
    Arithmetic(ArithmeticError),

    #[error("Type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    // Carries the column width so key construction can truncate and retry.
    #[error("Value exceeds the {width} byte limit of the column")]
    VarLengthMismatch { width: u32 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(Box<str>),

    #[error("Invalid plan: {0}")]
    PlanInvalid(Box<str>),

    #[error("Serialization error: {0}")]
    SerializationError(Box<str>),

    #[error("Activation failed: {0}")]
    ActivationFailed(Box<str>),

    #[error("Unknown aggregate type: {0}")]
    UnknownAggregateType(Box<str>),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

static_assertions::const_assert!(std::mem::size_of::<EngineError>() <= 24);

impl EngineError {
    pub fn overflow() -> Self {
        Self::Arithmetic(ArithmeticError::Overflow)
    }

    pub fn underflow() -> Self {
        Self::Arithmetic(ArithmeticError::Underflow)
    }

    pub fn divide_by_zero() -> Self {
        Self::Arithmetic(ArithmeticError::DivideByZero)
    }

    pub fn plan_invalid(msg: impl Into<Box<str>>) -> Self {
        Self::PlanInvalid(msg.into())
    }

    pub fn activation_failed(msg: impl Into<Box<str>>) -> Self {
        Self::ActivationFailed(msg.into())
    }

    pub fn serialization(msg: impl Into<Box<str>>) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn constraint_violation(msg: impl Into<Box<str>>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    /// True for the range and length errors that index-key construction is
    /// allowed to swallow and translate into a lookup downgrade.
    pub fn is_key_construction_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Arithmetic(ArithmeticError::Overflow)
                | Self::Arithmetic(ArithmeticError::Underflow)
                | Self::VarLengthMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_key_errors() {
        assert!(EngineError::overflow().is_key_construction_recoverable());
        assert!(EngineError::underflow().is_key_construction_recoverable());
        assert!(EngineError::VarLengthMismatch { width: 3 }.is_key_construction_recoverable());
        assert!(!EngineError::divide_by_zero().is_key_construction_recoverable());
        assert!(!EngineError::plan_invalid("x").is_key_construction_recoverable());
    }
}
