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

//! Shared building blocks for the EmberDB execution engine: the SQL value
//! model, row abstractions, the fixed-length tuple codec, engine
//! configuration and the engine-wide error taxonomy.

pub mod config;
pub mod error;
pub mod row;
pub mod tuple;
pub mod types;

pub use error::{EngineError, Result};

/// A macro for early-returning an [`EngineError::Internal`] with a formatted
/// message, mirroring the usual `bail!` shape.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::EngineError::Internal(::anyhow::anyhow!($($arg)*)))
    };
}

/// Ensure a condition holds, or return an [`EngineError::Internal`].
#[macro_export]
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            $crate::bail!("condition `{}` failed", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::bail!($($arg)*);
        }
    };
}
