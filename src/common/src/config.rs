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

use serde::Deserialize;

/// Engine-wide tunables. Deserializable so the host can ship overrides at
/// startup; every field falls back to its default independently.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tuple slots per storage block.
    pub tuples_per_block: usize,

    /// Per-partition serialized byte budget of one `stream_more` call.
    pub bytes_serialized_threshold: usize,

    /// Keys inserted into the elastic index per `stream_more` call.
    pub elastic_tuples_per_call: usize,

    /// Tuples processed between progress reports to the host.
    pub progress_report_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tuples_per_block: 1024,
            bytes_serialized_threshold: 512 << 10,
            elastic_tuples_per_call: 10_000,
            progress_report_interval: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_overrides_keep_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"tuples_per_block": 16}"#).unwrap();
        assert_eq!(config.tuples_per_block, 16);
        assert_eq!(config.elastic_tuples_per_call, 10_000);
        assert_eq!(config.bytes_serialized_threshold, 512 << 10);
    }
}
