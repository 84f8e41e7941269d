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

use crate::context::HostCallbacks;

/// Publishes cumulative tuples-processed to the host every `interval`
/// tuples, and flushes whatever remains when dropped.
pub struct ProgressMonitor<'a> {
    host: &'a dyn HostCallbacks,
    interval: u64,
    countdown: u64,
    total_processed: u64,
    last_reported: u64,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(host: &'a dyn HostCallbacks, interval: u64) -> Self {
        Self {
            host,
            interval,
            countdown: interval,
            total_processed: 0,
            last_reported: 0,
        }
    }

    pub fn countdown_progress(&mut self) {
        self.total_processed += 1;
        self.countdown -= 1;
        if self.countdown == 0 {
            self.host.report_progress(self.total_processed);
            self.last_reported = self.total_processed;
            self.countdown = self.interval;
        }
    }
}

impl Drop for ProgressMonitor<'_> {
    fn drop(&mut self) {
        if self.total_processed != self.last_reported {
            self.host.report_progress(self.total_processed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::context::NoopHostCallbacks;

    struct RecordingHost {
        reports: RefCell<Vec<u64>>,
        fallback: NoopHostCallbacks,
    }

    impl HostCallbacks for RecordingHost {
        fn report_progress(&self, tuples_processed: u64) {
            self.reports.borrow_mut().push(tuples_processed);
        }

        fn udaf_start(&self, function_id: i32) -> emberdb_common::Result<()> {
            self.fallback.udaf_start(function_id)
        }

        fn udaf_assemble(
            &self,
            function_id: i32,
            args: &[emberdb_common::types::Datum],
            udaf_index: usize,
        ) -> emberdb_common::Result<()> {
            self.fallback.udaf_assemble(function_id, args, udaf_index)
        }

        fn udaf_combine(
            &self,
            function_id: i32,
            serialized: &[u8],
            udaf_index: usize,
        ) -> emberdb_common::Result<()> {
            self.fallback.udaf_combine(function_id, serialized, udaf_index)
        }

        fn udaf_worker_end(
            &self,
            function_id: i32,
            udaf_index: usize,
        ) -> emberdb_common::Result<emberdb_common::types::Datum> {
            self.fallback.udaf_worker_end(function_id, udaf_index)
        }

        fn udaf_coordinator_end(
            &self,
            function_id: i32,
            udaf_index: usize,
        ) -> emberdb_common::Result<emberdb_common::types::Datum> {
            self.fallback.udaf_coordinator_end(function_id, udaf_index)
        }
    }

    #[test]
    fn reports_every_interval_and_flushes_residual() {
        let host = RecordingHost {
            reports: RefCell::new(Vec::new()),
            fallback: NoopHostCallbacks,
        };
        {
            let mut monitor = ProgressMonitor::new(&host, 10);
            for _ in 0..25 {
                monitor.countdown_progress();
            }
        }
        assert_eq!(*host.reports.borrow(), vec![10, 20, 25]);
    }
}
