//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use changeflow::pipeline::{Pipeline, PipelineResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Run `pipeline` on its own thread and fail the test if it is still
/// running after `timeout`.
pub fn run_within(pipeline: &Arc<Pipeline>, timeout: Duration) -> PipelineResult<()> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let pipeline = Arc::clone(pipeline);
    std::thread::spawn(move || {
        let _ = done_tx.send(pipeline.run());
    });
    done_rx
        .recv_timeout(timeout)
        .unwrap_or_else(|_| panic!("run() still blocked after {timeout:?}"))
}
