// crates/test-utils/src/lib.rs

//! Shared helpers for the `svcgraph` integration tests.
//!
//! - [`builders`]: assemble a `ServiceManager` without a config file.
//! - [`fake_transport`]: a `Transport` answering from a script.
//! - [`sync_driver`]: step `CoreRuntime` by hand, choosing completion order.

pub mod builders;
pub mod fake_transport;
pub mod sync_driver;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for any async test run.
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Install a captured subscriber once per test binary.
///
/// Output only shows for failing tests (or with `--nocapture`). The filter
/// comes from `RUST_LOG` and defaults to `svcgraph=debug`, which covers the
/// scheduler decisions a failing test usually needs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,svcgraph=debug"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `fut`, panicking if it takes longer than [`TEST_DEADLINE`].
///
/// A run whose completions never arrive hangs instead of failing; this turns
/// that into a test failure.
pub async fn with_timeout<F: Future>(fut: F) -> F::Output {
    match tokio::time::timeout(TEST_DEADLINE, fut).await {
        Ok(output) => output,
        Err(_) => panic!("run did not finish within {TEST_DEADLINE:?}"),
    }
}
