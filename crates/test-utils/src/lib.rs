//! Shared fixtures for the aslrun integration tests.

pub mod builders;
pub mod fake_backend;
pub mod fixtures;
pub mod marker_source;

pub use builders::{DataParBuilder, RunConfigBuilder, StudyRowBuilder};
pub use fake_backend::{FakeOutcome, FakeWorkerBackend};
pub use marker_source::ChannelMarkerSource;

use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Upper bound for any single async step in the integration tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test subscriber once per test binary.
///
/// Output goes through the harness's capture, so it only shows for failing
/// tests. `RUST_LOG=aslrun::watch=debug` narrows it down.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,notify=warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Fail the test if `f` takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test timed out after {TEST_TIMEOUT:?}"))
}
