//! Test helper utilities

use std::time::Duration;

use tokio::time::sleep;

/// Test environment helpers
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to become true, polling every 20ms
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        condition().await
    }
}
