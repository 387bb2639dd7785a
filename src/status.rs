//! Periodic `/status` push.
//!
//! Grounded on `status_reporter.py::StatusReporter`.

use std::time::Duration;

use tracing::{info, warn};

use crate::relay::{Outcome, RelayClient};
use crate::types::StatusReport;

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(
    relay: &RelayClient,
    version: String,
    build_time: String,
    keys: Vec<String>,
    mut stop: crate::shutdown::ShutdownSignal,
) {
    info!("status reporter starting");
    loop {
        let report = StatusReport {
            version: version.clone(),
            build_time: build_time.clone(),
            keys: keys.clone(),
        };

        match relay.status(&report).await {
            Outcome::Ok => {}
            other => warn!(?other, "status push failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(REPORT_INTERVAL) => {}
            _ = stop.cancelled() => break,
        }
    }
    info!("status reporter stopping");
}
